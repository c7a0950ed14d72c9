//! CLI interface for Launchpad
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Launchpad
///
/// Turns a plain-language application request into a running FastAPI backend
/// and React frontend on this machine.
#[derive(Parser, Debug)]
#[command(name = "launchpad")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the full pipeline for a request
    Run {
        /// What the application should do
        request: String,

        /// Attach a text document to the request (repeatable)
        #[arg(long = "attach", value_name = "FILE")]
        attachments: Vec<PathBuf>,

        /// Stop after writing the project bundle
        #[arg(long)]
        no_deploy: bool,

        /// Leave the deployment running and exit
        #[arg(long, conflicts_with = "no_deploy")]
        detach: bool,
    },

    /// Analyze a request and print the requirements
    Analyze {
        /// What the application should do
        request: String,

        /// Attach a text document to the request (repeatable)
        #[arg(long = "attach", value_name = "FILE")]
        attachments: Vec<PathBuf>,
    },

    /// Deploy an existing project bundle
    Deploy {
        /// Bundle root directory (contains backend/ and frontend/)
        bundle_dir: PathBuf,

        /// Leave the deployment running and exit
        #[arg(long)]
        detach: bool,
    },

    /// Stop a deployment
    Stop {
        /// Deployment ID
        deployment_id: String,
    },

    /// List deployments
    List,

    /// Show daemon, provider and deployment status
    Status,

    /// Serve the HTTP API
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:8000")]
        bind: SocketAddr,
    },

    /// Serve a directory of static files
    #[command(hide = true)]
    ServeStatic {
        #[arg(long)]
        dir: PathBuf,

        #[arg(long)]
        port: u16,

        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
}
