// Launchpad
// Main entry point for the launchpad binary

use clap::Parser;
use launchpad_engine::api::static_site;
use launchpad_engine::cli::{Cli, Command};
use launchpad_engine::config::Config;
use launchpad_engine::daemon::Daemon;
use launchpad_engine::handlers::{
    handle_analyze, handle_deploy, handle_list, handle_run, handle_status, handle_stop,
    OutputFormat,
};
use launchpad_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // The static server runs as a deployment child; it needs no config
    if let Command::ServeStatic { dir, port, host } = &cli.command {
        init_telemetry_with_level(cli.log.as_deref().unwrap_or("info"));
        return static_site::serve(dir, host, *port).await;
    }

    // Load configuration (or use custom path if provided)
    let mut config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log overrides the configured level; RUST_LOG overrides both
    if let Some(level) = &cli.log {
        config.core.log_level = level.clone();
    }
    init_telemetry_with_level(&config.core.log_level);

    tracing::debug!(
        "Launchpad v{} ({} - {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_COMMIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Handle commands
    match cli.command {
        Command::Run {
            request,
            attachments,
            no_deploy,
            detach,
        } => handle_run(request, attachments, no_deploy, detach, &config, format).await,

        Command::Analyze {
            request,
            attachments,
        } => handle_analyze(request, attachments, &config, format).await,

        Command::Deploy { bundle_dir, detach } => {
            handle_deploy(bundle_dir, detach, &config, format).await
        }

        Command::Stop { deployment_id } => handle_stop(deployment_id, &config, format).await,

        Command::List => handle_list(&config, format).await,

        Command::Status => handle_status(&config, format).await,

        Command::Serve { bind } => {
            tracing::info!("Starting daemon...");
            let daemon = Daemon::start(config).await?;
            daemon.serve(bind).await
        }

        Command::ServeStatic { .. } => Ok(()),
    }
}
