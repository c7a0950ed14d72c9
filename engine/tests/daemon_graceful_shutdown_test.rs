//! Integration tests for daemon graceful shutdown
//!
//! A daemon deploys a bundle through its HTTP API, then shuts down: owned
//! deployments must be stopped, their rows marked stopped and the PID file
//! removed.

mod common;

use std::time::Duration;
use tempfile::TempDir;

use launchpad_engine::config::Config;
use launchpad_engine::daemon::Daemon;
use launchpad_engine::db::Database;
use launchpad_engine::integrator::Integrator;
use sdk::{CodeArtifact, DeploymentStatus, StackTag, UiArtifact};

fn create_test_config(temp_dir: &TempDir, ports_from: u16) -> Config {
    let mut config = common::test_config(temp_dir.path());
    let (start, end) = common::free_range(ports_from, 4);
    config.deploy.port_range_start = start;
    config.deploy.port_range_end = end;
    config.deploy.health_attempts = 50;

    // The daemon runs inside the test binary, so name the launchpad binary directly
    let serve_static = common::command(&[
        env!("CARGO_BIN_EXE_launchpad"),
        "serve-static",
        "--dir",
        "{dir}",
        "--port",
        "{port}",
    ]);
    config.deploy.backend_command = serve_static.clone();
    config.deploy.frontend_command = serve_static;
    config
}

#[tokio::test]
async fn test_graceful_shutdown_stops_owned_deployments() {
    let temp_dir = TempDir::new().unwrap();
    let config = create_test_config(&temp_dir, 45000);
    let pid_file = config.core.data_dir.join("launchpad.pid");
    let db_path = config.database_path();

    let bundle = Integrator::new(config.core.projects_dir.clone())
        .integrate(
            &CodeArtifact::new(StackTag::python_fastapi(), common::backend_source()),
            &UiArtifact::new(StackTag::javascript_react(), common::ui_source()),
        )
        .await
        .unwrap();

    let daemon = Daemon::start(config).await.unwrap();
    assert!(pid_file.exists());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let api = format!("http://{}", listener.local_addr().unwrap());
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(daemon.serve_until(listener, async {
        rx.await.ok();
    }));

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/api/deploy", api))
        .json(&serde_json::json!({ "bundle_root": bundle.root }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
    let record: serde_json::Value = response.json().await.unwrap();
    let id = record["id"].as_str().unwrap().to_string();
    let backend_url = record["backend_url"].as_str().unwrap().to_string();
    assert_eq!(record["status"], "running");

    let fetched: serde_json::Value = client
        .get(format!("{}/api/deployments/{}", api, id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["bundle_id"], bundle.id.as_str());

    tx.send(()).unwrap();
    server.await.unwrap().unwrap();

    assert!(!pid_file.exists());
    let health = client
        .get(format!("{}/health", backend_url))
        .timeout(Duration::from_secs(1))
        .send()
        .await;
    assert!(health.is_err(), "backend still answering after shutdown");

    let db = Database::new(&db_path).await.unwrap();
    let stored = db.deployments().get(&id).await.unwrap().unwrap();
    assert_eq!(stored.record.status, DeploymentStatus::Stopped);
    assert!(db.deployments().list_active().await.unwrap().is_empty());
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_restart_reconciles_detached_deployment() {
    let temp_dir = TempDir::new().unwrap();
    let config = create_test_config(&temp_dir, 45200);

    let bundle = Integrator::new(config.core.projects_dir.clone())
        .integrate(
            &CodeArtifact::new(StackTag::python_fastapi(), common::backend_source()),
            &UiArtifact::new(StackTag::javascript_react(), common::ui_source()),
        )
        .await
        .unwrap();

    let daemon = Daemon::start(config.clone()).await.unwrap();
    let record = daemon.pipeline().deploy(&bundle).await.unwrap();
    daemon.pipeline().deployer().detach(&record.id).await.unwrap();
    daemon.graceful_shutdown().await;
    drop(daemon);

    // Detached services survive the first daemon
    let alive = reqwest::get(format!("{}/health", record.backend_url)).await;
    assert!(alive.is_ok());

    let daemon = Daemon::start(config).await.unwrap();
    let stored = daemon
        .pipeline()
        .deployer()
        .get(&record.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, DeploymentStatus::Stopped);
    drop(daemon);
}
