//! Server assembly: configuration, router, background workers, and
//! graceful shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tokio::sync::watch;
use tower_http::cors::CorsLayer;

use crate::agents::runner::AgentRunner;
use crate::api::{self, AppState};
use crate::db::{Db, DbHandle};
use crate::dispatch::{Dispatcher, queue_snapshot_worker};
use crate::gateway::OpenAiGateway;
use crate::hub::Hub;
use crate::ws;

/// How long in-flight handlers get to drain after the shutdown signal.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(10);

pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub projects_root: PathBuf,
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            db_path: PathBuf::from("data/tables.db"),
            projects_root: PathBuf::from("data/projects"),
            dev_mode: false,
        }
    }
}

/// Build the full application router: REST API plus the WebSocket endpoint.
pub fn build_router(state: Arc<AppState>) -> Router {
    api::api_router()
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}

/// Assemble shared state from a config. Split out so integration tests can
/// drive the router without binding a socket.
pub fn build_state(config: &ServerConfig) -> Result<Arc<AppState>> {
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }
    std::fs::create_dir_all(&config.projects_root)
        .context("failed to create projects root")?;

    let db = DbHandle::new(Db::new(&config.db_path).context("failed to initialize database")?);
    let hub = Arc::new(Hub::new());
    let gateway = OpenAiGateway::from_env();
    if gateway.is_none() {
        eprintln!("[server] no model backend configured; agents will use fallback replies");
    }

    let runner = Arc::new(AgentRunner::new(
        db.clone(),
        hub.clone(),
        gateway.clone(),
        config.projects_root.clone(),
    ));

    Ok(Arc::new(AppState {
        db,
        hub,
        runner,
        gateway,
        projects_root: config.projects_root.clone(),
    }))
}

/// Start the server and block until shutdown completes.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let state = build_state(&config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let dispatcher = Dispatcher::new(state.db.clone(), state.hub.clone(), state.runner.clone());
    tokio::spawn(dispatcher.run(shutdown_rx.clone()));
    tokio::spawn(queue_snapshot_worker(
        state.db.clone(),
        state.hub.clone(),
        shutdown_rx.clone(),
    ));

    let mut app = build_router(state);
    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let host = if config.dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    let local_addr = listener.local_addr()?;
    println!("crewroom listening on http://{}", local_addr);

    let mut serve_signal = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = serve_signal.changed().await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(SHUTDOWN_DRAIN, server).await {
        Ok(joined) => {
            joined.context("server task panicked")?.context("server error")?;
        }
        Err(_) => {
            eprintln!("[server] drain window elapsed, terminating");
        }
    }

    println!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
    println!("\nshutting down...");
}
