//! # Pushline Server
//!
//! Horizontally scalable notification delivery edge with priority-ordered
//! scheduling and at-least-once semantics.
//!
//! ## Overview
//!
//! Each replica runs the full pipeline:
//!
//! - **Ingestion**: consumes user-keyed events from the log bus and
//!   persists them in bounded transactional batches
//! - **Scheduling**: claim workers lease pending rows under
//!   `FOR UPDATE SKIP LOCKED`, delivery workers fan out to live push
//!   channels, a status flusher batches outcomes back to the store
//! - **Streaming**: long-lived SSE push channels with heartbeats and
//!   stale-connection eviction
//! - **History**: a REST endpoint serving recent notifications so
//!   reconnecting clients can catch up
//!
//! ## Architecture
//!
//! The server is built on Axum and uses:
//! - PostgreSQL for the authoritative notification lifecycle
//! - Kafka (or any compatible log bus) for event ingestion
//! - An in-process registry for per-user fan-out

/// Route organization
pub mod routes;

/// HTTP handlers: streaming, history, health
pub mod handlers;

/// Server config
pub mod config;

/// Error types and handling
pub mod errors;

#[cfg(test)]
mod tests;

use clap::Parser;
use config::Config;
use pushline_core::{
    Ingestor, NotificationStore, PostgresStore, Registry, Scheduler,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Command line arguments for the Pushline server
#[derive(Parser, Debug)]
#[command(name = "pushline-server")]
#[command(about = "Notification delivery server with priority-ordered scheduling and SSE push")]
struct Args {
    /// Server port (overrides config)
    #[arg(short, long, env = "SERVER_PORT")]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,
}

// Server application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn NotificationStore>,
    pub registry: Arc<Registry>,
    pub shutdown: CancellationToken,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration from environment
    let mut config = Config::from_env()?;

    // Override config with CLI arguments if provided
    if let Some(port) = args.port {
        config.server_port = port;
    }
    if let Some(host) = args.host {
        config.server_host = host;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    "pushline_server=debug,pushline_core=debug,tower_http=debug"
                        .into()
                }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Server configuration loaded");

    // Connect to the store
    let store = {
        let Some(db_url) = &config.database_url else {
            error!("DATABASE_URL environment variable is required");
            return Err(anyhow::anyhow!("DATABASE_URL not set"));
        };
        if !db_url.starts_with("postgres://")
            && !db_url.starts_with("postgresql://")
        {
            error!("Only PostgreSQL database URLs are supported");
            return Err(anyhow::anyhow!(
                "Invalid database URL: must start with postgres:// or postgresql://"
            ));
        }

        info!("Connecting to PostgreSQL store");
        match PostgresStore::connect(db_url).await {
            Ok(store) => store,
            Err(e) => {
                error!("Failed to connect to PostgreSQL: {}", e);
                return Err(anyhow::anyhow!(
                    "Database connection failed: {}",
                    e
                ));
            }
        }
    };

    store.initialize_schema().await?;
    info!("Store initialized successfully");

    let store: Arc<dyn NotificationStore> = Arc::new(store);

    // Root cancellation: every long-running loop selects on this token
    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());

    // Fan-out registry plus its liveness maintenance loop
    let registry = Arc::new(Registry::new(config.registry.clone()));
    let maintenance_handle =
        registry.spawn_maintenance(shutdown.clone());

    // One claim identity for the whole process lifetime
    let owner_id =
        format!("push-{}-{}", std::process::id(), Uuid::new_v4());
    info!(owner = %owner_id, "replica identity assigned");

    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        config.scheduler.clone(),
        owner_id,
        shutdown.clone(),
    ));
    scheduler.start().await;

    // Bus ingestion; degraded mode without it would be useless, so a
    // consumer construction error is fatal at startup.
    let ingest_handle = {
        let ingestor =
            Ingestor::new(config.ingest.clone(), Arc::clone(&store))
                .map_err(|e| {
                    anyhow::anyhow!("ingestor startup failed: {e}")
                })?;
        let token = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = ingestor.run(token).await {
                error!("ingestor exited with error: {e}");
            }
        })
    };

    let state = AppState {
        store,
        registry,
        shutdown: shutdown.clone(),
    };

    let app = routes::create_app(state);

    let addr = SocketAddr::new(
        config.server_host.parse().unwrap_or_else(|_| {
            warn!(
                "invalid SERVER_HOST {:?}, falling back to 0.0.0.0",
                config.server_host
            );
            std::net::IpAddr::from([0, 0, 0, 0])
        }),
        config.server_port,
    );
    info!(
        "Starting Pushline server on {}:{}",
        config.server_host, config.server_port
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let serve_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            serve_token.cancelled().await;
        })
        .await?;

    // HTTP is down; drain the pipeline. The status flusher is the last
    // scheduler worker to exit and performs a final unconditional flush.
    info!("HTTP server stopped, draining workers");
    scheduler.shutdown().await;

    match tokio::time::timeout(config.shutdown_grace, ingest_handle)
        .await
    {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("ingestor task failed: {e:?}"),
        Err(_) => warn!("ingestor did not stop within grace period"),
    }
    maintenance_handle.abort();

    info!("Shutdown complete");
    Ok(())
}

fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to install ctrl-c handler: {e}");
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    error!("failed to install SIGTERM handler: {e}")
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate => {}
        }

        info!("Shutdown signal received");
        shutdown.cancel();
    });
}
