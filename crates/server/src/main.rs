//! tracedb server binary.
//!
//! Launches the OTLP gRPC receiver, the HTTP surface (OTLP/HTTP ingest plus
//! the JSON read API), and the background retention job over one shared
//! trace store.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (gRPC :4317, HTTP :4318, ./data/traces.db)
//! tracedb-server
//!
//! # Start with a config file and a shorter retention horizon
//! tracedb-server --config tracedb.toml --retention-days 14
//!
//! # Environment variables use the TRACEDB__ prefix
//! TRACEDB__DATA_DIR=/var/lib/tracedb tracedb-server
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use tracedb_server::cleanup::RetentionJob;
use tracedb_server::config::{Cli, Config, ConfigError};
use tracedb_server::http::{self, AppState, ServerInfo};
use tracedb_server::ingest::{OtlpTraceReceiver, TraceServiceServer};
use tracedb_store::{StoreError, TraceStore};

/// Top-level error type for the server binary.
#[derive(Debug)]
enum ServerError {
    Config(ConfigError),
    Store(StoreError),
    Server(Box<dyn std::error::Error>),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Config(e) => write!(f, "configuration error: {}", e),
            ServerError::Store(e) => write!(f, "store error: {}", e),
            ServerError::Server(e) => write!(f, "server error: {}", e),
        }
    }
}

impl std::error::Error for ServerError {}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    let cli = Cli::parse();
    let config = cli.apply(Config::load(cli.config.as_deref()).map_err(ServerError::Config)?);

    init_logging(&config);

    std::fs::create_dir_all(&config.data_dir)
        .map_err(|e| ServerError::Server(Box::new(e)))?;
    let db_path = config.data_dir.join("traces.db");
    let store = Arc::new(
        TraceStore::open(&db_path, config.retention_days).map_err(ServerError::Store)?,
    );

    tracing::info!(
        db = %db_path.display(),
        retention_days = store.retention_days(),
        "starting tracedb"
    );

    // The job's first tick fires immediately, covering the startup pass.
    let retention_handle = RetentionJob::new(Arc::clone(&store))
        .with_interval(Duration::from_secs(config.cleanup_interval_secs))
        .start();

    // Shutdown sequence: the signal task flips the watch, both listeners
    // drain, then the retention job stops and the store releases the file.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(wait_for_shutdown(shutdown_tx));

    let http_task = if config.disable_http {
        tracing::info!("HTTP listener disabled");
        None
    } else {
        let listener = tokio::net::TcpListener::bind(config.http_listen)
            .await
            .map_err(|e| ServerError::Server(Box::new(e)))?;
        let app = http::router(AppState {
            store: Arc::clone(&store),
            info: ServerInfo::from_config(&config),
        });
        let mut rx = shutdown_rx.clone();
        tracing::info!(http_listen = %config.http_listen, "OTLP HTTP and JSON API listening");
        Some(tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = rx.changed().await;
                })
                .await
        }))
    };

    let mut grpc_rx = shutdown_rx;
    tracing::info!(grpc_listen = %config.grpc_listen, "OTLP gRPC listening");
    tonic::transport::Server::builder()
        .add_service(TraceServiceServer::new(OtlpTraceReceiver::new(Arc::clone(&store))))
        .serve_with_shutdown(config.grpc_listen, async move {
            let _ = grpc_rx.changed().await;
        })
        .await
        .map_err(|e| ServerError::Server(Box::new(e)))?;

    if let Some(task) = http_task {
        match task.await {
            Ok(result) => result.map_err(|e| ServerError::Server(Box::new(e)))?,
            Err(e) => return Err(ServerError::Server(Box::new(e))),
        }
    }

    // Stop background cleanup before releasing the database file.
    retention_handle.abort();
    store.close();
    tracing::info!("server shutdown complete");
    Ok(())
}

/// Waits for Ctrl-C or SIGTERM, then tells every listener to drain.
#[allow(clippy::expect_used)]
async fn wait_for_shutdown(notify: watch::Sender<bool>) {
    let ctrl_c = async {
        // Without signal handlers the server could never shut down cleanly.
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, draining"),
        _ = terminate => tracing::info!("received SIGTERM, draining"),
    }

    let _ = notify.send(true);
}

/// Initializes the tracing subscriber, honoring `RUST_LOG` and the
/// configured output format.
fn init_logging(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    if config.log_format.is_json() {
        registry
            .with(fmt::layer().json().flatten_event(true).with_current_span(false))
            .init();
    } else {
        registry.with(fmt::layer()).init();
    }
}
