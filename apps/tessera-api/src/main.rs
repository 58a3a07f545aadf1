//! # Tessera API Server
//!
//! ## Usage
//! ```bash
//! # Defaults, platform config file and TESSERA__* environment
//! cargo run -p tessera-api
//!
//! # Explicit config file
//! cargo run -p tessera-api -- --config ./tessera.toml
//!
//! # Override single settings
//! TESSERA__SERVER__PORT=9000 TESSERA__DATABASE__PATH=:memory: cargo run -p tessera-api
//! ```

use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context};
use tessera_api::telemetry::init_tracing;
use tessera_api::{build_router, ApiConfig, AppState};
use tessera_core::SchemaRegistry;
use tessera_db::Database;
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Some(config_path) = parse_args()? else {
        return Ok(());
    };

    let config = ApiConfig::load(config_path).context("Failed to load configuration")?;
    init_tracing(&config.logging.filter);
    info!(
        host = %config.server.host,
        port = config.server.port,
        database = ?config.database.path,
        naming = ?config.naming,
        "Configuration loaded"
    );

    let db = Database::new(config.db_config())
        .await
        .context("Failed to open database")?;

    let registry = SchemaRegistry::new(config.naming.clone());
    let state = AppState::initialize(db.clone(), &registry, config.server.body_limit_bytes)
        .await
        .context("Failed to register resources")?;
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    db.close().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Returns the `--config` path, or `None` when only help was requested.
fn parse_args() -> anyhow::Result<Option<Option<PathBuf>>> {
    let args: Vec<String> = env::args().collect();
    let mut config_path = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                let Some(path) = args.get(i + 1) else {
                    bail!("--config requires a path");
                };
                config_path = Some(PathBuf::from(path));
                i += 1;
            }
            "--help" | "-h" => {
                println!("Tessera API Server");
                println!();
                println!("Usage: tessera-api [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <PATH>  Config file (default: $TESSERA_CONFIG or platform config dir)");
                println!("  -h, --help           Show this help message");
                return Ok(None);
            }
            other => bail!("Unknown argument: {}", other),
        }
        i += 1;
    }

    Ok(Some(config_path))
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
