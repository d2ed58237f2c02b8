use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use clipsync::config::{Cli, Config, default_config_dir, default_config_path};
use clipsync::db::Database;
use clipsync::handler::AppState;
use clipsync::routes::app;
use clipsync::store::FallbackStore;
use clipsync::unpack_error;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = Cli::parse();
    let _ = dotenvy::dotenv();

    // With --config, data (the database file) lives next to the config file.
    // Otherwise both live under ~/.clipsync/
    let (config_path, data_dir) = match args.config_path {
        Some(path) => {
            let path = std::path::PathBuf::from(path);
            let dir = path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| std::path::PathBuf::from("."));
            (path, dir)
        }
        None => (default_config_path(), default_config_dir()),
    };

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    tracing::info!("clipsync.svc starting");

    let mut cfg = Config::load_or_default(&config_path).unwrap_or_else(|e| {
        tracing::error!(error = %unpack_error(&e), path = ?config_path, "failed to load config file");
        std::process::exit(1);
    });
    if let Some(port) = args.port {
        cfg.app.set_port(port);
    }

    if cfg.app.get_db().is_some() {
        if let Err(e) = std::fs::create_dir_all(&data_dir) {
            tracing::error!(error = %e, path = ?data_dir, "failed to create data directory");
            std::process::exit(1);
        }
    }

    // A database that cannot be opened is not fatal: the store serves from
    // memory instead.
    let db = match Database::new(&cfg, &data_dir).await {
        Ok(db) => db.map(Arc::new),
        Err(e) => {
            tracing::warn!(error = %unpack_error(&e), "failed to setup database, falling back to memory store");
            None
        }
    };
    let store = Arc::new(FallbackStore::new(db, cfg.app.retention_millis()));

    let address = format!("0.0.0.0:{}", cfg.app.get_port());
    let cancellation_token = CancellationToken::new();

    let cleanup_store = store.clone();
    let cleanup_token = cancellation_token.clone();
    let cleanup_every = Duration::from_secs(cfg.app.cleanup_interval_seconds.max(1));
    let cleanup = tokio::spawn(async move {
        let mut interval = tokio::time::interval(cleanup_every);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match cleanup_store.purge_expired().await {
                        Ok(0) => {}
                        Ok(n) => tracing::info!(removed = n, "purged expired clipboards"),
                        Err(e) => tracing::warn!("failed to purge expired clipboards: {}", e),
                    }
                }
                _ = cleanup_token.cancelled() => {
                    tracing::info!("expiry sweeper shutting down");
                    break;
                }
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(&address).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup tcp listener");
        std::process::exit(1);
    });

    tracing::info!("clipsync.svc running on {}", &address);
    tokio::select! {
        result = axum::serve(listener, app(AppState { store: store.clone() })) => {
            if let Err(err) = result {
                tracing::error!(error = %err, "server stopped unexpectedly");
                std::process::exit(1);
            }
        }
        _ = signal::ctrl_c() => {
            tracing::info!("ctrl+c signal received, preparing to shutdown");
        }
    }

    cancellation_token.cancel();
    let _ = cleanup.await;
    if let Some(db) = store.database() {
        if let Err(e) = db.sync().await {
            tracing::warn!(error = %e, "final replica sync failed");
        }
    }
    tracing::info!("clipsync.svc going off, graceful shutdown complete");
}
