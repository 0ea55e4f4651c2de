//! taskops server binary.
//!
//! Bootstrap order matters: logging first so every later step can report,
//! then configuration validation and the metrics registry check -- both
//! startup-fatal -- and only then the network lifecycle.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use taskops_server::auth::{PasswordHasher, TokenKeys};
use taskops_server::cache::UserCache;
use taskops_server::config::AppConfig;
use taskops_server::health::{CacheProbe, HealthAggregator, StorageProbe};
use taskops_server::network::{AppState, NetworkModule, ShutdownController};
use taskops_server::observability::metrics::{series, standard_registry};
use taskops_server::observability::init_logging;
use taskops_server::storage::{MemoryStorage, Storage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::parse();
    init_logging(&config);
    config.validate()?;

    // A missing metric series must fail here, not silently drop samples
    // under load.
    let metrics = Arc::new(standard_registry()?);
    metrics.require(series::REQUIRED)?;

    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let cache = Arc::new(UserCache::new());
    let tokens = Arc::new(TokenKeys::new(&config.jwt_secret, config.token_ttl()));
    let shutdown = Arc::new(ShutdownController::new());

    let mut health = HealthAggregator::new(
        Arc::clone(&shutdown),
        config.probe_timeout(),
        config.environment.clone(),
    );
    health.register_probe(Arc::new(StorageProbe::new(Arc::clone(&storage))));
    health.register_probe(Arc::new(CacheProbe::new(Arc::clone(&cache))));

    let state = AppState {
        storage,
        cache,
        metrics,
        tokens,
        hasher: Arc::new(PasswordHasher::new()),
        health: Arc::new(health),
        shutdown,
        config: Arc::new(config.clone()),
    };

    info!(
        environment = %config.environment,
        version = env!("CARGO_PKG_VERSION"),
        "starting taskops server"
    );

    let mut network = NetworkModule::new(config.network(), state);
    let port = network.start().await?;
    info!(port, "listening");

    network.serve(shutdown_signal()).await?;
    info!("server stopped");
    Ok(())
}

/// Resolves when SIGINT (ctrl-c) or SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    info!("shutdown signal received, draining");
    // Give load balancers a beat to observe readiness flipping before the
    // listener closes.
    tokio::time::sleep(Duration::from_millis(100)).await;
}
