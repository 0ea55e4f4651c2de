//! Network module with deferred startup lifecycle.
//!
//! Implements the deferred startup pattern: `new()` creates resources,
//! `start()` binds the TCP listener, and `serve()` starts accepting
//! connections. The split lets bootstrap validate configuration and the
//! metrics registry between construction and serving.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::auth::AuthGate;
use crate::pipeline::{self, AuthLayer};

use super::config::NetworkConfig;
use super::handlers::{
    create_task_handler, delete_task_handler, get_task_handler, health_handler, list_tasks_handler,
    liveness_handler, login_handler, me_handler, metrics_handler, readiness_handler,
    register_handler, root_handler, update_task_handler, AppState,
};
use super::middleware::build_transport_layers;
use super::shutdown::ShutdownController;

/// How long `serve` waits for in-flight requests after the shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Manages the full HTTP server lifecycle.
///
/// Follows the deferred startup pattern:
/// 1. `new()` -- takes the already-wired application state
/// 2. `start()` -- binds the TCP listener to the configured address
/// 3. `serve()` -- accepts connections until shutdown is signalled, then
///    drains in-flight requests
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    state: AppState,
}

impl NetworkModule {
    /// Creates a new network module without binding any port.
    #[must_use]
    pub fn new(config: NetworkConfig, state: AppState) -> Self {
        Self {
            config,
            listener: None,
            state,
        }
    }

    /// Returns a shared reference to the shutdown controller.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.state.shutdown)
    }

    /// Assembles the axum router: routes, the observability pipeline, and
    /// the transport middleware stack.
    ///
    /// Route surface:
    /// - `GET /` -- service info
    /// - `GET /metrics` -- text exposition (public, read-only)
    /// - `GET /health`, `/health/live`, `/health/ready`
    /// - `POST /api/v1/auth/register`, `POST /api/v1/auth/login`
    /// - `GET /api/v1/auth/me` (protected)
    /// - `POST|GET /api/v1/tasks`, `GET|PUT|DELETE /api/v1/tasks/{id}`
    ///   (protected)
    #[must_use]
    pub fn build_router(&self) -> Router {
        let gate = Arc::new(AuthGate::new(Arc::clone(&self.state.tokens)));

        let protected = Router::new()
            .route("/api/v1/auth/me", get(me_handler))
            .route(
                "/api/v1/tasks",
                post(create_task_handler).get(list_tasks_handler),
            )
            .route(
                "/api/v1/tasks/{id}",
                get(get_task_handler)
                    .put(update_task_handler)
                    .delete(delete_task_handler),
            )
            .route_layer(AuthLayer::new(gate, Arc::clone(&self.state.metrics)));

        let public = Router::new()
            .route("/", get(root_handler))
            .route("/metrics", get(metrics_handler))
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .route("/api/v1/auth/register", post(register_handler))
            .route("/api/v1/auth/login", post(login_handler));

        let router = pipeline::apply(
            protected.merge(public),
            &self.state.metrics,
            &self.state.shutdown,
        );

        router
            .layer(build_transport_layers(&self.config))
            .with_state(self.state.clone())
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound port, which may differ from the configured
    /// port when port 0 is used (OS-assigned ephemeral port).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!("TCP listener bound to {}:{}", self.config.host, port);

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves connections until the shutdown signal fires, then drains.
    ///
    /// Consumes `self` because the listener is moved into the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server hits a fatal I/O error.
    ///
    /// # Panics
    ///
    /// Panics if `start()` was not called before `serve()`.
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let router = self.build_router();
        let listener = self
            .listener
            .expect("start() must be called before serve()");
        let shutdown_ctrl = Arc::clone(&self.state.shutdown);
        let tls = self.config.tls.clone();

        // Readiness probes start passing from here.
        shutdown_ctrl.set_ready();

        if let Some(tls_config) = tls {
            serve_tls(listener, router, &tls_config, shutdown_ctrl, shutdown).await
        } else {
            serve_plain(listener, router, shutdown_ctrl, shutdown).await
        }
    }
}

/// Serves plain HTTP using axum's built-in server.
async fn serve_plain(
    listener: TcpListener,
    router: Router,
    shutdown_ctrl: Arc<ShutdownController>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    info!("serving plain HTTP connections");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    drain(&shutdown_ctrl).await;
    Ok(())
}

/// Serves TLS connections using `axum-server` with rustls.
///
/// Reuses the pre-bound TCP listener by converting it to a
/// `std::net::TcpListener`.
async fn serve_tls(
    listener: TcpListener,
    router: Router,
    tls_config: &super::config::TlsConfig,
    shutdown_ctrl: Arc<ShutdownController>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    use axum_server::tls_rustls::RustlsConfig;

    let rustls_config = RustlsConfig::from_pem_file(&tls_config.cert_path, &tls_config.key_path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load TLS certificates: {e}"))?;

    let addr = listener.local_addr()?;
    let std_listener = listener.into_std()?;
    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();

    // Wait for the shutdown signal, then trigger graceful shutdown on the
    // axum-server handle.
    tokio::spawn(async move {
        shutdown.await;
        shutdown_handle.graceful_shutdown(None);
    });

    info!("serving TLS connections on {}", addr);

    axum_server::from_tcp_rustls(std_listener, rustls_config)
        .handle(handle)
        .serve(router.into_make_service())
        .await?;

    drain(&shutdown_ctrl).await;
    Ok(())
}

/// Transitions to draining and waits for in-flight requests to complete.
async fn drain(shutdown_ctrl: &ShutdownController) {
    shutdown_ctrl.trigger_shutdown();
    if shutdown_ctrl.wait_for_drain(DRAIN_TIMEOUT).await {
        info!("all in-flight requests drained");
    } else {
        warn!("drain timeout expired with requests still in flight");
    }
}
