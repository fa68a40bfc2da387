//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router for the decision service and admin API
//! - Wire up middleware (tracing, request ID, timeout, body limit)
//! - Serve until the shutdown broadcast fires

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin;
use crate::clock::Clock;
use crate::config::GuardConfig;
use crate::http::handlers;
use crate::http::request::X_REQUEST_ID;
use crate::security::SecurityCoordinator;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<SecurityCoordinator>,
    pub config: Arc<GuardConfig>,
    pub clock: Arc<dyn Clock>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(coordinator: Arc<SecurityCoordinator>, config: Arc<GuardConfig>, clock: Arc<dyn Clock>) -> Self {
        Self {
            coordinator,
            config,
            clock,
            started_at: Instant::now(),
        }
    }
}

pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(state: AppState) -> Self {
        Self {
            router: Self::build_router(state),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn build_router(state: AppState) -> Router {
        let config = Arc::clone(&state.config);
        let request_id = axum::http::HeaderName::from_static(X_REQUEST_ID);

        let mut router = Router::new().route("/health", get(handlers::health));

        if config.api.service_token.is_empty() {
            tracing::warn!("api.service_token is empty; decision API disabled");
        } else {
            let decisions = Router::new()
                .route("/v1/decisions", post(handlers::decide))
                .route("/v1/authentications", post(handlers::authenticate))
                .route_layer(middleware::from_fn_with_state(state.clone(), handlers::service_auth));
            router = router.merge(decisions);
        }

        if config.admin.enabled {
            router = router.merge(admin::setup_admin_router(state.clone()));
        }

        router
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(config.listener.max_body_bytes))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::new(request_id.clone()))
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until `shutdown` fires, then drain in-flight requests.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
