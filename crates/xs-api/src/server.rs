//! API server wiring

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use xs_config::{ApiSettings, Settings};
use xs_core::engine::resolve_binary;
use xs_core::Orchestrator;

use crate::error::{ApiError, ApiResult};
use crate::{handlers, stream};

/// State shared across handlers
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    pub settings: Arc<ApiSettings>,
    /// Engine binary reported by `GET /system/engine`.
    pub engine_binary: Arc<PathBuf>,
    /// Cancelled once the server begins a graceful shutdown.
    pub shutdown: CancellationToken,
}

impl ApiState {
    pub fn new(orchestrator: Arc<Orchestrator>, settings: &Settings) -> Self {
        Self {
            orchestrator,
            settings: Arc::new(settings.api.clone()),
            engine_binary: Arc::new(resolve_binary(settings.engine.binary.as_deref())),
            shutdown: CancellationToken::new(),
        }
    }
}

/// REST + SSE server in front of one orchestrator
pub struct ApiServer {
    state: ApiState,
}

impl ApiServer {
    pub fn new(state: ApiState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &ApiState {
        &self.state
    }

    /// Build the router with every endpoint
    pub fn create_app(&self) -> Router {
        Router::new()
            .route("/subscriptions", get(handlers::list_subscriptions))
            .route("/subscriptions/auto-connect", post(handlers::auto_connect))
            .route("/subscriptions/:id/url-test", post(handlers::url_test))
            .route(
                "/subscriptions/:sub_id/servers/:server_id/start",
                post(handlers::start_server),
            )
            .route("/subscriptions/server/stop", post(handlers::stop_server))
            .route("/subscriptions/server/status", get(handlers::server_status))
            .route("/system/engine", get(handlers::engine_info))
            .route("/logs/stream", get(stream::log_stream))
            .with_state(self.state.clone())
            .layer(cors_layer(&self.state.settings.cors_origins))
    }

    /// Bind the configured listen address and serve until `shutdown` resolves.
    pub async fn serve(self, shutdown: impl Future<Output = ()> + Send + 'static) -> ApiResult<()> {
        let listen = self.state.settings.listen.clone();
        let listener = TcpListener::bind(listen.as_str()).await.map_err(|e| {
            ApiError::service_unavailable(format!("Failed to bind to {listen}: {e}"))
        })?;
        self.serve_on(listener, shutdown).await
    }

    /// Serve on an already bound listener. When `shutdown` resolves, running
    /// auto-connects are cancelled and log streams end so in-flight requests
    /// can drain.
    pub async fn serve_on(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> ApiResult<()> {
        let addr: Option<SocketAddr> = listener.local_addr().ok();
        tracing::info!(addr = ?addr, "API server listening");
        let app = self.create_app();
        let token = self.state.shutdown.clone();
        let shutdown = async move {
            shutdown.await;
            tracing::info!("API server shutting down");
            token.cancel();
        };
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ApiError::Internal { source: e.into() })
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "invalid CORS origin ignored");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods(Any)
        .allow_headers(Any)
}
