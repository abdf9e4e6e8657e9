use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use optflow_orchestrator::PipelineHandle;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers::{self, ApiState};
use crate::websocket;

/// How long `POST /api/signals` waits for the pipeline before answering 504.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ApiServer {
    state: Arc<ApiState>,
}

impl ApiServer {
    #[must_use]
    pub fn new(pipeline: PipelineHandle) -> Self {
        Self {
            state: Arc::new(ApiState {
                pipeline,
                request_timeout: DEFAULT_REQUEST_TIMEOUT,
            }),
        }
    }

    #[must_use]
    pub fn with_request_timeout(pipeline: PipelineHandle, request_timeout: Duration) -> Self {
        Self {
            state: Arc::new(ApiState {
                pipeline,
                request_timeout,
            }),
        }
    }

    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/api/signals", post(handlers::submit_signal))
            .route("/api/health", get(handlers::health))
            .route("/api/orders", get(handlers::list_orders))
            .route("/api/orders/:order_id", get(handlers::get_order))
            .route("/ws", get(websocket::websocket_handler))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(cors),
            )
            .with_state(self.state.clone())
    }

    /// Serves until the pipeline's shutdown scope fires.
    ///
    /// # Errors
    /// Returns an error if the server fails to bind to the address or serve requests.
    pub async fn serve(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Web API listening on {}", addr);

        let shutdown = self.state.pipeline.shutdown_scope();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        tracing::info!("Web API stopped");
        Ok(())
    }
}
