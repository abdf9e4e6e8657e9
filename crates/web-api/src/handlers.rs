use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use optflow_core::{OptionSpread, Order};
use optflow_orchestrator::{PipelineHandle, PipelineStatus, TerminalError, TerminalKind};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::warn;
use uuid::Uuid;

pub struct ApiState {
    pub pipeline: PipelineHandle,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRequest {
    pub symbol: String,
    pub signal_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalResponse {
    pub request_id: Uuid,
    pub orders: Vec<Order>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub request_id: Option<Uuid>,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDetail {
    pub order: Order,
    /// Present when this process placed the order.
    pub spread: Option<OptionSpread>,
}

type ApiError = (StatusCode, Json<ErrorBody>);

const fn status_for(kind: TerminalKind) -> StatusCode {
    match kind {
        TerminalKind::Validation => StatusCode::BAD_REQUEST,
        TerminalKind::PolicyViolation => StatusCode::CONFLICT,
        TerminalKind::Upstream => StatusCode::BAD_GATEWAY,
        TerminalKind::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn terminal(request_id: Uuid, e: TerminalError) -> ApiError {
    (
        status_for(e.kind),
        Json(ErrorBody {
            request_id: Some(request_id),
            kind: e.kind.as_str().to_string(),
            message: e.message,
        }),
    )
}

fn timed_out(request_id: Option<Uuid>, timeout: Duration) -> ApiError {
    (
        StatusCode::GATEWAY_TIMEOUT,
        Json(ErrorBody {
            request_id,
            kind: "timeout".to_string(),
            message: format!("no outcome within {}s", timeout.as_secs()),
        }),
    )
}

/// Admits a manual trigger and waits for the pipeline's answer.
///
/// The request timeout covers both handing the signal to the service and
/// waiting for its outcome.
///
/// # Errors
/// Returns the terminal error's status (400, 409, 502 or 503), or
/// `StatusCode::GATEWAY_TIMEOUT` once the request timeout elapses.
pub async fn submit_signal(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<SignalRequest>,
) -> Result<Json<SignalResponse>, ApiError> {
    let deadline = Instant::now() + state.request_timeout;

    let submit = state.pipeline.submit_signal(&req.symbol, &req.signal_name);
    let Ok(admission) = tokio::time::timeout_at(deadline, submit).await else {
        warn!(symbol = %req.symbol, "signal request timed out before admission");
        return Err(timed_out(None, state.request_timeout));
    };
    let request_id = admission.request_id;

    match tokio::time::timeout_at(deadline, admission.outcome()).await {
        Ok(Ok(orders)) => Ok(Json(SignalResponse { request_id, orders })),
        Ok(Err(e)) => Err(terminal(request_id, e)),
        Err(_) => {
            state.pipeline.withdraw(request_id);
            warn!(%request_id, symbol = %req.symbol, "signal request timed out");
            Err(timed_out(Some(request_id), state.request_timeout))
        }
    }
}

/// Reports pipeline liveness; 503 when any worker is down.
pub async fn health(State(state): State<Arc<ApiState>>) -> (StatusCode, Json<PipelineStatus>) {
    let status = state.pipeline.status();
    let code = if status.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

pub async fn list_orders(State(state): State<Arc<ApiState>>) -> Json<Vec<Order>> {
    Json(state.pipeline.orders())
}

/// Gets one tracked order with its spread details.
///
/// # Errors
/// Returns `StatusCode::NOT_FOUND` if the monitor does not track the order.
pub async fn get_order(
    State(state): State<Arc<ApiState>>,
    Path(order_id): Path<String>,
) -> Result<Json<OrderDetail>, StatusCode> {
    let order = state
        .pipeline
        .order(&order_id)
        .ok_or(StatusCode::NOT_FOUND)?;
    let spread = state.pipeline.spread_for(&order_id);
    Ok(Json(OrderDetail { order, spread }))
}
