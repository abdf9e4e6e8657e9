//! HTTP surface over a running pipeline.
//!
//! - `POST /api/signals` admits a manual trigger and answers with its outcome
//! - `GET /api/health` reports worker liveness
//! - `GET /api/orders` returns the monitor's order snapshot
//! - `GET /ws` pushes the health report every second

pub mod handlers;
pub mod server;
pub mod websocket;

pub use handlers::{ApiState, ErrorBody, OrderDetail, SignalRequest, SignalResponse};
pub use server::ApiServer;
