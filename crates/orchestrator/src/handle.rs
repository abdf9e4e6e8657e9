use std::sync::Arc;

use chrono::{DateTime, Utc};
use optflow_core::{OptionSpread, Order, Shutdown, ShutdownTrigger, SignalTriggered};
use optflow_order_monitor::{CandlePool, OrderStore};
use optflow_options_manager::OptionsService;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::correlation::{Admission, RequestDispatcher, TerminalError};
use crate::status::{PipelineStatus, WorkerTable};

/// Cloneable front door to a running pipeline.
#[derive(Clone)]
pub struct PipelineHandle {
    pub(crate) signals: mpsc::Sender<SignalTriggered>,
    pub(crate) requests: Arc<RequestDispatcher<Vec<Order>>>,
    pub(crate) service: Arc<OptionsService>,
    pub(crate) store: Arc<OrderStore>,
    pub(crate) candles: Arc<CandlePool>,
    pub(crate) workers: Arc<WorkerTable>,
    pub(crate) predicates: Arc<[String]>,
    pub(crate) trigger: Arc<ShutdownTrigger>,
    pub(crate) shutdown: Shutdown,
    pub(crate) started_at: DateTime<Utc>,
}

impl PipelineHandle {
    /// Admits a manual trigger for `signal_name` on `symbol`.
    ///
    /// The returned admission always resolves: invalid requests get a
    /// `Validation` error straight away, and requests that cannot reach the
    /// service because the pipeline is stopping get `Cancelled`.
    ///
    /// Dropping this future before it completes withdraws the request.
    pub async fn submit_signal(&self, symbol: &str, signal_name: &str) -> Admission<Vec<Order>> {
        let admission = self.requests.admit();
        let request_id = admission.request_id;
        let mut guard = WithdrawOnDrop {
            requests: &self.requests,
            request_id,
            armed: true,
        };

        if let Err(e) = self.validate(symbol, signal_name) {
            guard.armed = false;
            self.requests.deliver_error(request_id, e);
            return admission;
        }

        let signal = SignalTriggered {
            symbol: symbol.trim().to_uppercase(),
            signal_name: signal_name.to_string(),
            timestamp: Utc::now(),
            trace_context: None,
            request_id: Some(request_id),
        };
        info!(%request_id, symbol = %signal.symbol, signal = %signal.signal_name, "manual signal admitted");

        let sent = tokio::select! {
            () = self.shutdown.cancelled() => false,
            sent = self.signals.send(signal) => sent.is_ok(),
        };
        guard.armed = false;
        if !sent {
            self.requests
                .deliver_error(request_id, TerminalError::cancelled("pipeline is stopping"));
        }
        admission
    }

    /// Submits and waits for the outcome.
    ///
    /// # Errors
    ///
    /// The request's terminal error.
    pub async fn request_signal(
        &self,
        symbol: &str,
        signal_name: &str,
    ) -> Result<Vec<Order>, TerminalError> {
        self.submit_signal(symbol, signal_name).await.outcome().await
    }

    fn validate(&self, symbol: &str, signal_name: &str) -> Result<(), TerminalError> {
        if self.shutdown.is_cancelled() {
            return Err(TerminalError::cancelled("pipeline is stopping"));
        }
        let symbol = symbol.trim();
        if symbol.is_empty() || symbol.chars().any(char::is_whitespace) {
            return Err(TerminalError::validation(format!("invalid symbol {symbol:?}")));
        }
        if !self.predicates.iter().any(|name| name == signal_name) {
            return Err(TerminalError::validation(format!(
                "unknown signal {signal_name:?}"
            )));
        }
        Ok(())
    }

    /// Drops a pending request, e.g. after the caller gave up waiting.
    pub fn withdraw(&self, request_id: Uuid) -> bool {
        self.requests.withdraw(request_id)
    }

    #[must_use]
    pub fn orders(&self) -> Vec<Order> {
        self.store.snapshot()
    }

    #[must_use]
    pub fn order(&self, order_id: &str) -> Option<Order> {
        self.store.get(order_id)
    }

    #[must_use]
    pub fn spread_for(&self, order_id: &str) -> Option<OptionSpread> {
        self.service.spread_for(order_id)
    }

    #[must_use]
    pub fn candles(&self) -> &Arc<CandlePool> {
        &self.candles
    }

    #[must_use]
    pub fn signal_names(&self) -> &[String] {
        &self.predicates
    }

    #[must_use]
    pub fn status(&self) -> PipelineStatus {
        let shutting_down = self.shutdown.is_cancelled();
        PipelineStatus {
            healthy: !shutting_down && self.workers.all_running(),
            shutting_down,
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
            workers: self.workers.snapshot(),
            pending_requests: self.requests.pending(),
            tracked_orders: self.store.len(),
            candle_repositories: self.candles.repositories().len(),
        }
    }

    /// Triggers the root shutdown scope. Idempotent.
    pub fn shutdown(&self) {
        self.trigger.trigger();
    }

    /// An observer of the root shutdown scope.
    #[must_use]
    pub fn shutdown_scope(&self) -> Shutdown {
        self.shutdown.clone()
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// Withdraws an admitted request whose signal never reached the service.
struct WithdrawOnDrop<'a> {
    requests: &'a RequestDispatcher<Vec<Order>>,
    request_id: Uuid,
    armed: bool,
}

impl Drop for WithdrawOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed && self.requests.withdraw(self.request_id) {
            debug!(request_id = %self.request_id, "abandoned submission withdrawn");
        }
    }
}
