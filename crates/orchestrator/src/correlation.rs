//! Joins asynchronous pipeline outcomes back to the request that asked for them.
//!
//! Each admitted request gets a fresh correlation id and a pair of one-shot
//! channels. The first result or terminal error published for that id removes
//! the entry and is delivered; anything later for the same id is dropped.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use optflow_core::Order;
use optflow_options_manager::{DispatchError, ExecutionError, RankingError, SignalOutcome};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

/// Why a request ended without a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalKind {
    /// The request cannot be acted on as submitted or configured.
    Validation,
    /// Refused by a pre-flight policy such as the position cap.
    PolicyViolation,
    /// The broker or market data failed.
    Upstream,
    /// The pipeline shut down before the request completed.
    Cancelled,
}

impl TerminalKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::PolicyViolation => "policy_violation",
            Self::Upstream => "upstream",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{}: {message}", kind.as_str())]
pub struct TerminalError {
    pub kind: TerminalKind,
    pub message: String,
}

impl TerminalError {
    pub fn new(kind: TerminalKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(TerminalKind::Validation, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(TerminalKind::Cancelled, message)
    }
}

impl From<&RankingError> for TerminalError {
    fn from(e: &RankingError) -> Self {
        let kind = match e {
            RankingError::Validation(_) => TerminalKind::Validation,
            RankingError::MarketData { .. } => TerminalKind::Upstream,
        };
        Self::new(kind, e.to_string())
    }
}

impl From<&DispatchError> for TerminalError {
    fn from(e: &DispatchError) -> Self {
        let kind = match e {
            DispatchError::PositionCapExceeded { .. } | DispatchError::DuplicateTag(_) => {
                TerminalKind::PolicyViolation
            }
            DispatchError::Cancelled => TerminalKind::Cancelled,
            DispatchError::Broker(_) => TerminalKind::Upstream,
        };
        Self::new(kind, e.to_string())
    }
}

impl From<&ExecutionError> for TerminalError {
    fn from(e: &ExecutionError) -> Self {
        match e {
            ExecutionError::Ranking(e) => e.into(),
            ExecutionError::Dispatch(e) => e.into(),
        }
    }
}

/// The caller's side of an admitted request.
#[derive(Debug)]
pub struct Admission<T> {
    pub request_id: Uuid,
    pub result: oneshot::Receiver<T>,
    pub error: oneshot::Receiver<TerminalError>,
}

impl<T> Admission<T> {
    /// Waits on both channels and returns whichever resolves.
    ///
    /// Wrap this in a timeout if the caller needs one; the dispatcher imposes none.
    ///
    /// # Errors
    ///
    /// The delivered terminal error, or `Cancelled` if the entry was withdrawn
    /// or the dispatcher dropped without delivering.
    pub async fn outcome(self) -> Result<T, TerminalError> {
        let Self {
            request_id,
            mut result,
            mut error,
        } = self;
        let dropped = || TerminalError::cancelled(format!("request {request_id} was dropped"));

        // A delivery closes the other channel at the same instant, so a closed
        // channel defers to its sibling rather than deciding the outcome.
        tokio::select! {
            biased;
            value = &mut result => match value {
                Ok(value) => Ok(value),
                Err(_) => Err(error.await.unwrap_or_else(|_| dropped())),
            },
            terminal = &mut error => match terminal {
                Ok(terminal) => Err(terminal),
                Err(_) => result.await.map_err(|_| dropped()),
            },
        }
    }
}

struct Waiter<T> {
    result: oneshot::Sender<T>,
    error: oneshot::Sender<TerminalError>,
    admitted_at: DateTime<Utc>,
}

/// Correlation table from request id to the waiting caller's channels.
///
/// One lock guards insert and remove. Removal happens before delivery, which is
/// what makes delivery at-most-once per id.
pub struct RequestDispatcher<T> {
    waiters: Mutex<HashMap<Uuid, Waiter<T>>>,
}

impl<T> Default for RequestDispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RequestDispatcher<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            waiters: Mutex::new(HashMap::new()),
        }
    }

    /// Mints a correlation id and registers the caller's channels under it.
    pub fn admit(&self) -> Admission<T> {
        let (result_tx, result_rx) = oneshot::channel();
        let (error_tx, error_rx) = oneshot::channel();
        let waiter = Waiter {
            result: result_tx,
            error: error_tx,
            admitted_at: Utc::now(),
        };

        let mut waiters = self.waiters.lock();
        let mut request_id = Uuid::new_v4();
        while waiters.contains_key(&request_id) {
            request_id = Uuid::new_v4();
        }
        waiters.insert(request_id, waiter);
        drop(waiters);

        debug!(%request_id, "request admitted");
        Admission {
            request_id,
            result: result_rx,
            error: error_rx,
        }
    }

    fn take(&self, request_id: Uuid) -> Option<Waiter<T>> {
        self.waiters.lock().remove(&request_id)
    }

    /// Delivers a result. Returns `false` when the id is unknown or already resolved.
    pub fn deliver_result(&self, request_id: Uuid, value: T) -> bool {
        let Some(waiter) = self.take(request_id) else {
            debug!(%request_id, "late or duplicate result dropped");
            return false;
        };
        // A receiver the caller already dropped is not an error here.
        let _ = waiter.result.send(value);
        true
    }

    /// Delivers a terminal error. Returns `false` when the id is unknown or already resolved.
    pub fn deliver_error(&self, request_id: Uuid, error: TerminalError) -> bool {
        let Some(waiter) = self.take(request_id) else {
            debug!(%request_id, kind = error.kind.as_str(), "late or duplicate error dropped");
            return false;
        };
        let _ = waiter.error.send(error);
        true
    }

    /// Removes an entry without delivering, e.g. after the caller timed out.
    pub fn withdraw(&self, request_id: Uuid) -> bool {
        self.take(request_id).is_some()
    }

    /// Fails every pending request with `Cancelled`. Returns how many were pending.
    pub fn cancel_all(&self, reason: &str) -> usize {
        let drained: Vec<_> = self.waiters.lock().drain().collect();
        let count = drained.len();
        for (_, waiter) in drained {
            let _ = waiter.error.send(TerminalError::cancelled(reason));
        }
        count
    }

    /// When a pending request was admitted.
    #[must_use]
    pub fn admitted_at(&self, request_id: Uuid) -> Option<DateTime<Utc>> {
        self.waiters.lock().get(&request_id).map(|w| w.admitted_at)
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.waiters.lock().len()
    }
}

impl RequestDispatcher<Vec<Order>> {
    /// Routes a service outcome to its requester. Feed-originated outcomes carry
    /// no request id and are ignored.
    pub fn resolve(&self, outcome: SignalOutcome) -> bool {
        let Some(request_id) = outcome.signal.request_id else {
            return false;
        };
        match outcome.result {
            Ok(orders) => self.deliver_result(request_id, orders),
            Err(e) => self.deliver_error(request_id, TerminalError::from(&e)),
        }
    }
}
