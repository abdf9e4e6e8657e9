//! Event payloads carried on the pipeline's streams.
//!
//! Every payload is JSON; field names are stable and only ever added to.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::orders::Order;

/// Event type tag for tracker records.
pub const TRACKER_EVENT: &str = "TrackerEvent";
/// Event type tag for fired composite signals.
pub const SIGNAL_TRIGGERED: &str = "SignalTriggered";
/// Event type tags for order deltas.
pub const ORDER_CREATE: &str = "OrderCreate";
pub const ORDER_UPDATE: &str = "OrderUpdate";
pub const ORDER_DELETE: &str = "OrderDelete";

/// A payload that can be appended to, and decoded from, a named stream.
pub trait StreamEvent: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Tag stored next to the payload in the log.
    fn event_type(&self) -> &'static str;

    /// Trace link to store alongside the record, if any.
    fn trace_context(&self) -> Option<&TraceContext> {
        None
    }
}

/// W3C trace-context link propagated from producer to consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    pub traceparent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracestate: Option<String>,
}

impl TraceContext {
    #[must_use]
    pub fn new(traceparent: impl Into<String>) -> Self {
        Self {
            traceparent: traceparent.into(),
            tracestate: None,
        }
    }
}

/// One indicator resolution for a symbol and timeframe.
///
/// `name` has the form `<indicator>-<value>`, e.g. `stochastic_rsi-buy`.
/// Indicator names may themselves contain dashes, so the split is on the last one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerEvent {
    pub symbol: String,
    pub timeframe_minutes: u32,
    pub name: String,
    /// Raw indicator reading, when the producer supplies one.
    #[serde(default)]
    pub value: Option<f64>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub trace_context: Option<TraceContext>,
}

impl TrackerEvent {
    /// Builds a tracker event from its indicator and state parts.
    #[must_use]
    pub fn new(
        symbol: impl Into<String>,
        timeframe_minutes: u32,
        indicator: &str,
        state: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe_minutes,
            name: format!("{indicator}-{state}"),
            value: None,
            timestamp,
            trace_context: None,
        }
    }

    /// Splits `name` into `(indicator, state)`.
    ///
    /// Returns `None` when there is no dash or either side is empty.
    #[must_use]
    pub fn indicator_state(&self) -> Option<(&str, &str)> {
        let (indicator, state) = self.name.rsplit_once('-')?;
        if indicator.is_empty() || state.is_empty() {
            return None;
        }
        Some((indicator, state))
    }

    #[must_use]
    pub fn with_trace_context(mut self, ctx: TraceContext) -> Self {
        self.trace_context = Some(ctx);
        self
    }
}

impl StreamEvent for TrackerEvent {
    fn event_type(&self) -> &'static str {
        TRACKER_EVENT
    }

    fn trace_context(&self) -> Option<&TraceContext> {
        self.trace_context.as_ref()
    }
}

/// Output of the aggregator when a composite predicate is satisfied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalTriggered {
    pub symbol: String,
    pub signal_name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub trace_context: Option<TraceContext>,
    /// Set when the trigger originates from an external request rather than the tracker feed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
}

impl StreamEvent for SignalTriggered {
    fn event_type(&self) -> &'static str {
        SIGNAL_TRIGGERED
    }

    fn trace_context(&self) -> Option<&TraceContext> {
        self.trace_context.as_ref()
    }
}

/// A create/update/delete delta produced by reconciling broker orders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OrderDelta {
    OrderCreate {
        order: Order,
    },
    OrderUpdate {
        id: String,
        field: String,
        old: serde_json::Value,
        new: serde_json::Value,
    },
    OrderDelete {
        id: String,
    },
}

impl OrderDelta {
    /// Order id the delta refers to.
    #[must_use]
    pub fn order_id(&self) -> &str {
        match self {
            Self::OrderCreate { order } => &order.id,
            Self::OrderUpdate { id, .. } | Self::OrderDelete { id } => id,
        }
    }
}

impl StreamEvent for OrderDelta {
    fn event_type(&self) -> &'static str {
        match self {
            Self::OrderCreate { .. } => ORDER_CREATE,
            Self::OrderUpdate { .. } => ORDER_UPDATE,
            Self::OrderDelete { .. } => ORDER_DELETE,
        }
    }
}
