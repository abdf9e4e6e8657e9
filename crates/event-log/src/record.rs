use chrono::{DateTime, Utc};
use optflow_core::{StreamEvent, TraceContext};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EventLogError;

/// An event ready to be appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    pub event_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub trace_context: Option<TraceContext>,
}

impl EventData {
    /// Serializes a typed event with a fresh id.
    ///
    /// # Errors
    ///
    /// Returns `EventLogError::Serialization` if the payload cannot be encoded.
    pub fn from_event<E: StreamEvent>(event: &E) -> Result<Self, EventLogError> {
        Ok(Self {
            event_id: Uuid::new_v4(),
            event_type: event.event_type().to_string(),
            payload: serde_json::to_value(event)?,
            trace_context: event.trace_context().cloned(),
        })
    }
}

/// A record as stored in a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub stream: String,
    pub revision: u64,
    pub event_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub trace_context: Option<TraceContext>,
    pub recorded_at: DateTime<Utc>,
}

impl RecordedEvent {
    pub(crate) fn new(stream: &str, revision: u64, data: EventData) -> Self {
        Self {
            stream: stream.to_string(),
            revision,
            event_id: data.event_id,
            event_type: data.event_type,
            payload: data.payload,
            trace_context: data.trace_context,
            recorded_at: Utc::now(),
        }
    }

    /// Decodes the payload into a typed event.
    ///
    /// # Errors
    ///
    /// Returns `EventLogError::Serialization` when the payload does not match `E`.
    pub fn decode<E: DeserializeOwned>(&self) -> Result<E, EventLogError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Optimistic concurrency guard for appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpectedRevision {
    #[default]
    Any,
    /// The stream must not exist yet.
    NoStream,
    /// The stream's last revision must be exactly this.
    Exact(u64),
}

impl ExpectedRevision {
    /// Whether a stream whose last revision is `actual` satisfies the guard.
    #[must_use]
    pub fn matches(self, actual: Option<u64>) -> bool {
        match self {
            Self::Any => true,
            Self::NoStream => actual.is_none(),
            Self::Exact(rev) => actual == Some(rev),
        }
    }
}

impl std::fmt::Display for ExpectedRevision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::NoStream => write!(f, "no stream"),
            Self::Exact(rev) => write!(f, "{rev}"),
        }
    }
}

/// Where a subscription starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeFrom {
    /// Every record, revision 0 onwards.
    Start,
    /// Records strictly after this revision.
    After(u64),
}

impl SubscribeFrom {
    /// First revision the subscription delivers.
    #[must_use]
    pub fn first_revision(self) -> u64 {
        match self {
            Self::Start => 0,
            Self::After(rev) => rev.saturating_add(1),
        }
    }
}

/// Items yielded by a live subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionMessage {
    Event(RecordedEvent),
    /// Position marker emitted every `checkpoint_interval` events.
    Checkpoint(u64),
    /// The subscription ended abnormally; no further items follow.
    Dropped(String),
}
