//! Append-only event streams with dense per-stream revisions, plus the
//! consumer that replays a stream and then follows it live.
//!
//! Two backends implement [`EventLog`]: [`InMemoryEventLog`] for tests and
//! paper runs, and [`PgEventLog`] for durable deployments.

pub mod client;
pub mod consumer;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod record;

pub use client::EventLog;
pub use consumer::{ConsumerError, ConsumerSettings, Delivery, StreamConsumer};
pub use error::EventLogError;
pub use memory::InMemoryEventLog;
pub use postgres::PgEventLog;
pub use record::{
    Direction, EventData, ExpectedRevision, RecordedEvent, SubscribeFrom, SubscriptionMessage,
};
