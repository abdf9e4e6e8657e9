//! Replay-then-live stream consumer.
//!
//! The consumer reads a stream up to the revision that was last at startup,
//! flagging those deliveries as replay, then follows the stream live. A dropped
//! subscription is re-established after the highest delivered revision with
//! bounded exponential backoff.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use optflow_core::{EventLogConfig, Shutdown, StreamEvent};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::client::EventLog;
use crate::error::EventLogError;
use crate::record::{Direction, RecordedEvent, SubscribeFrom, SubscriptionMessage};

/// Fatal consumer failures. The consumer task ends with one of these.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("replay of {stream} failed: {source}")]
    Replay {
        stream: String,
        #[source]
        source: EventLogError,
    },

    #[error("gave up resubscribing to {stream} after {attempts} attempts: {last_error}")]
    ResubscribeExhausted {
        stream: String,
        attempts: u32,
        last_error: String,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct ConsumerSettings {
    pub max_resubscribe_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self::from(&EventLogConfig::default())
    }
}

impl From<&EventLogConfig> for ConsumerSettings {
    fn from(config: &EventLogConfig) -> Self {
        Self {
            max_resubscribe_attempts: config.max_resubscribe_attempts,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

/// One typed event handed downstream.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery<E> {
    pub event: E,
    pub revision: u64,
    pub is_replay: bool,
}

pub struct StreamConsumer<E> {
    log: Arc<dyn EventLog>,
    stream: String,
    settings: ConsumerSettings,
    _event: PhantomData<fn() -> E>,
}

enum Sent {
    Delivered,
    Closed,
}

impl<E: StreamEvent> StreamConsumer<E> {
    pub fn new(log: Arc<dyn EventLog>, stream: impl Into<String>, settings: ConsumerSettings) -> Self {
        Self {
            log,
            stream: stream.into(),
            settings,
            _event: PhantomData,
        }
    }

    /// Runs the consumer on its own task, returning the output channel and the task handle.
    pub fn spawn(
        self,
        shutdown: Shutdown,
    ) -> (
        mpsc::Receiver<Delivery<E>>,
        JoinHandle<Result<(), ConsumerError>>,
    ) {
        // Capacity 1 is the closest tokio gets to a rendezvous channel.
        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(async move { self.run(tx, shutdown).await });
        (rx, handle)
    }

    /// Delivers the stream into `tx` until shutdown, the receiver is dropped, or a fatal error.
    ///
    /// # Errors
    ///
    /// Returns `ConsumerError::Replay` if the replay read fails and
    /// `ConsumerError::ResubscribeExhausted` once consecutive resubscribe attempts run out.
    pub async fn run(
        &self,
        tx: mpsc::Sender<Delivery<E>>,
        shutdown: Shutdown,
    ) -> Result<(), ConsumerError> {
        let stream = self.stream.as_str();
        let replay_err = |source: EventLogError| ConsumerError::Replay {
            stream: stream.to_string(),
            source,
        };

        let last = self.log.last_revision(stream).await.map_err(replay_err)?;
        let mut delivered: Option<u64> = None;

        if let Some(last) = last {
            info!(stream, last_revision = last, "replaying stream");
            let records = match self.log.read(stream, 0, Direction::Forward, None).await {
                Ok(records) => Some(records),
                Err(EventLogError::StreamNotFound(_)) => None,
                Err(e) => return Err(replay_err(e)),
            };
            if let Some(mut records) = records {
                loop {
                    let next = tokio::select! {
                        () = shutdown.cancelled() => return Ok(()),
                        next = records.next() => next,
                    };
                    let Some(item) = next else { break };
                    let record = item.map_err(replay_err)?;
                    if record.revision > last {
                        break;
                    }
                    delivered = Some(record.revision);
                    match self.deliver(&tx, &record, true, &shutdown).await {
                        Some(Sent::Delivered) => {}
                        Some(Sent::Closed) | None => return Ok(()),
                    }
                }
            }
            info!(stream, replayed_to = ?delivered, "replay complete");
        }

        let mut attempts: u32 = 0;
        let mut backoff = self.settings.initial_backoff;
        loop {
            let from = delivered.map_or(SubscribeFrom::Start, SubscribeFrom::After);
            let subscribed = tokio::select! {
                () = shutdown.cancelled() => return Ok(()),
                sub = self.log.subscribe(stream, from) => sub,
            };

            let reason = match subscribed {
                Ok(mut sub) => {
                    debug!(stream, ?from, "subscribed");
                    loop {
                        let msg = tokio::select! {
                            () = shutdown.cancelled() => return Ok(()),
                            msg = sub.next() => msg,
                        };
                        match msg {
                            Some(SubscriptionMessage::Event(record)) => {
                                if delivered.is_some_and(|d| record.revision <= d) {
                                    continue;
                                }
                                delivered = Some(record.revision);
                                attempts = 0;
                                backoff = self.settings.initial_backoff;
                                match self.deliver(&tx, &record, false, &shutdown).await {
                                    Some(Sent::Delivered) => {}
                                    Some(Sent::Closed) | None => return Ok(()),
                                }
                            }
                            Some(SubscriptionMessage::Checkpoint(revision)) => {
                                debug!(stream, revision, "checkpoint");
                            }
                            Some(SubscriptionMessage::Dropped(reason)) => break reason,
                            None => break "subscription ended".to_string(),
                        }
                    }
                }
                Err(e) => e.to_string(),
            };

            attempts += 1;
            if attempts > self.settings.max_resubscribe_attempts {
                error!(stream, attempts, reason = %reason, "resubscribe attempts exhausted");
                return Err(ConsumerError::ResubscribeExhausted {
                    stream: stream.to_string(),
                    attempts: self.settings.max_resubscribe_attempts,
                    last_error: reason,
                });
            }
            warn!(
                stream,
                attempt = attempts,
                delay = ?backoff,
                reason = %reason,
                "subscription dropped, resubscribing"
            );
            tokio::select! {
                () = shutdown.cancelled() => return Ok(()),
                () = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(self.settings.max_backoff);
        }
    }

    /// Decodes and sends one record. Returns `None` on shutdown.
    async fn deliver(
        &self,
        tx: &mpsc::Sender<Delivery<E>>,
        record: &RecordedEvent,
        is_replay: bool,
        shutdown: &Shutdown,
    ) -> Option<Sent> {
        let event = match record.decode::<E>() {
            Ok(event) => event,
            Err(e) => {
                error!(
                    stream = %self.stream,
                    revision = record.revision,
                    event_type = %record.event_type,
                    error = %e,
                    "skipping undecodable record"
                );
                return Some(Sent::Delivered);
            }
        };
        let delivery = Delivery {
            event,
            revision: record.revision,
            is_replay,
        };
        tokio::select! {
            () = shutdown.cancelled() => None,
            sent = tx.send(delivery) => Some(match sent {
                Ok(()) => Sent::Delivered,
                Err(_) => Sent::Closed,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryEventLog;
    use crate::record::{EventData, ExpectedRevision};
    use chrono::Utc;
    use optflow_core::TrackerEvent;

    fn settings() -> ConsumerSettings {
        ConsumerSettings {
            max_resubscribe_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    async fn append(log: &InMemoryEventLog, state: &str) {
        let ev = TrackerEvent::new("COIN", 15, "stochastic_rsi", state, Utc::now());
        log.append("trackers", EventData::from_event(&ev).unwrap(), ExpectedRevision::Any)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn single_record_stream_is_replayed() {
        let log = Arc::new(InMemoryEventLog::new());
        append(&log, "buy").await;

        let consumer = StreamConsumer::<TrackerEvent>::new(log.clone(), "trackers", settings());
        let (mut rx, _handle) = consumer.spawn(Shutdown::never());

        let first = rx.recv().await.unwrap();
        assert_eq!(first.revision, 0);
        assert!(first.is_replay);

        append(&log, "sell").await;
        let second = rx.recv().await.unwrap();
        assert_eq!(second.revision, 1);
        assert!(!second.is_replay);
    }

    #[tokio::test]
    async fn undecodable_records_are_skipped() {
        let log = Arc::new(InMemoryEventLog::new());
        log.append(
            "trackers",
            EventData {
                event_id: uuid::Uuid::new_v4(),
                event_type: "Garbage".to_string(),
                payload: serde_json::json!({"nope": true}),
                trace_context: None,
            },
            ExpectedRevision::Any,
        )
        .await
        .unwrap();
        append(&log, "buy").await;

        let consumer = StreamConsumer::<TrackerEvent>::new(log, "trackers", settings());
        let (mut rx, _handle) = consumer.spawn(Shutdown::never());
        let first = rx.recv().await.unwrap();
        assert_eq!(first.revision, 1);
    }

    #[tokio::test]
    async fn shutdown_ends_the_consumer_cleanly() {
        let log = Arc::new(InMemoryEventLog::new());
        let (trigger, shutdown) = Shutdown::new();
        let consumer = StreamConsumer::<TrackerEvent>::new(log, "trackers", settings());
        let (_rx, handle) = consumer.spawn(shutdown);
        trigger.trigger();
        assert!(handle.await.unwrap().is_ok());
    }
}
