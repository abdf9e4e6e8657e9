use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::EventLogError;
use crate::record::{
    Direction, EventData, ExpectedRevision, RecordedEvent, SubscribeFrom, SubscriptionMessage,
};

/// Lazy sequence of records returned by [`EventLog::read`].
pub type RecordStream = BoxStream<'static, Result<RecordedEvent, EventLogError>>;

/// Live sequence returned by [`EventLog::subscribe`].
pub type Subscription = BoxStream<'static, SubscriptionMessage>;

/// An append-only log of named streams with dense revisions starting at 0.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Appends one event and returns its revision.
    async fn append(
        &self,
        stream: &str,
        event: EventData,
        expected: ExpectedRevision,
    ) -> Result<u64, EventLogError>;

    /// Reads up to `count` records starting at `from` (inclusive).
    ///
    /// Fails with `StreamNotFound` when the stream has no records.
    async fn read(
        &self,
        stream: &str,
        from: u64,
        direction: Direction,
        count: Option<usize>,
    ) -> Result<RecordStream, EventLogError>;

    /// Follows the stream live from `from`, including records already stored after it.
    async fn subscribe(&self, stream: &str, from: SubscribeFrom)
        -> Result<Subscription, EventLogError>;

    /// Highest stored revision, or `None` for a missing stream.
    async fn last_revision(&self, stream: &str) -> Result<Option<u64>, EventLogError>;

    /// Highest stored revision, 0 when the stream is empty.
    async fn find_last_revision(&self, stream: &str) -> Result<u64, EventLogError> {
        Ok(self.last_revision(stream).await?.unwrap_or(0))
    }
}

/// Interleaves a `Checkpoint` after every `interval` events.
pub(crate) fn with_checkpoints(inner: Subscription, interval: u64) -> Subscription {
    use futures::StreamExt;

    if interval == 0 {
        return inner;
    }
    inner
        .scan(0u64, move |seen, msg| {
            let out = match &msg {
                SubscriptionMessage::Event(record) => {
                    *seen += 1;
                    if *seen % interval == 0 {
                        let revision = record.revision;
                        vec![msg, SubscriptionMessage::Checkpoint(revision)]
                    } else {
                        vec![msg]
                    }
                }
                _ => vec![msg],
            };
            futures::future::ready(Some(futures::stream::iter(out)))
        })
        .flatten()
        .boxed()
}
