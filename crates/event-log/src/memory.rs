//! In-process event log. Each stream owns its records and a broadcast
//! channel that fans new records out to live subscribers.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use crate::client::{with_checkpoints, EventLog, RecordStream, Subscription};
use crate::error::EventLogError;
use crate::record::{
    Direction, EventData, ExpectedRevision, RecordedEvent, SubscribeFrom, SubscriptionMessage,
};

const DEFAULT_BROADCAST_CAPACITY: usize = 1024;
const DEFAULT_CHECKPOINT_INTERVAL: u64 = 100;

struct StreamState {
    records: Vec<RecordedEvent>,
    tx: broadcast::Sender<RecordedEvent>,
}

impl StreamState {
    fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            records: Vec::new(),
            tx,
        }
    }

    fn last_revision(&self) -> Option<u64> {
        self.records.last().map(|r| r.revision)
    }
}

pub struct InMemoryEventLog {
    streams: RwLock<HashMap<String, StreamState>>,
    capacity: usize,
    checkpoint_interval: u64,
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventLog {
    #[must_use]
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            capacity: DEFAULT_BROADCAST_CAPACITY,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_checkpoint_interval(mut self, interval: u64) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    /// Subscribers that fall this many records behind are dropped.
    #[must_use]
    pub fn with_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Ends every live subscription on `stream`. Subscribers see the end of
    /// their sequence after draining what was already broadcast.
    pub fn drop_subscriptions(&self, stream: &str) {
        let mut streams = self.streams.write();
        if let Some(state) = streams.get_mut(stream) {
            let (tx, _) = broadcast::channel(self.capacity);
            state.tx = tx;
            debug!(stream, "dropped live subscriptions");
        }
    }

    /// Number of records in `stream`.
    #[must_use]
    pub fn len(&self, stream: &str) -> usize {
        self.streams.read().get(stream).map_or(0, |s| s.records.len())
    }

    #[must_use]
    pub fn is_empty(&self, stream: &str) -> bool {
        self.len(stream) == 0
    }
}

struct LiveState {
    backlog: VecDeque<RecordedEvent>,
    rx: broadcast::Receiver<RecordedEvent>,
    last: Option<u64>,
    done: bool,
}

async fn next_live(mut st: LiveState) -> Option<(SubscriptionMessage, LiveState)> {
    if st.done {
        return None;
    }
    if let Some(record) = st.backlog.pop_front() {
        st.last = Some(record.revision);
        return Some((SubscriptionMessage::Event(record), st));
    }
    loop {
        match st.rx.recv().await {
            Ok(record) => {
                if st.last.is_some_and(|last| record.revision <= last) {
                    continue;
                }
                st.last = Some(record.revision);
                return Some((SubscriptionMessage::Event(record), st));
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                st.done = true;
                let reason = format!("subscriber lagged by {skipped} records");
                return Some((SubscriptionMessage::Dropped(reason), st));
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(
        &self,
        stream: &str,
        event: EventData,
        expected: ExpectedRevision,
    ) -> Result<u64, EventLogError> {
        let mut streams = self.streams.write();
        let state = streams
            .entry(stream.to_string())
            .or_insert_with(|| StreamState::new(self.capacity));

        let actual = state.last_revision();
        if !expected.matches(actual) {
            return Err(EventLogError::conflict(stream, expected, actual));
        }

        let revision = actual.map_or(0, |r| r + 1);
        let record = RecordedEvent::new(stream, revision, event);
        state.records.push(record.clone());
        // No live subscribers is not an error.
        let _ = state.tx.send(record);
        Ok(revision)
    }

    async fn read(
        &self,
        stream: &str,
        from: u64,
        direction: Direction,
        count: Option<usize>,
    ) -> Result<RecordStream, EventLogError> {
        let streams = self.streams.read();
        let state = streams
            .get(stream)
            .filter(|s| !s.records.is_empty())
            .ok_or_else(|| EventLogError::StreamNotFound(stream.to_string()))?;

        let limit = count.unwrap_or(usize::MAX);
        let records: Vec<RecordedEvent> = match direction {
            Direction::Forward => state
                .records
                .iter()
                .filter(|r| r.revision >= from)
                .take(limit)
                .cloned()
                .collect(),
            Direction::Backward => state
                .records
                .iter()
                .rev()
                .filter(|r| r.revision <= from)
                .take(limit)
                .cloned()
                .collect(),
        };
        Ok(futures::stream::iter(records.into_iter().map(Ok)).boxed())
    }

    async fn subscribe(
        &self,
        stream: &str,
        from: SubscribeFrom,
    ) -> Result<Subscription, EventLogError> {
        // Snapshot and receiver are taken under one lock so no append slips between them.
        let (backlog, rx) = {
            let mut streams = self.streams.write();
            let state = streams
                .entry(stream.to_string())
                .or_insert_with(|| StreamState::new(self.capacity));
            let first = from.first_revision();
            let backlog: VecDeque<RecordedEvent> = state
                .records
                .iter()
                .filter(|r| r.revision >= first)
                .cloned()
                .collect();
            (backlog, state.tx.subscribe())
        };

        let last = match from {
            SubscribeFrom::Start => None,
            SubscribeFrom::After(rev) => Some(rev),
        };
        let live = futures::stream::unfold(
            LiveState {
                backlog,
                rx,
                last,
                done: false,
            },
            next_live,
        )
        .boxed();
        Ok(with_checkpoints(live, self.checkpoint_interval))
    }

    async fn last_revision(&self, stream: &str) -> Result<Option<u64>, EventLogError> {
        Ok(self
            .streams
            .read()
            .get(stream)
            .and_then(StreamState::last_revision))
    }
}
