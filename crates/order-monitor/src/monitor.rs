//! Broker order poll loop.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use optflow_core::{OrderDelta, OrderSource, Shutdown};
use optflow_event_log::{EventData, EventLog, ExpectedRevision};
use tokio::sync::Mutex as CycleLock;
use tracing::{debug, error, info};

use crate::store::OrderStore;

/// Polls the broker on a fixed cadence and publishes order deltas.
pub struct OrderMonitor {
    source: Arc<dyn OrderSource>,
    store: Arc<OrderStore>,
    log: Arc<dyn EventLog>,
    stream: String,
    interval: Duration,
    /// Serializes poll cycles and holds deltas not yet appended, oldest first.
    unpublished: CycleLock<VecDeque<OrderDelta>>,
}

impl OrderMonitor {
    pub fn new(
        source: Arc<dyn OrderSource>,
        store: Arc<OrderStore>,
        log: Arc<dyn EventLog>,
        stream: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            store,
            log,
            stream: stream.into(),
            interval,
            unpublished: CycleLock::new(VecDeque::new()),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<OrderStore> {
        &self.store
    }

    /// One poll cycle: fetch, reconcile, append every delta to the orders stream.
    ///
    /// Deltas whose append failed stay queued and are appended ahead of the
    /// next cycle's deltas, so the stream never skips a change the store
    /// already holds. Returns the deltas appended by this cycle.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker fetch or an append fails. The store is
    /// left untouched when the fetch fails.
    pub async fn poll_once(&self) -> Result<Vec<OrderDelta>> {
        let mut unpublished = self.unpublished.lock().await;
        let fetched = self
            .source
            .list_orders()
            .await
            .context("failed to list broker orders")?;
        unpublished.extend(self.store.reconcile(fetched));

        let mut published = Vec::with_capacity(unpublished.len());
        while let Some(delta) = unpublished.front() {
            let data = EventData::from_event(delta)?;
            let revision = self
                .log
                .append(&self.stream, data, ExpectedRevision::Any)
                .await
                .with_context(|| {
                    format!(
                        "failed to append to {} ({} deltas queued)",
                        self.stream,
                        unpublished.len()
                    )
                })?;
            debug!(order_id = delta.order_id(), revision, "order delta appended");
            published.extend(unpublished.pop_front());
        }
        Ok(published)
    }

    /// Polls until shutdown. Failed cycles are logged and retried on the next tick.
    pub async fn run(self: Arc<Self>, shutdown: Shutdown) -> Result<()> {
        info!(
            poll_secs = self.interval.as_secs(),
            stream = %self.stream,
            "Order monitor started"
        );
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            match self.poll_once().await {
                Ok(deltas) if !deltas.is_empty() => {
                    info!(deltas = deltas.len(), orders = self.store.len(), "orders reconciled");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "order poll failed"),
            }
        }

        info!("Order monitor stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use optflow_core::events::ORDER_CREATE;
    use optflow_core::{Order, OrderStatus};
    use optflow_event_log::client::{RecordStream, Subscription};
    use optflow_event_log::{Direction, EventLogError, InMemoryEventLog, SubscribeFrom};
    use futures::TryStreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use rust_decimal_macros::dec;

    struct Failing;

    #[async_trait]
    impl OrderSource for Failing {
        async fn list_orders(&self) -> Result<Vec<Order>> {
            anyhow::bail!("broker down")
        }
    }

    /// Memory log that rejects the next `failures` appends.
    struct FlakyLog {
        inner: InMemoryEventLog,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl EventLog for FlakyLog {
        async fn append(
            &self,
            stream: &str,
            event: EventData,
            expected: ExpectedRevision,
        ) -> Result<u64, EventLogError> {
            let failed = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(EventLogError::Append("connection reset".into()));
            }
            self.inner.append(stream, event, expected).await
        }

        async fn read(
            &self,
            stream: &str,
            from: u64,
            direction: Direction,
            count: Option<usize>,
        ) -> Result<RecordStream, EventLogError> {
            self.inner.read(stream, from, direction, count).await
        }

        async fn subscribe(
            &self,
            stream: &str,
            from: SubscribeFrom,
        ) -> Result<Subscription, EventLogError> {
            self.inner.subscribe(stream, from).await
        }

        async fn last_revision(&self, stream: &str) -> Result<Option<u64>, EventLogError> {
            self.inner.last_revision(stream).await
        }
    }

    fn order(id: &str, status: OrderStatus) -> Order {
        Order {
            id: id.to_string(),
            underlying: "COIN".to_string(),
            status,
            quantity: dec!(1),
            price: Some(dec!(1)),
            create_date: Utc::now(),
            transaction_date: None,
            avg_fill_price: None,
            filled_quantity: dec!(0),
            legs: Vec::new(),
            tag: None,
        }
    }

    #[tokio::test]
    async fn deltas_are_appended_to_the_orders_stream() {
        let broker = optflow_tradier::PaperBroker::new();
        broker.upsert_order(order("1", OrderStatus::Open));
        let log = Arc::new(InMemoryEventLog::new());
        let monitor = OrderMonitor::new(
            Arc::new(broker.clone()),
            Arc::new(OrderStore::new()),
            log.clone(),
            "orders",
            Duration::from_secs(10),
        );

        let deltas = monitor.poll_once().await.unwrap();
        assert_eq!(deltas.len(), 1);

        broker.set_order_status("1", OrderStatus::Filled);
        let deltas = monitor.poll_once().await.unwrap();
        assert!(deltas.iter().any(|d| matches!(d, OrderDelta::OrderUpdate { field, .. } if field == "status")));

        let records: Vec<_> = log
            .read("orders", 0, Direction::Forward, None)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(records[0].event_type, ORDER_CREATE);
        assert_eq!(records.len(), 1 + deltas.len());
    }

    #[tokio::test]
    async fn failed_fetch_leaves_store_untouched() {
        let store = Arc::new(OrderStore::new());
        store.reconcile(vec![order("1", OrderStatus::Open)]);
        let monitor = OrderMonitor::new(
            Arc::new(Failing),
            store.clone(),
            Arc::new(InMemoryEventLog::new()),
            "orders",
            Duration::from_secs(10),
        );
        assert!(monitor.poll_once().await.is_err());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn failed_append_is_retried_on_the_next_cycle() {
        let broker = optflow_tradier::PaperBroker::new();
        broker.upsert_order(order("1", OrderStatus::Open));
        let log = Arc::new(FlakyLog {
            inner: InMemoryEventLog::new(),
            failures: AtomicUsize::new(1),
        });
        let monitor = OrderMonitor::new(
            Arc::new(broker.clone()),
            Arc::new(OrderStore::new()),
            log.clone(),
            "orders",
            Duration::from_secs(10),
        );

        assert!(monitor.poll_once().await.is_err());
        assert_eq!(monitor.store().len(), 1);
        assert_eq!(log.inner.len("orders"), 0);

        broker.set_order_status("1", OrderStatus::Filled);
        let deltas = monitor.poll_once().await.unwrap();
        assert!(matches!(deltas[0], OrderDelta::OrderCreate { .. }));
        assert!(deltas.len() > 1);

        let records: Vec<_> = log
            .read("orders", 0, Direction::Forward, None)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(records.len(), deltas.len());
        assert_eq!(records[0].event_type, ORDER_CREATE);

        assert!(monitor.poll_once().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_survives_failures_and_stops_on_shutdown() {
        let (trigger, shutdown) = optflow_core::Shutdown::new();
        let monitor = Arc::new(OrderMonitor::new(
            Arc::new(Failing),
            Arc::new(OrderStore::new()),
            Arc::new(InMemoryEventLog::new()),
            "orders",
            Duration::from_secs(10),
        ));
        let handle = tokio::spawn(monitor.run(shutdown));
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert!(!handle.is_finished());
        trigger.trigger();
        handle.await.unwrap().unwrap();
    }
}
