//! Local keyed store of broker orders.

use std::collections::BTreeMap;

use optflow_core::{Order, OrderBook, OrderDelta};
use parking_lot::Mutex;

use crate::diff::reconcile;

/// Orders keyed by id, at most one entry per id.
///
/// Owned by the monitor; other components read snapshots through [`OrderBook`].
#[derive(Debug, Default)]
pub struct OrderStore {
    orders: Mutex<BTreeMap<String, Order>>,
}

impl OrderStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Diffs `fetched` against the store and replaces its contents, under one lock.
    pub fn reconcile(&self, fetched: Vec<Order>) -> Vec<OrderDelta> {
        reconcile(&mut self.orders.lock(), fetched)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Order> {
        self.orders.lock().get(id).cloned()
    }

    /// Every stored order, ordered by id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Order> {
        self.orders.lock().values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.orders.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orders.lock().is_empty()
    }
}

impl OrderBook for OrderStore {
    fn orders_for(&self, underlying: &str) -> Vec<Order> {
        self.orders
            .lock()
            .values()
            .filter(|o| o.underlying.eq_ignore_ascii_case(underlying))
            .cloned()
            .collect()
    }

    fn has_tag(&self, tag: &str) -> bool {
        self.orders
            .lock()
            .values()
            .any(|o| o.tag.as_deref() == Some(tag))
    }

    fn contains(&self, order_id: &str) -> bool {
        self.orders.lock().contains_key(order_id)
    }
}
