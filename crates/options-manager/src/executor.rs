//! Order dispatcher: places ranked spreads with idempotency tags.
//!
//! Pre-flight checks read the monitor's order store; the dispatcher keeps no
//! order state of its own. The broker's returned order is authoritative.

use std::collections::HashSet;
use std::sync::Arc;

use optflow_core::{
    Order, OrderBook, OrderDuration, Shutdown, SpreadExecutor, SpreadOrderRequest,
};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{info, warn};

use crate::engine::RankedSpread;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(
        "position cap exceeded for {underlying}: {open} open + {quantity} requested > {max}"
    )]
    PositionCapExceeded {
        underlying: String,
        open: u32,
        quantity: Decimal,
        max: u32,
    },

    #[error("an order tagged {0} already exists")]
    DuplicateTag(String),

    #[error("dispatch cancelled")]
    Cancelled,

    #[error("broker error: {0}")]
    Broker(#[source] anyhow::Error),
}

impl DispatchError {
    /// Whether the rejection came from a pre-flight policy rather than the broker.
    #[must_use]
    pub fn is_policy(&self) -> bool {
        matches!(
            self,
            Self::PositionCapExceeded { .. } | Self::DuplicateTag(_)
        )
    }
}

pub struct OrderDispatcher {
    executor: Arc<dyn SpreadExecutor>,
    book: Arc<dyn OrderBook>,
    max_positions: u32,
    shutdown: Shutdown,
}

impl OrderDispatcher {
    pub fn new(
        executor: Arc<dyn SpreadExecutor>,
        book: Arc<dyn OrderBook>,
        max_positions: u32,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            executor,
            book,
            max_positions,
            shutdown,
        }
    }

    fn open_positions(&self, underlying: &str) -> u32 {
        let open = self
            .book
            .orders_for(underlying)
            .iter()
            .filter(|o| o.status.holds_position())
            .count();
        u32::try_from(open).unwrap_or(u32::MAX)
    }

    fn preflight(&self, request: &SpreadOrderRequest, in_flight: u32) -> Result<(), DispatchError> {
        if self.shutdown.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }
        if self.book.has_tag(&request.tag) {
            return Err(DispatchError::DuplicateTag(request.tag.clone()));
        }
        let open = self.open_positions(&request.underlying).saturating_add(in_flight);
        if Decimal::from(open) + request.quantity > Decimal::from(self.max_positions) {
            return Err(DispatchError::PositionCapExceeded {
                underlying: request.underlying.clone(),
                open,
                quantity: request.quantity,
                max: self.max_positions,
            });
        }
        Ok(())
    }

    /// Places one spread after the pre-flight checks.
    ///
    /// # Errors
    ///
    /// `Cancelled` once shutdown is observed, `DuplicateTag` or
    /// `PositionCapExceeded` from pre-flight, `Broker` when placement fails.
    pub async fn place_spread(&self, request: SpreadOrderRequest) -> Result<Order, DispatchError> {
        self.preflight(&request, 0)?;
        self.submit(&request).await
    }

    async fn submit(&self, request: &SpreadOrderRequest) -> Result<Order, DispatchError> {
        if self.shutdown.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }
        let order = self
            .executor
            .place_spread(request)
            .await
            .map_err(DispatchError::Broker)?;
        info!(
            order_id = %order.id,
            underlying = %request.underlying,
            strategy = %request.spread.strategy,
            tag = %request.tag,
            price = %request.price,
            "spread placed"
        );
        Ok(order)
    }

    /// Places ranked spreads in order, counting this batch's placements against the cap.
    ///
    /// Stops at the first cancellation; other failures are returned in place
    /// and the batch continues.
    pub async fn place_all(
        &self,
        underlying: &str,
        ranked: &[RankedSpread],
        duration: OrderDuration,
    ) -> Vec<Result<Order, DispatchError>> {
        let mut results = Vec::with_capacity(ranked.len());
        let mut placed = 0u32;
        let mut tags = HashSet::new();
        for r in ranked {
            let request = SpreadOrderRequest {
                underlying: underlying.to_string(),
                spread: r.spread.clone(),
                quantity: r.quantity,
                tag: r.tag.clone(),
                duration,
                price: r.price,
            };
            if !tags.insert(r.tag.clone()) {
                results.push(Err(DispatchError::DuplicateTag(r.tag.clone())));
                continue;
            }
            let result = match self.preflight(&request, placed) {
                Ok(()) => self.submit(&request).await,
                Err(e) => Err(e),
            };
            let cancelled = matches!(result, Err(DispatchError::Cancelled));
            match &result {
                Ok(_) => placed = placed.saturating_add(1),
                Err(e) if !cancelled => {
                    warn!(underlying, tag = %r.tag, error = %e, "spread not placed");
                }
                Err(_) => {}
            }
            results.push(result);
            if cancelled {
                break;
            }
        }
        results
    }
}
