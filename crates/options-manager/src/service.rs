//! Signal-driven service loop: rank, dispatch, report.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use optflow_core::{OptionSpread, Order, OrderBook, Shutdown, SignalTriggered, TradingConfig};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::engine::{RankingEngine, RankingError};
use crate::executor::{DispatchError, OrderDispatcher};

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Ranking(#[from] RankingError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// What became of one signal.
#[derive(Debug)]
pub struct SignalOutcome {
    pub signal: SignalTriggered,
    pub result: Result<Vec<Order>, ExecutionError>,
}

/// Spread details for one placed order.
struct PlacedSpread {
    spread: OptionSpread,
    /// Set once the order book has reported the order.
    tracked: bool,
}

pub struct OptionsService {
    engine: RankingEngine,
    dispatcher: OrderDispatcher,
    book: Arc<dyn OrderBook>,
    /// Keyed by order id. Entries leave once the book stops tracking the order.
    spreads: RwLock<HashMap<String, PlacedSpread>>,
}

impl OptionsService {
    pub fn new(engine: RankingEngine, dispatcher: OrderDispatcher, book: Arc<dyn OrderBook>) -> Self {
        Self {
            engine,
            dispatcher,
            book,
            spreads: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &TradingConfig {
        self.engine.config()
    }

    /// Spread placed under `order_id`, if this service placed it.
    #[must_use]
    pub fn spread_for(&self, order_id: &str) -> Option<OptionSpread> {
        self.spreads.read().get(order_id).map(|p| p.spread.clone())
    }

    /// Drops spreads whose orders the book reported and has since removed.
    ///
    /// Orders the book has not reported yet are kept, since the monitor may
    /// not have polled since placement.
    pub fn prune_spreads(&self) -> usize {
        let mut spreads = self.spreads.write();
        let before = spreads.len();
        spreads.retain(|order_id, placed| {
            if self.book.contains(order_id) {
                placed.tracked = true;
                true
            } else {
                !placed.tracked
            }
        });
        let pruned = before - spreads.len();
        if pruned > 0 {
            debug!(pruned, remaining = spreads.len(), "spread details pruned");
        }
        pruned
    }

    /// Ranks and dispatches spreads for one signal.
    ///
    /// Returns the placed orders. When nothing could be placed and at least one
    /// placement failed, the first failure is returned instead.
    ///
    /// # Errors
    ///
    /// Ranking failures, and dispatch failures when no order was placed.
    pub async fn handle(&self, signal: &SignalTriggered) -> Result<Vec<Order>, ExecutionError> {
        self.prune_spreads();
        let symbol = signal.symbol.trim().to_uppercase();
        let open_orders = self.book.orders_for(&symbol);
        let ranked = self.engine.rank(signal, &open_orders).await?;
        if ranked.is_empty() {
            info!(%symbol, signal = %signal.signal_name, "no spread to place");
            return Ok(Vec::new());
        }

        let duration = self.engine.config().order_duration;
        let results = self.dispatcher.place_all(&symbol, &ranked, duration).await;

        let mut placed = Vec::new();
        let mut first_error = None;
        for (result, r) in results.into_iter().zip(&ranked) {
            match result {
                Ok(order) => {
                    self.spreads.write().insert(
                        order.id.clone(),
                        PlacedSpread {
                            spread: r.spread.clone(),
                            tracked: false,
                        },
                    );
                    placed.push(order);
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if placed.is_empty() => Err(e.into()),
            _ => Ok(placed),
        }
    }

    /// Handles signals until the input closes or shutdown is observed.
    ///
    /// Outcomes are forwarded to `outcomes`; a closed outcome channel ends the loop.
    pub async fn run(
        self: Arc<Self>,
        mut input: mpsc::Receiver<SignalTriggered>,
        outcomes: mpsc::Sender<SignalOutcome>,
        shutdown: Shutdown,
    ) -> Result<()> {
        info!(
            max_positions = self.config().max_no_of_positions,
            expirations = ?self.config().expirations_in_days,
            "Options service started"
        );

        loop {
            let signal = tokio::select! {
                () = shutdown.cancelled() => break,
                next = input.recv() => match next {
                    Some(signal) => signal,
                    None => break,
                },
            };

            let result = self.handle(&signal).await;
            match &result {
                Ok(orders) => info!(
                    symbol = %signal.symbol,
                    signal = %signal.signal_name,
                    placed = orders.len(),
                    "signal handled"
                ),
                Err(ExecutionError::Dispatch(DispatchError::Cancelled)) => {}
                Err(e) => warn!(symbol = %signal.symbol, error = %e, "signal not executed"),
            }

            if outcomes.send(SignalOutcome { signal, result }).await.is_err() {
                error!("outcome channel closed");
                break;
            }
        }

        info!("Options service stopped");
        Ok(())
    }
}
