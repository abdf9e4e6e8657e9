//! In-memory paper broker.
//!
//! Implements every broker capability against local state. Spreads fill
//! immediately at the requested price; order ids increase monotonically.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use optflow_core::{
    Candle, ChainSource, OptionQuote, Order, OrderLeg, OrderSide, OrderSource, OrderStatus,
    SpreadExecutor, SpreadOrderRequest, TimeSalesInterval, TimeSalesSource,
};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::error::BrokerError;

#[derive(Debug, Default)]
struct PaperState {
    next_id: u64,
    /// Orders keyed by numeric id so listings come back in placement order.
    orders: BTreeMap<u64, Order>,
    prices: HashMap<String, Decimal>,
    chains: HashMap<String, BTreeMap<NaiveDate, Vec<OptionQuote>>>,
    candles: HashMap<String, Vec<Candle>>,
    orders_submitted: u32,
}

/// Paper trading broker. Cheap to clone; clones share state.
#[derive(Debug, Clone, Default)]
pub struct PaperBroker {
    state: Arc<RwLock<PaperState>>,
}

impl PaperBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.state.write().prices.insert(symbol.to_uppercase(), price);
    }

    /// Replaces the quotes listed for one expiration.
    pub fn set_chain(&self, symbol: &str, expiration: NaiveDate, quotes: Vec<OptionQuote>) {
        self.state
            .write()
            .chains
            .entry(symbol.to_uppercase())
            .or_default()
            .insert(expiration, quotes);
    }

    /// Adds bars to the time-and-sales history for `symbol`, keeping it sorted.
    pub fn add_candles(&self, symbol: &str, candles: impl IntoIterator<Item = Candle>) {
        let mut state = self.state.write();
        let series = state.candles.entry(symbol.to_uppercase()).or_default();
        series.extend(candles);
        series.sort_by_key(|c| c.timestamp);
        series.dedup_by_key(|c| c.timestamp);
    }

    /// Inserts or replaces an order as if the broker had reported it.
    pub fn upsert_order(&self, order: Order) {
        let mut state = self.state.write();
        let id = order.id.parse().unwrap_or_else(|_| {
            state.next_id += 1;
            state.next_id
        });
        state.next_id = state.next_id.max(id);
        state.orders.insert(id, order);
    }

    /// Changes an order's status; returns false when the id is unknown.
    pub fn set_order_status(&self, id: &str, status: OrderStatus) -> bool {
        let Ok(key) = id.parse::<u64>() else {
            return false;
        };
        let mut state = self.state.write();
        match state.orders.get_mut(&key) {
            Some(order) => {
                order.status = status;
                order.transaction_date = Some(Utc::now());
                for leg in &mut order.legs {
                    leg.status = status;
                }
                true
            }
            None => false,
        }
    }

    pub fn remove_order(&self, id: &str) -> Option<Order> {
        let key = id.parse::<u64>().ok()?;
        self.state.write().orders.remove(&key)
    }

    #[must_use]
    pub fn orders(&self) -> Vec<Order> {
        self.state.read().orders.values().cloned().collect()
    }

    #[must_use]
    pub fn orders_submitted(&self) -> u32 {
        self.state.read().orders_submitted
    }

    /// Resets to an empty book.
    pub fn reset(&self) {
        *self.state.write() = PaperState::default();
    }

    fn fill(&self, request: &SpreadOrderRequest) -> Result<Order, BrokerError> {
        if request.quantity <= Decimal::ZERO {
            return Err(BrokerError::InvalidOrder(format!(
                "quantity must be positive, got {}",
                request.quantity
            )));
        }
        if request.tag.is_empty() {
            return Err(BrokerError::InvalidOrder("missing order tag".into()));
        }

        let now = Utc::now();
        let price = if request.spread.strategy.is_credit() {
            request.price.abs()
        } else {
            -request.price.abs()
        };
        let leg = |symbol: &str, side: OrderSide| OrderLeg {
            option_symbol: symbol.to_string(),
            side,
            quantity: request.quantity,
            status: OrderStatus::Filled,
            avg_fill_price: None,
            filled_quantity: request.quantity,
        };

        let mut state = self.state.write();
        state.orders_submitted += 1;
        state.next_id += 1;
        let id = state.next_id;
        let order = Order {
            id: id.to_string(),
            underlying: request.underlying.to_uppercase(),
            status: OrderStatus::Filled,
            quantity: request.quantity,
            price: Some(price),
            create_date: now,
            transaction_date: Some(now),
            avg_fill_price: Some(price),
            filled_quantity: request.quantity,
            legs: vec![
                leg(&request.spread.short_leg.symbol, OrderSide::SellToOpen),
                leg(&request.spread.long_leg.symbol, OrderSide::BuyToOpen),
            ],
            tag: Some(request.tag.clone()),
        };
        state.orders.insert(id, order.clone());
        Ok(order)
    }
}

#[async_trait]
impl OrderSource for PaperBroker {
    async fn list_orders(&self) -> anyhow::Result<Vec<Order>> {
        Ok(self.orders())
    }
}

#[async_trait]
impl TimeSalesSource for PaperBroker {
    async fn time_and_sales(
        &self,
        symbol: &str,
        _interval: TimeSalesInterval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Candle>> {
        let state = self.state.read();
        Ok(state
            .candles
            .get(&symbol.to_uppercase())
            .map(|series| {
                series
                    .iter()
                    .filter(|c| c.timestamp >= start && c.timestamp <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl SpreadExecutor for PaperBroker {
    async fn place_spread(&self, request: &SpreadOrderRequest) -> anyhow::Result<Order> {
        let order = self.fill(request)?;
        info!(
            order_id = %order.id,
            underlying = %order.underlying,
            tag = ?order.tag,
            "paper spread filled"
        );
        Ok(order)
    }
}

#[async_trait]
impl ChainSource for PaperBroker {
    async fn underlying_price(&self, symbol: &str) -> anyhow::Result<Decimal> {
        let price = self.state.read().prices.get(&symbol.to_uppercase()).copied();
        Ok(price.ok_or_else(|| BrokerError::NotFound(format!("quote for {symbol}")))?)
    }

    async fn expirations(&self, symbol: &str) -> anyhow::Result<Vec<NaiveDate>> {
        let state = self.state.read();
        Ok(state
            .chains
            .get(&symbol.to_uppercase())
            .map(|chain| chain.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn chain(&self, symbol: &str, expiration: NaiveDate) -> anyhow::Result<Vec<OptionQuote>> {
        let state = self.state.read();
        let quotes = state
            .chains
            .get(&symbol.to_uppercase())
            .and_then(|chain| chain.get(&expiration))
            .cloned()
            .unwrap_or_default();
        debug!(symbol, %expiration, quotes = quotes.len(), "paper chain");
        Ok(quotes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use optflow_core::{
        OptionContract, OptionSpread, OptionType, OrderDuration, ShortLegStats, SpreadStrategy,
    };
    use rust_decimal_macros::dec;

    fn request(tag: &str) -> SpreadOrderRequest {
        let exp = NaiveDate::from_ymd_opt(2025, 1, 17).unwrap();
        SpreadOrderRequest {
            underlying: "COIN".into(),
            spread: OptionSpread {
                strategy: SpreadStrategy::ShortCall,
                short_leg: OptionContract::new("COIN", exp, dec!(210), OptionType::Call),
                long_leg: OptionContract::new("COIN", exp, dec!(215), OptionType::Call),
                credit_received: dec!(1.10),
                stats: ShortLegStats {
                    expected_profit: dec!(110),
                    expected_loss: dec!(390),
                    probability_of_profit: dec!(0.8),
                },
                short_fill: None,
                long_fill: None,
            },
            quantity: dec!(1),
            tag: tag.into(),
            duration: OrderDuration::Day,
            price: dec!(1.10),
        }
    }

    #[tokio::test]
    async fn fills_at_requested_price_with_increasing_ids() {
        let broker = PaperBroker::new();
        let a = broker.place_spread(&request("a")).await.unwrap();
        let b = broker.place_spread(&request("b")).await.unwrap();

        assert_eq!(a.id, "1");
        assert_eq!(b.id, "2");
        assert_eq!(a.status, OrderStatus::Filled);
        assert_eq!(a.avg_fill_price, Some(dec!(1.10)));
        assert_eq!(a.committed_risk(), dec!(390));
        assert_eq!(broker.list_orders().await.unwrap().len(), 2);
        assert_eq!(broker.orders_submitted(), 2);
    }

    #[tokio::test]
    async fn rejects_untagged_orders() {
        let broker = PaperBroker::new();
        assert!(broker.place_spread(&request("")).await.is_err());
        assert!(broker.orders().is_empty());
    }

    #[tokio::test]
    async fn status_changes_and_removal_show_in_listing() {
        let broker = PaperBroker::new();
        let order = broker.place_spread(&request("a")).await.unwrap();
        assert!(broker.set_order_status(&order.id, OrderStatus::Canceled));
        assert!(!broker.set_order_status("99", OrderStatus::Canceled));
        assert_eq!(broker.orders()[0].status, OrderStatus::Canceled);

        assert!(broker.remove_order(&order.id).is_some());
        assert!(broker.list_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn time_and_sales_filters_by_window() {
        let broker = PaperBroker::new();
        let bar = |m: u32| Candle {
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 14, m, 0).unwrap(),
            open: dec!(1),
            high: dec!(1),
            low: dec!(1),
            close: dec!(1),
            volume: 1,
        };
        broker.add_candles("coin", [bar(3), bar(1), bar(2), bar(2)]);

        let start = Utc.with_ymd_and_hms(2024, 5, 1, 14, 2, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 5, 1, 15, 0, 0).unwrap();
        let bars = broker
            .time_and_sales("COIN", TimeSalesInterval::OneMinute, start, end)
            .await
            .unwrap();
        assert_eq!(bars.len(), 2);
        assert!(bars[0].timestamp < bars[1].timestamp);
    }

    #[tokio::test]
    async fn missing_quote_is_an_error() {
        let broker = PaperBroker::new();
        assert!(broker.underlying_price("COIN").await.is_err());
        broker.set_price("coin", dec!(205));
        assert_eq!(broker.underlying_price("COIN").await.unwrap(), dec!(205));
        assert!(broker.expirations("COIN").await.unwrap().is_empty());
    }
}
