use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::candle::{Candle, TimeSalesInterval};
use crate::options::OptionQuote;
use crate::orders::{Order, SpreadOrderRequest};

/// Lists the account's orders as the broker currently reports them.
#[async_trait]
pub trait OrderSource: Send + Sync {
    async fn list_orders(&self) -> Result<Vec<Order>>;
}

/// Historical price bars for one symbol.
#[async_trait]
pub trait TimeSalesSource: Send + Sync {
    async fn time_and_sales(
        &self,
        symbol: &str,
        interval: TimeSalesInterval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>>;
}

/// Places two-leg spread orders.
#[async_trait]
pub trait SpreadExecutor: Send + Sync {
    async fn place_spread(&self, request: &SpreadOrderRequest) -> Result<Order>;
}

/// Market data needed to build spreads.
#[async_trait]
pub trait ChainSource: Send + Sync {
    async fn underlying_price(&self, symbol: &str) -> Result<Decimal>;

    /// Listed expiration dates, ascending.
    async fn expirations(&self, symbol: &str) -> Result<Vec<NaiveDate>>;

    /// Quotes for every strike of both types at one expiration, greeks included when available.
    async fn chain(&self, symbol: &str, expiration: NaiveDate) -> Result<Vec<OptionQuote>>;
}

/// Read access to the locally reconciled order store.
pub trait OrderBook: Send + Sync {
    /// Orders on `underlying` as of the last reconciliation.
    fn orders_for(&self, underlying: &str) -> Vec<Order>;

    /// Whether any stored order carries `tag`.
    fn has_tag(&self, tag: &str) -> bool;

    fn contains(&self, order_id: &str) -> bool;
}
