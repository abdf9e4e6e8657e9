//! Broker orders as the pipeline sees them.
//!
//! Legs are owned by their order; spread statistics live beside the order,
//! keyed by order id, never inside it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::options::{OptionContract, OptionSpread};

/// Broker-reported order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Expired,
    Canceled,
    #[default]
    Pending,
    Rejected,
    Error,
    #[serde(other)]
    Unknown,
}

impl OrderStatus {
    /// Whether an order in this status holds (or is about to hold) a position.
    #[must_use]
    pub const fn holds_position(self) -> bool {
        matches!(
            self,
            Self::Open | Self::PartiallyFilled | Self::Pending | Self::Filled
        )
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Expired | Self::Canceled | Self::Rejected | Self::Error
        )
    }
}

/// Leg direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    BuyToOpen,
    SellToOpen,
    BuyToClose,
    SellToClose,
    /// Equity sides and anything else the broker reports.
    #[serde(other)]
    Other,
}

impl OrderSide {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BuyToOpen => "buy_to_open",
            Self::SellToOpen => "sell_to_open",
            Self::BuyToClose => "buy_to_close",
            Self::SellToClose => "sell_to_close",
            Self::Other => "other",
        }
    }
}

/// Time in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDuration {
    #[default]
    Day,
    Gtc,
}

impl OrderDuration {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Gtc => "gtc",
        }
    }
}

/// One leg of a multi-leg order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLeg {
    pub option_symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    #[serde(default)]
    pub status: OrderStatus,
    #[serde(default)]
    pub avg_fill_price: Option<Decimal>,
    #[serde(default)]
    pub filled_quantity: Decimal,
}

/// A broker order. Ids are globally unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub underlying: String,
    pub status: OrderStatus,
    pub quantity: Decimal,
    /// Limit price; positive for credits received, negative for debits paid.
    #[serde(default)]
    pub price: Option<Decimal>,
    pub create_date: DateTime<Utc>,
    #[serde(default)]
    pub transaction_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub avg_fill_price: Option<Decimal>,
    #[serde(default)]
    pub filled_quantity: Decimal,
    #[serde(default)]
    pub legs: Vec<OrderLeg>,
    #[serde(default)]
    pub tag: Option<String>,
}

impl Order {
    /// Contracts referenced by the legs, skipping symbols that are not OCC options.
    #[must_use]
    pub fn leg_contracts(&self) -> Vec<OptionContract> {
        self.legs
            .iter()
            .filter_map(|leg| OptionContract::from_occ(&leg.option_symbol))
            .collect()
    }

    /// Risk the order commits if it is a two-leg vertical: `(width − credit) × multiplier × quantity`.
    ///
    /// Uses the fill price when present, else the limit price. Returns zero for
    /// anything that is not a two-leg option order.
    #[must_use]
    pub fn committed_risk(&self) -> Decimal {
        let contracts = self.leg_contracts();
        let [first, second] = contracts.as_slice() else {
            return Decimal::ZERO;
        };
        let width = (first.strike - second.strike).abs();
        let credit = self.avg_fill_price.or(self.price).unwrap_or(Decimal::ZERO);
        let per_share = if credit >= Decimal::ZERO {
            width - credit
        } else {
            -credit
        };
        per_share.max(Decimal::ZERO) * first.multiplier * self.quantity
    }
}

/// Everything the broker needs to place a two-leg spread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpreadOrderRequest {
    pub underlying: String,
    pub spread: OptionSpread,
    pub quantity: Decimal,
    /// Idempotency tag used by the broker to de-duplicate submissions.
    pub tag: String,
    pub duration: OrderDuration,
    /// Net limit price; credit for credit spreads, debit for debit spreads.
    pub price: Decimal,
}
