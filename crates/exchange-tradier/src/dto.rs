//! Tradier response shapes.
//!
//! Tradier encodes "no results" as the string `"null"`, a single result as a
//! bare object, and several results as an array. [`Series`] makes those three
//! cases explicit.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use optflow_core::{
    Candle, OptionContract, OptionGreeks, OptionQuote, OptionType, Order, OrderLeg, OrderSide,
    OrderStatus,
};
use rust_decimal::Decimal;
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};

/// Zero, one, or many items.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Series<T> {
    #[default]
    Empty,
    One(T),
    Many(Vec<T>),
}

impl<T> Series<T> {
    #[must_use]
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::Empty => Vec::new(),
            Self::One(item) => vec![item],
            Self::Many(items) => items,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::One(_) => 1,
            Self::Many(items) => items.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn is_null(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => s == "null",
        _ => false,
    }
}

impl<T: DeserializeOwned> Series<T> {
    /// Interprets a raw JSON value.
    ///
    /// # Errors
    ///
    /// Returns an error if an item does not match `T`.
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        if is_null(&value) {
            return Ok(Self::Empty);
        }
        match value {
            serde_json::Value::Array(items) => Ok(Self::Many(
                items
                    .into_iter()
                    .map(serde_json::from_value)
                    .collect::<Result<_, _>>()?,
            )),
            other => Ok(Self::One(serde_json::from_value(other)?)),
        }
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Series<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(D::Error::custom)
    }
}

/// Deserializes an envelope field that may be `null` or `"null"`.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    if is_null(&value) {
        return Ok(None);
    }
    serde_json::from_value(value).map(Some).map_err(D::Error::custom)
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct OrdersResponse {
    #[serde(default, deserialize_with = "nullable")]
    pub orders: Option<OrdersBody>,
}

#[derive(Debug, Deserialize)]
pub struct OrdersBody {
    #[serde(default)]
    pub order: Series<TradierOrder>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradierOrder {
    pub id: u64,
    #[serde(rename = "type", default)]
    pub order_type: Option<String>,
    pub symbol: String,
    #[serde(default)]
    pub side: Option<OrderSide>,
    #[serde(default)]
    pub quantity: Decimal,
    pub status: OrderStatus,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub avg_fill_price: Option<Decimal>,
    #[serde(default)]
    pub exec_quantity: Option<Decimal>,
    pub create_date: DateTime<Utc>,
    #[serde(default)]
    pub transaction_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub option_symbol: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub leg: Series<TradierLeg>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradierLeg {
    #[serde(default)]
    pub option_symbol: Option<String>,
    pub symbol: String,
    pub side: OrderSide,
    #[serde(default)]
    pub quantity: Decimal,
    pub status: OrderStatus,
    #[serde(default)]
    pub avg_fill_price: Option<Decimal>,
    #[serde(default)]
    pub exec_quantity: Option<Decimal>,
}

/// Multileg prices are unsigned on the wire; the order type carries the direction.
fn signed(price: Option<Decimal>, order_type: Option<&str>) -> Option<Decimal> {
    price.map(|p| match order_type {
        Some("debit") => -p.abs(),
        Some("credit") => p.abs(),
        _ => p,
    })
}

impl From<TradierOrder> for Order {
    fn from(raw: TradierOrder) -> Self {
        let order_type = raw.order_type.as_deref();
        let mut legs: Vec<OrderLeg> = raw
            .leg
            .into_vec()
            .into_iter()
            .map(|leg| OrderLeg {
                option_symbol: leg.option_symbol.unwrap_or(leg.symbol),
                side: leg.side,
                quantity: leg.quantity,
                status: leg.status,
                avg_fill_price: leg.avg_fill_price,
                filled_quantity: leg.exec_quantity.unwrap_or_default(),
            })
            .collect();

        if legs.is_empty() {
            if let Some(option_symbol) = raw.option_symbol.clone() {
                legs.push(OrderLeg {
                    option_symbol,
                    side: raw.side.unwrap_or(OrderSide::Other),
                    quantity: raw.quantity,
                    status: raw.status,
                    avg_fill_price: raw.avg_fill_price,
                    filled_quantity: raw.exec_quantity.unwrap_or_default(),
                });
            }
        }

        Self {
            id: raw.id.to_string(),
            underlying: raw.symbol,
            status: raw.status,
            quantity: raw.quantity,
            price: signed(raw.price, order_type),
            create_date: raw.create_date,
            transaction_date: raw.transaction_date,
            avg_fill_price: signed(raw.avg_fill_price, order_type),
            filled_quantity: raw.exec_quantity.unwrap_or_default(),
            legs,
            tag: raw.tag,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PlaceOrderResponse {
    pub order: PlacedOrder,
}

#[derive(Debug, Deserialize)]
pub struct PlacedOrder {
    pub id: u64,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub errors: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Series<String>,
}

// ---------------------------------------------------------------------------
// Time and sales
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TimeSalesResponse {
    #[serde(default, deserialize_with = "nullable")]
    pub series: Option<TimeSalesBody>,
}

#[derive(Debug, Deserialize)]
pub struct TimeSalesBody {
    #[serde(default)]
    pub data: Series<TimeSalesBar>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeSalesBar {
    /// Unix seconds.
    pub timestamp: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    #[serde(default)]
    pub volume: u64,
}

impl TimeSalesBar {
    #[must_use]
    pub fn into_candle(self) -> Option<Candle> {
        let timestamp = Utc.timestamp_opt(self.timestamp, 0).single()?;
        Some(Candle {
            timestamp,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        })
    }
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ExpirationsResponse {
    #[serde(default, deserialize_with = "nullable")]
    pub expirations: Option<ExpirationsBody>,
}

#[derive(Debug, Deserialize)]
pub struct ExpirationsBody {
    #[serde(default)]
    pub date: Series<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct ChainResponse {
    #[serde(default, deserialize_with = "nullable")]
    pub options: Option<ChainBody>,
}

#[derive(Debug, Deserialize)]
pub struct ChainBody {
    #[serde(default)]
    pub option: Series<TradierOption>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradierOption {
    pub symbol: String,
    pub underlying: String,
    pub strike: Decimal,
    pub option_type: OptionType,
    pub expiration_date: NaiveDate,
    #[serde(default)]
    pub bid: Option<Decimal>,
    #[serde(default)]
    pub ask: Option<Decimal>,
    #[serde(default)]
    pub last: Option<Decimal>,
    #[serde(default)]
    pub open_interest: Option<u64>,
    #[serde(default)]
    pub contract_size: Option<u32>,
    #[serde(default)]
    pub greeks: Option<TradierGreeks>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradierGreeks {
    pub delta: f64,
    #[serde(default)]
    pub gamma: f64,
    #[serde(default)]
    pub theta: f64,
    #[serde(default)]
    pub vega: f64,
    #[serde(default)]
    pub mid_iv: Option<f64>,
}

impl From<TradierOption> for OptionQuote {
    fn from(raw: TradierOption) -> Self {
        let multiplier = raw.contract_size.map_or(Decimal::from(100), Decimal::from);
        Self {
            contract: OptionContract {
                underlying: raw.underlying,
                expiration: raw.expiration_date,
                strike: raw.strike,
                option_type: raw.option_type,
                multiplier,
                symbol: raw.symbol,
            },
            bid: raw.bid,
            ask: raw.ask,
            last: raw.last,
            open_interest: raw.open_interest.unwrap_or_default(),
            greeks: raw.greeks.map(|g| OptionGreeks {
                delta: g.delta,
                gamma: g.gamma,
                theta: g.theta,
                vega: g.vega,
                mid_iv: g.mid_iv,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct QuotesResponse {
    #[serde(default, deserialize_with = "nullable")]
    pub quotes: Option<QuotesBody>,
}

#[derive(Debug, Deserialize)]
pub struct QuotesBody {
    #[serde(default)]
    pub quote: Series<TradierQuote>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradierQuote {
    pub symbol: String,
    #[serde(default)]
    pub last: Option<Decimal>,
    #[serde(default)]
    pub bid: Option<Decimal>,
    #[serde(default)]
    pub ask: Option<Decimal>,
}

impl TradierQuote {
    /// Last trade, else the bid/ask midpoint.
    #[must_use]
    pub fn reference_price(&self) -> Option<Decimal> {
        self.last.or_else(|| match (self.bid, self.ask) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn series_covers_null_single_and_many() {
        let empty: TimeSalesResponse = serde_json::from_value(json!({"series": "null"})).unwrap();
        assert!(empty.series.is_none());

        let one: TimeSalesResponse = serde_json::from_value(json!({
            "series": {"data": {
                "time": "2024-05-01T09:30:00", "timestamp": 1_714_570_200,
                "price": 1.0, "open": 1.0, "high": 2.0, "low": 0.5, "close": 1.5, "volume": 10
            }}
        }))
        .unwrap();
        let data = one.series.unwrap().data;
        assert!(matches!(data, Series::One(_)));

        let many: Series<u32> = serde_json::from_value(json!([1, 2, 3])).unwrap();
        assert_eq!(many, Series::Many(vec![1, 2, 3]));
        assert_eq!(many.len(), 3);

        let null: Series<u32> = serde_json::from_value(json!(null)).unwrap();
        assert!(null.is_empty());
    }

    #[test]
    fn multileg_order_converts_with_signed_prices() {
        let raw: OrdersResponse = serde_json::from_value(json!({
            "orders": {"order": {
                "id": 228_175,
                "type": "credit",
                "symbol": "COIN",
                "quantity": 2.0,
                "status": "filled",
                "duration": "day",
                "price": 1.5,
                "avg_fill_price": 1.45,
                "exec_quantity": 2.0,
                "create_date": "2024-05-01T14:15:00.000Z",
                "transaction_date": "2024-05-01T14:15:03.000Z",
                "class": "multileg",
                "tag": "SuperTrend1hStochRsi15mUp-p10000-c150",
                "leg": [
                    {"id": 1, "symbol": "COIN", "option_symbol": "COIN240517P00200000",
                     "side": "sell_to_open", "quantity": 2.0, "status": "filled",
                     "avg_fill_price": 3.1, "exec_quantity": 2.0},
                    {"id": 2, "symbol": "COIN", "option_symbol": "COIN240517P00195000",
                     "side": "buy_to_open", "quantity": 2.0, "status": "filled",
                     "avg_fill_price": 1.65, "exec_quantity": 2.0}
                ]
            }}
        }))
        .unwrap();

        let orders: Vec<Order> = raw
            .orders
            .unwrap()
            .order
            .into_vec()
            .into_iter()
            .map(Order::from)
            .collect();
        assert_eq!(orders.len(), 1);
        let order = &orders[0];
        assert_eq!(order.id, "228175");
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.price, Some(dec!(1.5)));
        assert_eq!(order.legs.len(), 2);
        assert_eq!(order.legs[0].side, OrderSide::SellToOpen);
        assert_eq!(order.leg_contracts()[1].strike, dec!(195));
    }

    #[test]
    fn debit_orders_carry_negative_prices() {
        assert_eq!(signed(Some(dec!(2.1)), Some("debit")), Some(dec!(-2.1)));
        assert_eq!(signed(Some(dec!(-1)), Some("credit")), Some(dec!(1)));
        assert_eq!(signed(Some(dec!(3)), Some("limit")), Some(dec!(3)));
    }

    #[test]
    fn chain_option_converts_to_quote() {
        let raw: ChainResponse = serde_json::from_value(json!({
            "options": {"option": [{
                "symbol": "COIN240517C00210000",
                "underlying": "COIN",
                "strike": 210.0,
                "option_type": "call",
                "expiration_date": "2024-05-17",
                "bid": 2.05,
                "ask": 2.15,
                "open_interest": 1200,
                "contract_size": 100,
                "greeks": {"delta": 0.31, "gamma": 0.02, "theta": -0.1, "vega": 0.2, "mid_iv": 0.74}
            }]}
        }))
        .unwrap();
        let quotes: Vec<OptionQuote> = raw
            .options
            .unwrap()
            .option
            .into_vec()
            .into_iter()
            .map(OptionQuote::from)
            .collect();
        assert_eq!(quotes[0].contract.option_type, OptionType::Call);
        assert_eq!(quotes[0].contract.multiplier, dec!(100));
        assert_eq!(quotes[0].bid, Some(dec!(2.05)));
        assert!((quotes[0].greeks.as_ref().unwrap().delta - 0.31).abs() < f64::EPSILON);
    }

    #[test]
    fn quote_reference_price_falls_back_to_mid() {
        let q = TradierQuote {
            symbol: "COIN".into(),
            last: None,
            bid: Some(dec!(200)),
            ask: Some(dec!(201)),
        };
        assert_eq!(q.reference_price(), Some(dec!(200.5)));
    }
}
