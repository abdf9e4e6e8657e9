//! Option contracts, quotes, and two-leg spreads.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Call or put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    /// OCC symbol code.
    #[must_use]
    pub const fn code(self) -> char {
        match self {
            Self::Call => 'C',
            Self::Put => 'P',
        }
    }

    #[must_use]
    pub const fn from_code(code: char) -> Option<Self> {
        match code {
            'C' | 'c' => Some(Self::Call),
            'P' | 'p' => Some(Self::Put),
            _ => None,
        }
    }
}

impl std::fmt::Display for OptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "call"),
            Self::Put => write!(f, "put"),
        }
    }
}

/// A listed option contract.
///
/// Ordered by expiration, then strike, then type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OptionContract {
    pub underlying: String,
    pub expiration: NaiveDate,
    pub strike: Decimal,
    pub option_type: OptionType,
    /// Contract multiplier (100 for standard US equity options).
    pub multiplier: Decimal,
    /// OCC symbol, e.g. `COIN250117C00200000`.
    pub symbol: String,
}

impl OptionContract {
    /// Creates a standard 100-multiplier contract with its OCC symbol.
    #[must_use]
    pub fn new(
        underlying: &str,
        expiration: NaiveDate,
        strike: Decimal,
        option_type: OptionType,
    ) -> Self {
        let underlying = underlying.to_uppercase();
        let symbol = occ_symbol(&underlying, expiration, strike, option_type);
        Self {
            underlying,
            expiration,
            strike,
            option_type,
            multiplier: Decimal::from(100),
            symbol,
        }
    }

    /// Parses an OCC symbol into a contract with the standard multiplier.
    #[must_use]
    pub fn from_occ(symbol: &str) -> Option<Self> {
        let (underlying, expiration, strike, option_type) = parse_occ_symbol(symbol)?;
        Some(Self {
            underlying,
            expiration,
            strike,
            option_type,
            multiplier: Decimal::from(100),
            symbol: symbol.to_string(),
        })
    }
}

impl PartialOrd for OptionContract {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OptionContract {
    fn cmp(&self, other: &Self) -> Ordering {
        self.expiration
            .cmp(&other.expiration)
            .then_with(|| self.strike.cmp(&other.strike))
            .then_with(|| self.option_type.cmp(&other.option_type))
            .then_with(|| self.symbol.cmp(&other.symbol))
    }
}

/// Formats an OCC option symbol: root, `YYMMDD`, `C`/`P`, strike × 1000 in eight digits.
#[must_use]
pub fn occ_symbol(
    underlying: &str,
    expiration: NaiveDate,
    strike: Decimal,
    option_type: OptionType,
) -> String {
    let millis = (strike * Decimal::from(1000)).trunc().to_string();
    format!(
        "{}{}{}{:0>8}",
        underlying.to_uppercase(),
        expiration.format("%y%m%d"),
        option_type.code(),
        millis
    )
}

/// Parses an OCC option symbol into `(underlying, expiration, strike, type)`.
#[must_use]
pub fn parse_occ_symbol(symbol: &str) -> Option<(String, NaiveDate, Decimal, OptionType)> {
    let symbol = symbol.trim();
    if symbol.len() < 16 || !symbol.is_ascii() {
        return None;
    }
    let (root, rest) = symbol.split_at(symbol.len() - 15);
    let root = root.trim();
    if root.is_empty() {
        return None;
    }
    let expiration = NaiveDate::parse_from_str(&rest[..6], "%y%m%d").ok()?;
    let option_type = OptionType::from_code(rest[6..7].chars().next()?)?;
    let millis: i64 = rest[7..].parse().ok()?;
    let strike = Decimal::new(millis, 3).normalize();
    Some((root.to_string(), expiration, strike, option_type))
}

/// Greeks snapshot attached to a quote.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionGreeks {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    #[serde(default)]
    pub mid_iv: Option<f64>,
}

/// Quote for one contract. Missing sides mean no market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionQuote {
    pub contract: OptionContract,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    #[serde(default)]
    pub last: Option<Decimal>,
    #[serde(default)]
    pub open_interest: u64,
    #[serde(default)]
    pub greeks: Option<OptionGreeks>,
}

/// Which spread the ranking engine is building.
///
/// Short variants are credit spreads (the short leg is nearer the money);
/// long variants are the debit mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpreadStrategy {
    ShortCall,
    ShortPut,
    LongCall,
    LongPut,
}

impl SpreadStrategy {
    pub const ALL: [Self; 4] = [Self::ShortCall, Self::ShortPut, Self::LongCall, Self::LongPut];

    #[must_use]
    pub const fn option_type(self) -> OptionType {
        match self {
            Self::ShortCall | Self::LongCall => OptionType::Call,
            Self::ShortPut | Self::LongPut => OptionType::Put,
        }
    }

    #[must_use]
    pub const fn is_credit(self) -> bool {
        matches!(self, Self::ShortCall | Self::ShortPut)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ShortCall => "short_call",
            Self::ShortPut => "short_put",
            Self::LongCall => "long_call",
            Self::LongPut => "long_put",
        }
    }
}

impl std::fmt::Display for SpreadStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Estimator output for the short leg of a spread, per contract, in dollars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortLegStats {
    pub expected_profit: Decimal,
    pub expected_loss: Decimal,
    pub probability_of_profit: Decimal,
}

impl ShortLegStats {
    /// `pop · profit − (1 − pop) · loss`.
    #[must_use]
    pub fn expected_value(&self) -> Decimal {
        self.probability_of_profit * self.expected_profit
            - (Decimal::ONE - self.probability_of_profit) * self.expected_loss
    }
}

/// Fill details for one leg once the broker executes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegFill {
    pub price: Decimal,
    pub filled_at: DateTime<Utc>,
}

/// Two contracts on the same underlying and expiration, one sold and one bought.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionSpread {
    pub strategy: SpreadStrategy,
    pub short_leg: OptionContract,
    pub long_leg: OptionContract,
    /// Bid of the short leg minus ask of the long leg; negative for debit spreads.
    pub credit_received: Decimal,
    pub stats: ShortLegStats,
    #[serde(default)]
    pub short_fill: Option<LegFill>,
    #[serde(default)]
    pub long_fill: Option<LegFill>,
}

impl OptionSpread {
    #[must_use]
    pub fn underlying(&self) -> &str {
        &self.short_leg.underlying
    }

    #[must_use]
    pub fn expiration(&self) -> NaiveDate {
        self.short_leg.expiration
    }

    #[must_use]
    pub fn option_type(&self) -> OptionType {
        self.short_leg.option_type
    }

    /// Absolute distance between the two strikes.
    #[must_use]
    pub fn width(&self) -> Decimal {
        (self.short_leg.strike - self.long_leg.strike).abs()
    }

    /// Worst-case loss per spread in dollars.
    ///
    /// Credit spreads lose the width less the credit; debit spreads lose the debit paid.
    #[must_use]
    pub fn max_loss(&self) -> Decimal {
        let per_share = if self.strategy.is_credit() {
            self.width() - self.credit_received
        } else {
            -self.credit_received
        };
        per_share.max(Decimal::ZERO) * self.short_leg.multiplier
    }

    #[must_use]
    pub fn expected_value(&self) -> Decimal {
        self.stats.expected_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn occ_symbol_round_trips_fractional_strikes() {
        let c = OptionContract::new("coin", date(2025, 1, 17), dec!(202.5), OptionType::Call);
        assert_eq!(c.symbol, "COIN250117C00202500");

        let parsed = OptionContract::from_occ(&c.symbol).unwrap();
        assert_eq!(parsed.underlying, "COIN");
        assert_eq!(parsed.strike, dec!(202.5));
        assert_eq!(parsed.option_type, OptionType::Call);
        assert_eq!(parsed.expiration, date(2025, 1, 17));
    }

    #[test]
    fn rejects_malformed_occ_symbols() {
        assert!(parse_occ_symbol("COIN").is_none());
        assert!(parse_occ_symbol("COIN251317C00202500").is_none());
        assert!(parse_occ_symbol("COIN250117X00202500").is_none());
    }

    #[test]
    fn contracts_order_by_expiration_then_strike() {
        let a = OptionContract::new("SPY", date(2025, 1, 17), dec!(500), OptionType::Put);
        let b = OptionContract::new("SPY", date(2025, 1, 17), dec!(490), OptionType::Put);
        let c = OptionContract::new("SPY", date(2025, 1, 10), dec!(510), OptionType::Put);
        let mut v = vec![a.clone(), b.clone(), c.clone()];
        v.sort();
        assert_eq!(v, vec![c, b, a]);
    }

    #[test]
    fn expected_value_matches_definition() {
        let a = ShortLegStats {
            expected_profit: dec!(100),
            expected_loss: dec!(100),
            probability_of_profit: dec!(0.7),
        };
        let b = ShortLegStats {
            expected_profit: dec!(200),
            expected_loss: dec!(50),
            probability_of_profit: dec!(0.6),
        };
        assert_eq!(a.expected_value(), dec!(40));
        assert_eq!(b.expected_value(), dec!(100));
    }

    #[test]
    fn max_loss_for_credit_and_debit_spreads() {
        let exp = date(2025, 2, 21);
        let stats = ShortLegStats {
            expected_profit: dec!(0),
            expected_loss: dec!(0),
            probability_of_profit: dec!(0.5),
        };
        let credit = OptionSpread {
            strategy: SpreadStrategy::ShortPut,
            short_leg: OptionContract::new("COIN", exp, dec!(200), OptionType::Put),
            long_leg: OptionContract::new("COIN", exp, dec!(195), OptionType::Put),
            credit_received: dec!(1.25),
            stats,
            short_fill: None,
            long_fill: None,
        };
        assert_eq!(credit.width(), dec!(5));
        assert_eq!(credit.max_loss(), dec!(375));

        let debit = OptionSpread {
            strategy: SpreadStrategy::LongCall,
            credit_received: dec!(-2.10),
            ..credit
        };
        assert_eq!(debit.max_loss(), dec!(210));
    }
}
