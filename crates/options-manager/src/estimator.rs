//! Short-leg statistics for candidate spreads.

use anyhow::{anyhow, Result};
use optflow_core::{OptionQuote, ShortLegStats, SpreadStrategy};
use rust_decimal::Decimal;

/// Inputs describing one candidate pair.
#[derive(Debug, Clone, Copy)]
pub struct EstimateInput<'a> {
    pub strategy: SpreadStrategy,
    pub short: &'a OptionQuote,
    pub long: &'a OptionQuote,
    /// Short bid minus long ask; negative for debit spreads.
    pub credit: Decimal,
    pub width: Decimal,
    pub spot: Decimal,
}

/// Produces expected profit, expected loss, and probability of profit for a spread.
pub trait SpreadEstimator: Send + Sync {
    /// # Errors
    ///
    /// Returns an error when the quotes lack the data the estimator needs;
    /// the pair is then skipped.
    fn estimate(&self, input: &EstimateInput<'_>) -> Result<ShortLegStats>;
}

/// Delta-based estimator.
///
/// Credit spreads: `pop = 1 − |Δshort|`, profit is the credit, loss is the
/// width less the credit. Debit spreads: `pop = |Δlong|`, profit is the width
/// less the debit, loss is the debit. Dollar amounts use the contract multiplier.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeltaEstimator;

fn abs_delta(quote: &OptionQuote) -> Result<Decimal> {
    let greeks = quote
        .greeks
        .as_ref()
        .ok_or_else(|| anyhow!("no greeks for {}", quote.contract.symbol))?;
    let delta = Decimal::try_from(greeks.delta.abs())
        .map_err(|e| anyhow!("bad delta for {}: {e}", quote.contract.symbol))?;
    Ok(delta.min(Decimal::ONE).round_dp(4))
}

impl SpreadEstimator for DeltaEstimator {
    fn estimate(&self, input: &EstimateInput<'_>) -> Result<ShortLegStats> {
        let multiplier = input.short.contract.multiplier;
        if input.strategy.is_credit() {
            let pop = Decimal::ONE - abs_delta(input.short)?;
            Ok(ShortLegStats {
                expected_profit: input.credit * multiplier,
                expected_loss: (input.width - input.credit) * multiplier,
                probability_of_profit: pop,
            })
        } else {
            let debit = -input.credit;
            Ok(ShortLegStats {
                expected_profit: (input.width - debit) * multiplier,
                expected_loss: debit * multiplier,
                probability_of_profit: abs_delta(input.long)?,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use optflow_core::{OptionContract, OptionGreeks, OptionType};
    use rust_decimal_macros::dec;

    fn quote(strike: Decimal, delta: Option<f64>) -> OptionQuote {
        let exp = NaiveDate::from_ymd_opt(2024, 5, 17).unwrap();
        OptionQuote {
            contract: OptionContract::new("COIN", exp, strike, OptionType::Put),
            bid: Some(dec!(1)),
            ask: Some(dec!(1)),
            last: None,
            open_interest: 0,
            greeks: delta.map(|delta| OptionGreeks {
                delta,
                ..OptionGreeks::default()
            }),
        }
    }

    #[test]
    fn credit_spread_uses_short_delta() {
        let short = quote(dec!(200), Some(-0.30));
        let long = quote(dec!(195), Some(-0.20));
        let stats = DeltaEstimator
            .estimate(&EstimateInput {
                strategy: SpreadStrategy::ShortPut,
                short: &short,
                long: &long,
                credit: dec!(1.25),
                width: dec!(5),
                spot: dec!(205),
            })
            .unwrap();
        assert_eq!(stats.probability_of_profit, dec!(0.7));
        assert_eq!(stats.expected_profit, dec!(125));
        assert_eq!(stats.expected_loss, dec!(375));
    }

    #[test]
    fn debit_spread_uses_long_delta() {
        let short = quote(dec!(195), Some(-0.20));
        let long = quote(dec!(200), Some(-0.45));
        let stats = DeltaEstimator
            .estimate(&EstimateInput {
                strategy: SpreadStrategy::LongPut,
                short: &short,
                long: &long,
                credit: dec!(-2),
                width: dec!(5),
                spot: dec!(201),
            })
            .unwrap();
        assert_eq!(stats.probability_of_profit, dec!(0.45));
        assert_eq!(stats.expected_profit, dec!(300));
        assert_eq!(stats.expected_loss, dec!(200));
    }

    #[test]
    fn missing_greeks_is_an_error() {
        let short = quote(dec!(200), None);
        let long = quote(dec!(195), Some(-0.2));
        let input = EstimateInput {
            strategy: SpreadStrategy::ShortPut,
            short: &short,
            long: &long,
            credit: dec!(1),
            width: dec!(5),
            spot: dec!(205),
        };
        assert!(DeltaEstimator.estimate(&input).is_err());
    }
}
