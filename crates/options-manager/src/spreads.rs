//! Candidate spread formation.

use optflow_core::{OptionQuote, OptionSpread, SpreadStrategy};
use rust_decimal::Decimal;
use tracing::debug;

use crate::estimator::{EstimateInput, SpreadEstimator};

/// Orders a strike pair `(lower, higher)` into `(short, long)` for `strategy`.
///
/// Credit spreads sell the strike nearer the money; debit spreads buy it.
fn legs<'a>(
    strategy: SpreadStrategy,
    lower: &'a OptionQuote,
    higher: &'a OptionQuote,
) -> (&'a OptionQuote, &'a OptionQuote) {
    match strategy {
        SpreadStrategy::ShortCall | SpreadStrategy::LongPut => (lower, higher),
        SpreadStrategy::ShortPut | SpreadStrategy::LongCall => (higher, lower),
    }
}

/// Every viable spread of `strategy` from quotes of a single type and expiration.
///
/// Pairs are skipped when a leg has no market on the side we would trade, when
/// the net price is not strictly between zero and the width, or when the
/// estimator cannot price them.
#[must_use]
pub fn build_candidates(
    strategy: SpreadStrategy,
    quotes: &[OptionQuote],
    spot: Decimal,
    estimator: &dyn SpreadEstimator,
) -> Vec<OptionSpread> {
    let mut sorted: Vec<&OptionQuote> = quotes
        .iter()
        .filter(|q| q.contract.option_type == strategy.option_type())
        .collect();
    sorted.sort_by(|a, b| a.contract.strike.cmp(&b.contract.strike));

    let mut candidates = Vec::new();
    for (i, lower) in sorted.iter().enumerate() {
        for higher in &sorted[i + 1..] {
            if lower.contract.expiration != higher.contract.expiration
                || lower.contract.strike == higher.contract.strike
            {
                continue;
            }
            let (short, long) = legs(strategy, lower, higher);
            let (Some(bid), Some(ask)) = (short.bid, long.ask) else {
                debug!(short = %short.contract.symbol, long = %long.contract.symbol, "missing market data");
                continue;
            };

            let credit = bid - ask;
            let width = higher.contract.strike - lower.contract.strike;
            let net = if strategy.is_credit() { credit } else { -credit };
            if net <= Decimal::ZERO || net >= width {
                continue;
            }

            let input = EstimateInput {
                strategy,
                short,
                long,
                credit,
                width,
                spot,
            };
            match estimator.estimate(&input) {
                Ok(stats) => candidates.push(OptionSpread {
                    strategy,
                    short_leg: short.contract.clone(),
                    long_leg: long.contract.clone(),
                    credit_received: credit,
                    stats,
                    short_fill: None,
                    long_fill: None,
                }),
                Err(e) => debug!(short = %short.contract.symbol, error = %e, "estimator skipped pair"),
            }
        }
    }
    candidates
}
