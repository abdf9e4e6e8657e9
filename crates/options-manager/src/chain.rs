//! Option-chain assembly: expiration selection and strike filtering.

use std::collections::BTreeSet;

use chrono::{Duration, NaiveDate};
use optflow_core::{ChainSource, OptionQuote, OptionType, TradingConfig};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::engine::RankingError;

/// Filtered quotes for one expiration.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpirationChain {
    pub expiration: NaiveDate,
    /// Ascending by strike.
    pub calls: Vec<OptionQuote>,
    /// Ascending by strike.
    pub puts: Vec<OptionQuote>,
}

impl ExpirationChain {
    #[must_use]
    pub fn quotes(&self, option_type: OptionType) -> &[OptionQuote] {
        match option_type {
            OptionType::Call => &self.calls,
            OptionType::Put => &self.puts,
        }
    }
}

/// Everything the ranking step needs for one underlying.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionChain {
    pub underlying: String,
    pub spot: Decimal,
    pub expirations: Vec<ExpirationChain>,
}

/// For each requested day offset, the listed expiration nearest to `today + days`.
///
/// Past expirations are never chosen. Offsets that resolve to the same date
/// yield it once; the result is ascending.
#[must_use]
pub fn select_expirations(
    available: &[NaiveDate],
    expirations_in_days: &[u32],
    today: NaiveDate,
) -> Vec<NaiveDate> {
    let listed: BTreeSet<NaiveDate> = available.iter().copied().filter(|d| *d >= today).collect();
    let mut chosen = BTreeSet::new();
    for days in expirations_in_days {
        let target = today + Duration::days(i64::from(*days));
        let nearest = listed
            .iter()
            .copied()
            .min_by_key(|d| (*d - target).num_days().abs());
        if let Some(date) = nearest {
            chosen.insert(date);
        }
    }
    chosen.into_iter().collect()
}

/// Keeps the strikes nearest to spot on each side, spaced at least `min_distance` apart.
///
/// The sides are strikes at or below spot and strikes above it. Each side is
/// walked outward from spot and capped at `max_per_side`. Quotes must all be
/// of one option type; the result is ascending by strike.
#[must_use]
pub fn filter_strikes(
    quotes: Vec<OptionQuote>,
    spot: Decimal,
    min_distance: Decimal,
    max_per_side: usize,
) -> Vec<OptionQuote> {
    let (mut below, mut above): (Vec<_>, Vec<_>) =
        quotes.into_iter().partition(|q| q.contract.strike <= spot);
    below.sort_by(|a, b| b.contract.strike.cmp(&a.contract.strike));
    above.sort_by(|a, b| a.contract.strike.cmp(&b.contract.strike));

    let mut included: Vec<OptionQuote> = Vec::new();
    for side in [below, above] {
        let mut taken = 0;
        for quote in side {
            if taken == max_per_side {
                break;
            }
            let spaced = included
                .iter()
                .all(|q| (q.contract.strike - quote.contract.strike).abs() >= min_distance);
            if spaced {
                included.push(quote);
                taken += 1;
            }
        }
    }
    included.sort_by(|a, b| a.contract.strike.cmp(&b.contract.strike));
    included
}

/// Fetches and filters the chain for `symbol`.
///
/// Option types left with fewer than two strikes are dropped for that
/// expiration; expirations with no usable type are dropped entirely.
///
/// # Errors
///
/// Returns `RankingError::MarketData` when the source cannot supply a quote,
/// the expiration list, or a chain.
pub async fn fetch_chain(
    source: &dyn ChainSource,
    symbol: &str,
    config: &TradingConfig,
    today: NaiveDate,
) -> Result<OptionChain, RankingError> {
    let spot = source
        .underlying_price(symbol)
        .await
        .map_err(|e| RankingError::market_data(symbol, e))?;
    let available = source
        .expirations(symbol)
        .await
        .map_err(|e| RankingError::market_data(symbol, e))?;

    let mut expirations = Vec::new();
    for expiration in select_expirations(&available, &config.expirations_in_days, today) {
        let quotes = source
            .chain(symbol, expiration)
            .await
            .map_err(|e| RankingError::market_data(symbol, e))?;

        let mut slice = ExpirationChain {
            expiration,
            calls: Vec::new(),
            puts: Vec::new(),
        };
        for option_type in &config.option_types {
            let of_type: Vec<OptionQuote> = quotes
                .iter()
                .filter(|q| q.contract.option_type == *option_type)
                .cloned()
                .collect();
            let filtered = filter_strikes(
                of_type,
                spot,
                config.min_distance_between_strikes,
                config.max_no_of_strikes,
            );
            if filtered.len() < 2 {
                debug!(symbol, %expiration, %option_type, strikes = filtered.len(), "too few strikes");
                continue;
            }
            match option_type {
                OptionType::Call => slice.calls = filtered,
                OptionType::Put => slice.puts = filtered,
            }
        }

        if slice.calls.is_empty() && slice.puts.is_empty() {
            warn!(symbol, %expiration, "expiration rejected: fewer than two strikes after filtering");
            continue;
        }
        expirations.push(slice);
    }

    Ok(OptionChain {
        underlying: symbol.to_string(),
        spot,
        expirations,
    })
}
