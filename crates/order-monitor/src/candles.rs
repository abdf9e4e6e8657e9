//! Candle repositories and the pool that registers them.
//!
//! A repository holds bars for one `(symbol, period)` pair. Stored bars are
//! strictly increasing in time and aligned to the period.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use optflow_core::{Candle, CandleRepositoryConfig, TimeSalesInterval};
use parking_lot::RwLock;
use tracing::debug;

#[derive(Debug)]
pub struct CandleRepository {
    symbol: String,
    period_minutes: u32,
    fetch_interval: TimeSalesInterval,
    candles: RwLock<Vec<Candle>>,
}

impl CandleRepository {
    #[must_use]
    pub fn new(symbol: impl Into<String>, period_minutes: u32, fetch_interval: TimeSalesInterval) -> Self {
        Self {
            symbol: symbol.into().to_uppercase(),
            period_minutes,
            fetch_interval,
            candles: RwLock::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    #[must_use]
    pub fn period_minutes(&self) -> u32 {
        self.period_minutes
    }

    #[must_use]
    pub fn fetch_interval(&self) -> TimeSalesInterval {
        self.fetch_interval
    }

    /// Appends the bars that keep the repository ordered and aligned.
    ///
    /// Bars at or before the last stored timestamp, or off the period grid,
    /// are skipped. Returns how many were appended.
    pub fn append_bars(&self, bars: impl IntoIterator<Item = Candle>) -> usize {
        let mut candles = self.candles.write();
        let mut last = candles.last().map(|c| c.timestamp);
        let mut appended = 0;
        for bar in bars {
            if last.is_some_and(|t| bar.timestamp <= t) {
                debug!(symbol = %self.symbol, at = %bar.timestamp, "bar not after last, skipped");
                continue;
            }
            if !bar.is_aligned(self.period_minutes) {
                debug!(symbol = %self.symbol, at = %bar.timestamp, period = self.period_minutes, "misaligned bar skipped");
                continue;
            }
            last = Some(bar.timestamp);
            candles.push(bar);
            appended += 1;
        }
        appended
    }

    #[must_use]
    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.candles.read().last().map(|c| c.timestamp)
    }

    #[must_use]
    pub fn candles(&self) -> Vec<Candle> {
        self.candles.read().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.candles.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.candles.read().is_empty()
    }
}

/// Registry of repositories keyed by `(symbol, period)`.
#[derive(Debug, Default)]
pub struct CandlePool {
    repos: RwLock<HashMap<(String, u32), Arc<CandleRepository>>>,
}

impl CandlePool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_config(configs: &[CandleRepositoryConfig]) -> Self {
        let pool = Self::new();
        for c in configs {
            pool.register(&c.symbol, c.period_minutes, c.fetch_interval);
        }
        pool
    }

    /// Returns the repository for `(symbol, period)`, creating it if needed.
    pub fn register(
        &self,
        symbol: &str,
        period_minutes: u32,
        fetch_interval: TimeSalesInterval,
    ) -> Arc<CandleRepository> {
        let key = (symbol.to_uppercase(), period_minutes);
        self.repos
            .write()
            .entry(key)
            .or_insert_with(|| Arc::new(CandleRepository::new(symbol, period_minutes, fetch_interval)))
            .clone()
    }

    #[must_use]
    pub fn get(&self, symbol: &str, period_minutes: u32) -> Option<Arc<CandleRepository>> {
        self.repos
            .read()
            .get(&(symbol.to_uppercase(), period_minutes))
            .cloned()
    }

    /// Every registered repository, ordered by symbol then period.
    #[must_use]
    pub fn repositories(&self) -> Vec<Arc<CandleRepository>> {
        let mut repos: Vec<_> = self.repos.read().values().cloned().collect();
        repos.sort_by(|a, b| {
            a.symbol
                .cmp(&b.symbol)
                .then(a.period_minutes.cmp(&b.period_minutes))
        });
        repos
    }
}
