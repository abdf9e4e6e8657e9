//! Live candle refresh from a time-and-sales source.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use optflow_core::{Shutdown, TimeSalesSource};
use tracing::{debug, info, warn};

use crate::candles::{CandlePool, CandleRepository};

/// Bars are requested over `now ± 24h`.
const FETCH_WINDOW_HOURS: i64 = 24;

pub struct LiveCandleRefresher {
    source: Arc<dyn TimeSalesSource>,
    pool: Arc<CandlePool>,
    skip_trailing: usize,
    interval: Duration,
}

impl LiveCandleRefresher {
    pub fn new(
        source: Arc<dyn TimeSalesSource>,
        pool: Arc<CandlePool>,
        skip_trailing: usize,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            pool,
            skip_trailing,
            interval,
        }
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<CandlePool> {
        &self.pool
    }

    /// Fetches and appends new bars for one repository. Returns the count appended.
    ///
    /// # Errors
    ///
    /// Returns an error if the source fetch fails.
    pub async fn refresh_repository(&self, repo: &CandleRepository, now: DateTime<Utc>) -> Result<usize> {
        let window = chrono::Duration::hours(FETCH_WINDOW_HOURS);
        let mut bars = self
            .source
            .time_and_sales(repo.symbol(), repo.fetch_interval(), now - window, now + window)
            .await?;

        // The newest bars may still be forming.
        bars.truncate(bars.len().saturating_sub(self.skip_trailing));

        let last = repo.last_timestamp();
        let fresh = bars
            .into_iter()
            .filter(|bar| last.map_or(true, |t| bar.timestamp > t))
            .filter(|bar| bar.is_aligned(repo.period_minutes()));
        let appended = repo.append_bars(fresh);
        debug!(symbol = repo.symbol(), period = repo.period_minutes(), appended, "candles refreshed");
        Ok(appended)
    }

    /// Refreshes every registered repository; failures are logged per repository.
    pub async fn refresh_all(&self, now: DateTime<Utc>) -> usize {
        let mut total = 0;
        for repo in self.pool.repositories() {
            match self.refresh_repository(&repo, now).await {
                Ok(n) => total += n,
                Err(e) => warn!(
                    symbol = repo.symbol(),
                    period = repo.period_minutes(),
                    error = %e,
                    "candle refresh failed"
                ),
            }
        }
        total
    }

    pub async fn run(self: Arc<Self>, shutdown: Shutdown) -> Result<()> {
        info!(
            repositories = self.pool.repositories().len(),
            refresh_secs = self.interval.as_secs(),
            "Live candle refresh started"
        );
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            let appended = self.refresh_all(Utc::now()).await;
            if appended > 0 {
                info!(appended, "new candles");
            }
        }

        info!("Live candle refresh stopped");
        Ok(())
    }
}
