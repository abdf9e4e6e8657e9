//! Option-chain and ranking engine.
//!
//! Turns a fired signal into the best spread per expiration and strategy,
//! filtered by the underlying's remaining risk budget and tagged for dispatch.

use std::sync::Arc;

use optflow_core::{ChainSource, OptionSpread, Order, SignalTriggered, TradingConfig};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{info, warn};

use crate::chain::fetch_chain;
use crate::estimator::SpreadEstimator;
use crate::ranking::Ranker;
use crate::risk::{RiskBudget, RiskCheck};
use crate::spreads::build_candidates;
use crate::tag::idempotency_tag;

#[derive(Debug, Error)]
pub enum RankingError {
    /// The signal cannot be acted on as configured.
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("market data unavailable for {symbol}: {source}")]
    MarketData {
        symbol: String,
        #[source]
        source: anyhow::Error,
    },
}

impl RankingError {
    pub fn market_data(symbol: &str, source: anyhow::Error) -> Self {
        Self::MarketData {
            symbol: symbol.to_string(),
            source,
        }
    }
}

/// A spread chosen for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedSpread {
    pub spread: OptionSpread,
    pub tag: String,
    pub quantity: Decimal,
    /// Net limit price: the credit for credit spreads, the debit for debit spreads.
    pub price: Decimal,
}

pub struct RankingEngine {
    source: Arc<dyn ChainSource>,
    estimator: Arc<dyn SpreadEstimator>,
    config: TradingConfig,
    ranker: Ranker,
}

impl RankingEngine {
    pub fn new(
        source: Arc<dyn ChainSource>,
        estimator: Arc<dyn SpreadEstimator>,
        config: TradingConfig,
    ) -> Self {
        Self {
            source,
            estimator,
            config,
            ranker: Ranker::default(),
        }
    }

    #[must_use]
    pub fn with_ranker(mut self, ranker: Ranker) -> Self {
        self.ranker = ranker;
        self
    }

    #[must_use]
    pub fn config(&self) -> &TradingConfig {
        &self.config
    }

    /// Ranks spreads for `signal`, best first.
    ///
    /// `open_orders` are the underlying's orders from the monitor store and
    /// determine the remaining risk budget. An empty result is not an error.
    /// Expiration targets count days from the signal's timestamp, which is the
    /// current time for both tracker-fed and manual signals.
    ///
    /// # Errors
    ///
    /// `Validation` when the signal has no symbol or no strategy is enabled;
    /// `MarketData` when the chain cannot be fetched.
    pub async fn rank(
        &self,
        signal: &SignalTriggered,
        open_orders: &[Order],
    ) -> Result<Vec<RankedSpread>, RankingError> {
        let symbol = signal.symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(RankingError::Validation("signal has no symbol".into()));
        }
        let strategies = self.config.enabled_strategies();
        if strategies.is_empty() {
            return Err(RankingError::Validation(
                "no strategy is enabled for the configured option types".into(),
            ));
        }

        let today = signal.timestamp.date_naive();
        let chain = fetch_chain(self.source.as_ref(), &symbol, &self.config, today).await?;

        let mut candidates = Vec::new();
        for expiration in &chain.expirations {
            for strategy in &strategies {
                let quotes = expiration.quotes(strategy.option_type());
                candidates.extend(build_candidates(
                    *strategy,
                    quotes,
                    chain.spot,
                    self.estimator.as_ref(),
                ));
            }
        }
        let total = candidates.len();
        let selected = self.ranker.select(candidates);

        let quantity = self.config.quantity;
        let mut budget = RiskBudget::from_orders(self.config.max_risk_per_underlying, open_orders);
        let mut ranked = Vec::with_capacity(selected.len());
        for spread in selected {
            match budget.check(&spread, quantity) {
                RiskCheck::Approved { max_loss, .. } => {
                    budget.reserve(max_loss);
                    let tag = idempotency_tag(
                        &signal.signal_name,
                        spread.stats.expected_profit,
                        spread.credit_received,
                    );
                    ranked.push(RankedSpread {
                        price: spread.credit_received.abs(),
                        spread,
                        tag,
                        quantity,
                    });
                }
                RiskCheck::Rejected {
                    max_loss,
                    remaining,
                } => warn!(
                    %symbol,
                    strategy = %spread.strategy,
                    expiration = %spread.expiration(),
                    %max_loss,
                    %remaining,
                    "spread exceeds risk budget"
                ),
            }
        }

        info!(
            %symbol,
            signal = %signal.signal_name,
            expirations = chain.expirations.len(),
            candidates = total,
            ranked = ranked.len(),
            "ranked spreads"
        );
        Ok(ranked)
    }
}
