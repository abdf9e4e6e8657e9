use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::candle::TimeSalesInterval;
use crate::options::{OptionType, SpreadStrategy};
use crate::orders::OrderDuration;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub event_log: EventLogConfig,
    pub broker: BrokerConfig,
    pub trading: TradingConfig,
    pub signal_gate: GateConfig,
    /// Composite predicates in evaluation order.
    pub signal_predicates: Vec<PredicateConfig>,
    pub monitor: MonitorConfig,
    pub server: ServerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            event_log: EventLogConfig::default(),
            broker: BrokerConfig::default(),
            trading: TradingConfig::default(),
            signal_gate: GateConfig::default(),
            signal_predicates: builtin_predicates(),
            monitor: MonitorConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Rejects configurations the pipeline cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.trading.validate()?;
        self.event_log.validate()?;

        if self.signal_predicates.is_empty() {
            return Err(invalid("signal_predicates must not be empty"));
        }
        for predicate in &self.signal_predicates {
            if predicate.name.trim().is_empty() {
                return Err(invalid("signal_predicates: predicate name must not be empty"));
            }
            if predicate.required_states.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "signal_predicates: '{}' has no required states",
                    predicate.name
                )));
            }
        }

        if self.signal_gate.indicator.trim().is_empty() || self.signal_gate.values.is_empty() {
            return Err(invalid("signal_gate: indicator and values are required"));
        }

        for repo in &self.monitor.candle_repositories {
            if repo.period_minutes == 0 {
                return Err(ConfigError::Invalid(format!(
                    "monitor.candle_repositories: period for {} must be positive",
                    repo.symbol
                )));
            }
        }

        Ok(())
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid(message.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLogBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLogConfig {
    pub backend: EventLogBackend,
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub tracker_stream: String,
    pub signal_stream: String,
    pub order_stream: String,
    /// Resubscribe attempts before a consumer gives up.
    pub max_resubscribe_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Subscriptions emit a checkpoint every this many events.
    pub checkpoint_interval: u64,
    /// Polling cadence for backends without push notifications.
    pub poll_interval_ms: u64,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            backend: EventLogBackend::Memory,
            database_url: None,
            max_connections: 5,
            tracker_stream: "trackers".to_string(),
            signal_stream: "signals".to_string(),
            order_stream: "orders".to_string(),
            max_resubscribe_attempts: 5,
            initial_backoff_ms: 250,
            max_backoff_ms: 10_000,
            checkpoint_interval: 100,
            poll_interval_ms: 500,
        }
    }
}

impl EventLogConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.backend == EventLogBackend::Postgres && self.database_url.is_none() {
            return Err(invalid("event_log.database_url is required for the postgres backend"));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(invalid("event_log.max_backoff_ms must be >= initial_backoff_ms"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerMode {
    #[default]
    Paper,
    Live,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub mode: BrokerMode,
    pub base_url: String,
    /// Loaded from `OPTFLOW_BROKER__TOKEN`; never written to config files.
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub account_id: Option<String>,
    pub timeout_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            mode: BrokerMode::Paper,
            base_url: "https://sandbox.tradier.com/v1".to_string(),
            token: None,
            account_id: None,
            timeout_secs: 30,
        }
    }
}

/// Per-run trading parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    pub expirations_in_days: Vec<u32>,
    pub min_distance_between_strikes: Decimal,
    pub max_no_of_strikes: usize,
    /// Per underlying.
    pub max_no_of_positions: u32,
    pub option_types: Vec<OptionType>,
    pub strategies: Vec<SpreadStrategy>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub quantity: Decimal,
    pub order_duration: OrderDuration,
    /// Dollars of worst-case loss allowed per underlying across open spreads.
    pub max_risk_per_underlying: Decimal,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            expirations_in_days: vec![7, 14, 30],
            min_distance_between_strikes: Decimal::ONE,
            max_no_of_strikes: 10,
            max_no_of_positions: 3,
            option_types: vec![OptionType::Call, OptionType::Put],
            strategies: vec![SpreadStrategy::ShortCall, SpreadStrategy::ShortPut],
            starts_at: None,
            ends_at: None,
            quantity: Decimal::ONE,
            order_duration: OrderDuration::Day,
            max_risk_per_underlying: Decimal::from(2_000),
        }
    }
}

impl TradingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.expirations_in_days.is_empty() {
            return Err(invalid("trading.expirations_in_days must not be empty"));
        }
        if self.max_no_of_strikes < 2 {
            return Err(invalid("trading.max_no_of_strikes must be at least 2"));
        }
        if self.max_no_of_positions == 0 {
            return Err(invalid("trading.max_no_of_positions must be positive"));
        }
        if self.option_types.is_empty() {
            return Err(invalid("trading.option_types must not be empty"));
        }
        if self.min_distance_between_strikes < Decimal::ZERO {
            return Err(invalid("trading.min_distance_between_strikes must not be negative"));
        }
        if self.quantity <= Decimal::ZERO {
            return Err(invalid("trading.quantity must be positive"));
        }
        if let (Some(start), Some(end)) = (self.starts_at, self.ends_at) {
            if start >= end {
                return Err(invalid("trading.starts_at must be before ends_at"));
            }
        }
        Ok(())
    }

    /// Strategies allowed by both `strategies` and `option_types`.
    #[must_use]
    pub fn enabled_strategies(&self) -> Vec<SpreadStrategy> {
        self.strategies
            .iter()
            .copied()
            .filter(|s| self.option_types.contains(&s.option_type()))
            .collect()
    }
}

/// The indicator whose arrival causes composite predicates to be evaluated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub indicator: String,
    pub values: Vec<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            indicator: "stochastic_rsi".to_string(),
            values: vec!["buy".to_string(), "sell".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredicateConfig {
    pub name: String,
    pub required_states: Vec<RequiredStateConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredStateConfig {
    pub timeframe: u32,
    pub indicator: String,
    pub value: String,
}

impl RequiredStateConfig {
    pub fn new(timeframe: u32, indicator: &str, value: &str) -> Self {
        Self {
            timeframe,
            indicator: indicator.to_string(),
            value: value.to_string(),
        }
    }
}

/// The SuperTrend/StochRSI composites, up and down, with and without the 4h filter.
#[must_use]
pub fn builtin_predicates() -> Vec<PredicateConfig> {
    let mut out = Vec::with_capacity(4);
    for (suffix, side) in [("Up", "buy"), ("Down", "sell")] {
        out.push(PredicateConfig {
            name: format!("SuperTrend1hStochRsi15m{suffix}"),
            required_states: vec![
                RequiredStateConfig::new(60, "supertrend", side),
                RequiredStateConfig::new(15, "stochastic_rsi", side),
            ],
        });
    }
    for (suffix, side) in [("Up", "buy"), ("Down", "sell")] {
        out.push(PredicateConfig {
            name: format!("SuperTrend4h1hStochRsi15m{suffix}"),
            required_states: vec![
                RequiredStateConfig::new(240, "supertrend", side),
                RequiredStateConfig::new(60, "supertrend", side),
                RequiredStateConfig::new(15, "stochastic_rsi", side),
            ],
        });
    }
    out
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_secs: u64,
    pub candle_refresh_secs: u64,
    /// Trailing in-progress bars dropped from each fetched batch.
    pub skip_trailing_candles: usize,
    pub candle_repositories: Vec<CandleRepositoryConfig>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            candle_refresh_secs: 60,
            skip_trailing_candles: 1,
            candle_repositories: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandleRepositoryConfig {
    pub symbol: String,
    pub period_minutes: u32,
    #[serde(default)]
    pub fetch_interval: TimeSalesInterval,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn default_config_is_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn default_config_carries_builtin_predicates() {
        let names: Vec<_> = AppConfig::default()
            .signal_predicates
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "SuperTrend1hStochRsi15mUp",
                "SuperTrend1hStochRsi15mDown",
                "SuperTrend4h1hStochRsi15mUp",
                "SuperTrend4h1hStochRsi15mDown",
            ]
        );
    }

    #[test]
    fn rejects_empty_expirations() {
        let mut config = AppConfig::default();
        config.trading.expirations_in_days.clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("expirations_in_days"));
    }

    #[test]
    fn rejects_inverted_window() {
        let mut config = AppConfig::default();
        config.trading.starts_at = Some(Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap());
        config.trading.ends_at = Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap());
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_predicate_without_states() {
        let mut config = AppConfig::default();
        config.signal_predicates.push(PredicateConfig {
            name: "Empty".to_string(),
            required_states: vec![],
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn postgres_backend_requires_url() {
        let mut config = AppConfig::default();
        config.event_log.backend = EventLogBackend::Postgres;
        assert!(config.validate().is_err());
        config.event_log.database_url = Some("postgres://localhost/optflow".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn enabled_strategies_respect_option_types() {
        let mut trading = TradingConfig::default();
        trading.option_types = vec![OptionType::Put];
        assert_eq!(trading.enabled_strategies(), vec![SpreadStrategy::ShortPut]);
    }
}
