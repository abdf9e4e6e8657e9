//! Core domain types, configuration, and collaborator traits shared by every
//! stage of the options signal pipeline.

pub mod candle;
pub mod config;
pub mod config_loader;
pub mod events;
pub mod options;
pub mod orders;
pub mod shutdown;
pub mod traits;

pub use candle::{Candle, TimeSalesInterval};
pub use config::{
    builtin_predicates, AppConfig, BrokerConfig, BrokerMode, CandleRepositoryConfig, ConfigError,
    EventLogBackend, EventLogConfig, GateConfig, MonitorConfig, PredicateConfig,
    RequiredStateConfig, ServerConfig, TradingConfig,
};
pub use config_loader::ConfigLoader;
pub use events::{OrderDelta, SignalTriggered, StreamEvent, TraceContext, TrackerEvent};
pub use options::{
    OptionContract, OptionGreeks, OptionQuote, OptionSpread, OptionType, ShortLegStats,
    SpreadStrategy,
};
pub use orders::{Order, OrderDuration, OrderLeg, OrderSide, OrderStatus, SpreadOrderRequest};
pub use shutdown::{Shutdown, ShutdownTrigger};
pub use traits::{ChainSource, OrderBook, OrderSource, SpreadExecutor, TimeSalesSource};
