//! Tradier brokerage integration.
//!
//! [`TradierClient`] talks to the Tradier REST API and implements every broker
//! capability the pipeline consumes. [`PaperBroker`] implements the same
//! capabilities in memory.

pub mod client;
pub mod dto;
pub mod error;
pub mod paper;

pub use client::{TradierClient, TradierConfig, TRADIER_LIVE_URL, TRADIER_SANDBOX_URL};
pub use dto::Series;
pub use error::{BrokerError, Result};
pub use paper::PaperBroker;
