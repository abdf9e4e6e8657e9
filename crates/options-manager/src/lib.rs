//! Option-chain ranking and order dispatch.
//!
//! On each fired signal the service:
//! - fetches the chain and filters strikes around spot
//! - forms credit and debit spread candidates and prices them with an estimator
//! - keeps the best positive-EV spread per expiration and strategy
//! - drops spreads that exceed the underlying's risk budget
//! - dispatches the rest with idempotency tags, subject to the position cap

pub mod chain;
pub mod engine;
pub mod estimator;
pub mod executor;
pub mod ranking;
pub mod risk;
pub mod service;
pub mod spreads;
pub mod tag;

pub use chain::{ExpirationChain, OptionChain};
pub use engine::{RankedSpread, RankingEngine, RankingError};
pub use estimator::{DeltaEstimator, EstimateInput, SpreadEstimator};
pub use executor::{DispatchError, OrderDispatcher};
pub use ranking::{later_expiration_then_credit, Ranker, TieBreak};
pub use risk::{RiskBudget, RiskCheck};
pub use service::{ExecutionError, OptionsService, SignalOutcome};
pub use tag::idempotency_tag;
