//! Signal aggregation.
//!
//! Tracker events update a `(symbol, timeframe, indicator) → value` map;
//! composite predicates over that map fire [`SignalTriggered`](optflow_core::SignalTriggered)
//! events when a live gating event makes them true.

pub mod aggregator;
pub mod predicate;
pub mod registry;
pub mod state;

pub use aggregator::{SignalAggregator, TriggerWindow};
pub use predicate::{CompositePredicate, RequiredState, SignalPredicate};
pub use registry::PredicateRegistry;
pub use state::{SignalState, StateKey};
