//! Predicate registry.
//!
//! Predicates are kept in registration order; evaluation walks them in that
//! order and every satisfied predicate fires.

use optflow_core::config::builtin_predicates;
use optflow_core::PredicateConfig;

use crate::predicate::{CompositePredicate, SignalPredicate};
use crate::state::SignalState;

pub struct PredicateRegistry {
    predicates: Vec<Box<dyn SignalPredicate>>,
}

impl Default for PredicateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PredicateRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            predicates: Vec::new(),
        }
    }

    /// The four SuperTrend/StochRSI composites.
    #[must_use]
    pub fn builtin() -> Self {
        Self::from_config(&builtin_predicates())
    }

    #[must_use]
    pub fn from_config(configs: &[PredicateConfig]) -> Self {
        let mut registry = Self::new();
        for cfg in configs {
            registry.register(Box::new(CompositePredicate::from(cfg)));
        }
        registry
    }

    /// Registers a predicate.
    ///
    /// A predicate with the same name is replaced in place, keeping its position.
    pub fn register(&mut self, predicate: Box<dyn SignalPredicate>) {
        if let Some(slot) = self
            .predicates
            .iter_mut()
            .find(|p| p.name() == predicate.name())
        {
            *slot = predicate;
        } else {
            self.predicates.push(predicate);
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn SignalPredicate> {
        self.predicates
            .iter()
            .find(|p| p.name() == name)
            .map(|p| &**p)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.predicates.iter().map(|p| p.name()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn remove(&mut self, name: &str) -> Option<Box<dyn SignalPredicate>> {
        let idx = self.predicates.iter().position(|p| p.name() == name)?;
        Some(self.predicates.remove(idx))
    }

    /// Names of predicates gated by the event that are satisfied for `symbol`.
    #[must_use]
    pub fn evaluate(
        &self,
        state: &SignalState,
        symbol: &str,
        timeframe: u32,
        indicator: &str,
        value: &str,
    ) -> Vec<&str> {
        self.predicates
            .iter()
            .filter(|p| p.is_gated_by(timeframe, indicator, value))
            .filter(|p| p.is_satisfied(state, symbol))
            .map(|p| p.name())
            .collect()
    }
}

impl std::fmt::Debug for PredicateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateRegistry")
            .field("predicates", &self.names())
            .finish()
    }
}
