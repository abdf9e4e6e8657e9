//! Composite predicates over the indicator state map.

use optflow_core::{PredicateConfig, RequiredStateConfig};

use crate::state::SignalState;

/// A named boolean condition over one symbol's indicator states.
pub trait SignalPredicate: Send + Sync {
    fn name(&self) -> &str;

    /// Whether every condition holds for `symbol`. Missing keys are unsatisfied.
    fn is_satisfied(&self, state: &SignalState, symbol: &str) -> bool;

    /// Whether an incoming `(timeframe, indicator, value)` participates in this predicate.
    fn is_gated_by(&self, timeframe: u32, indicator: &str, value: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredState {
    pub timeframe: u32,
    pub indicator: String,
    pub value: String,
}

impl RequiredState {
    pub fn new(timeframe: u32, indicator: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            timeframe,
            indicator: indicator.into(),
            value: value.into(),
        }
    }
}

impl From<&RequiredStateConfig> for RequiredState {
    fn from(cfg: &RequiredStateConfig) -> Self {
        Self::new(cfg.timeframe, cfg.indicator.clone(), cfg.value.clone())
    }
}

/// Conjunction of required states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositePredicate {
    name: String,
    required: Vec<RequiredState>,
}

impl CompositePredicate {
    pub fn new(name: impl Into<String>, required: Vec<RequiredState>) -> Self {
        Self {
            name: name.into(),
            required,
        }
    }

    #[must_use]
    pub fn required_states(&self) -> &[RequiredState] {
        &self.required
    }
}

impl From<&PredicateConfig> for CompositePredicate {
    fn from(cfg: &PredicateConfig) -> Self {
        Self::new(
            cfg.name.clone(),
            cfg.required_states.iter().map(RequiredState::from).collect(),
        )
    }
}

impl SignalPredicate for CompositePredicate {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_satisfied(&self, state: &SignalState, symbol: &str) -> bool {
        !self.required.is_empty()
            && self.required.iter().all(|req| {
                state.get(symbol, req.timeframe, &req.indicator) == Some(req.value.as_str())
            })
    }

    fn is_gated_by(&self, timeframe: u32, indicator: &str, value: &str) -> bool {
        self.required
            .iter()
            .any(|req| req.timeframe == timeframe && req.indicator == indicator && req.value == value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateKey;

    fn up_1h() -> CompositePredicate {
        CompositePredicate::new(
            "SuperTrend1hStochRsi15mUp",
            vec![
                RequiredState::new(60, "supertrend", "buy"),
                RequiredState::new(15, "stochastic_rsi", "buy"),
            ],
        )
    }

    #[test]
    fn satisfied_only_when_every_state_matches() {
        let p = up_1h();
        let mut state = SignalState::new();
        assert!(!p.is_satisfied(&state, "COIN"));

        state.set(StateKey::new("COIN", 60, "supertrend"), "buy");
        assert!(!p.is_satisfied(&state, "COIN"));

        state.set(StateKey::new("COIN", 15, "stochastic_rsi"), "buy");
        assert!(p.is_satisfied(&state, "COIN"));
        assert!(!p.is_satisfied(&state, "SPY"));

        state.set(StateKey::new("COIN", 60, "supertrend"), "sell");
        assert!(!p.is_satisfied(&state, "COIN"));
    }

    #[test]
    fn gating_matches_listed_states_only() {
        let p = up_1h();
        assert!(p.is_gated_by(15, "stochastic_rsi", "buy"));
        assert!(!p.is_gated_by(15, "stochastic_rsi", "sell"));
        assert!(!p.is_gated_by(60, "stochastic_rsi", "buy"));
    }

    #[test]
    fn empty_predicate_is_never_satisfied() {
        let p = CompositePredicate::new("Nothing", vec![]);
        assert!(!p.is_satisfied(&SignalState::new(), "COIN"));
    }
}
