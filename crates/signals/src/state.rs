use std::collections::HashMap;

/// `(symbol, timeframe, indicator)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateKey {
    pub symbol: String,
    pub timeframe: u32,
    pub indicator: String,
}

impl StateKey {
    pub fn new(symbol: impl Into<String>, timeframe: u32, indicator: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            indicator: indicator.into(),
        }
    }
}

/// Latest indicator value per key. Last write wins; keys are never removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignalState {
    values: HashMap<StateKey, String>,
}

impl SignalState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`, returning the previous value.
    pub fn set(&mut self, key: StateKey, value: impl Into<String>) -> Option<String> {
        self.values.insert(key, value.into())
    }

    #[must_use]
    pub fn get(&self, symbol: &str, timeframe: u32, indicator: &str) -> Option<&str> {
        self.values
            .get(&StateKey::new(symbol, timeframe, indicator))
            .map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StateKey, &str)> {
        self.values.iter().map(|(k, v)| (k, v.as_str()))
    }

    /// Every key for `symbol`, sorted by timeframe then indicator.
    #[must_use]
    pub fn for_symbol(&self, symbol: &str) -> Vec<(StateKey, String)> {
        let mut out: Vec<_> = self
            .values
            .iter()
            .filter(|(k, _)| k.symbol == symbol)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        out.sort();
        out
    }
}
