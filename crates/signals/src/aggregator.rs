//! The signal aggregator worker.
//!
//! One exclusive lock covers the state update and the predicate evaluation for
//! each event, so concurrent callers of [`SignalAggregator::apply`] observe
//! events atomically.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use optflow_core::{
    AppConfig, GateConfig, Shutdown, SignalTriggered, TrackerEvent, TradingConfig,
};
use optflow_event_log::{Delivery, EventData, EventLog, ExpectedRevision};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::registry::PredicateRegistry;
use crate::state::{SignalState, StateKey};

/// Optional trigger window compared with event timestamps.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerWindow {
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
}

impl TriggerWindow {
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.starts_at.map_or(true, |start| at >= start)
            && self.ends_at.map_or(true, |end| at < end)
    }
}

impl From<&TradingConfig> for TriggerWindow {
    fn from(trading: &TradingConfig) -> Self {
        Self {
            starts_at: trading.starts_at,
            ends_at: trading.ends_at,
        }
    }
}

struct Journal {
    log: Arc<dyn EventLog>,
    stream: String,
}

pub struct SignalAggregator {
    state: Mutex<SignalState>,
    registry: PredicateRegistry,
    gate: GateConfig,
    window: TriggerWindow,
    journal: Option<Journal>,
}

impl SignalAggregator {
    #[must_use]
    pub fn new(registry: PredicateRegistry, gate: GateConfig, window: TriggerWindow) -> Self {
        Self {
            state: Mutex::new(SignalState::new()),
            registry,
            gate,
            window,
            journal: None,
        }
    }

    /// Aggregator configured from the predicate, gate, and window sections.
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            PredicateRegistry::from_config(&config.signal_predicates),
            config.signal_gate.clone(),
            TriggerWindow::from(&config.trading),
        )
    }

    /// Appends every live trigger to `stream` before forwarding it.
    #[must_use]
    pub fn with_journal(mut self, log: Arc<dyn EventLog>, stream: impl Into<String>) -> Self {
        self.journal = Some(Journal {
            log,
            stream: stream.into(),
        });
        self
    }

    #[must_use]
    pub fn registry(&self) -> &PredicateRegistry {
        &self.registry
    }

    /// Current value for a key.
    #[must_use]
    pub fn value(&self, symbol: &str, timeframe: u32, indicator: &str) -> Option<String> {
        self.state
            .lock()
            .get(symbol, timeframe, indicator)
            .map(str::to_string)
    }

    #[must_use]
    pub fn snapshot(&self) -> SignalState {
        self.state.lock().clone()
    }

    /// Applies one tracker event and returns the triggers it fires.
    ///
    /// Replay events update state and never fire.
    pub fn apply(&self, event: &TrackerEvent, is_replay: bool) -> Vec<SignalTriggered> {
        let Some((indicator, value)) = event.indicator_state() else {
            warn!(
                symbol = %event.symbol,
                name = %event.name,
                "tracker event without indicator state, skipping"
            );
            return Vec::new();
        };

        let mut state = self.state.lock();
        state.set(
            StateKey::new(event.symbol.clone(), event.timeframe_minutes, indicator),
            value,
        );

        if is_replay || !self.is_gate(indicator, value) {
            return Vec::new();
        }
        if !self.window.contains(event.timestamp) {
            debug!(symbol = %event.symbol, at = %event.timestamp, "outside trigger window");
            return Vec::new();
        }

        self.registry
            .evaluate(&state, &event.symbol, event.timeframe_minutes, indicator, value)
            .into_iter()
            .map(|name| SignalTriggered {
                symbol: event.symbol.clone(),
                signal_name: name.to_string(),
                timestamp: event.timestamp,
                trace_context: event.trace_context.clone(),
                request_id: None,
            })
            .collect()
    }

    fn is_gate(&self, indicator: &str, value: &str) -> bool {
        indicator == self.gate.indicator && self.gate.values.iter().any(|v| v == value)
    }

    /// Consumes deliveries until the input closes or shutdown, forwarding triggers to `out`.
    pub async fn run(
        self: Arc<Self>,
        mut input: mpsc::Receiver<Delivery<TrackerEvent>>,
        out: mpsc::Sender<SignalTriggered>,
        shutdown: Shutdown,
    ) -> anyhow::Result<()> {
        info!(predicates = ?self.registry.names(), "signal aggregator started");
        loop {
            let delivery = tokio::select! {
                () = shutdown.cancelled() => break,
                delivery = input.recv() => delivery,
            };
            let Some(delivery) = delivery else { break };

            for signal in self.apply(&delivery.event, delivery.is_replay) {
                info!(
                    symbol = %signal.symbol,
                    signal = %signal.signal_name,
                    revision = delivery.revision,
                    "signal triggered"
                );
                self.journal(&signal).await;
                tokio::select! {
                    () = shutdown.cancelled() => return Ok(()),
                    sent = out.send(signal) => {
                        if sent.is_err() {
                            info!("signal output closed, aggregator stopping");
                            return Ok(());
                        }
                    }
                }
            }
        }
        info!("signal aggregator stopped");
        Ok(())
    }

    async fn journal(&self, signal: &SignalTriggered) {
        let Some(journal) = &self.journal else { return };
        let data = match EventData::from_event(signal) {
            Ok(data) => data,
            Err(e) => {
                error!(error = %e, "failed to encode signal for journal");
                return;
            }
        };
        if let Err(e) = journal
            .log
            .append(&journal.stream, data, ExpectedRevision::Any)
            .await
        {
            error!(stream = %journal.stream, error = %e, "failed to journal signal");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use optflow_core::TraceContext;
    use optflow_event_log::InMemoryEventLog;

    fn aggregator() -> SignalAggregator {
        SignalAggregator::new(
            PredicateRegistry::builtin(),
            GateConfig::default(),
            TriggerWindow::default(),
        )
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, m, 0).unwrap()
    }

    #[test]
    fn trace_context_is_propagated_from_trigger() {
        let agg = aggregator();
        agg.apply(&TrackerEvent::new("COIN", 60, "supertrend", "buy", at(14, 0)), false);
        let ev = TrackerEvent::new("COIN", 15, "stochastic_rsi", "buy", at(14, 15))
            .with_trace_context(TraceContext::new("00-trace-span-01"));
        let fired = agg.apply(&ev, false);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].timestamp, at(14, 15));
        assert_eq!(
            fired[0].trace_context,
            Some(TraceContext::new("00-trace-span-01"))
        );
    }

    #[test]
    fn down_signal_fires_on_sell_side() {
        let agg = aggregator();
        agg.apply(&TrackerEvent::new("COIN", 60, "supertrend", "sell", at(14, 0)), false);
        let fired = agg.apply(
            &TrackerEvent::new("COIN", 15, "stochastic_rsi", "sell", at(14, 15)),
            false,
        );
        assert_eq!(fired[0].signal_name, "SuperTrend1hStochRsi15mDown");
    }

    #[test]
    fn malformed_names_leave_state_untouched() {
        let agg = aggregator();
        let mut ev = TrackerEvent::new("COIN", 60, "supertrend", "buy", at(14, 0));
        ev.name = "supertrend".to_string();
        assert!(agg.apply(&ev, false).is_empty());
        assert!(agg.snapshot().is_empty());
    }

    #[test]
    fn window_suppresses_triggers_but_not_state() {
        let agg = SignalAggregator::new(
            PredicateRegistry::builtin(),
            GateConfig::default(),
            TriggerWindow {
                starts_at: Some(at(13, 30)),
                ends_at: Some(at(20, 0)),
            },
        );
        agg.apply(&TrackerEvent::new("COIN", 60, "supertrend", "buy", at(12, 0)), false);
        let early = agg.apply(
            &TrackerEvent::new("COIN", 15, "stochastic_rsi", "buy", at(12, 15)),
            false,
        );
        assert!(early.is_empty());
        assert_eq!(agg.value("COIN", 15, "stochastic_rsi").as_deref(), Some("buy"));

        let inside = agg.apply(
            &TrackerEvent::new("COIN", 15, "stochastic_rsi", "buy", at(14, 0)),
            false,
        );
        assert_eq!(inside.len(), 1);
    }

    #[tokio::test]
    async fn run_forwards_and_journals_live_triggers() {
        let log = Arc::new(InMemoryEventLog::new());
        let agg = Arc::new(aggregator().with_journal(log.clone(), "signals"));
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let worker = tokio::spawn(agg.run(in_rx, out_tx, Shutdown::never()));

        for (tf, ind, replay) in [(60, "supertrend", true), (15, "stochastic_rsi", false)] {
            in_tx
                .send(Delivery {
                    event: TrackerEvent::new("COIN", tf, ind, "buy", at(14, 0)),
                    revision: 0,
                    is_replay: replay,
                })
                .await
                .unwrap();
        }
        let signal = out_rx.recv().await.unwrap();
        assert_eq!(signal.signal_name, "SuperTrend1hStochRsi15mUp");

        drop(in_tx);
        worker.await.unwrap().unwrap();
        assert_eq!(log.len("signals"), 1);
    }
}
