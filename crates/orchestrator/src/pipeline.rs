//! Wires every worker together under one root shutdown scope and supervises them.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use optflow_core::{
    AppConfig, ChainSource, Order, OrderBook, OrderSource, Shutdown, ShutdownTrigger,
    SpreadExecutor, TimeSalesSource, TrackerEvent,
};
use optflow_event_log::{ConsumerSettings, EventLog, StreamConsumer};
use optflow_order_monitor::{CandlePool, LiveCandleRefresher, OrderMonitor, OrderStore};
use optflow_options_manager::{
    DeltaEstimator, OptionsService, OrderDispatcher, RankingEngine, SignalOutcome, SpreadEstimator,
};
use optflow_signals::SignalAggregator;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::correlation::RequestDispatcher;
use crate::handle::PipelineHandle;
use crate::status::{WorkerState, WorkerTable};

pub const TRACKER_CONSUMER: &str = "tracker-consumer";
pub const SIGNAL_AGGREGATOR: &str = "signal-aggregator";
pub const OPTIONS_SERVICE: &str = "options-service";
pub const REQUEST_ROUTER: &str = "request-router";
pub const ORDER_MONITOR: &str = "order-monitor";
pub const CANDLE_REFRESH: &str = "candle-refresh";

/// The broker capabilities the pipeline consumes.
#[derive(Clone)]
pub struct BrokerCapabilities {
    pub orders: Arc<dyn OrderSource>,
    pub time_sales: Arc<dyn TimeSalesSource>,
    pub chains: Arc<dyn ChainSource>,
    pub executor: Arc<dyn SpreadExecutor>,
}

impl BrokerCapabilities {
    /// Uses one broker for every capability.
    pub fn from_broker<B>(broker: Arc<B>) -> Self
    where
        B: OrderSource + TimeSalesSource + ChainSource + SpreadExecutor + 'static,
    {
        Self {
            orders: broker.clone(),
            time_sales: broker.clone(),
            chains: broker.clone(),
            executor: broker,
        }
    }
}

pub struct Pipeline {
    config: AppConfig,
    log: Arc<dyn EventLog>,
    broker: BrokerCapabilities,
    estimator: Arc<dyn SpreadEstimator>,
}

impl Pipeline {
    pub fn new(config: AppConfig, log: Arc<dyn EventLog>, broker: BrokerCapabilities) -> Self {
        Self {
            config,
            log,
            broker,
            estimator: Arc::new(DeltaEstimator),
        }
    }

    #[must_use]
    pub fn with_estimator(mut self, estimator: Arc<dyn SpreadEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Starts every worker and returns the handle plus the supervisor that owns them.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not validate.
    pub fn spawn(self) -> Result<(PipelineHandle, Supervisor)> {
        self.config.validate().context("invalid configuration")?;

        let (trigger, shutdown) = Shutdown::new();
        let trigger = Arc::new(trigger);
        let streams = &self.config.event_log;
        let monitor_config = &self.config.monitor;

        let store = Arc::new(OrderStore::new());
        let candles = Arc::new(CandlePool::from_config(&monitor_config.candle_repositories));
        let requests = Arc::new(RequestDispatcher::new());
        let workers = Arc::new(WorkerTable::default());

        let aggregator = Arc::new(
            SignalAggregator::from_config(&self.config)
                .with_journal(self.log.clone(), streams.signal_stream.clone()),
        );
        let predicates: Arc<[String]> = aggregator
            .registry()
            .names()
            .into_iter()
            .map(str::to_string)
            .collect();

        let book: Arc<dyn OrderBook> = store.clone();
        let engine = RankingEngine::new(
            self.broker.chains.clone(),
            self.estimator.clone(),
            self.config.trading.clone(),
        );
        let dispatcher = OrderDispatcher::new(
            self.broker.executor.clone(),
            book.clone(),
            self.config.trading.max_no_of_positions,
            shutdown.clone(),
        );
        let service = Arc::new(OptionsService::new(engine, dispatcher, book));

        let monitor = Arc::new(OrderMonitor::new(
            self.broker.orders.clone(),
            store.clone(),
            self.log.clone(),
            streams.order_stream.clone(),
            Duration::from_secs(monitor_config.poll_interval_secs.max(1)),
        ));
        let refresher = Arc::new(LiveCandleRefresher::new(
            self.broker.time_sales.clone(),
            candles.clone(),
            monitor_config.skip_trailing_candles,
            Duration::from_secs(monitor_config.candle_refresh_secs.max(1)),
        ));

        let consumer = StreamConsumer::<TrackerEvent>::new(
            self.log.clone(),
            streams.tracker_stream.clone(),
            ConsumerSettings::from(streams),
        );

        // Capacity 1 everywhere: a slow stage holds back the stage feeding it.
        let (tracker_tx, tracker_rx) = mpsc::channel(1);
        let (signal_tx, signal_rx) = mpsc::channel(1);
        let (outcome_tx, outcome_rx) = mpsc::channel(1);

        let mut supervisor = Supervisor {
            tasks: JoinSet::new(),
            trigger: trigger.clone(),
            shutdown: shutdown.clone(),
            workers: workers.clone(),
            requests: requests.clone(),
        };

        let consumer_shutdown = shutdown.clone();
        supervisor.spawn(TRACKER_CONSUMER, async move {
            consumer
                .run(tracker_tx, consumer_shutdown)
                .await
                .map_err(anyhow::Error::from)
        });
        supervisor.spawn(
            SIGNAL_AGGREGATOR,
            aggregator.run(tracker_rx, signal_tx.clone(), shutdown.clone()),
        );
        supervisor.spawn(
            OPTIONS_SERVICE,
            service.clone().run(signal_rx, outcome_tx, shutdown.clone()),
        );
        supervisor.spawn(
            REQUEST_ROUTER,
            route_outcomes(outcome_rx, requests.clone(), shutdown.clone()),
        );
        supervisor.spawn(ORDER_MONITOR, monitor.run(shutdown.clone()));
        supervisor.spawn(CANDLE_REFRESH, refresher.run(shutdown.clone()));

        info!(
            tracker_stream = %streams.tracker_stream,
            predicates = predicates.len(),
            broker = ?self.config.broker.mode,
            "pipeline started"
        );

        let handle = PipelineHandle {
            signals: signal_tx,
            requests,
            service,
            store,
            candles,
            workers,
            predicates,
            trigger,
            shutdown,
            started_at: Utc::now(),
        };
        Ok((handle, supervisor))
    }
}

/// Routes service outcomes for manual requests back to their callers.
async fn route_outcomes(
    mut outcomes: mpsc::Receiver<SignalOutcome>,
    requests: Arc<RequestDispatcher<Vec<Order>>>,
    shutdown: Shutdown,
) -> Result<()> {
    loop {
        let outcome = tokio::select! {
            () = shutdown.cancelled() => break,
            next = outcomes.recv() => match next {
                Some(outcome) => outcome,
                None => break,
            },
        };
        let request_id = outcome.signal.request_id;
        if requests.resolve(outcome) {
            debug!(request_id = ?request_id, "request resolved");
        }
    }
    Ok(())
}

/// Owns the worker tasks. The first worker to fail, or to exit before
/// shutdown, takes the rest of the pipeline down with it.
pub struct Supervisor {
    tasks: JoinSet<(&'static str, Result<()>)>,
    trigger: Arc<ShutdownTrigger>,
    shutdown: Shutdown,
    workers: Arc<WorkerTable>,
    requests: Arc<RequestDispatcher<Vec<Order>>>,
}

impl Supervisor {
    fn spawn<F>(&mut self, name: &'static str, worker: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.workers.set(name, WorkerState::Running);
        // The inner task turns a panic into an error that still carries the worker's name.
        let inner = tokio::spawn(worker);
        self.tasks.spawn(async move {
            let result = match inner.await {
                Ok(result) => result,
                Err(e) => Err(anyhow!("worker panicked: {e}")),
            };
            (name, result)
        });
    }

    /// Triggers the root shutdown scope.
    pub fn shutdown(&self) {
        self.trigger.trigger();
    }

    /// Waits for every worker to exit.
    ///
    /// Pending requests are cancelled once all workers are down.
    ///
    /// # Errors
    ///
    /// Returns the first worker failure.
    pub async fn wait(mut self) -> Result<()> {
        let mut failure: Option<anyhow::Error> = None;

        while let Some(joined) = self.tasks.join_next().await {
            let (name, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    error!(error = %e, "supervised task aborted");
                    self.trigger.trigger();
                    failure.get_or_insert_with(|| anyhow!("supervised task aborted: {e}"));
                    continue;
                }
            };

            match result {
                Ok(()) => {
                    self.workers.set(name, WorkerState::Stopped);
                    if self.shutdown.is_cancelled() {
                        debug!(worker = name, "worker stopped");
                    } else {
                        warn!(worker = name, "worker exited before shutdown, stopping pipeline");
                        self.trigger.trigger();
                    }
                }
                Err(e) => {
                    let message = format!("{e:#}");
                    error!(worker = name, error = %message, "worker failed, stopping pipeline");
                    self.workers.set(name, WorkerState::Failed { error: message });
                    self.trigger.trigger();
                    if failure.is_none() {
                        failure = Some(e.context(format!("{name} failed")));
                    }
                }
            }
        }

        let cancelled = self.requests.cancel_all("pipeline stopped");
        if cancelled > 0 {
            info!(cancelled, "pending requests cancelled");
        }
        info!("pipeline stopped");
        failure.map_or(Ok(()), Err)
    }
}
