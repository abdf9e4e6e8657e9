//! End-to-end runs of the supervised pipeline against the paper broker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use optflow_core::{
    AppConfig, ChainSource, OptionContract, OptionGreeks, OptionQuote, OptionType, TrackerEvent,
};
use optflow_event_log::{
    Direction, EventData, EventLog, EventLogError, ExpectedRevision, InMemoryEventLog,
    SubscribeFrom,
};
use optflow_event_log::client::{RecordStream, Subscription};
use optflow_orchestrator::{
    BrokerCapabilities, Pipeline, PipelineHandle, Supervisor, TerminalKind, WorkerState,
};
use optflow_tradier::PaperBroker;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::Semaphore;

const SIGNAL: &str = "SuperTrend1hStochRsi15mUp";

fn quote(
    exp: NaiveDate,
    option_type: OptionType,
    strike: Decimal,
    bid: Decimal,
    ask: Decimal,
    delta: f64,
) -> OptionQuote {
    OptionQuote {
        contract: OptionContract::new("COIN", exp, strike, option_type),
        bid: Some(bid),
        ask: Some(ask),
        last: None,
        open_interest: 100,
        greeks: Some(OptionGreeks {
            delta,
            ..OptionGreeks::default()
        }),
    }
}

fn broker() -> Arc<PaperBroker> {
    let exp = Utc::now().date_naive() + Days::new(7);
    let broker = PaperBroker::new();
    broker.set_price("COIN", dec!(200));
    broker.set_chain(
        "COIN",
        exp,
        vec![
            quote(exp, OptionType::Put, dec!(190), dec!(0.40), dec!(0.50), -0.10),
            quote(exp, OptionType::Put, dec!(195), dec!(1.60), dec!(1.70), -0.15),
            quote(exp, OptionType::Put, dec!(200), dec!(2.40), dec!(2.50), -0.45),
            quote(exp, OptionType::Call, dec!(205), dec!(1.80), dec!(1.90), 0.20),
            quote(exp, OptionType::Call, dec!(210), dec!(0.30), dec!(0.40), 0.10),
        ],
    );
    Arc::new(broker)
}

fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.monitor.poll_interval_secs = 1;
    config
}

fn start(log: Arc<dyn EventLog>, broker: Arc<PaperBroker>) -> (PipelineHandle, Supervisor) {
    Pipeline::new(config(), log, BrokerCapabilities::from_broker(broker))
        .spawn()
        .unwrap()
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn manual_signal_places_spreads_and_monitor_publishes_them() {
    let log = Arc::new(InMemoryEventLog::new());
    let broker = broker();
    let (handle, supervisor) = start(log.clone(), broker.clone());

    let orders = handle.request_signal("coin", SIGNAL).await.unwrap();
    assert_eq!(orders.len(), 2);
    assert_eq!(broker.orders_submitted(), 2);
    for order in &orders {
        assert_eq!(order.underlying, "COIN");
        assert!(order.tag.as_deref().unwrap().starts_with(SIGNAL));
        assert!(handle.spread_for(&order.id).is_some());
    }

    assert!(eventually(|| log.len("orders") == 2).await);
    assert_eq!(handle.orders().len(), 2);

    // Same quotes, same tags: the monitor store now knows them.
    let err = handle.request_signal("COIN", SIGNAL).await.unwrap_err();
    assert_eq!(err.kind, TerminalKind::PolicyViolation);
    assert_eq!(broker.orders_submitted(), 2);

    let status = handle.status();
    assert!(status.healthy);
    assert_eq!(status.pending_requests, 0);
    assert_eq!(status.tracked_orders, 2);

    handle.shutdown();
    tokio::time::timeout(Duration::from_secs(5), supervisor.wait())
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn invalid_requests_are_rejected_at_admission() {
    let log = Arc::new(InMemoryEventLog::new());
    let broker = broker();
    let (handle, supervisor) = start(log, broker.clone());

    let err = handle.request_signal("COIN", "NoSuchSignal").await.unwrap_err();
    assert_eq!(err.kind, TerminalKind::Validation);
    let err = handle.request_signal("  ", SIGNAL).await.unwrap_err();
    assert_eq!(err.kind, TerminalKind::Validation);
    assert_eq!(broker.orders_submitted(), 0);
    assert_eq!(handle.status().pending_requests, 0);

    handle.shutdown();
    supervisor.wait().await.unwrap();
}

#[tokio::test]
async fn tracker_feed_fires_and_dispatches() {
    let log = Arc::new(InMemoryEventLog::new());
    let now = Utc::now();
    let supertrend = TrackerEvent::new("COIN", 60, "supertrend", "buy", now);
    log.append(
        "trackers",
        EventData::from_event(&supertrend).unwrap(),
        ExpectedRevision::Any,
    )
    .await
    .unwrap();

    let broker = broker();
    let (handle, supervisor) = start(log.clone(), broker.clone());
    // Let the replay finish so the gate event below arrives live.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let stoch = TrackerEvent::new("COIN", 15, "stochastic_rsi", "buy", now);
    log.append(
        "trackers",
        EventData::from_event(&stoch).unwrap(),
        ExpectedRevision::Any,
    )
    .await
    .unwrap();

    assert!(eventually(|| broker.orders_submitted() == 2).await);
    assert_eq!(log.len("signals"), 1);

    handle.shutdown();
    supervisor.wait().await.unwrap();
    assert!(!handle.status().healthy);
}

/// Market data that blocks until the test opens the gate.
struct GatedChains {
    inner: Arc<PaperBroker>,
    gate: Semaphore,
    entered: AtomicUsize,
}

impl GatedChains {
    async fn pass(&self) -> anyhow::Result<()> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let _permit = self.gate.acquire().await?;
        Ok(())
    }
}

#[async_trait]
impl ChainSource for GatedChains {
    async fn underlying_price(&self, symbol: &str) -> anyhow::Result<Decimal> {
        self.pass().await?;
        self.inner.underlying_price(symbol).await
    }

    async fn expirations(&self, symbol: &str) -> anyhow::Result<Vec<NaiveDate>> {
        self.pass().await?;
        self.inner.expirations(symbol).await
    }

    async fn chain(&self, symbol: &str, expiration: NaiveDate) -> anyhow::Result<Vec<OptionQuote>> {
        self.pass().await?;
        self.inner.chain(symbol, expiration).await
    }
}

#[tokio::test]
async fn abandoned_submission_does_not_leave_a_pending_request() {
    let broker = broker();
    let chains = Arc::new(GatedChains {
        inner: broker.clone(),
        gate: Semaphore::new(0),
        entered: AtomicUsize::new(0),
    });
    let mut capabilities = BrokerCapabilities::from_broker(broker);
    capabilities.chains = chains.clone();
    let (handle, supervisor) = Pipeline::new(config(), Arc::new(InMemoryEventLog::new()), capabilities)
        .spawn()
        .unwrap();

    // The service blocks on market data for the first request.
    let first = tokio::spawn({
        let handle = handle.clone();
        async move { handle.request_signal("COIN", SIGNAL).await }
    });
    assert!(eventually(|| chains.entered.load(Ordering::SeqCst) > 0).await);

    // The second fills the capacity-1 channel.
    let second = tokio::spawn({
        let handle = handle.clone();
        async move { handle.request_signal("COIN", SIGNAL).await }
    });
    assert!(eventually(|| handle.status().pending_requests == 2).await);

    // The third cannot be handed over; its caller gives up.
    let abandoned =
        tokio::time::timeout(Duration::from_millis(100), handle.submit_signal("COIN", SIGNAL)).await;
    assert!(abandoned.is_err());
    assert_eq!(handle.status().pending_requests, 2);

    chains.gate.add_permits(1024);
    first.await.unwrap().unwrap();
    // Placed or refused depending on whether the monitor polled in between.
    let _ = second.await.unwrap();
    assert_eq!(handle.status().pending_requests, 0);

    handle.shutdown();
    supervisor.wait().await.unwrap();
}

/// A log whose every call fails, as if the database were unreachable.
struct UnreachableLog;

fn unreachable() -> EventLogError {
    EventLogError::Read("connection refused".into())
}

#[async_trait]
impl EventLog for UnreachableLog {
    async fn append(
        &self,
        _stream: &str,
        _event: EventData,
        _expected: ExpectedRevision,
    ) -> Result<u64, EventLogError> {
        Err(unreachable())
    }

    async fn read(
        &self,
        _stream: &str,
        _from: u64,
        _direction: Direction,
        _count: Option<usize>,
    ) -> Result<RecordStream, EventLogError> {
        Err(unreachable())
    }

    async fn subscribe(
        &self,
        _stream: &str,
        _from: SubscribeFrom,
    ) -> Result<Subscription, EventLogError> {
        Err(unreachable())
    }

    async fn last_revision(&self, _stream: &str) -> Result<Option<u64>, EventLogError> {
        Err(unreachable())
    }
}

#[tokio::test]
async fn fatal_consumer_failure_stops_the_pipeline() {
    let (handle, supervisor) = start(Arc::new(UnreachableLog), broker());

    let err = tokio::time::timeout(Duration::from_secs(5), supervisor.wait())
        .await
        .unwrap()
        .unwrap_err();
    assert!(format!("{err:#}").contains("tracker-consumer failed"));

    let status = handle.status();
    assert!(status.shutting_down);
    assert!(!status.healthy);
    assert!(matches!(
        status.workers.get("tracker-consumer"),
        Some(WorkerState::Failed { .. })
    ));
    assert_eq!(status.workers.get("order-monitor"), Some(&WorkerState::Stopped));

    let err = handle.request_signal("COIN", SIGNAL).await.unwrap_err();
    assert_eq!(err.kind, TerminalKind::Cancelled);
}

#[tokio::test]
async fn invalid_configuration_does_not_start() {
    let mut config = config();
    config.trading.expirations_in_days.clear();
    let result = Pipeline::new(
        config,
        Arc::new(InMemoryEventLog::new()),
        BrokerCapabilities::from_broker(broker()),
    )
    .spawn();
    assert!(result.is_err());
}
