//! Router tests against a pipeline running on the paper broker.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use async_trait::async_trait;
use axum::Router;
use chrono::{Days, NaiveDate, Utc};
use optflow_core::{
    AppConfig, ChainSource, OptionContract, OptionGreeks, OptionQuote, OptionType, Order,
};
use optflow_event_log::InMemoryEventLog;
use optflow_orchestrator::{BrokerCapabilities, Pipeline, PipelineHandle, Supervisor};
use optflow_tradier::PaperBroker;
use optflow_web_api::{ApiServer, ErrorBody, SignalResponse};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;
use tokio::sync::Semaphore;
use tower::ServiceExt;

fn paper_broker() -> Arc<PaperBroker> {
    let exp = Utc::now().date_naive() + Days::new(7);
    let quote = |option_type, strike: Decimal, bid, ask, delta| OptionQuote {
        contract: OptionContract::new("COIN", exp, strike, option_type),
        bid: Some(bid),
        ask: Some(ask),
        last: None,
        open_interest: 100,
        greeks: Some(OptionGreeks {
            delta,
            ..OptionGreeks::default()
        }),
    };
    let broker = PaperBroker::new();
    broker.set_price("COIN", dec!(200));
    broker.set_chain(
        "COIN",
        exp,
        vec![
            quote(OptionType::Call, dec!(205), dec!(1.80), dec!(1.90), 0.20),
            quote(OptionType::Call, dec!(210), dec!(0.30), dec!(0.40), 0.10),
        ],
    );
    Arc::new(broker)
}

fn start() -> (PipelineHandle, Supervisor, Router) {
    let (handle, supervisor) = Pipeline::new(
        AppConfig::default(),
        Arc::new(InMemoryEventLog::new()),
        BrokerCapabilities::from_broker(paper_broker()),
    )
    .spawn()
    .unwrap();
    let router = ApiServer::new(handle.clone()).router();
    (handle, supervisor, router)
}

fn post_signal(symbol: &str, signal_name: &str) -> Request<Body> {
    let body = serde_json::json!({ "symbol": symbol, "signal_name": signal_name });
    Request::post("/api/signals")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_lists_every_worker() {
    let (handle, supervisor, router) = start();

    let response = router
        .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = json(response).await;
    assert_eq!(body["healthy"], true);
    assert_eq!(body["workers"]["tracker-consumer"]["state"], "running");
    assert_eq!(body["workers"].as_object().unwrap().len(), 6);

    handle.shutdown();
    supervisor.wait().await.unwrap();
}

#[tokio::test]
async fn manual_signal_returns_placed_orders() {
    let (handle, supervisor, router) = start();

    let response = router
        .clone()
        .oneshot(post_signal("COIN", "SuperTrend1hStochRsi15mUp"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: SignalResponse = json(response).await;
    assert_eq!(body.orders.len(), 1);
    assert_eq!(body.orders[0].price, Some(dec!(1.40)));

    let response = router
        .oneshot(Request::get("/api/orders").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    // The monitor has not polled since the placement yet.
    let orders: Vec<Order> = json(response).await;
    assert!(orders.len() <= 1);

    handle.shutdown();
    supervisor.wait().await.unwrap();
}

#[tokio::test]
async fn unknown_signal_is_a_bad_request() {
    let (handle, supervisor, router) = start();

    let response = router
        .oneshot(post_signal("COIN", "NotASignal"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: ErrorBody = json(response).await;
    assert_eq!(body.kind, "validation");
    assert!(body.request_id.is_some());
    assert_eq!(handle.status().pending_requests, 0);

    handle.shutdown();
    supervisor.wait().await.unwrap();
}

#[tokio::test]
async fn untracked_order_is_not_found() {
    let (handle, supervisor, router) = start();

    let response = router
        .oneshot(Request::get("/api/orders/42").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    handle.shutdown();
    supervisor.wait().await.unwrap();
}

#[tokio::test]
async fn stopped_pipeline_reports_unavailable() {
    let (handle, supervisor, router) = start();
    handle.shutdown();
    supervisor.wait().await.unwrap();

    let response = router
        .clone()
        .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let response = router
        .oneshot(post_signal("COIN", "SuperTrend1hStochRsi15mUp"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

/// Market data that never answers until the test adds permits.
struct StalledChains {
    inner: Arc<PaperBroker>,
    gate: Semaphore,
}

impl StalledChains {
    async fn wait(&self) -> anyhow::Result<()> {
        let _permit = self.gate.acquire().await?;
        Ok(())
    }
}

#[async_trait]
impl ChainSource for StalledChains {
    async fn underlying_price(&self, symbol: &str) -> anyhow::Result<Decimal> {
        self.wait().await?;
        self.inner.underlying_price(symbol).await
    }

    async fn expirations(&self, symbol: &str) -> anyhow::Result<Vec<NaiveDate>> {
        self.wait().await?;
        self.inner.expirations(symbol).await
    }

    async fn chain(&self, symbol: &str, expiration: NaiveDate) -> anyhow::Result<Vec<OptionQuote>> {
        self.wait().await?;
        self.inner.chain(symbol, expiration).await
    }
}

#[tokio::test]
async fn busy_service_times_out_before_admission() {
    let broker = paper_broker();
    let chains = Arc::new(StalledChains {
        inner: broker.clone(),
        gate: Semaphore::new(0),
    });
    let mut capabilities = BrokerCapabilities::from_broker(broker);
    capabilities.chains = chains.clone();
    let (handle, supervisor) =
        Pipeline::new(AppConfig::default(), Arc::new(InMemoryEventLog::new()), capabilities)
            .spawn()
            .unwrap();
    let router =
        ApiServer::with_request_timeout(handle.clone(), Duration::from_millis(200)).router();

    // One request stalls in the service, the next fills its input channel.
    let first = handle.submit_signal("COIN", "SuperTrend1hStochRsi15mUp").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = handle.submit_signal("COIN", "SuperTrend1hStochRsi15mUp").await;
    assert_eq!(handle.status().pending_requests, 2);

    let response = tokio::time::timeout(
        Duration::from_secs(2),
        router.oneshot(post_signal("COIN", "SuperTrend1hStochRsi15mUp")),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    let body: ErrorBody = json(response).await;
    assert_eq!(body.kind, "timeout");
    assert!(body.request_id.is_none());
    assert_eq!(handle.status().pending_requests, 2);

    chains.gate.add_permits(1024);
    first.outcome().await.unwrap();
    let _ = second.outcome().await;
    assert_eq!(handle.status().pending_requests, 0);

    handle.shutdown();
    supervisor.wait().await.unwrap();
}
