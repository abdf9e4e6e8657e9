//! Tradier REST client.
//!
//! Requests are rate limited and authenticated with a bearer token. The
//! client implements every broker capability the pipeline consumes.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use optflow_core::{
    BrokerConfig, Candle, ChainSource, OptionQuote, Order, OrderSource, OrderStatus,
    SpreadExecutor, SpreadOrderRequest, TimeSalesInterval, TimeSalesSource,
};
use optflow_core::orders::{OrderLeg, OrderSide};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::dto::{
    ChainResponse, ErrorResponse, ExpirationsResponse, OrdersResponse, PlaceOrderResponse,
    QuotesResponse, TimeSalesResponse,
};
use crate::error::{BrokerError, Result};

pub const TRADIER_LIVE_URL: &str = "https://api.tradier.com/v1";
pub const TRADIER_SANDBOX_URL: &str = "https://sandbox.tradier.com/v1";

#[derive(Clone)]
pub struct TradierConfig {
    pub base_url: String,
    pub token: SecretString,
    pub account_id: String,
    pub requests_per_minute: NonZeroU32,
    pub timeout_secs: u64,
}

impl std::fmt::Debug for TradierConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradierConfig")
            .field("base_url", &self.base_url)
            .field("account_id", &self.account_id)
            .field("requests_per_minute", &self.requests_per_minute)
            .finish_non_exhaustive()
    }
}

impl TradierConfig {
    #[must_use]
    pub fn new(token: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            base_url: TRADIER_SANDBOX_URL.to_string(),
            token: SecretString::from(token.into()),
            account_id: account_id.into(),
            requests_per_minute: nonzero!(120u32),
            timeout_secs: 30,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    #[must_use]
    pub fn with_rate_limit(mut self, requests_per_minute: NonZeroU32) -> Self {
        self.requests_per_minute = requests_per_minute;
        self
    }

    /// Builds a live configuration from the broker section.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Configuration` when the token or account id is missing.
    pub fn from_broker_config(config: &BrokerConfig) -> Result<Self> {
        let token = config
            .token
            .clone()
            .ok_or_else(|| BrokerError::Configuration("broker.token is required".into()))?;
        let account_id = config
            .account_id
            .clone()
            .ok_or_else(|| BrokerError::Configuration("broker.account_id is required".into()))?;
        Ok(Self {
            base_url: config.base_url.clone(),
            timeout_secs: config.timeout_secs,
            ..Self::new(token, account_id)
        })
    }
}

pub struct TradierClient {
    config: TradierConfig,
    http: Client,
    rate_limiter: Arc<
        RateLimiter<
            governor::state::NotKeyed,
            governor::state::InMemoryState,
            governor::clock::DefaultClock,
        >,
    >,
}

impl std::fmt::Debug for TradierClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradierClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TradierClient {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: TradierConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BrokerError::Network(format!("failed to build HTTP client: {e}")))?;
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(
            config.requests_per_minute,
        )));
        Ok(Self {
            config,
            http,
            rate_limiter,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        self.rate_limiter.until_ready().await;
        let url = format!("{}{}", self.config.base_url, path);
        debug!("GET {}", url);

        let response = self
            .http
            .get(&url)
            .bearer_auth(self.config.token.expose_secret())
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &[(String, String)],
    ) -> Result<T> {
        self.rate_limiter.until_ready().await;
        let url = format!("{}{}", self.config.base_url, path);
        debug!("POST {}", url);

        let response = self
            .http
            .post(&url)
            .bearer_auth(self.config.token.expose_secret())
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);
            return Err(BrokerError::RateLimit {
                retry_after_secs: retry_after,
            });
        }
        if status.as_u16() == 401 {
            return Err(BrokerError::Authentication(
                response.text().await.unwrap_or_default(),
            ));
        }
        if status.as_u16() == 404 {
            return Err(BrokerError::NotFound(
                response.text().await.unwrap_or_default(),
            ));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&text)
                .map(|e| e.errors.error.into_vec().join("; "))
                .unwrap_or(text);
            return Err(BrokerError::api(status.as_u16(), message));
        }

        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Every order on the account, tags included.
    ///
    /// # Errors
    ///
    /// Returns an error if the request or parsing fails.
    pub async fn get_orders(&self) -> Result<Vec<Order>> {
        let path = format!("/accounts/{}/orders", self.config.account_id);
        let response: OrdersResponse = self
            .get(&path, &[("includeTags", "true".to_string())])
            .await?;
        Ok(response
            .orders
            .map(|body| body.order.into_vec())
            .unwrap_or_default()
            .into_iter()
            .map(Order::from)
            .collect())
    }

    /// Bars for `symbol` between `start` and `end`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request or parsing fails.
    pub async fn get_time_sales(
        &self,
        symbol: &str,
        interval: TimeSalesInterval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let query = [
            ("symbol", symbol.to_string()),
            ("interval", interval.as_str().to_string()),
            ("start", start.format("%Y-%m-%d %H:%M").to_string()),
            ("end", end.format("%Y-%m-%d %H:%M").to_string()),
            ("session_filter", "all".to_string()),
        ];
        let response: TimeSalesResponse = self.get("/markets/timesales", &query).await?;
        let bars = response
            .series
            .map(|body| body.data.into_vec())
            .unwrap_or_default();
        let total = bars.len();
        let candles: Vec<Candle> = bars.into_iter().filter_map(|b| b.into_candle()).collect();
        if candles.len() < total {
            warn!(symbol, dropped = total - candles.len(), "bars with invalid timestamps");
        }
        Ok(candles)
    }

    /// # Errors
    ///
    /// Returns an error if the request or parsing fails.
    pub async fn get_expirations(&self, symbol: &str) -> Result<Vec<NaiveDate>> {
        let response: ExpirationsResponse = self
            .get(
                "/markets/options/expirations",
                &[
                    ("symbol", symbol.to_string()),
                    ("includeAllRoots", "true".to_string()),
                ],
            )
            .await?;
        let mut dates = response
            .expirations
            .map(|body| body.date.into_vec())
            .unwrap_or_default();
        dates.sort_unstable();
        Ok(dates)
    }

    /// # Errors
    ///
    /// Returns an error if the request or parsing fails.
    pub async fn get_chain(&self, symbol: &str, expiration: NaiveDate) -> Result<Vec<OptionQuote>> {
        let response: ChainResponse = self
            .get(
                "/markets/options/chains",
                &[
                    ("symbol", symbol.to_string()),
                    ("expiration", expiration.format("%Y-%m-%d").to_string()),
                    ("greeks", "true".to_string()),
                ],
            )
            .await?;
        Ok(response
            .options
            .map(|body| body.option.into_vec())
            .unwrap_or_default()
            .into_iter()
            .map(OptionQuote::from)
            .collect())
    }

    /// # Errors
    ///
    /// Returns `BrokerError::NotFound` when the quote is missing or has no price.
    pub async fn get_quote_price(&self, symbol: &str) -> Result<rust_decimal::Decimal> {
        let response: QuotesResponse = self
            .get("/markets/quotes", &[("symbols", symbol.to_string())])
            .await?;
        response
            .quotes
            .map(|body| body.quote.into_vec())
            .unwrap_or_default()
            .into_iter()
            .find(|q| q.symbol.eq_ignore_ascii_case(symbol))
            .and_then(|q| q.reference_price())
            .ok_or_else(|| BrokerError::NotFound(format!("quote for {symbol}")))
    }

    /// Places a two-leg multileg order tagged with the request's idempotency tag.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::OrderRejected` if the broker does not acknowledge the order.
    pub async fn place_multileg(&self, request: &SpreadOrderRequest) -> Result<Order> {
        let spread = &request.spread;
        let order_type = if spread.strategy.is_credit() {
            "credit"
        } else {
            "debit"
        };
        let legs = [
            (&spread.short_leg.symbol, OrderSide::SellToOpen),
            (&spread.long_leg.symbol, OrderSide::BuyToOpen),
        ];

        let mut form = vec![
            ("class".to_string(), "multileg".to_string()),
            ("symbol".to_string(), request.underlying.clone()),
            ("type".to_string(), order_type.to_string()),
            ("duration".to_string(), request.duration.as_str().to_string()),
            ("price".to_string(), request.price.abs().to_string()),
            ("tag".to_string(), request.tag.clone()),
        ];
        for (i, (symbol, side)) in legs.iter().enumerate() {
            form.push((format!("option_symbol[{i}]"), (*symbol).clone()));
            form.push((format!("side[{i}]"), side.as_str().to_string()));
            form.push((format!("quantity[{i}]"), request.quantity.to_string()));
        }

        let path = format!("/accounts/{}/orders", self.config.account_id);
        let response: PlaceOrderResponse = self.post_form(&path, &form).await?;
        if response.order.status != "ok" {
            return Err(BrokerError::OrderRejected(format!(
                "order {} returned status {}",
                response.order.id, response.order.status
            )));
        }
        info!(
            order_id = response.order.id,
            underlying = %request.underlying,
            tag = %request.tag,
            "multileg order accepted"
        );

        let signed_price = if spread.strategy.is_credit() {
            request.price.abs()
        } else {
            -request.price.abs()
        };
        Ok(Order {
            id: response.order.id.to_string(),
            underlying: request.underlying.clone(),
            status: OrderStatus::Pending,
            quantity: request.quantity,
            price: Some(signed_price),
            create_date: Utc::now(),
            transaction_date: None,
            avg_fill_price: None,
            filled_quantity: rust_decimal::Decimal::ZERO,
            legs: legs
                .iter()
                .map(|(symbol, side)| OrderLeg {
                    option_symbol: (*symbol).clone(),
                    side: *side,
                    quantity: request.quantity,
                    status: OrderStatus::Pending,
                    avg_fill_price: None,
                    filled_quantity: rust_decimal::Decimal::ZERO,
                })
                .collect(),
            tag: Some(request.tag.clone()),
        })
    }
}

#[async_trait]
impl OrderSource for TradierClient {
    async fn list_orders(&self) -> anyhow::Result<Vec<Order>> {
        Ok(self.get_orders().await?)
    }
}

#[async_trait]
impl TimeSalesSource for TradierClient {
    async fn time_and_sales(
        &self,
        symbol: &str,
        interval: TimeSalesInterval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Candle>> {
        Ok(self.get_time_sales(symbol, interval, start, end).await?)
    }
}

#[async_trait]
impl SpreadExecutor for TradierClient {
    async fn place_spread(&self, request: &SpreadOrderRequest) -> anyhow::Result<Order> {
        Ok(self.place_multileg(request).await?)
    }
}

#[async_trait]
impl ChainSource for TradierClient {
    async fn underlying_price(&self, symbol: &str) -> anyhow::Result<rust_decimal::Decimal> {
        Ok(self.get_quote_price(symbol).await?)
    }

    async fn expirations(&self, symbol: &str) -> anyhow::Result<Vec<NaiveDate>> {
        Ok(self.get_expirations(symbol).await?)
    }

    async fn chain(&self, symbol: &str, expiration: NaiveDate) -> anyhow::Result<Vec<OptionQuote>> {
        Ok(self.get_chain(symbol, expiration).await?)
    }
}
