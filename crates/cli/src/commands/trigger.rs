use std::time::Duration;

use anyhow::{bail, Context};
use clap::Args;
use serde::Serialize;

#[derive(Args, Debug, Clone)]
pub struct TriggerArgs {
    /// Base URL of a running instance
    #[arg(long, default_value = "http://127.0.0.1:8080", env = "OPTFLOW_URL")]
    pub url: String,

    #[arg(long)]
    pub symbol: String,

    /// Predicate name, e.g. SuperTrend1hStochRsi15mUp
    #[arg(long = "signal")]
    pub signal_name: String,

    /// Seconds to wait for the outcome
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,
}

#[derive(Serialize)]
struct SignalRequest<'a> {
    symbol: &'a str,
    signal_name: &'a str,
}

/// Posts a manual trigger and prints the JSON outcome.
pub async fn trigger(args: &TriggerArgs) -> anyhow::Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(args.timeout))
        .build()?;
    let url = format!("{}/api/signals", args.url.trim_end_matches('/'));

    let response = client
        .post(&url)
        .json(&SignalRequest {
            symbol: &args.symbol,
            signal_name: &args.signal_name,
        })
        .send()
        .await
        .with_context(|| format!("failed to reach {url}"))?;

    let status = response.status();
    let body: serde_json::Value = response.json().await.context("malformed response body")?;
    println!("{}", serde_json::to_string_pretty(&body)?);

    if !status.is_success() {
        bail!("signal request failed with {status}");
    }
    Ok(())
}
