use anyhow::{bail, Context};
use chrono::Utc;
use clap::Args;
use optflow_core::{EventLogBackend, TrackerEvent};
use optflow_event_log::{EventData, ExpectedRevision};

use super::run::event_log;
use super::ConfigArgs;

#[derive(Args, Debug, Clone)]
pub struct PublishArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[arg(long)]
    pub symbol: String,

    /// Timeframe in minutes
    #[arg(long)]
    pub timeframe: u32,

    /// Indicator name, e.g. supertrend or stochastic_rsi
    #[arg(long)]
    pub indicator: String,

    /// Indicator state, e.g. buy or sell
    #[arg(long)]
    pub value: String,
}

/// Appends one tracker event to the tracker stream of a durable event log.
pub async fn publish(args: &PublishArgs) -> anyhow::Result<()> {
    let config = args.config.load()?;
    if config.event_log.backend == EventLogBackend::Memory {
        bail!("publishing needs a durable event log; set event_log.backend = \"postgres\"");
    }

    let log = event_log(&config.event_log).await?;
    let event = TrackerEvent::new(
        args.symbol.trim().to_uppercase(),
        args.timeframe,
        &args.indicator,
        &args.value,
        Utc::now(),
    );
    let stream = &config.event_log.tracker_stream;
    let revision = log
        .append(stream, EventData::from_event(&event)?, ExpectedRevision::Any)
        .await
        .with_context(|| format!("failed to append to {stream}"))?;

    tracing::info!(%stream, revision, name = %event.name, "tracker event published");
    println!("{stream}@{revision}");
    Ok(())
}
