use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use optflow_core::{BrokerConfig, BrokerMode, EventLogBackend, EventLogConfig};
use optflow_event_log::{EventLog, InMemoryEventLog, PgEventLog};
use optflow_orchestrator::{BrokerCapabilities, Pipeline};
use optflow_tradier::{PaperBroker, TradierClient, TradierConfig};
use optflow_web_api::ApiServer;
use tracing::{error, info, warn};

use super::ConfigArgs;

/// Opens the configured event log, creating the schema for Postgres.
pub(crate) async fn event_log(config: &EventLogConfig) -> anyhow::Result<Arc<dyn EventLog>> {
    match config.backend {
        EventLogBackend::Memory => {
            info!("using in-memory event log");
            Ok(Arc::new(
                InMemoryEventLog::new().with_checkpoint_interval(config.checkpoint_interval),
            ))
        }
        EventLogBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("event_log.database_url is required for the postgres backend")?;
            let log = PgEventLog::connect(
                url,
                config.max_connections,
                Duration::from_millis(config.poll_interval_ms),
                config.checkpoint_interval,
            )
            .await
            .context("failed to connect to the event log database")?;
            log.migrate().await.context("failed to create event log schema")?;
            Ok(Arc::new(log))
        }
    }
}

fn tradier(config: &BrokerConfig) -> anyhow::Result<Arc<TradierClient>> {
    let client = TradierClient::new(TradierConfig::from_broker_config(config)?)?;
    Ok(Arc::new(client))
}

/// Picks broker capabilities for the configured mode.
///
/// Paper mode places orders on the in-memory paper broker. With credentials it
/// still reads chains and time-and-sales from Tradier.
pub(crate) fn broker(config: &BrokerConfig) -> anyhow::Result<BrokerCapabilities> {
    match config.mode {
        BrokerMode::Live => {
            let client = tradier(config).context("live trading needs broker credentials")?;
            info!(base_url = %client.base_url(), "live trading through Tradier");
            Ok(BrokerCapabilities::from_broker(client))
        }
        BrokerMode::Paper => {
            let mut capabilities = BrokerCapabilities::from_broker(Arc::new(PaperBroker::new()));
            if config.token.is_some() && config.account_id.is_some() {
                let client = tradier(config)?;
                info!(base_url = %client.base_url(), "paper trading on Tradier market data");
                capabilities.chains = client.clone();
                capabilities.time_sales = client;
            } else {
                warn!("paper broker has no market data; signals will fail until chains are seeded");
            }
            Ok(capabilities)
        }
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> anyhow::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigterm.recv() => Ok("SIGTERM"),
        ctrl_c = tokio::signal::ctrl_c() => {
            ctrl_c?;
            Ok("SIGINT")
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> anyhow::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl+C")
}

/// Runs the pipeline and web API until a signal arrives or a worker fails.
pub async fn run(args: &ConfigArgs) -> anyhow::Result<()> {
    let config = args.load()?;
    info!(
        config_dir = %args.config_dir.display(),
        profile = ?args.profile,
        "starting optflow"
    );

    let log = event_log(&config.event_log).await?;
    let broker = broker(&config.broker)?;
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let (handle, supervisor) = Pipeline::new(config, log, broker).spawn()?;

    let server = ApiServer::new(handle.clone());
    let server_pipeline = handle.clone();
    let server_task = tokio::spawn(async move {
        let result = server.serve(&addr).await;
        if let Err(e) = &result {
            error!(error = %e, "web API failed");
            server_pipeline.shutdown();
        }
        result
    });

    let signal_pipeline = handle.clone();
    tokio::spawn(async move {
        match shutdown_signal().await {
            Ok(name) => info!(signal = name, "received shutdown signal"),
            Err(e) => error!(error = %e, "signal handler failed, shutting down"),
        }
        signal_pipeline.shutdown();
    });

    let pipeline_result = supervisor.wait().await;
    // The server stops with the pipeline's shutdown scope.
    handle.shutdown();
    let server_result = server_task.await.context("web API task panicked")?;

    pipeline_result?;
    server_result?;
    info!("optflow stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_mode_needs_credentials() {
        let config = BrokerConfig {
            mode: BrokerMode::Live,
            ..BrokerConfig::default()
        };
        assert!(broker(&config).is_err());
    }

    #[test]
    fn paper_mode_runs_without_credentials() {
        assert!(broker(&BrokerConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn memory_backend_opens_without_a_database() {
        let log = event_log(&EventLogConfig::default()).await.unwrap();
        assert_eq!(log.last_revision("trackers").await.unwrap(), None);
    }

    #[tokio::test]
    async fn postgres_backend_needs_a_url() {
        let config = EventLogConfig {
            backend: EventLogBackend::Postgres,
            ..EventLogConfig::default()
        };
        assert!(event_log(&config).await.is_err());
    }
}
