use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

use commands::{ConfigArgs, PublishArgs, TriggerArgs};

#[derive(Parser)]
#[command(name = "optflow")]
#[command(about = "Signal-driven option spread pipeline", long_about = None)]
struct Cli {
    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline and the web API until interrupted
    Run(ConfigArgs),
    /// Load, validate and print the effective configuration
    CheckConfig(ConfigArgs),
    /// Ask a running instance to trigger a signal manually
    Trigger(TriggerArgs),
    /// Append a tracker event to the configured event log
    Publish(PublishArgs),
}

fn init_logging(log_file: Option<&PathBuf>) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_ref())?;

    match cli.command {
        Commands::Run(args) => commands::run(&args).await?,
        Commands::CheckConfig(args) => commands::check_config(&args)?,
        Commands::Trigger(args) => commands::trigger(&args).await?,
        Commands::Publish(args) => commands::publish(&args).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_defaults_to_the_config_directory() {
        let cli = Cli::try_parse_from(["optflow", "run"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.config_dir, PathBuf::from("config"));
        assert!(args.profile.is_none());
        assert!(cli.log_file.is_none());
    }

    #[test]
    fn log_file_is_accepted_after_the_subcommand() {
        let cli = Cli::try_parse_from([
            "optflow",
            "check-config",
            "--profile",
            "paper",
            "--log-file",
            "optflow.log",
        ])
        .unwrap();
        assert_eq!(cli.log_file, Some(PathBuf::from("optflow.log")));
        let Commands::CheckConfig(args) = cli.command else {
            panic!("expected check-config");
        };
        assert_eq!(args.profile.as_deref(), Some("paper"));
    }

    #[test]
    fn trigger_requires_symbol_and_signal() {
        assert!(Cli::try_parse_from(["optflow", "trigger", "--symbol", "COIN"]).is_err());
        let cli = Cli::try_parse_from([
            "optflow",
            "trigger",
            "--symbol",
            "COIN",
            "--signal",
            "SuperTrend1hStochRsi15mUp",
        ])
        .unwrap();
        let Commands::Trigger(args) = cli.command else {
            panic!("expected trigger");
        };
        assert_eq!(args.url, "http://127.0.0.1:8080");
    }
}
