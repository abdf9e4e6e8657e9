use super::ConfigArgs;

/// Prints the effective configuration as JSON with secrets masked.
pub fn check_config(args: &ConfigArgs) -> anyhow::Result<()> {
    let mut config = args.load()?;
    if config.broker.token.is_some() {
        config.broker.token = Some("********".to_string());
    }
    println!("{}", serde_json::to_string_pretty(&config)?);
    tracing::info!(
        predicates = config.signal_predicates.len(),
        broker = ?config.broker.mode,
        event_log = ?config.event_log.backend,
        "configuration is valid"
    );
    Ok(())
}
