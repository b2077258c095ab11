use acctlink::{ConnectorBuilder, ConnectorConfig, Credentials, RefreshMonitor};
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const ENV_PREFIX: &str = "ACCTLINK";
const UPDATES: usize = 3;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    // Reads ACCTLINK_ACCOUNT, ACCTLINK_TOKEN, ACCTLINK_PRIMARY_URL, ...
    let (credentials, config) = load(ENV_PREFIX)?;

    let orchestrator = Arc::new(
        ConnectorBuilder::new()
            .with_config(config)
            .build()
            .context("invalid connector configuration")?,
    );

    let snapshot = orchestrator
        .connect(credentials)
        .await
        .context("could not reach the account through any strategy")?;
    println!("{}", snapshot);

    let (mut monitor, mut updates) =
        RefreshMonitor::spawn(orchestrator.clone(), Duration::from_secs(5));
    for _ in 0..UPDATES {
        match updates.recv().await {
            Some(Ok(snapshot)) => println!("{}", snapshot),
            Some(Err(e)) => warn!("refresh failed: {}", e),
            None => break,
        }
    }
    monitor.stop();

    orchestrator.disconnect().await;
    info!("disconnected");
    Ok(())
}

#[cfg(feature = "env-file")]
fn load(prefix: &str) -> anyhow::Result<(Credentials, ConnectorConfig)> {
    let credentials = Credentials::from_env_file(prefix).context("loading credentials")?;
    let config = ConnectorConfig::from_env_file(prefix).context("loading connector config")?;
    Ok((credentials, config))
}

#[cfg(not(feature = "env-file"))]
fn load(prefix: &str) -> anyhow::Result<(Credentials, ConnectorConfig)> {
    let credentials = Credentials::from_env(prefix).context("loading credentials")?;
    let config = ConnectorConfig::from_env(prefix).context("loading connector config")?;
    Ok((credentials, config))
}
