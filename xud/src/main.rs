use anyhow::Context;
use std::{path::PathBuf, sync::Arc};
use structopt::StructOpt;
use xud::{
    config::Settings,
    logging,
    swap_client::SwapClientManager,
    swaps::{InMemorySwapRepository, LogReporter, Swaps},
};

#[derive(Debug, StructOpt)]
#[structopt(name = "xud", about = "Cross-network atomic swap daemon")]
struct Options {
    /// Path to the TOML configuration file
    #[structopt(short = "c", long = "config", parse(from_os_str))]
    config_file: Option<PathBuf>,

    /// Overrides the configured log filter, e.g. `debug` or `xud=trace`
    #[structopt(long = "log-level")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = Options::from_args();

    let settings = Settings::read(options.config_file.as_deref())?;
    logging::init(options.log_level.as_deref().unwrap_or(&settings.logging.level))?;

    let clients = Arc::new(
        SwapClientManager::from_settings(&settings).context("failed to set up swap clients")?,
    );
    clients.init().await;
    clients.spawn_connection_watchers(settings.swaps.reconnect_interval());

    let swaps = Arc::new(Swaps::new(
        Arc::clone(&clients),
        InMemorySwapRepository::default(),
        LogReporter,
    ));
    swaps.restore().await?;
    let reconnects = swaps.watch_reconnects();

    tracing::info!(
        currencies = ?clients.currencies().collect::<Vec<_>>(),
        "xud is running"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("received shutdown signal");

    for handle in reconnects {
        handle.abort();
    }
    clients.disconnect().await;

    Ok(())
}
