//! # crontab-controller
//!
//! Entry point of the `CronTab` controller.
//!
//! ## Startup Sequence
//!
//! 1. **Flags and config** - Parse the CLI and merge it over the config file
//! 2. **Tracing** - Install the subscriber (`--log-level`, else `RUST_LOG`, else `info`)
//! 3. **Signals** - First SIGINT/SIGTERM stops the controller, a second exits
//! 4. **Informer** - Mirror the manifest file, relisting and resyncing periodically
//! 5. **Controller** - Wait for the cache to sync, then run the workers
//!
//! A controller that cannot sync its cache exits non-zero.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use informer::SharedInformer;
use reconciler::{Controller, ListerSyncHandler};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crontab_controller::cli::Cli;
use crontab_controller::signals::spawn_signal_handler;
use crontab_controller::{AppConfig, CronTab, CronTabReconciler, ManifestSource};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref())?;

    let config = AppConfig::resolve(&cli).context("Failed to load configuration")?;
    let manifests = config.manifest_path();
    info!(
        manifests = %manifests.display(),
        workers = config.controller.workers,
        "Crontab controller starting"
    );

    let stop = CancellationToken::new();
    spawn_signal_handler(stop.clone()).context("Failed to install signal handlers")?;

    let informer = Arc::new(SharedInformer::<CronTab>::new());
    let handler = Arc::new(ListerSyncHandler::new(informer.lister(), CronTabReconciler));
    let controller = Controller::new(&informer, handler, config.controller.clone())
        .context("Error building controller")?;

    let informer_task = {
        let informer = Arc::clone(&informer);
        let source = ManifestSource::new(manifests);
        let informer_config = config.informer.clone();
        let stop = stop.clone();
        tokio::spawn(async move { informer.run(&source, &informer_config, stop).await })
    };

    let outcome = controller
        .run(config.controller.workers, stop.clone())
        .await
        .context("Error running controller");

    stop.cancel();
    match informer_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Informer stopped with an error"),
        Err(e) => warn!(error = %e, "Informer task failed"),
    }

    outcome?;
    info!("Crontab controller stopped");
    Ok(())
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(level) => {
            EnvFilter::try_new(level).with_context(|| format!("Invalid log level '{level}'"))?
        }
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
    Ok(())
}
