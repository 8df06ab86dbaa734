//! # kron
//!
//! Loads CronJob manifests into an in-memory object store and runs the
//! CronJob controller over it until interrupted.
//!
//! ## Startup
//!
//! 1. **Configuration** - defaults, then `--config`, then `KRON_*`, then flags
//! 2. **Stores** - CronJobs from `--manifests`; Jobs start empty
//! 3. **Garbage collection** - Jobs follow their CronJob on deletion
//! 4. **Controller** - watches, initial re-list, worker pool
//!
//! ## Shutdown
//!
//! SIGTERM/SIGINT stop the queue; in-flight reconciles get the drain timeout
//! to finish. The final counters are printed as JSON.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use kron_api::{CronJob, Job};
use kron_reconciler::{
    ControllerConfig, CronJobReconciler, Manager, ShutdownCoordinator, install_signal_handlers,
};
use kron_store::{InMemoryStore, ObjectStore, OwnerCollector, TracingStore};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    match Cli::parse().command {
        Commands::Run {
            config,
            manifests,
            workers,
        } => {
            let config = load_config(config.as_deref(), workers)?;
            run(config, &manifests).await
        }
        Commands::CheckConfig { config } => {
            let config = load_config(config.as_deref(), None)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(path: Option<&Path>, workers: Option<usize>) -> Result<ControllerConfig> {
    let config = match path {
        Some(path) => ControllerConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ControllerConfig::default(),
    };
    let mut config = config
        .with_env()
        .context("Invalid KRON_* environment override")?;
    if let Some(workers) = workers {
        config = config.workers(workers);
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn load_manifests(
    store: &dyn ObjectStore<CronJob>,
    paths: &[PathBuf],
    namespace: &str,
) -> Result<usize> {
    let mut loaded = 0usize;
    for path in paths {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let cronjobs = CronJob::from_yaml_documents(&content, namespace)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        for cronjob in cronjobs {
            let key = cronjob.metadata.key();
            store
                .create(cronjob)
                .await
                .with_context(|| format!("Failed to load CronJob {key}"))?;
            loaded = loaded.saturating_add(1);
        }
    }
    Ok(loaded)
}

async fn run(config: ControllerConfig, manifests: &[PathBuf]) -> Result<()> {
    let cronjobs: Arc<dyn ObjectStore<CronJob>> =
        Arc::new(TracingStore::new(InMemoryStore::<CronJob>::new()));
    let jobs: Arc<dyn ObjectStore<Job>> = Arc::new(TracingStore::new(InMemoryStore::<Job>::new()));

    let loaded = load_manifests(cronjobs.as_ref(), manifests, &config.namespace).await?;
    info!(cronjobs = loaded, workers = config.workers, "Manifests loaded");

    let shutdown = Arc::new(ShutdownCoordinator::new());
    let signals = install_signal_handlers(Arc::clone(&shutdown));

    let collector = OwnerCollector::new(Arc::clone(&cronjobs), Arc::clone(&jobs));
    let gc_shutdown = Arc::clone(&shutdown);
    let gc = tokio::spawn(collector.run_until(async move { gc_shutdown.wait().await }));

    let reconciler = Arc::new(CronJobReconciler::new(
        Arc::clone(&cronjobs),
        Arc::clone(&jobs),
        Arc::new(kron_api::registry()),
        &config,
    ));
    let mut manager = Manager::new(cronjobs, config).with_shutdown(Arc::clone(&shutdown));
    reconciler
        .register_triggers(&mut manager)
        .context("Failed to register watches")?;

    info!("kron is running. Press Ctrl+C to stop.");
    let stats = manager
        .run(reconciler)
        .await
        .context("Controller failed to start")?;

    gc.await.context("Garbage collector task failed")?;
    signals.abort();

    println!("{}", serde_json::to_string(&stats)?);
    info!("kron stopped");
    Ok(())
}
