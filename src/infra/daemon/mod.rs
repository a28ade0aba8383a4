// src/infra/daemon/mod.rs — Long-running billing daemon

use std::sync::Arc;
use std::time::Duration;

use crate::core::notifier::{BillingNotifier, LogNotifier};
use crate::core::RentalCore;
use crate::infra::config::{Config, NotifierConfig};
use crate::infra::webhooks::WebhookNotifier;

pub mod process;
pub mod scheduler;

pub use process::{remove_pid_file, running_daemon_pid, write_pid_file};
pub use scheduler::{BillingScheduler, SweepEntry, SweepReport};

/// Webhook delivery when a URL is configured, log lines otherwise.
pub fn build_notifier(config: &NotifierConfig) -> Arc<dyn BillingNotifier> {
    match WebhookNotifier::from_config(config) {
        Some(webhook) => Arc::new(webhook),
        None => Arc::new(LogNotifier),
    }
}

pub fn build_scheduler(core: &RentalCore, config: &Config) -> Arc<BillingScheduler> {
    Arc::new(BillingScheduler::new(
        core.billing.clone(),
        core.store.clone(),
        build_notifier(&config.notifier),
        Duration::from_secs(config.scheduler.sweep_interval_secs),
    ))
}

/// Run the billing scheduler until Ctrl+C.
pub async fn run_daemon(core: &RentalCore, config: &Config) -> anyhow::Result<()> {
    if let Some(pid) = running_daemon_pid() {
        anyhow::bail!("Another gpurent daemon is already running (pid {pid})");
    }
    if !config.scheduler.enabled {
        tracing::warn!("Billing scheduler is disabled in config. Daemon has nothing to do.");
        println!("Billing scheduler disabled. Set [scheduler] enabled = true to run the daemon.");
        return Ok(());
    }

    tracing::info!("gpurent daemon starting...");
    let pid_path = write_pid_file()?;
    tracing::debug!("PID file at {}", pid_path.display());

    let scheduler = build_scheduler(core, config);

    // Settle anything left mid-stop by a previous run before the first period.
    match scheduler.tick().await {
        Ok(report) if !report.is_empty() => {
            tracing::info!("Startup sweep processed {} session(s)", report.entries.len())
        }
        Ok(_) => {}
        Err(e) => tracing::error!("Startup sweep failed: {}", e),
    }

    scheduler.start();
    println!(
        "Daemon running (sweep every {}s). Press Ctrl+C to stop.",
        config.scheduler.sweep_interval_secs
    );

    let shutdown = tokio::signal::ctrl_c().await;
    if let Err(e) = shutdown {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown signal received");
    println!("\nShutting down daemon...");

    scheduler.stop().await;
    remove_pid_file();
    tracing::info!("Daemon stopped.");
    Ok(())
}
