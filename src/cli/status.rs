// src/cli/status.rs — System and per-user status display

use crate::core::types::{Actor, SessionStatus};
use crate::core::RentalCore;
use crate::infra::config::Config;
use crate::infra::daemon::running_daemon_pid;
use crate::infra::paths;

pub async fn show_status(
    core: &RentalCore,
    config: &Config,
    actor: &Actor,
    user: Option<&str>,
) -> anyhow::Result<()> {
    if let Some(user) = user {
        return show_user(core, actor, user).await;
    }

    println!("gpurent v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let config_path = paths::config_file_path();
    if config_path.exists() {
        println!("  Config:     {} (loaded)", config_path.display());
    } else {
        println!("  Config:     (using defaults)");
    }

    let db_path = config.database.resolved_path();
    let db_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);
    println!("  Database:   {} ({})", db_path.display(), format_bytes(db_size));

    match running_daemon_pid() {
        Some(pid) => println!("  Daemon:     running (pid {pid})"),
        None => println!("  Daemon:     not running"),
    }
    println!(
        "  Billing:    every {} min, sweep every {}s",
        config.billing.default_interval_minutes, config.scheduler.sweep_interval_secs
    );

    let pending = core
        .store
        .sessions_with_status(SessionStatus::Pending)
        .await?;
    let active = core.store.sessions_with_status(SessionStatus::Active).await?;
    println!();
    println!("  Sessions:   {} active, {} pending", active.len(), pending.len());
    let stopping = active.iter().filter(|s| s.end_time.is_some()).count();
    if stopping > 0 {
        println!("              {stopping} awaiting finalization");
    }
    Ok(())
}

async fn show_user(core: &RentalCore, actor: &Actor, user: &str) -> anyhow::Result<()> {
    let summary = core.sessions.user_summary(actor, user).await?;
    println!("User {}", summary.user_id);
    println!("  Balance:    {}", summary.wallet_balance);
    println!("  Spent:      {}", summary.total_spent);
    println!("  Earned:     {}", summary.total_earned);
    if summary.sessions_by_status.is_empty() {
        println!("  Sessions:   none");
    } else {
        let parts: Vec<String> = summary
            .sessions_by_status
            .iter()
            .map(|(status, n)| format!("{n} {status}"))
            .collect();
        println!("  Sessions:   {}", parts.join(", "));
    }
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
