// src/infra/daemon/process.rs — PID file bookkeeping for the billing daemon

use std::path::PathBuf;

use crate::infra::errors::Result;

fn pid_path() -> PathBuf {
    crate::infra::paths::data_dir().join("daemon.pid")
}

/// Write a PID file for the daemon.
pub fn write_pid_file() -> Result<PathBuf> {
    let path = pid_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, std::process::id().to_string())?;
    Ok(path)
}

/// Remove the PID file.
pub fn remove_pid_file() {
    let _ = std::fs::remove_file(pid_path());
}

/// PID of a live daemon, if one is recorded.
pub fn running_daemon_pid() -> Option<u32> {
    let content = std::fs::read_to_string(pid_path()).ok()?;
    let pid = content.trim().parse::<u32>().ok()?;

    #[cfg(unix)]
    {
        let alive = std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);
        alive.then_some(pid)
    }
    #[cfg(not(unix))]
    {
        Some(pid)
    }
}
