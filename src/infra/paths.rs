// src/infra/paths.rs — Data and config directory resolution
//
// When GPURENT_HOME is set, config and data both live under it. Otherwise
// config uses ~/.gpurent/ and data uses XDG_DATA_HOME/gpurent.

use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;

fn gpurent_home() -> Option<PathBuf> {
    std::env::var_os("GPURENT_HOME").map(PathBuf::from)
}

/// Configuration directory: $GPURENT_HOME/ or ~/.gpurent/
pub fn config_dir() -> PathBuf {
    if let Some(home) = gpurent_home() {
        return home;
    }
    match BaseDirs::new() {
        Some(dirs) => dirs.home_dir().join(".gpurent"),
        None => PathBuf::from(".gpurent"),
    }
}

/// Data directory: $GPURENT_HOME/data/ or the platform data dir.
pub fn data_dir() -> PathBuf {
    if let Some(home) = gpurent_home() {
        return home.join("data");
    }
    match ProjectDirs::from("", "", "gpurent") {
        Some(dirs) => dirs.data_local_dir().to_path_buf(),
        None => config_dir().join("data"),
    }
}

pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

pub fn db_path() -> PathBuf {
    data_dir().join("gpurent.db")
}
