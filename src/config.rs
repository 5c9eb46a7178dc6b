// src/config.rs

//! Backend settings: defaults, optional TOML file, CLI overrides.
//!
//! Settings are plain owned values constructed once at startup and passed
//! down; nothing here is global.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::errors::Result;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 12345;
pub const DEFAULT_KILL_TIMEOUT_SECS: u64 = 10;

/// Default location of the optional settings file.
pub const DEFAULT_SETTINGS_PATH: &str = ".gwf/local.toml";

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_kill_timeout_secs() -> u64 {
    DEFAULT_KILL_TIMEOUT_SECS
}

fn default_log_dir() -> PathBuf {
    PathBuf::from(".gwf/logs")
}

fn default_tracked_file() -> PathBuf {
    PathBuf::from(".gwf/local-backend-tracked.json")
}

/// Settings for both the server (`workers`) and the client-side facade.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Host the workers listen on / the client connects to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port the workers listen on. Port 0 binds an ephemeral port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Core budget for the scheduler. `None` detects available parallelism.
    #[serde(default)]
    pub max_cores: Option<u32>,

    /// Grace period between SIGTERM and SIGKILL when stopping a task.
    #[serde(default = "default_kill_timeout_secs")]
    pub kill_timeout_secs: u64,

    /// Directory holding per-task stdout/stderr logs.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Persistent target-name → task-id mapping used by the facade.
    #[serde(default = "default_tracked_file")]
    pub tracked_file: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            host: default_host(),
            port: default_port(),
            max_cores: None,
            kill_timeout_secs: default_kill_timeout_secs(),
            log_dir: default_log_dir(),
            tracked_file: default_tracked_file(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Settings> {
        let contents = fs::read_to_string(path.as_ref())?;
        let settings = toml::from_str(&contents)?;
        Ok(settings)
    }

    /// Load settings from `path` if it exists, falling back to defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Settings> {
        let path = path.as_ref();
        if path.exists() {
            Settings::load_from_path(path)
        } else {
            Ok(Settings::default())
        }
    }

    /// The configured core budget, or the machine's available parallelism.
    pub fn effective_max_cores(&self) -> u32 {
        self.max_cores.unwrap_or_else(detect_cores)
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_secs(self.kill_timeout_secs)
    }
}

fn detect_cores() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}
