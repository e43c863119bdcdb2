use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::paths::Paths;
use crate::error::{BackoffKind, ConfigError};

/// Application-wide settings stored in config.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub ssh: SshSettings,
    #[serde(default)]
    pub hook: HookSettings,
    #[serde(default)]
    pub backoff: BackoffSettings,
}

impl AppConfig {
    /// Load from file, falling back to defaults if it does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(ConfigError::Parse)
    }

    /// Settings the connection engine needs, with `~` expanded.
    pub fn engine_settings(&self, paths: &Paths) -> EngineSettings {
        let ssh_config_file = match &self.ssh.config_file {
            Some(raw) => paths.expand_tilde(raw),
            None => paths.ssh_config_file(),
        };
        let known_hosts_file = match &self.ssh.known_hosts_file {
            Some(raw) => paths.expand_tilde(raw),
            None => paths.known_hosts_file(),
        };
        let preconnect_hook = match &self.hook.preconnect {
            Some(raw) => paths.expand_tilde(raw),
            None => paths.home_dir.join("keymaster.js"),
        };
        EngineSettings {
            paths: paths.clone(),
            ssh_config_file,
            known_hosts_file,
            preconnect_hook,
            keepalive: match self.ssh.keepalive_interval_secs {
                // Treat 0 as "no keepalive"
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            backoff: self.backoff,
        }
    }
}

fn default_ssh_path() -> String {
    if cfg!(windows) {
        r"C:\Windows\System32\OpenSSH\ssh.exe".to_string()
    } else {
        "/usr/bin/ssh".to_string()
    }
}

fn default_keepalive() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SshSettings {
    /// SSH binary for collaborators that shell out; the engine uses russh.
    #[serde(default = "default_ssh_path")]
    pub path: String,
    #[serde(default)]
    pub config_file: Option<String>,
    #[serde(default)]
    pub known_hosts_file: Option<String>,
    #[serde(default = "default_keepalive")]
    pub keepalive_interval_secs: u64,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            path: default_ssh_path(),
            config_file: None,
            known_hosts_file: None,
            keepalive_interval_secs: default_keepalive(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HookSettings {
    /// Defaults to ~/keymaster.js
    #[serde(default)]
    pub preconnect: Option<String>,
}

fn default_error_unit() -> u64 {
    4
}

fn default_close_unit() -> u64 {
    1
}

/// Retry delay multipliers, in seconds per consecutive failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackoffSettings {
    #[serde(default = "default_error_unit")]
    pub error_unit_secs: u64,
    #[serde(default = "default_close_unit")]
    pub close_unit_secs: u64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            error_unit_secs: default_error_unit(),
            close_unit_secs: default_close_unit(),
        }
    }
}

impl BackoffSettings {
    /// Delay before the next attempt after `error_count` consecutive failures.
    pub fn delay(&self, kind: BackoffKind, error_count: u32) -> Duration {
        let unit = match kind {
            BackoffKind::Error => self.error_unit_secs,
            BackoffKind::Close => self.close_unit_secs,
        };
        Duration::from_secs(unit.saturating_mul(u64::from(error_count)))
    }
}

/// Resolved settings shared by every connection.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub paths: Paths,
    pub ssh_config_file: PathBuf,
    pub known_hosts_file: PathBuf,
    pub preconnect_hook: PathBuf,
    pub keepalive: Option<Duration>,
    pub backoff: BackoffSettings,
}

impl EngineSettings {
    pub fn new(paths: Paths) -> Self {
        AppConfig::default().engine_settings(&paths)
    }
}
