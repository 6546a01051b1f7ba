use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Settings for one guarded job. Loaded once at startup and never mutated
/// afterwards; every component borrows it read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Directory holding the active and archived logs. Always ends in `/`
    /// once normalized.
    #[serde(rename = "LogPath", default = "default_log_path")]
    pub log_path: String,
    #[serde(rename = "LogName", default = "default_log_name")]
    pub log_name: String,
    /// Size in MiB past which the active log is rotated.
    #[serde(rename = "LogMaxSize", default = "default_log_max_size")]
    pub log_max_size: f64,
    /// Age in days past which the active log is rotated.
    #[serde(rename = "LogMaxAge", default = "default_log_max_age")]
    pub log_max_age: i64,
    /// Number of archived logs tolerated before pruning kicks in.
    #[serde(rename = "LogMaxCount", default = "default_log_max_count")]
    pub log_max_count: usize,
    #[serde(rename = "PID", default = "default_pid")]
    pub pid: PathBuf,
    #[serde(rename = "Debug", default)]
    pub debug: bool,
    /// Base URL of the health-check endpoint. `None` disables notifications.
    #[serde(rename = "HealthChecksUrl", default)]
    pub health_checks_url: Option<String>,
    #[serde(rename = "HealthChecksTimeout", default = "default_health_checks_timeout")]
    pub health_checks_timeout: u64,
    /// Forward important lines to the system journal.
    #[serde(rename = "Syslog", default = "default_syslog")]
    pub syslog: bool,
    /// Hold an advisory lock on `<PID>.lock` while checking and writing the
    /// PID file.
    #[serde(rename = "PidLock", default)]
    pub pid_lock: bool,
}

fn default_log_path() -> String {
    "log/".to_string()
}

fn default_log_name() -> String {
    "current.log".to_string()
}

fn default_log_max_size() -> f64 {
    10.0
}

fn default_log_max_age() -> i64 {
    90
}

fn default_log_max_count() -> usize {
    10
}

fn default_pid() -> PathBuf {
    PathBuf::from("pid/cron.pid")
}

fn default_health_checks_timeout() -> u64 {
    10
}

fn default_syslog() -> bool {
    true
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            log_path: default_log_path(),
            log_name: default_log_name(),
            log_max_size: default_log_max_size(),
            log_max_age: default_log_max_age(),
            log_max_count: default_log_max_count(),
            pid: default_pid(),
            debug: false,
            health_checks_url: None,
            health_checks_timeout: default_health_checks_timeout(),
            syslog: default_syslog(),
            pid_lock: false,
        }
    }
}

/// Trim a log directory and make sure it ends with exactly one trailing `/`.
pub fn normalize_log_path(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return "./".to_string();
    }
    let mut path = trimmed.trim_end_matches('/').to_string();
    path.push('/');
    path
}

impl GuardConfig {
    /// Parse a TOML document and normalize it.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: GuardConfig = toml::from_str(content).context("Failed to parse config file")?;
        config.normalized()
    }

    /// Apply load-time normalization and reject values the guard cannot use.
    pub fn normalized(mut self) -> Result<Self> {
        self.log_path = normalize_log_path(&self.log_path);
        self.log_name = self.log_name.trim().to_string();
        if self.log_name.is_empty() {
            bail!("LogName must not be empty");
        }
        if self.log_name.contains('/') {
            bail!("LogName must be a file name, got '{}'", self.log_name);
        }
        if !self.log_max_size.is_finite() || self.log_max_size < 0.0 {
            bail!("LogMaxSize must be a non-negative number, got {}", self.log_max_size);
        }
        if self.log_max_age < 0 {
            bail!("LogMaxAge must not be negative, got {}", self.log_max_age);
        }
        if self.pid.as_os_str().is_empty() {
            bail!("PID must not be empty");
        }

        self.health_checks_url = match self.health_checks_url.take() {
            Some(url) if !url.trim().is_empty() => {
                let url = url.trim().to_string();
                let parsed = reqwest::Url::parse(&url)
                    .with_context(|| format!("Invalid HealthChecksUrl '{}'", url))?;
                if parsed.scheme() != "http" && parsed.scheme() != "https" {
                    bail!("HealthChecksUrl must use http or https, got '{}'", url);
                }
                Some(url)
            }
            _ => None,
        };

        Ok(self)
    }

    /// Directory holding the logs.
    pub fn log_dir(&self) -> &Path {
        Path::new(&self.log_path)
    }

    /// Full path of the active log file.
    pub fn log_file(&self) -> PathBuf {
        self.log_dir().join(&self.log_name)
    }

    /// Directory containing the PID file, if it names one.
    pub fn pid_dir(&self) -> Option<&Path> {
        self.pid.parent().filter(|p| !p.as_os_str().is_empty())
    }

    /// Rotation threshold in bytes.
    pub fn log_max_bytes(&self) -> u64 {
        (self.log_max_size * 1024.0 * 1024.0) as u64
    }

    pub fn health_checks_timeout(&self) -> Duration {
        Duration::from_secs(self.health_checks_timeout)
    }
}

/// Load the configuration.
///
/// Resolution order:
/// 1. An explicit path, which must exist.
/// 2. The `CRONGUARD_CONFIG` environment variable.
/// 3. `<platform config dir>/cron-guard/config.toml`.
/// 4. Built-in defaults.
pub fn load_config(config_path: Option<&Path>) -> Result<GuardConfig> {
    if let Some(path) = config_path {
        if !path.exists() {
            bail!("The configuration file '{}' was not found.", path.display());
        }
        return load_from(path);
    }

    if let Ok(path) = std::env::var("CRONGUARD_CONFIG") {
        let path = PathBuf::from(path);
        if path.exists() {
            return load_from(&path);
        }
        tracing::debug!("CRONGUARD_CONFIG points at missing file {}", path.display());
    }

    if let Some(config_dir) = dirs::config_dir() {
        let path = config_dir.join("cron-guard").join("config.toml");
        if path.exists() {
            return load_from(&path);
        }
    }

    tracing::debug!("No config file found, using defaults");
    GuardConfig::default().normalized()
}

fn load_from(path: &Path) -> Result<GuardConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config = GuardConfig::from_toml_str(&content)
        .with_context(|| format!("Invalid config file {}", path.display()))?;
    tracing::info!("Loaded config from: {}", path.display());
    Ok(config)
}
