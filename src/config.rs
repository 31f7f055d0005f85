use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::WatchdogError;

/// Top-level configuration loaded from selfwatch.toml.
#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct SelfwatchConfig {
    pub watchdog: WatchdogConfig,
    pub host: HostConfig,
}

/// Watchdog construction parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Deadline in whole seconds. Must be non-zero.
    pub duration_secs: u64,
    /// Memory ceiling in megabytes.
    pub max_mem_mb: Option<u64>,
    /// Maximum resets allowed within the 60s activity timeframe.
    pub max_resets: Option<usize>,
}

/// Settings for the host work loop in the `selfwatch` binary.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub engine: EngineChoice,
    pub reset_interval_ms: u64,
    pub run_for_secs: Option<u64>,
    pub stall_after: Option<u64>,
}

/// Which enforcement engine to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EngineChoice {
    /// Timer engine on unix, polling engine elsewhere.
    #[default]
    Auto,
    Timer,
    Polling,
}

impl WatchdogConfig {
    pub fn new(duration_secs: u64) -> Self {
        Self {
            duration_secs,
            ..Default::default()
        }
    }

    pub fn with_max_mem_mb(mut self, mb: u64) -> Self {
        self.max_mem_mb = Some(mb);
        self
    }

    pub fn with_max_resets(mut self, max_resets: usize) -> Self {
        self.max_resets = Some(max_resets);
        self
    }

    /// The deadline as a `Duration`, rejecting zero.
    pub fn duration(&self) -> Result<Duration, WatchdogError> {
        if self.duration_secs == 0 {
            return Err(WatchdogError::InvalidDuration);
        }
        Ok(Duration::from_secs(self.duration_secs))
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            duration_secs: 30,
            max_mem_mb: None,
            max_resets: None,
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            engine: EngineChoice::Auto,
            reset_interval_ms: 1000,
            run_for_secs: None,
            stall_after: None,
        }
    }
}

/// Errors that can occur while loading the config file.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "invalid config {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

/// Load the config file at `path`. A missing file yields the defaults.
pub fn load(path: &Path) -> Result<SelfwatchConfig, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(SelfwatchConfig::default());
        }
        Err(e) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = SelfwatchConfig::default();
        assert_eq!(config.watchdog.duration_secs, 30);
        assert_eq!(config.watchdog.max_mem_mb, None);
        assert_eq!(config.watchdog.max_resets, None);
        assert_eq!(config.host.engine, EngineChoice::Auto);
        assert_eq!(config.host.reset_interval_ms, 1000);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.watchdog, WatchdogConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("selfwatch.toml");
        std::fs::write(
            &path,
            "[watchdog]\nduration_secs = 5\nmax_resets = 3\n\n[host]\nengine = \"polling\"\n",
        )
        .unwrap();

        let config = load(&path).unwrap();
        assert_eq!(config.watchdog.duration_secs, 5);
        assert_eq!(config.watchdog.max_resets, Some(3));
        assert_eq!(config.watchdog.max_mem_mb, None);
        assert_eq!(config.host.engine, EngineChoice::Polling);
        assert_eq!(config.host.reset_interval_ms, 1000);
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("selfwatch.toml");
        std::fs::write(&path, "[watchdog\nduration_secs = ").unwrap();

        let err = load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("invalid config"));
    }

    #[test]
    fn test_unknown_engine_is_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("selfwatch.toml");
        std::fs::write(&path, "[host]\nengine = \"kqueue\"\n").unwrap();
        assert!(matches!(load(&path).unwrap_err(), ConfigError::Parse { .. }));
    }

    #[test]
    fn test_directory_is_read_error() {
        let dir = tempdir().unwrap();
        let err = load(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_zero_duration_rejected() {
        let err = WatchdogConfig::new(0).duration().unwrap_err();
        assert!(matches!(err, WatchdogError::InvalidDuration));
    }

    #[test]
    fn test_builder_sets_optional_limits() {
        let config = WatchdogConfig::new(5)
            .with_max_mem_mb(256)
            .with_max_resets(10);
        assert_eq!(config.duration().unwrap(), Duration::from_secs(5));
        assert_eq!(config.max_mem_mb, Some(256));
        assert_eq!(config.max_resets, Some(10));
    }
}
