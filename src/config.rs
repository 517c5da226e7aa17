use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::notifications::ChannelConfig;

pub const ENV_PREFIX: &str = "TICKETWATCH_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML from config file at {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to load config from environment: {0}")]
    Env(#[from] envy::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub database_url: String,
    pub log_dir: String,
    pub listen_address: String,
    /// Where CLI subcommands reach a running daemon.
    pub api_url: String,
    pub fetch_timeout_seconds: u64,
    pub max_concurrent_checks: usize,
    pub user_agent: Option<String>,
    pub alert_repeat_seconds: u64,
    /// Cap on alert repeats. 0 repeats until acknowledged.
    pub alert_max_repeats: u32,
    pub channels: Vec<ChannelConfig>,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialMonitorConfig {
    database_url: Option<String>,
    log_dir: Option<String>,
    listen_address: Option<String>,
    api_url: Option<String>,
    fetch_timeout_seconds: Option<u64>,
    max_concurrent_checks: Option<usize>,
    user_agent: Option<String>,
    alert_repeat_seconds: Option<u64>,
    alert_max_repeats: Option<u32>,
    #[serde(default)]
    channels: Option<Vec<ChannelConfig>>,
}

// Channels are only configurable from the file.
#[derive(Deserialize, Default, Debug)]
struct EnvMonitorConfig {
    database_url: Option<String>,
    log_dir: Option<String>,
    listen_address: Option<String>,
    api_url: Option<String>,
    fetch_timeout_seconds: Option<u64>,
    max_concurrent_checks: Option<usize>,
    user_agent: Option<String>,
    alert_repeat_seconds: Option<u64>,
    alert_max_repeats: Option<u32>,
}

fn default_database_url() -> String {
    "sqlite://ticketwatch.db?mode=rwc".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_listen_address() -> String {
    "127.0.0.1:7878".to_string()
}

fn default_api_url() -> String {
    "http://127.0.0.1:7878".to_string()
}

impl Default for MonitorConfig {
    fn default() -> Self {
        merge(PartialMonitorConfig::default(), EnvMonitorConfig::default())
    }
}

fn merge(file: PartialMonitorConfig, env: EnvMonitorConfig) -> MonitorConfig {
    MonitorConfig {
        database_url: env
            .database_url
            .or(file.database_url)
            .unwrap_or_else(default_database_url),
        log_dir: env.log_dir.or(file.log_dir).unwrap_or_else(default_log_dir),
        listen_address: env
            .listen_address
            .or(file.listen_address)
            .unwrap_or_else(default_listen_address),
        api_url: env.api_url.or(file.api_url).unwrap_or_else(default_api_url),
        fetch_timeout_seconds: env
            .fetch_timeout_seconds
            .or(file.fetch_timeout_seconds)
            .unwrap_or(15),
        max_concurrent_checks: env
            .max_concurrent_checks
            .or(file.max_concurrent_checks)
            .unwrap_or(4),
        user_agent: env.user_agent.or(file.user_agent),
        alert_repeat_seconds: env
            .alert_repeat_seconds
            .or(file.alert_repeat_seconds)
            .unwrap_or(30),
        alert_max_repeats: env
            .alert_max_repeats
            .or(file.alert_max_repeats)
            .unwrap_or(0),
        channels: file
            .channels
            .unwrap_or_else(|| vec![ChannelConfig::default()]),
    }
}

fn read_file(config_path: Option<&Path>) -> Result<PartialMonitorConfig, ConfigError> {
    let Some(path) = config_path else {
        return Ok(PartialMonitorConfig::default());
    };
    if !path.exists() {
        return Ok(PartialMonitorConfig::default());
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

impl MonitorConfig {
    /// File first, then `TICKETWATCH_*` environment variables (after `.env`)
    /// on top, then defaults.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let env_config: EnvMonitorConfig = envy::prefixed(ENV_PREFIX).from_env()?;
        Self::layered(config_path, env_config)
    }

    fn layered(config_path: Option<&Path>, env: EnvMonitorConfig) -> Result<Self, ConfigError> {
        let config = merge(read_file(config_path)?, env);
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "fetch_timeout_seconds must be positive".into(),
            ));
        }
        if self.max_concurrent_checks == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_checks must be positive".into(),
            ));
        }
        if self.alert_repeat_seconds == 0 {
            return Err(ConfigError::Invalid(
                "alert_repeat_seconds must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }

    pub fn alert_repeat_interval(&self) -> Duration {
        Duration::from_secs(self.alert_repeat_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> EnvMonitorConfig {
        envy::prefixed(ENV_PREFIX)
            .from_iter(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())))
            .unwrap()
    }

    #[test]
    fn defaults_without_file_or_env() {
        let config = MonitorConfig::layered(None, env(&[])).unwrap();
        assert_eq!(config, MonitorConfig::default());
        assert_eq!(config.listen_address, "127.0.0.1:7878");
        assert_eq!(config.fetch_timeout(), Duration::from_secs(15));
        assert_eq!(config.max_concurrent_checks, 4);
        assert_eq!(config.alert_max_repeats, 0, "alerts repeat until acknowledged");
        assert_eq!(config.channels, vec![ChannelConfig::Console { bell: true }]);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config =
            MonitorConfig::layered(Some(&dir.path().join("absent.toml")), env(&[])).unwrap();
        assert_eq!(config.database_url, "sqlite://ticketwatch.db?mode=rwc");
    }

    #[test]
    fn env_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
listen_address = "0.0.0.0:9000"
fetch_timeout_seconds = 20
user_agent = "FileAgent/1.0"

[[channels]]
type = "webhook"
url = "http://localhost/hook"
"#
        )
        .unwrap();

        let config = MonitorConfig::layered(
            Some(file.path()),
            env(&[
                ("TICKETWATCH_FETCH_TIMEOUT_SECONDS", "5"),
                ("TICKETWATCH_MAX_CONCURRENT_CHECKS", "8"),
            ]),
        )
        .unwrap();
        assert_eq!(config.listen_address, "0.0.0.0:9000");
        assert_eq!(config.fetch_timeout_seconds, 5);
        assert_eq!(config.max_concurrent_checks, 8);
        assert_eq!(config.user_agent.as_deref(), Some("FileAgent/1.0"));
        assert_eq!(config.channels.len(), 1);
        assert_eq!(config.channels[0].kind(), "webhook");
    }

    #[test]
    fn empty_channel_list_is_kept() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "channels = []").unwrap();
        let config = MonitorConfig::layered(Some(file.path()), env(&[])).unwrap();
        assert!(config.channels.is_empty());
    }

    #[test]
    fn bad_toml_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "listen_address = ").unwrap();
        let err = MonitorConfig::layered(Some(file.path()), env(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn zero_values_are_rejected() {
        let err =
            MonitorConfig::layered(None, env(&[("TICKETWATCH_MAX_CONCURRENT_CHECKS", "0")]))
                .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn unparseable_env_value_is_env_error() {
        let result: Result<EnvMonitorConfig, _> = envy::prefixed(ENV_PREFIX)
            .from_iter(vec![("TICKETWATCH_ALERT_MAX_REPEATS".to_string(), "lots".to_string())]);
        assert!(result.is_err());
    }
}
