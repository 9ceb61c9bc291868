use crate::retry::RetryPolicy;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(&'static str),
    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
    #[error("Could not determine home directory")]
    NoHomeDir,
}

/// Progress sync timing
#[derive(Clone, Debug, PartialEq)]
pub struct SyncConfig {
    /// Quiet period after the last activity before a sync fires
    pub debounce: Duration,
    /// Sync floor while playing, independent of the debounce
    pub floor_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(2),
            floor_interval: Duration::from_secs(10),
        }
    }
}

/// Application configuration
/// Loaded from the environment, with an optional .env file in the working directory
#[derive(Clone, Debug)]
pub struct Config {
    /// Base URL of the media server, without a trailing slash
    pub server_url: String,
    pub api_token: Option<String>,
    pub device_id: String,
    /// Ceiling for every HTTP request so a hung call cannot stall sync
    pub request_timeout: Duration,
    pub sync: SyncConfig,
    pub retry: RetryPolicy,
    /// Where the progress cache is persisted
    pub data_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        if dotenvy::dotenv().is_ok() {
            info!("Config: loaded .env file");
        }

        Self::from_env()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server_url = lookup("SHELFPLAY_SERVER_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("SHELFPLAY_SERVER_URL"))?
            .trim_end_matches('/')
            .to_string();

        let api_token = lookup("SHELFPLAY_TOKEN").filter(|v| !v.is_empty());

        let device_id = lookup("SHELFPLAY_DEVICE_ID")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let request_timeout = Duration::from_secs(parse_positive_or(
            &lookup,
            "SHELFPLAY_REQUEST_TIMEOUT_SECS",
            15,
        )?);

        let defaults = SyncConfig::default();
        let sync = SyncConfig {
            debounce: Duration::from_millis(parse_or(
                &lookup,
                "SHELFPLAY_SYNC_DEBOUNCE_MS",
                defaults.debounce.as_millis() as u64,
            )?),
            floor_interval: Duration::from_secs(parse_positive_or(
                &lookup,
                "SHELFPLAY_SYNC_INTERVAL_SECS",
                defaults.floor_interval.as_secs(),
            )?),
        };

        let data_dir = match lookup("SHELFPLAY_DATA_DIR") {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs::home_dir()
                .ok_or(ConfigError::NoHomeDir)?
                .join(".shelfplay"),
        };

        info!("Config: server {}, data dir {}", server_url, data_dir.display());

        Ok(Self {
            server_url,
            api_token,
            device_id,
            request_timeout,
            sync,
            retry: RetryPolicy::default(),
            data_dir,
        })
    }

    /// File backing the progress cache
    pub fn progress_cache_path(&self) -> PathBuf {
        self.data_dir.join("progress.json")
    }
}

fn parse_or<F>(lookup: &F, name: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

/// Like `parse_or`, but zero is rejected
fn parse_positive_or<F>(lookup: &F, name: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match parse_or(lookup, name, default)? {
        0 => Err(ConfigError::Invalid {
            name,
            value: "0".to_string(),
        }),
        value => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[
            ("SHELFPLAY_SERVER_URL", "https://abs.example.com/"),
            ("SHELFPLAY_DATA_DIR", "/tmp/shelfplay"),
        ])
        .unwrap();
        assert_eq!(config.server_url, "https://abs.example.com");
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert_eq!(config.sync, SyncConfig::default());
        assert_eq!(
            config.progress_cache_path(),
            PathBuf::from("/tmp/shelfplay/progress.json")
        );
        assert!(config.api_token.is_none());
        assert!(!config.device_id.is_empty());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("SHELFPLAY_SERVER_URL", "http://localhost:13378"),
            ("SHELFPLAY_TOKEN", "abc"),
            ("SHELFPLAY_DEVICE_ID", "desk"),
            ("SHELFPLAY_REQUEST_TIMEOUT_SECS", "5"),
            ("SHELFPLAY_SYNC_DEBOUNCE_MS", "500"),
            ("SHELFPLAY_SYNC_INTERVAL_SECS", "30"),
            ("SHELFPLAY_DATA_DIR", "/tmp/x"),
        ])
        .unwrap();
        assert_eq!(config.api_token.as_deref(), Some("abc"));
        assert_eq!(config.device_id, "desk");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.sync.debounce, Duration::from_millis(500));
        assert_eq!(config.sync.floor_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_missing_server_url() {
        assert!(matches!(
            config_from(&[]),
            Err(ConfigError::Missing("SHELFPLAY_SERVER_URL"))
        ));
    }

    #[test]
    fn test_invalid_number() {
        let result = config_from(&[
            ("SHELFPLAY_SERVER_URL", "http://x"),
            ("SHELFPLAY_REQUEST_TIMEOUT_SECS", "soon"),
            ("SHELFPLAY_DATA_DIR", "/tmp/x"),
        ]);
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_zero_interval_and_timeout_rejected() {
        let result = config_from(&[
            ("SHELFPLAY_SERVER_URL", "http://x"),
            ("SHELFPLAY_SYNC_INTERVAL_SECS", "0"),
            ("SHELFPLAY_DATA_DIR", "/tmp/x"),
        ]);
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                name: "SHELFPLAY_SYNC_INTERVAL_SECS",
                ..
            })
        ));

        let result = config_from(&[
            ("SHELFPLAY_SERVER_URL", "http://x"),
            ("SHELFPLAY_REQUEST_TIMEOUT_SECS", "0"),
            ("SHELFPLAY_DATA_DIR", "/tmp/x"),
        ]);
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }
}
