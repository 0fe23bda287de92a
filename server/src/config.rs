//! Configuration management for the daemon.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Local API host address
    pub host: String,
    /// Local API port
    pub port: u16,
    /// Base URL of the remote REST store
    pub remote_url: String,
    /// Sent as the `apikey` header
    pub remote_api_key: Option<String>,
    /// Sent as `Authorization: Bearer`
    pub remote_auth_token: Option<String>,
    /// Tenant whose rows this device replicates
    pub tenant_id: String,
    /// Where the store snapshot lives
    pub data_dir: PathBuf,
    pub sync_interval: Duration,
    pub remote_timeout: Duration,
    pub connectivity_probe: Duration,
    /// Bearer token required by the local API; open when unset
    pub api_token: Option<String>,
}

impl Config {
    /// Configuration with defaults for everything optional.
    pub fn new(remote_url: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4000,
            remote_url: remote_url.into(),
            remote_api_key: None,
            remote_auth_token: None,
            tenant_id: tenant_id.into(),
            data_dir: PathBuf::from("./data"),
            sync_interval: Duration::from_secs(300),
            remote_timeout: Duration::from_secs(30),
            connectivity_probe: Duration::from_secs(30),
            api_token: None,
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let remote_url = lookup("REMOTE_URL").ok_or(ConfigError::Missing("REMOTE_URL"))?;
        let tenant_id = lookup("TENANT_ID").ok_or(ConfigError::Missing("TENANT_ID"))?;
        let mut config = Self::new(remote_url, tenant_id);

        if let Some(host) = lookup("HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("PORT") {
            config.port = port.parse().map_err(|_| ConfigError::InvalidPort(port))?;
        }
        if let Some(dir) = lookup("DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        config.remote_api_key = lookup("REMOTE_API_KEY").filter(|v| !v.is_empty());
        config.remote_auth_token = lookup("REMOTE_AUTH_TOKEN").filter(|v| !v.is_empty());
        config.api_token = lookup("API_TOKEN").filter(|v| !v.is_empty());

        config.sync_interval = seconds(&lookup, "SYNC_INTERVAL_SECS", config.sync_interval)?;
        config.remote_timeout = seconds(&lookup, "REMOTE_TIMEOUT_SECS", config.remote_timeout)?;
        config.connectivity_probe =
            seconds(&lookup, "CONNECTIVITY_PROBE_SECS", config.connectivity_probe)?;

        Ok(config)
    }
}

fn seconds(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let Some(value) = lookup(var) else {
        return Ok(default);
    };
    match value.parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::InvalidDuration { var, value }),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("Invalid PORT value: {0}")]
    InvalidPort(String),

    #[error("Invalid {var} value: {value} (expected a positive number of seconds)")]
    InvalidDuration { var: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::from_lookup(lookup(&[
            ("REMOTE_URL", "https://remote.test/rest/v1"),
            ("TENANT_ID", "t-1"),
        ]))
        .unwrap();

        assert_eq!(config.port, 4000);
        assert_eq!(config.sync_interval, Duration::from_secs(300));
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert!(config.api_token.is_none());
    }

    #[test]
    fn overrides() {
        let config = Config::from_lookup(lookup(&[
            ("REMOTE_URL", "https://remote.test"),
            ("TENANT_ID", "t-1"),
            ("PORT", "8080"),
            ("SYNC_INTERVAL_SECS", "60"),
            ("API_TOKEN", "secret"),
            ("REMOTE_API_KEY", ""),
        ]))
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.sync_interval, Duration::from_secs(60));
        assert_eq!(config.api_token.as_deref(), Some("secret"));
        assert!(config.remote_api_key.is_none());
    }

    #[test]
    fn missing_and_invalid() {
        let result = Config::from_lookup(lookup(&[("TENANT_ID", "t-1")]));
        assert!(matches!(result, Err(ConfigError::Missing("REMOTE_URL"))));

        let result = Config::from_lookup(lookup(&[
            ("REMOTE_URL", "https://remote.test"),
            ("TENANT_ID", "t-1"),
            ("REMOTE_TIMEOUT_SECS", "0"),
        ]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidDuration { var: "REMOTE_TIMEOUT_SECS", .. })
        ));

        let result = Config::from_lookup(lookup(&[
            ("REMOTE_URL", "https://remote.test"),
            ("TENANT_ID", "t-1"),
            ("PORT", "high"),
        ]));
        assert!(matches!(result, Err(ConfigError::InvalidPort(_))));
    }
}
