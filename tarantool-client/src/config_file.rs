//! Declarative configuration loading from TOML and environment variables.
//!
//! [`FileConfig`] mirrors [`ClientConfig`](crate::config::ClientConfig) with
//! plain serde-friendly fields and converts into it through the builder API,
//! so file and environment values go through the same validation.
//!
//! # Example TOML
//!
//! ```toml
//! operation-timeout-ms = 5000
//! use-new-call = true
//!
//! [network]
//! addresses = ["10.0.0.1:3301", "10.0.0.2"]
//! connect-timeout-ms = 2000
//! write-timeout-ms = 60000
//! init-timeout-ms = 60000
//! shared-buffer-size = 8388608
//! direct-write-factor = 0.5
//!
//! [security]
//! username = "app"
//! password = "secret"
//!
//! [retry]
//! initial-backoff-ms = 100
//! max-backoff-ms = 30000
//! multiplier = 2.0
//! jitter = 0.2
//!
//! [cluster]
//! operation-expiry-ms = 500
//! ```

use std::net::SocketAddr;
use std::time::Duration;

#[cfg(feature = "config-file")]
use serde::{Deserialize, Serialize};

use crate::config::{ClientConfig, ClientConfigBuilder, ConfigError};

/// Port used when a configured address has none.
const DEFAULT_PORT: u16 = 3301;

/// Top-level file-based configuration.
#[derive(Debug, Clone, Default)]
#[cfg_attr(
    feature = "config-file",
    derive(Serialize, Deserialize),
    serde(rename_all = "kebab-case", default)
)]
pub struct FileConfig {
    /// Network configuration.
    pub network: Option<FileNetworkConfig>,
    /// Credentials.
    pub security: Option<FileSecurityConfig>,
    /// Reconnect backoff configuration.
    pub retry: Option<FileRetryConfig>,
    /// Cluster retry configuration.
    pub cluster: Option<FileClusterConfig>,
    /// Default wait limit for operation results in milliseconds.
    pub operation_timeout_ms: Option<u64>,
    /// Use CALL (true) or OLD_CALL (false) for stored procedure calls.
    pub use_new_call: Option<bool>,
}

/// File-based network configuration.
#[derive(Debug, Clone, Default)]
#[cfg_attr(
    feature = "config-file",
    derive(Serialize, Deserialize),
    serde(rename_all = "kebab-case", default)
)]
pub struct FileNetworkConfig {
    /// Server addresses, `host:port` or bare IPs.
    pub addresses: Option<Vec<String>>,
    /// Per-attempt connect timeout in milliseconds.
    pub connect_timeout_ms: Option<u64>,
    /// Write timeout in milliseconds.
    pub write_timeout_ms: Option<u64>,
    /// Initial connection timeout in milliseconds.
    pub init_timeout_ms: Option<u64>,
    /// Shared write buffer capacity in bytes.
    pub shared_buffer_size: Option<usize>,
    /// Fraction of the shared buffer above which packets bypass it.
    pub direct_write_factor: Option<f64>,
    /// Initial encode buffer capacity in bytes.
    pub default_request_size: Option<usize>,
    /// Largest accepted response frame in bytes.
    pub max_frame_size: Option<usize>,
}

/// File-based credentials.
#[derive(Debug, Clone, Default)]
#[cfg_attr(
    feature = "config-file",
    derive(Serialize, Deserialize),
    serde(rename_all = "kebab-case", default)
)]
pub struct FileSecurityConfig {
    /// User name.
    pub username: Option<String>,
    /// Password.
    pub password: Option<String>,
}

/// File-based retry configuration.
#[derive(Debug, Clone, Default)]
#[cfg_attr(
    feature = "config-file",
    derive(Serialize, Deserialize),
    serde(rename_all = "kebab-case", default)
)]
pub struct FileRetryConfig {
    /// Initial backoff duration in milliseconds.
    pub initial_backoff_ms: Option<u64>,
    /// Maximum backoff duration in milliseconds.
    pub max_backoff_ms: Option<u64>,
    /// Backoff multiplier.
    pub multiplier: Option<f64>,
    /// Maximum number of reconnect attempts.
    pub max_retries: Option<u32>,
    /// Jitter factor (0.0 to 1.0).
    pub jitter: Option<f64>,
}

/// File-based cluster configuration.
#[derive(Debug, Clone, Default)]
#[cfg_attr(
    feature = "config-file",
    derive(Serialize, Deserialize),
    serde(rename_all = "kebab-case", default)
)]
pub struct FileClusterConfig {
    /// Retry expiry of a call in milliseconds.
    pub operation_expiry_ms: Option<u64>,
}

fn parse_address(raw: &str) -> Result<SocketAddr, ConfigError> {
    let raw = raw.trim();
    raw.parse::<SocketAddr>()
        .or_else(|_| format!("{raw}:{DEFAULT_PORT}").parse::<SocketAddr>())
        .map_err(|_| ConfigError::new(format!("invalid address: {raw:?}")))
}

impl TryFrom<FileConfig> for ClientConfig {
    type Error = ConfigError;

    fn try_from(file: FileConfig) -> Result<Self, Self::Error> {
        let mut builder = ClientConfigBuilder::new();

        if let Some(net) = file.network {
            let addresses = net
                .addresses
                .unwrap_or_default()
                .iter()
                .map(|a| parse_address(a))
                .collect::<Result<Vec<_>, _>>()?;

            builder = builder.network(|mut n| {
                if !addresses.is_empty() {
                    n = n.addresses(addresses);
                }
                if let Some(ms) = net.connect_timeout_ms {
                    n = n.connect_timeout(Duration::from_millis(ms));
                }
                if let Some(ms) = net.write_timeout_ms {
                    n = n.write_timeout(Duration::from_millis(ms));
                }
                if let Some(ms) = net.init_timeout_ms {
                    n = n.init_timeout(Duration::from_millis(ms));
                }
                if let Some(size) = net.shared_buffer_size {
                    n = n.shared_buffer_size(size);
                }
                if let Some(factor) = net.direct_write_factor {
                    n = n.direct_write_factor(factor);
                }
                if let Some(size) = net.default_request_size {
                    n = n.default_request_size(size);
                }
                if let Some(size) = net.max_frame_size {
                    n = n.max_frame_size(size);
                }
                n
            });
        }

        if let Some(sec) = file.security {
            builder = builder.security(|mut s| {
                if let Some(username) = sec.username {
                    s = s.username(username);
                }
                if let Some(password) = sec.password {
                    s = s.password(password);
                }
                s
            });
        }

        if let Some(retry) = file.retry {
            builder = builder.retry(|mut r| {
                if let Some(ms) = retry.initial_backoff_ms {
                    r = r.initial_backoff(Duration::from_millis(ms));
                }
                if let Some(ms) = retry.max_backoff_ms {
                    r = r.max_backoff(Duration::from_millis(ms));
                }
                if let Some(m) = retry.multiplier {
                    r = r.multiplier(m);
                }
                if let Some(n) = retry.max_retries {
                    r = r.max_retries(n);
                }
                if let Some(j) = retry.jitter {
                    r = r.jitter(j);
                }
                r
            });
        }

        if let Some(ms) = file.cluster.and_then(|c| c.operation_expiry_ms) {
            builder = builder.operation_expiry(Duration::from_millis(ms));
        }

        if let Some(ms) = file.operation_timeout_ms {
            builder = builder.operation_timeout(Duration::from_millis(ms));
        }

        if let Some(enabled) = file.use_new_call {
            builder = builder.use_new_call(enabled);
        }

        builder.build()
    }
}

impl ClientConfig {
    /// Loads configuration from a TOML file.
    ///
    /// Requires the `config-file` feature.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let config = ClientConfig::from_toml("tarantool-client.toml")?;
    /// let client = TarantoolClient::connect(config).await?;
    /// ```
    #[cfg(feature = "config-file")]
    pub fn from_toml<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::new(format!("failed to read TOML config file: {e}")))?;
        Self::from_toml_str(&content)
    }

    /// Parses configuration from a TOML document.
    ///
    /// Requires the `config-file` feature.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file_config: FileConfig = toml::from_str(content)
            .map_err(|e| ConfigError::new(format!("failed to parse TOML config: {e}")))?;
        file_config.try_into()
    }

    /// Loads configuration from environment variables.
    ///
    /// This method is always available (no feature flag required).
    ///
    /// | Variable | Maps to |
    /// |----------|---------|
    /// | `TARANTOOL_ADDRESSES` | Comma-separated addresses (e.g., `10.0.0.1:3301,10.0.0.2:3301`) |
    /// | `TARANTOOL_USERNAME` | User name |
    /// | `TARANTOOL_PASSWORD` | Password |
    /// | `TARANTOOL_CONNECT_TIMEOUT_MS` | Per-attempt connect timeout |
    /// | `TARANTOOL_WRITE_TIMEOUT_MS` | Write timeout |
    /// | `TARANTOOL_INIT_TIMEOUT_MS` | Initial connection timeout |
    /// | `TARANTOOL_OPERATION_TIMEOUT_MS` | Default wait limit for results |
    /// | `TARANTOOL_OPERATION_EXPIRY_MS` | Cluster retry expiry |
    ///
    /// Numeric variables that fail to parse are reported as errors.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let millis = |name: &str| -> Result<Option<u64>, ConfigError> {
            var(name)
                .map(|v| {
                    v.trim()
                        .parse::<u64>()
                        .map_err(|_| ConfigError::new(format!("{name} must be an integer, got {v:?}")))
                })
                .transpose()
        };

        let mut file_config = FileConfig::default();

        if let Some(val) = var("TARANTOOL_ADDRESSES") {
            file_config.network.get_or_insert_with(Default::default).addresses = Some(
                val.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect(),
            );
        }

        if let Some(val) = var("TARANTOOL_USERNAME") {
            file_config.security.get_or_insert_with(Default::default).username = Some(val);
        }

        if let Some(val) = var("TARANTOOL_PASSWORD") {
            file_config.security.get_or_insert_with(Default::default).password = Some(val);
        }

        if let Some(ms) = millis("TARANTOOL_CONNECT_TIMEOUT_MS")? {
            file_config.network.get_or_insert_with(Default::default).connect_timeout_ms = Some(ms);
        }

        if let Some(ms) = millis("TARANTOOL_WRITE_TIMEOUT_MS")? {
            file_config.network.get_or_insert_with(Default::default).write_timeout_ms = Some(ms);
        }

        if let Some(ms) = millis("TARANTOOL_INIT_TIMEOUT_MS")? {
            file_config.network.get_or_insert_with(Default::default).init_timeout_ms = Some(ms);
        }

        if let Some(ms) = millis("TARANTOOL_OPERATION_TIMEOUT_MS")? {
            file_config.operation_timeout_ms = Some(ms);
        }

        if let Some(ms) = millis("TARANTOOL_OPERATION_EXPIRY_MS")? {
            file_config.cluster.get_or_insert_with(Default::default).operation_expiry_ms = Some(ms);
        }

        file_config.try_into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_file_config_defaults_produce_valid_client_config() {
        let config: ClientConfig = FileConfig::default().try_into().unwrap();
        assert_eq!(config.network().addresses().len(), 1);
        assert!(config.use_new_call());
    }

    #[test]
    fn test_file_config_with_network() {
        let file_config = FileConfig {
            network: Some(FileNetworkConfig {
                addresses: Some(vec!["127.0.0.1:3302".to_string(), "10.0.0.5".to_string()]),
                write_timeout_ms: Some(1_000),
                direct_write_factor: Some(0.25),
                ..Default::default()
            }),
            ..Default::default()
        };
        let config: ClientConfig = file_config.try_into().unwrap();
        let addresses = config.network().addresses();
        assert_eq!(addresses.len(), 2);
        assert_eq!(addresses[1].port(), DEFAULT_PORT);
        assert_eq!(config.network().write_timeout(), Duration::from_secs(1));
        assert_eq!(config.network().direct_write_factor(), 0.25);
    }

    #[test]
    fn test_file_config_invalid_address() {
        let file_config = FileConfig {
            network: Some(FileNetworkConfig {
                addresses: Some(vec!["not an address".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = ClientConfig::try_from(file_config).unwrap_err();
        assert!(err.to_string().contains("invalid address"));
    }

    #[test]
    fn test_file_config_with_retry() {
        let file_config = FileConfig {
            retry: Some(FileRetryConfig {
                initial_backoff_ms: Some(200),
                max_backoff_ms: Some(60_000),
                multiplier: Some(3.0),
                max_retries: Some(5),
                jitter: Some(0.1),
            }),
            ..Default::default()
        };
        let config: ClientConfig = file_config.try_into().unwrap();
        assert_eq!(config.retry().initial_backoff(), Duration::from_millis(200));
        assert_eq!(config.retry().max_backoff(), Duration::from_secs(60));
        assert_eq!(config.retry().multiplier(), 3.0);
        assert_eq!(config.retry().max_retries(), Some(5));
        assert_eq!(config.retry().jitter(), 0.1);
    }

    #[test]
    fn test_from_vars() {
        let config = ClientConfig::from_vars(vars(&[
            ("TARANTOOL_ADDRESSES", "127.0.0.1:3301, 127.0.0.1:3302"),
            ("TARANTOOL_USERNAME", "app"),
            ("TARANTOOL_PASSWORD", "secret"),
            ("TARANTOOL_INIT_TIMEOUT_MS", "1500"),
            ("TARANTOOL_OPERATION_EXPIRY_MS", "250"),
        ]))
        .unwrap();

        assert_eq!(config.network().addresses().len(), 2);
        assert_eq!(config.security().username(), Some("app"));
        assert_eq!(config.security().password(), Some("secret"));
        assert_eq!(config.network().init_timeout(), Duration::from_millis(1500));
        assert_eq!(config.cluster().operation_expiry(), Duration::from_millis(250));
    }

    #[test]
    fn test_from_vars_rejects_bad_number() {
        let err = ClientConfig::from_vars(vars(&[("TARANTOOL_WRITE_TIMEOUT_MS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("TARANTOOL_WRITE_TIMEOUT_MS"));
    }

    #[test]
    fn test_from_vars_empty() {
        let config = ClientConfig::from_vars(|_| None).unwrap();
        assert!(!config.security().has_credentials());
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn test_from_toml_str() {
        let config = ClientConfig::from_toml_str(
            r#"
            operation-timeout-ms = 5000
            use-new-call = false

            [network]
            addresses = ["127.0.0.1:3301"]
            shared-buffer-size = 1024

            [cluster]
            operation-expiry-ms = 750
            "#,
        )
        .unwrap();

        assert_eq!(config.operation_timeout(), Some(Duration::from_secs(5)));
        assert!(!config.use_new_call());
        assert_eq!(config.network().shared_buffer_size(), 1024);
        assert_eq!(config.cluster().operation_expiry(), Duration::from_millis(750));
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn test_toml_round_trip() {
        let file_config = FileConfig {
            operation_timeout_ms: Some(30),
            ..Default::default()
        };
        let toml_str = toml::to_string(&file_config).unwrap();
        let parsed: FileConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.operation_timeout_ms, Some(30));
    }
}
