//! Client configuration types and builders.

use std::net::SocketAddr;
use std::time::Duration;

use tarantool_core::protocol::DEFAULT_MAX_FRAME_SIZE;
use tarantool_core::TarantoolError;

/// Default shared write buffer capacity.
const DEFAULT_SHARED_BUFFER_SIZE: usize = 8 * 1024 * 1024;
/// Default fraction of the shared buffer above which packets bypass it.
const DEFAULT_DIRECT_WRITE_FACTOR: f64 = 0.5;
/// Default initial capacity of a request encode buffer.
const DEFAULT_REQUEST_SIZE: usize = 4096;
/// Default write timeout.
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(60);
/// Default timeout for establishing the first connection.
const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(60);
/// Default timeout for a single connect plus handshake attempt.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
/// Default initial reconnect backoff.
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(100);
/// Default maximum reconnect backoff.
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);
/// Default backoff multiplier.
const DEFAULT_RETRY_MULTIPLIER: f64 = 2.0;
/// Default jitter factor applied to backoff.
const DEFAULT_JITTER: f64 = 0.2;
/// Default time a cluster call may spend waiting for retries.
const DEFAULT_OPERATION_EXPIRY: Duration = Duration::from_millis(500);

/// Configuration error returned when validation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    message: String,
}

impl ConfigError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for TarantoolError {
    fn from(err: ConfigError) -> Self {
        TarantoolError::Configuration(err.message)
    }
}

/// Network and I/O pipeline settings.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    addresses: Vec<SocketAddr>,
    connect_timeout: Duration,
    write_timeout: Duration,
    init_timeout: Duration,
    shared_buffer_size: usize,
    direct_write_factor: f64,
    default_request_size: usize,
    max_frame_size: usize,
}

impl NetworkConfig {
    /// Returns the configured server addresses.
    pub fn addresses(&self) -> &[SocketAddr] {
        &self.addresses
    }

    /// Returns the timeout for one connect plus handshake attempt.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns how long a submission may wait for buffer space or the socket.
    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// Returns how long client construction waits for the first connection.
    pub fn init_timeout(&self) -> Duration {
        self.init_timeout
    }

    /// Returns the capacity of the shared write buffer in bytes.
    pub fn shared_buffer_size(&self) -> usize {
        self.shared_buffer_size
    }

    /// Returns the fraction of the shared buffer above which packets are
    /// written straight to the socket.
    pub fn direct_write_factor(&self) -> f64 {
        self.direct_write_factor
    }

    /// Returns the packet size, in bytes, above which the direct-write bypass is used.
    pub fn direct_write_threshold(&self) -> usize {
        (self.shared_buffer_size as f64 * self.direct_write_factor) as usize
    }

    /// Returns the initial capacity used when encoding a request.
    pub fn default_request_size(&self) -> usize {
        self.default_request_size
    }

    /// Returns the largest response frame accepted by the reader.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            addresses: vec![default_address()],
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            init_timeout: DEFAULT_INIT_TIMEOUT,
            shared_buffer_size: DEFAULT_SHARED_BUFFER_SIZE,
            direct_write_factor: DEFAULT_DIRECT_WRITE_FACTOR,
            default_request_size: DEFAULT_REQUEST_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

fn default_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3301))
}

/// Builder for `NetworkConfig`.
#[derive(Debug, Clone, Default)]
pub struct NetworkConfigBuilder {
    addresses: Vec<SocketAddr>,
    connect_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    init_timeout: Option<Duration>,
    shared_buffer_size: Option<usize>,
    direct_write_factor: Option<f64>,
    default_request_size: Option<usize>,
    max_frame_size: Option<usize>,
}

impl NetworkConfigBuilder {
    /// Creates a new network configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a server address.
    pub fn add_address(mut self, address: SocketAddr) -> Self {
        self.addresses.push(address);
        self
    }

    /// Sets the server addresses.
    pub fn addresses(mut self, addresses: impl IntoIterator<Item = SocketAddr>) -> Self {
        self.addresses = addresses.into_iter().collect();
        self
    }

    /// Sets the timeout for one connect plus handshake attempt.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the write timeout.
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    /// Sets the initial connection timeout.
    pub fn init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = Some(timeout);
        self
    }

    /// Sets the shared write buffer capacity in bytes.
    pub fn shared_buffer_size(mut self, size: usize) -> Self {
        self.shared_buffer_size = Some(size);
        self
    }

    /// Sets the direct-write fraction of the shared buffer.
    pub fn direct_write_factor(mut self, factor: f64) -> Self {
        self.direct_write_factor = Some(factor);
        self
    }

    /// Sets the initial encode buffer capacity.
    pub fn default_request_size(mut self, size: usize) -> Self {
        self.default_request_size = Some(size);
        self
    }

    /// Sets the largest accepted response frame.
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = Some(size);
        self
    }

    /// Builds the network configuration, returning an error if validation fails.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - a size or timeout is zero
    /// - `direct_write_factor` is not in `(0, 1]`
    pub fn build(self) -> Result<NetworkConfig, ConfigError> {
        let defaults = NetworkConfig::default();
        let addresses = if self.addresses.is_empty() {
            defaults.addresses
        } else {
            self.addresses
        };

        let config = NetworkConfig {
            addresses,
            connect_timeout: self.connect_timeout.unwrap_or(defaults.connect_timeout),
            write_timeout: self.write_timeout.unwrap_or(defaults.write_timeout),
            init_timeout: self.init_timeout.unwrap_or(defaults.init_timeout),
            shared_buffer_size: self.shared_buffer_size.unwrap_or(defaults.shared_buffer_size),
            direct_write_factor: self.direct_write_factor.unwrap_or(defaults.direct_write_factor),
            default_request_size: self
                .default_request_size
                .unwrap_or(defaults.default_request_size),
            max_frame_size: self.max_frame_size.unwrap_or(defaults.max_frame_size),
        };

        if config.shared_buffer_size == 0 {
            return Err(ConfigError::new("shared_buffer_size must be positive"));
        }
        if !(config.direct_write_factor > 0.0 && config.direct_write_factor <= 1.0) {
            return Err(ConfigError::new("direct_write_factor must be in (0, 1]"));
        }
        if config.default_request_size == 0 || config.max_frame_size == 0 {
            return Err(ConfigError::new(
                "default_request_size and max_frame_size must be positive",
            ));
        }
        if config.connect_timeout.is_zero()
            || config.write_timeout.is_zero()
            || config.init_timeout.is_zero()
        {
            return Err(ConfigError::new("timeouts must be positive"));
        }

        Ok(config)
    }
}

/// Reconnect backoff configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
    jitter: f64,
    max_retries: Option<u32>,
}

impl RetryConfig {
    /// Returns the initial backoff duration.
    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    /// Returns the maximum backoff duration.
    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Returns the backoff multiplier.
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Returns the jitter factor (0.0 disables jitter).
    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Returns the retry limit, `None` meaning retry forever.
    pub fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            multiplier: DEFAULT_RETRY_MULTIPLIER,
            jitter: DEFAULT_JITTER,
            max_retries: None,
        }
    }
}

/// Builder for `RetryConfig`.
#[derive(Debug, Clone, Default)]
pub struct RetryConfigBuilder {
    initial_backoff: Option<Duration>,
    max_backoff: Option<Duration>,
    multiplier: Option<f64>,
    jitter: Option<f64>,
    max_retries: Option<u32>,
}

impl RetryConfigBuilder {
    /// Creates a new retry configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the initial backoff duration.
    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = Some(backoff);
        self
    }

    /// Sets the maximum backoff duration.
    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = Some(backoff);
        self
    }

    /// Sets the backoff multiplier.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Sets the jitter factor.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Limits the number of reconnect attempts.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Builds the retry configuration, returning an error if validation fails.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `initial_backoff` exceeds `max_backoff`
    /// - `multiplier` is not finite or is less than 1.0
    /// - `jitter` is outside `[0, 1]`
    pub fn build(self) -> Result<RetryConfig, ConfigError> {
        let initial_backoff = self.initial_backoff.unwrap_or(DEFAULT_INITIAL_BACKOFF);
        let max_backoff = self.max_backoff.unwrap_or(DEFAULT_MAX_BACKOFF);
        let multiplier = self.multiplier.unwrap_or(DEFAULT_RETRY_MULTIPLIER);
        let jitter = self.jitter.unwrap_or(DEFAULT_JITTER);

        if initial_backoff > max_backoff {
            return Err(ConfigError::new(
                "initial_backoff must not exceed max_backoff",
            ));
        }

        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(ConfigError::new(
                "multiplier must be a finite number of at least 1.0",
            ));
        }

        if !(0.0..=1.0).contains(&jitter) {
            return Err(ConfigError::new("jitter must be between 0.0 and 1.0"));
        }

        Ok(RetryConfig {
            initial_backoff,
            max_backoff,
            multiplier,
            jitter,
            max_retries: self.max_retries,
        })
    }
}

/// Credentials configuration.
#[derive(Debug, Clone, Default)]
pub struct SecurityConfig {
    username: Option<String>,
    password: Option<String>,
}

impl SecurityConfig {
    /// Returns the configured username.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Returns the configured password.
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Returns true if the handshake must authenticate.
    pub fn has_credentials(&self) -> bool {
        self.username.is_some()
    }
}

/// Builder for `SecurityConfig`.
#[derive(Debug, Clone, Default)]
pub struct SecurityConfigBuilder {
    username: Option<String>,
    password: Option<String>,
}

impl SecurityConfigBuilder {
    /// Creates a new security configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the username.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Sets the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets username and password.
    pub fn credentials(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username(username).password(password)
    }

    /// Builds the security configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a password is set without a username.
    pub fn build(self) -> Result<SecurityConfig, ConfigError> {
        if self.password.is_some() && self.username.is_none() {
            return Err(ConfigError::new("password requires a username"));
        }
        if matches!(self.username.as_deref(), Some("")) {
            return Err(ConfigError::new("username must not be empty"));
        }
        Ok(SecurityConfig {
            username: self.username,
            password: self.password,
        })
    }
}

/// Cluster retry configuration.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    operation_expiry: Duration,
}

impl ClusterConfig {
    /// Returns how long a call may keep being retried after submission.
    pub fn operation_expiry(&self) -> Duration {
        self.operation_expiry
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            operation_expiry: DEFAULT_OPERATION_EXPIRY,
        }
    }
}

/// Builder for `ClusterConfig`.
#[derive(Debug, Clone, Default)]
pub struct ClusterConfigBuilder {
    operation_expiry: Option<Duration>,
}

impl ClusterConfigBuilder {
    /// Creates a new cluster configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry expiry of a call.
    pub fn operation_expiry(mut self, expiry: Duration) -> Self {
        self.operation_expiry = Some(expiry);
        self
    }

    /// Builds the cluster configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the expiry is zero.
    pub fn build(self) -> Result<ClusterConfig, ConfigError> {
        let operation_expiry = self.operation_expiry.unwrap_or(DEFAULT_OPERATION_EXPIRY);
        if operation_expiry.is_zero() {
            return Err(ConfigError::new("operation_expiry must be positive"));
        }
        Ok(ClusterConfig { operation_expiry })
    }
}

/// Main client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    network: NetworkConfig,
    retry: RetryConfig,
    security: SecurityConfig,
    cluster: ClusterConfig,
    operation_timeout: Option<Duration>,
    use_new_call: bool,
}

impl ClientConfig {
    /// Creates a new client configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Returns the network configuration.
    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    /// Returns the reconnect backoff configuration.
    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    /// Returns the security configuration.
    pub fn security(&self) -> &SecurityConfig {
        &self.security
    }

    /// Returns the cluster retry configuration.
    pub fn cluster(&self) -> &ClusterConfig {
        &self.cluster
    }

    /// Returns the default wait limit for operation results.
    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout
    }

    /// Returns whether `call` uses the current CALL request (otherwise OLD_CALL).
    pub fn use_new_call(&self) -> bool {
        self.use_new_call
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            retry: RetryConfig::default(),
            security: SecurityConfig::default(),
            cluster: ClusterConfig::default(),
            operation_timeout: None,
            use_new_call: true,
        }
    }
}

/// Builder for `ClientConfig`.
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    network: NetworkConfigBuilder,
    retry: RetryConfigBuilder,
    security: SecurityConfigBuilder,
    cluster: ClusterConfigBuilder,
    operation_timeout: Option<Duration>,
    use_new_call: Option<bool>,
}

impl ClientConfigBuilder {
    /// Creates a new client configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures network settings using a builder function.
    pub fn network<F>(mut self, f: F) -> Self
    where
        F: FnOnce(NetworkConfigBuilder) -> NetworkConfigBuilder,
    {
        self.network = f(self.network);
        self
    }

    /// Configures reconnect backoff using a builder function.
    pub fn retry<F>(mut self, f: F) -> Self
    where
        F: FnOnce(RetryConfigBuilder) -> RetryConfigBuilder,
    {
        self.retry = f(self.retry);
        self
    }

    /// Configures security settings using a builder function.
    pub fn security<F>(mut self, f: F) -> Self
    where
        F: FnOnce(SecurityConfigBuilder) -> SecurityConfigBuilder,
    {
        self.security = f(self.security);
        self
    }

    /// Configures cluster retry using a builder function.
    pub fn cluster<F>(mut self, f: F) -> Self
    where
        F: FnOnce(ClusterConfigBuilder) -> ClusterConfigBuilder,
    {
        self.cluster = f(self.cluster);
        self
    }

    /// Adds a server address.
    pub fn add_address(mut self, address: SocketAddr) -> Self {
        self.network = self.network.add_address(address);
        self
    }

    /// Sets the server addresses.
    pub fn addresses(mut self, addresses: impl IntoIterator<Item = SocketAddr>) -> Self {
        self.network = self.network.addresses(addresses);
        self
    }

    /// Sets credentials for authentication.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.security = self.security.credentials(username, password);
        self
    }

    /// Sets the shared write buffer capacity.
    pub fn shared_buffer_size(mut self, size: usize) -> Self {
        self.network = self.network.shared_buffer_size(size);
        self
    }

    /// Sets the direct-write fraction.
    pub fn direct_write_factor(mut self, factor: f64) -> Self {
        self.network = self.network.direct_write_factor(factor);
        self
    }

    /// Sets the write timeout.
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.network = self.network.write_timeout(timeout);
        self
    }

    /// Sets the initial connection timeout.
    pub fn init_timeout(mut self, timeout: Duration) -> Self {
        self.network = self.network.init_timeout(timeout);
        self
    }

    /// Sets the per-attempt connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.network = self.network.connect_timeout(timeout);
        self
    }

    /// Sets the cluster retry expiry.
    pub fn operation_expiry(mut self, expiry: Duration) -> Self {
        self.cluster = self.cluster.operation_expiry(expiry);
        self
    }

    /// Sets the default wait limit for operation results.
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// Selects between CALL and OLD_CALL for `call`.
    pub fn use_new_call(mut self, enabled: bool) -> Self {
        self.use_new_call = Some(enabled);
        self
    }

    /// Builds the client configuration, returning an error if validation fails.
    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        if matches!(self.operation_timeout, Some(t) if t.is_zero()) {
            return Err(ConfigError::new("operation_timeout must be positive"));
        }

        Ok(ClientConfig {
            network: self.network.build()?,
            retry: self.retry.build()?,
            security: self.security.build()?,
            cluster: self.cluster.build()?,
            operation_timeout: self.operation_timeout,
            use_new_call: self.use_new_call.unwrap_or(true),
        })
    }
}
