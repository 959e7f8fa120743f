//! Socket acquisition strategies used by the reconnector.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tarantool_core::{Result, TarantoolError};
use tokio::net::TcpStream;

use crate::config::RetryConfig;

/// Supplies connected sockets to the reconnector.
///
/// `retry_number` counts failed attempts since the last successful
/// connection and `last_error` is the cause of the previous failure. An
/// implementation may sleep to back off. Returning a communication error
/// makes the reconnector try again; any other error stops reconnection and
/// closes the client.
#[async_trait]
pub trait SocketProvider: Send + Sync + std::fmt::Debug {
    /// Returns a connected socket for the next attempt.
    async fn get(&self, retry_number: u32, last_error: Option<&TarantoolError>) -> Result<TcpStream>;
}

/// Computes the next backoff by applying the multiplier and a random jitter.
fn calculate_backoff_with_jitter(
    current_backoff: Duration,
    multiplier: f64,
    max_backoff: Duration,
    jitter: f64,
) -> Duration {
    let base_backoff = current_backoff.as_secs_f64() * multiplier;

    let jitter_factor = if jitter > 0.0 {
        let mut rng = rand::thread_rng();
        1.0 + rng.gen_range(-jitter..=jitter)
    } else {
        1.0
    };

    // Clamp in floating point; Duration::from_secs_f64 panics on overflow.
    let secs = (base_backoff * jitter_factor)
        .min(max_backoff.as_secs_f64())
        .max(0.0);
    std::cmp::min(Duration::from_secs_f64(secs), max_backoff)
}

/// Returns the delay before the `step`-th backoff (1-based).
pub(crate) fn backoff_delay(retry: &RetryConfig, step: u32) -> Duration {
    if step == 0 {
        return Duration::ZERO;
    }
    let mut delay = std::cmp::min(retry.initial_backoff(), retry.max_backoff());
    for _ in 1..step {
        if delay >= retry.max_backoff() {
            break;
        }
        delay = calculate_backoff_with_jitter(delay, retry.multiplier(), retry.max_backoff(), 0.0);
    }
    calculate_backoff_with_jitter(delay, 1.0, retry.max_backoff(), retry.jitter())
}

async fn connect(address: SocketAddr, timeout: Duration) -> Result<TcpStream> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
        .await
        .map_err(|_| {
            TarantoolError::Communication(format!(
                "connect to {} timed out after {:?}",
                address, timeout
            ))
        })?
        .map_err(|e| {
            TarantoolError::Communication(format!("failed to connect to {}: {}", address, e))
        })?;

    stream.set_nodelay(true).map_err(|e| {
        TarantoolError::Communication(format!("failed to set TCP_NODELAY: {}", e))
    })?;

    tracing::debug!(address = %address, "socket connected");
    Ok(stream)
}

/// Connects to one fixed address, backing off between failed attempts.
#[derive(Debug, Clone)]
pub struct SingleSocketProvider {
    address: SocketAddr,
    connect_timeout: Duration,
    retry: RetryConfig,
}

impl SingleSocketProvider {
    /// Creates a provider for `address`.
    pub fn new(address: SocketAddr, connect_timeout: Duration, retry: RetryConfig) -> Self {
        Self {
            address,
            connect_timeout,
            retry,
        }
    }

    /// Returns the target address.
    pub fn address(&self) -> SocketAddr {
        self.address
    }
}

#[async_trait]
impl SocketProvider for SingleSocketProvider {
    async fn get(&self, retry_number: u32, last_error: Option<&TarantoolError>) -> Result<TcpStream> {
        if let Some(max) = self.retry.max_retries() {
            if retry_number > max {
                return Err(TarantoolError::Closed(format!(
                    "giving up on {} after {} attempts, last error: {}",
                    self.address,
                    retry_number,
                    last_error.map(ToString::to_string).unwrap_or_default()
                )));
            }
        }

        let delay = backoff_delay(&self.retry, retry_number);
        if !delay.is_zero() {
            tracing::debug!(address = %self.address, attempt = retry_number, ?delay, "backing off");
            tokio::time::sleep(delay).await;
        }

        connect(self.address, self.connect_timeout).await
    }
}

/// Cycles through a list of addresses, one per attempt.
///
/// Backs off after each full pass over the list. `max_retries` of the retry
/// configuration limits the number of full passes.
#[derive(Debug)]
pub struct RoundRobinSocketProvider {
    addresses: Vec<SocketAddr>,
    next: AtomicUsize,
    connect_timeout: Duration,
    retry: RetryConfig,
}

impl RoundRobinSocketProvider {
    /// Creates a provider over `addresses`.
    pub fn new(addresses: Vec<SocketAddr>, connect_timeout: Duration, retry: RetryConfig) -> Self {
        Self {
            addresses,
            next: AtomicUsize::new(0),
            connect_timeout,
            retry,
        }
    }

    /// Returns the configured addresses.
    pub fn addresses(&self) -> &[SocketAddr] {
        &self.addresses
    }

    fn next_address(&self) -> Option<SocketAddr> {
        if self.addresses.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.addresses.len();
        Some(self.addresses[index])
    }
}

#[async_trait]
impl SocketProvider for RoundRobinSocketProvider {
    async fn get(&self, retry_number: u32, last_error: Option<&TarantoolError>) -> Result<TcpStream> {
        let address = self.next_address().ok_or_else(|| {
            TarantoolError::Configuration("no addresses to connect to".to_string())
        })?;

        let passes = retry_number / self.addresses.len() as u32;
        if let Some(max) = self.retry.max_retries() {
            if passes > max {
                return Err(TarantoolError::Closed(format!(
                    "giving up after {} passes over {} addresses, last error: {}",
                    passes,
                    self.addresses.len(),
                    last_error.map(ToString::to_string).unwrap_or_default()
                )));
            }
        }

        if retry_number > 0 && retry_number % self.addresses.len() as u32 == 0 {
            let delay = backoff_delay(&self.retry, passes);
            tracing::debug!(attempt = retry_number, ?delay, "all addresses failed, backing off");
            tokio::time::sleep(delay).await;
        }

        connect(address, self.connect_timeout).await
    }
}
