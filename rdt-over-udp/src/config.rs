//! Adjustable client and server parameters.
//!
//! Both structs carry the protocol defaults in their [`Default`] impls; the
//! binary overrides individual fields from CLI flags and calls `validate`
//! before handing the config to [`crate::client::Client`] or
//! [`crate::server::Server`].

use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::time::Duration;

use thiserror::Error;

/// Port the server binds to when none is given.
pub const DEFAULT_SERVER_PORT: u16 = 54321;

/// How long a worker-mode connection may stay silent before it is evicted.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Rejected configuration values.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("drop rate {0} is outside [0, 1]")]
    DropRate(f64),
    #[error("window capacity must be at least one byte")]
    ZeroWindow,
    #[error("payload size range {min}..={max} is empty or starts at zero")]
    EmptyPayloadRange { min: usize, max: usize },
    #[error("largest payload ({max} bytes) exceeds the window capacity ({window} bytes)")]
    PayloadExceedsWindow { max: usize, window: usize },
    #[error("target packet count {0} is outside 1..=65534")]
    TargetPackets(u32),
    #[error("handshake needs at least one attempt")]
    ZeroHandshakeAttempts,
    #[error("RTT averaging window {0} is outside 1..=4294967295")]
    RttWindow(usize),
    #[error("timeout multiplier must be at least 1")]
    ZeroTimeoutMultiplier,
    #[error("worker queue depth must be at least 1")]
    ZeroQueueDepth,
    #[error("worker idle timeout must be non-zero")]
    ZeroIdleTimeout,
}

/// Client-side (sender) parameters.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Byte budget for unacknowledged payload.
    pub window_capacity_bytes: usize,
    /// Receive timeout before any RTT-based adjustment.
    pub initial_timeout: Duration,
    /// Number of DATA packets that must be cumulatively acknowledged.
    pub target_packets: u32,
    /// Inclusive range random payload sizes are drawn from.
    pub payload_size: RangeInclusive<usize>,
    /// SYN attempts before giving up.  `1` is the plain single-shot handshake.
    pub handshake_attempts: u32,
    /// How many of the most recent RTT samples feed the timeout.
    pub rtt_window: usize,
    /// Timeout = `timeout_multiplier` × mean of the recent samples.
    pub timeout_multiplier: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            window_capacity_bytes: 400,
            initial_timeout: Duration::from_millis(300),
            target_packets: 30,
            payload_size: 40..=80,
            handshake_attempts: 1,
            rtt_window: 5,
            timeout_multiplier: 5,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_capacity_bytes == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        let (min, max) = (*self.payload_size.start(), *self.payload_size.end());
        if min == 0 || min > max {
            return Err(ConfigError::EmptyPayloadRange { min, max });
        }
        // A payload larger than the whole window could never be admitted.
        if max > self.window_capacity_bytes {
            return Err(ConfigError::PayloadExceedsWindow {
                max,
                window: self.window_capacity_bytes,
            });
        }
        if self.target_packets == 0 || self.target_packets >= u32::from(u16::MAX) {
            return Err(ConfigError::TargetPackets(self.target_packets));
        }
        if self.handshake_attempts == 0 {
            return Err(ConfigError::ZeroHandshakeAttempts);
        }
        if self.rtt_window == 0 || u32::try_from(self.rtt_window).is_err() {
            return Err(ConfigError::RttWindow(self.rtt_window));
        }
        if self.timeout_multiplier == 0 {
            return Err(ConfigError::ZeroTimeoutMultiplier);
        }
        Ok(())
    }
}

/// How the server schedules work for inbound datagrams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// One task per connection fed by a bounded queue.  `max_connections`
    /// caps live workers; a worker that sees no DATA for `idle_timeout`
    /// exits and frees its slot.
    Worker {
        queue_depth: usize,
        max_connections: usize,
        idle_timeout: Duration,
    },
    /// One spawned task per datagram, serialized per connection by a mutex.
    /// `max_tasks` caps how many run at once (`None` = unbounded).
    TaskPerDatagram { max_tasks: Option<usize> },
}

impl Default for DispatchMode {
    fn default() -> Self {
        DispatchMode::Worker {
            queue_depth: 64,
            max_connections: 1024,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

/// Server-side (receiver) parameters.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Probability that an arriving DATA packet is discarded.
    pub drop_rate: f64,
    pub dispatch: DispatchMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_SERVER_PORT)),
            drop_rate: 0.3,
            dispatch: DispatchMode::default(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.drop_rate) {
            return Err(ConfigError::DropRate(self.drop_rate));
        }
        if let DispatchMode::Worker {
            queue_depth,
            idle_timeout,
            ..
        } = self.dispatch
        {
            if queue_depth == 0 {
                return Err(ConfigError::ZeroQueueDepth);
            }
            if idle_timeout.is_zero() {
                return Err(ConfigError::ZeroIdleTimeout);
            }
        }
        Ok(())
    }
}
