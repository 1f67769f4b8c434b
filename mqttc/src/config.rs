//! Client configuration.

use std::time::Duration;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::protocol::MAX_PACKET_SIZE;
use crate::types::LastWill;

/// Default MQTT port for plain TCP.
pub const DEFAULT_PORT: u16 = 1883;

/// Default dial + handshake timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default capacity of the inbound message queue.
pub const DEFAULT_MESSAGE_CAPACITY: usize = 64;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Broker address (host or host:port).
    pub addr: String,
    /// Client ID.
    pub client_id: String,
    /// Keep alive interval in seconds. 0 disables keepalive pings.
    pub keep_alive: u16,
    /// Clean session flag.
    pub clean_session: bool,
    /// Username for authentication.
    pub username: Option<String>,
    /// Password for authentication.
    pub password: Option<Bytes>,
    /// Last will published by the broker on ungraceful disconnect.
    pub will: Option<LastWill>,
    /// Bound on dialing plus the CONNECT/CONNACK exchange.
    pub connect_timeout: Duration,
    /// Maximum inbound packet size.
    pub max_packet_size: usize,
    /// Capacity of the queue between the receive loop and `read_next`.
    ///
    /// When full, the receive loop stops reading from the socket until the
    /// application catches up. Messages are never dropped.
    pub message_capacity: usize,
    /// Reconnect delay policy.
    pub backoff: BackoffConfig,
}

impl ClientConfig {
    /// Create a new client config.
    pub fn new(addr: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            client_id: client_id.into(),
            keep_alive: 60,
            clean_session: true,
            username: None,
            password: None,
            will: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_packet_size: MAX_PACKET_SIZE,
            message_capacity: DEFAULT_MESSAGE_CAPACITY,
            backoff: BackoffConfig::default(),
        }
    }

    /// Set credentials.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<Bytes>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set keep alive interval.
    pub fn with_keep_alive(mut self, seconds: u16) -> Self {
        self.keep_alive = seconds;
        self
    }

    /// Set clean session flag.
    pub fn with_clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    /// Set the last will.
    pub fn with_will(mut self, will: LastWill) -> Self {
        self.will = Some(will);
        self
    }

    /// Set the dial + handshake timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the maximum inbound packet size.
    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    /// Set the inbound message queue capacity (minimum 1).
    pub fn with_message_capacity(mut self, capacity: usize) -> Self {
        self.message_capacity = capacity.max(1);
        self
    }

    /// Set the reconnect backoff policy.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Keepalive interval, `None` when disabled.
    pub fn keep_alive_interval(&self) -> Option<Duration> {
        (self.keep_alive > 0).then(|| Duration::from_secs(self.keep_alive as u64))
    }
}

/// Reconnect delay policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// First delay, and the delay after every successful connect.
    pub floor: Duration,
    /// Upper bound for any delay, jitter included.
    pub ceiling: Duration,
    /// Growth factor per failed attempt.
    pub multiplier: f64,
    /// Random extra delay as a fraction of the grown delay (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            floor: Duration::from_secs(1),
            ceiling: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

/// Normalize a broker address to `host:port`.
///
/// A missing or empty port becomes 1883. More than one colon is rejected,
/// which also rules out bare IPv6 literals.
pub fn normalize_address(addr: &str) -> Result<String> {
    let parts: Vec<&str> = addr.split(':').collect();

    match parts.as_slice() {
        [host] | [host, ""] => Ok(format!("{}:{}", host, DEFAULT_PORT)),
        [_, _] => Ok(addr.to_string()),
        _ => Err(Error::Address {
            addr: addr.to_string(),
            reason: "too many colons in server address",
        }),
    }
}
