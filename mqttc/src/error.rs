//! Error types for mqttc.

use std::io;

use crate::types::{ConnectReturnCode, QoS};

/// Result type alias for mqttc.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for mqttc operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The configured broker address is malformed.
    #[error("invalid address {addr:?}: {reason}")]
    Address { addr: String, reason: &'static str },

    /// Dialing the broker failed.
    #[error("connection error: {0}")]
    Connection(#[source] io::Error),

    /// Dial or handshake did not complete in time.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Connection refused by broker.
    #[error("connection refused: {0}")]
    ConnectionRefused(ConnectReturnCode),

    /// Unexpected packet received.
    #[error("unexpected packet: expected {expected}, got {got}")]
    UnexpectedPacket { expected: String, got: String },

    /// Wire format violation.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The buffer does not yet hold a complete packet.
    #[error("incomplete packet: need {needed} more bytes")]
    Incomplete { needed: usize },

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Connection closed by peer.
    #[error("connection closed")]
    ConnectionClosed,

    /// No connection is currently installed.
    #[error("not connected")]
    NotConnected,

    /// Outbound QoS level this client does not implement.
    #[error("unsupported qos: {0:?}")]
    UnsupportedQoS(QoS),

    /// The client was explicitly disconnected.
    #[error("client disconnected")]
    Disconnected,
}

impl Error {
    /// Returns true if the error was caused by an elapsed deadline.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout(_) => true,
            Error::Connection(e) | Error::Io(e) => e.kind() == io::ErrorKind::TimedOut,
            _ => false,
        }
    }
}

/// MQTT wire format violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Remaining length needs a fifth byte or exceeds 268,435,455.
    #[error("malformed remaining length")]
    MalformedRemainingLength,

    /// Packet exceeds the configured maximum size.
    #[error("packet too large: {size} bytes (max {max})")]
    PacketTooLarge { size: usize, max: usize },

    /// Reserved packet type code.
    #[error("invalid packet type: {0}")]
    InvalidPacketType(u8),

    /// Fixed header flags do not match the packet type.
    #[error("invalid flags {flags:#06b} for packet type {packet_type}")]
    InvalidFlags { packet_type: u8, flags: u8 },

    /// QoS value outside 0..=2.
    #[error("invalid qos: {0}")]
    InvalidQoS(u8),

    /// String field is not valid UTF-8.
    #[error("invalid utf-8 in string field")]
    InvalidUtf8,

    /// String or binary field longer than 65,535 bytes.
    #[error("field too long: {0} bytes")]
    FieldTooLong(usize),

    /// SUBSCRIBE or UNSUBSCRIBE without topics.
    #[error("empty topic list")]
    EmptyTopicList,

    /// CONNECT with an unknown protocol name or level.
    #[error("unsupported protocol: {name} level {level}")]
    UnsupportedProtocol { name: String, level: u8 },

    /// Packet body does not match its type.
    #[error("malformed packet: {0}")]
    MalformedPacket(&'static str),
}
