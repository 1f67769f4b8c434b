//! MQTT 3.1.1 client with keepalive and automatic reconnection.
//!
//! The client keeps one connection to a broker alive: a receive task decodes
//! inbound packets and acknowledges QoS 1 publishes, a keepalive task pings
//! when the connection is idle, and a supervisor dials a new connection with
//! exponential backoff whenever the receive task fails.
//!
//! ## Components
//!
//! - [`Client`]: connect, publish, subscribe, and read messages
//! - [`protocol`]: bit-exact MQTT 3.1.1 packet codec
//! - [`Backoff`]: reconnect delay policy
//!
//! ## Delivery semantics
//!
//! Inbound messages are delivered in wire order through a bounded queue
//! ([`ClientConfig::message_capacity`]); a full queue pauses reading from the
//! socket. Outbound packets are written once. Nothing is retransmitted after
//! a reconnect, and the QoS 2 handshake is not implemented.
//!
//! ## Example
//!
//! ```no_run
//! use mqttc::{Client, ClientConfig, QoS, Topic};
//!
//! #[tokio::main]
//! async fn main() -> mqttc::Result<()> {
//!     let client = Client::new(ClientConfig::new("127.0.0.1", "client-1").with_keep_alive(30))?;
//!     client.connect().await?;
//!
//!     client.subscribe(Topic::new("sensors/#", QoS::AtLeastOnce)).await?;
//!     client.publish("sensors/temp", "21.5").await?;
//!
//!     let msg = client.read_next().await?;
//!     println!("{}: {:?}", msg.topic, msg.payload);
//!
//!     client.disconnect().await
//! }
//! ```

mod backoff;
mod client;
mod config;
mod connection;
mod error;
mod keepalive;
pub mod protocol;
mod receiver;
mod types;

pub use backoff::Backoff;
pub use client::Client;
pub use config::{BackoffConfig, ClientConfig, DEFAULT_PORT, normalize_address};
pub use error::{Error, ProtocolError, Result};
pub use types::{ConnectReturnCode, ConnectionState, LastWill, Message, QoS, Topic};
