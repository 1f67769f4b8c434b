//! MQTT 3.1.1 client with automatic reconnection.
//!
//! The client owns one connection generation at a time. Each generation is a
//! socket plus its receiver and keepalive tasks; when the receiver fails, a
//! single supervisor task tears the generation down and dials a new one,
//! pacing failed attempts with [`Backoff`].
//!
//! Outbound sends snapshot the current generation and write to it. A send
//! that races a reconnect may hit the old socket and fail; nothing is
//! buffered or retransmitted, so delivery across a reconnect is at most once.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::backoff::Backoff;
use crate::config::{ClientConfig, normalize_address};
use crate::connection::{Connection, Outbound};
use crate::error::{Error, ProtocolError, Result};
use crate::keepalive;
use crate::protocol::{Connect, Packet, Publish, Subscribe, Unsubscribe, read_packet, write_packet};
use crate::receiver::{Receiver, Teardown};
use crate::types::{ConnectionState, Message, QoS, Topic};

type Writer = WriteHalf<TcpStream>;

/// MQTT client.
///
/// Dropping the client stops reconnection and every background task.
pub struct Client {
    inner: Arc<Inner>,
    messages: tokio::sync::Mutex<mpsc::Receiver<Message>>,
}

struct Inner {
    config: ClientConfig,
    state: RwLock<ConnectionState>,
    current: RwLock<Option<Arc<Connection<Writer>>>>,
    generation: AtomicU64,
    next_pkid: AtomicU16,
    backoff: Mutex<Backoff>,
    messages: mpsc::Sender<Message>,
    teardown_tx: mpsc::UnboundedSender<Teardown>,
    teardown_rx: Mutex<Option<mpsc::UnboundedReceiver<Teardown>>>,
    supervising: AtomicBool,
    cancel: CancellationToken,
}

impl Client {
    /// Create a client. Nothing is dialed until [`connect`](Self::connect).
    ///
    /// Fails with [`Error::Address`] if the broker address has more than one colon.
    pub fn new(mut config: ClientConfig) -> Result<Self> {
        config.addr = normalize_address(&config.addr)?;

        let (msg_tx, msg_rx) = mpsc::channel(config.message_capacity.max(1));
        let (teardown_tx, teardown_rx) = mpsc::unbounded_channel();

        let inner = Inner {
            backoff: Mutex::new(Backoff::new(config.backoff)),
            config,
            state: RwLock::new(ConnectionState::Disconnected),
            current: RwLock::new(None),
            generation: AtomicU64::new(0),
            next_pkid: AtomicU16::new(1),
            messages: msg_tx,
            teardown_tx,
            teardown_rx: Mutex::new(Some(teardown_rx)),
            supervising: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        };

        Ok(Self {
            inner: Arc::new(inner),
            messages: tokio::sync::Mutex::new(msg_rx),
        })
    }

    /// Dial the broker and perform the CONNECT/CONNACK handshake.
    ///
    /// Failures of this first attempt are returned to the caller: a dial
    /// error as [`Error::Connection`], an elapsed `connect_timeout` as
    /// [`Error::Timeout`], a refusal as [`Error::ConnectionRefused`]. Once
    /// connected, later failures are retried in the background and never
    /// surface here: calling this again returns immediately.
    pub async fn connect(&self) -> Result<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(Error::Disconnected);
        }
        if self.inner.supervising.load(Ordering::Acquire) {
            return Ok(());
        }

        self.inner.set_state(ConnectionState::Connecting);
        match self.inner.establish().await {
            Ok(()) => {
                self.inner.start_supervisor();
                Ok(())
            }
            Err(e) => {
                if !self.inner.cancel.is_cancelled() {
                    self.inner.set_state(ConnectionState::Disconnected);
                }
                Err(e)
            }
        }
    }

    /// Publish a QoS 0 message.
    pub async fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> Result<()> {
        self.publish_with(topic, payload, QoS::AtMostOnce, false).await
    }

    /// Publish with an explicit QoS and retain flag.
    ///
    /// QoS 1 publishes carry a packet identifier but are not tracked; the
    /// broker's PUBACK is ignored. QoS 2 is rejected.
    pub async fn publish_with(&self, topic: &str, payload: impl Into<Bytes>, qos: QoS, retain: bool) -> Result<()> {
        let pkid = match qos {
            QoS::AtMostOnce => None,
            QoS::AtLeastOnce => Some(self.inner.next_pkid()),
            QoS::ExactlyOnce => return Err(Error::UnsupportedQoS(qos)),
        };

        let publish = Publish {
            topic: topic.to_string(),
            payload: payload.into(),
            qos,
            dup: false,
            retain,
            pkid,
        };
        trace!("Publishing to {} ({} bytes)", topic, publish.payload.len());

        self.inner.send(&Packet::Publish(publish)).await
    }

    /// Subscribe to one topic.
    pub async fn subscribe(&self, topic: Topic) -> Result<()> {
        self.subscribe_many(&[topic]).await
    }

    /// Subscribe to several topics in one SUBSCRIBE.
    pub async fn subscribe_many(&self, topics: &[Topic]) -> Result<()> {
        if topics.is_empty() {
            return Err(ProtocolError::EmptyTopicList.into());
        }

        let pkid = self.inner.next_pkid();
        debug!("Subscribing to {:?} with pkid={}", topics, pkid);

        let subscribe = Subscribe {
            pkid,
            topics: topics.to_vec(),
        };
        self.inner.send(&Packet::Subscribe(subscribe)).await
    }

    /// Unsubscribe from one topic.
    pub async fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.unsubscribe_many(&[topic]).await
    }

    /// Unsubscribe from several topics in one UNSUBSCRIBE.
    pub async fn unsubscribe_many(&self, topics: &[&str]) -> Result<()> {
        if topics.is_empty() {
            return Err(ProtocolError::EmptyTopicList.into());
        }

        let pkid = self.inner.next_pkid();
        debug!("Unsubscribing from {:?} with pkid={}", topics, pkid);

        let unsubscribe = Unsubscribe {
            pkid,
            topics: topics.iter().map(|t| t.to_string()).collect(),
        };
        self.inner.send(&Packet::Unsubscribe(unsubscribe)).await
    }

    /// Send DISCONNECT and close the client for good.
    ///
    /// Reconnection is cancelled before anything is sent, so a teardown
    /// racing this call cannot start a new generation.
    pub async fn disconnect(&self) -> Result<()> {
        debug!("Disconnecting from {}", self.inner.config.addr);

        self.inner.cancel.cancel();
        self.inner.set_state(ConnectionState::Closed);

        let current = self.inner.current.write().take();
        let Some(conn) = current else {
            return Ok(());
        };

        let result = conn.send(&Packet::Disconnect).await;
        conn.close().await;
        result
    }

    /// Wait for the next message, in the order the broker sent them.
    ///
    /// Messages already queued are still returned after
    /// [`disconnect`](Self::disconnect); after that this fails with
    /// [`Error::Disconnected`].
    pub async fn read_next(&self) -> Result<Message> {
        let mut messages = self.messages.lock().await;

        tokio::select! {
            biased;

            message = messages.recv() => message.ok_or(Error::Disconnected),
            _ = self.inner.cancel.cancelled() => Err(Error::Disconnected),
        }
    }

    /// Wait for the next message, giving up after `timeout`.
    pub async fn read_next_timeout(&self, timeout: Duration) -> Result<Option<Message>> {
        match tokio::time::timeout(timeout, self.read_next()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    /// Number of the most recently installed connection generation, 0 before
    /// the first successful connect.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.current.read().is_some()
    }

    pub fn client_id(&self) -> &str {
        &self.inner.config.client_id
    }

    /// Normalized broker address (`host:port`).
    pub fn address(&self) -> &str {
        &self.inner.config.addr
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.write();
        // Closed is terminal.
        if *current != ConnectionState::Closed {
            *current = state;
        }
    }

    fn next_pkid(&self) -> u16 {
        loop {
            let id = self.next_pkid.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    async fn send(&self, packet: &Packet) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Disconnected);
        }

        let conn = self.current.read().clone();
        let Some(conn) = conn else {
            return Err(Error::NotConnected);
        };

        conn.send(packet).await.inspect_err(|e| {
            warn!("Send {} on generation {} failed: {}", packet.name(), conn.generation(), e);
        })
    }

    fn connect_packet(&self) -> Packet {
        Packet::Connect(Connect {
            client_id: self.config.client_id.clone(),
            keep_alive: self.config.keep_alive,
            clean_session: self.config.clean_session,
            will: self.config.will.clone(),
            username: self.config.username.clone(),
            password: self.config.password.clone(),
        })
    }

    /// Dial, handshake, and install a new generation.
    async fn establish(&self) -> Result<()> {
        let addr = &self.config.addr;
        let timeout = self.config.connect_timeout;

        debug!("Connecting to {} as {}", addr, self.config.client_id);

        let (reader, writer, buf) = tokio::time::timeout(timeout, self.handshake())
            .await
            .map_err(|_| Error::Timeout(format!("connecting to {} took longer than {:?}", addr, timeout)))??;

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let cancel = self.cancel.child_token();
        let outbound = Arc::new(Outbound::new(writer));
        let conn = Arc::new(Connection::new(generation, Arc::clone(&outbound), cancel.clone()));

        let previous = self.current.write().replace(Arc::clone(&conn));
        if let Some(previous) = previous {
            previous.close().await;
        }

        // A disconnect may have landed while the handshake was in flight.
        if self.cancel.is_cancelled() {
            let installed = self.current.write().take();
            if let Some(installed) = installed {
                installed.close().await;
            }
            return Err(Error::Disconnected);
        }

        self.backoff.lock().reset();

        if let Some(interval) = self.config.keep_alive_interval() {
            keepalive::spawn(interval, Arc::clone(&outbound), cancel.clone());
            trace!("Started keepalive task (interval={:?})", interval);
        }

        Receiver::new(
            generation,
            reader,
            outbound,
            self.messages.clone(),
            self.teardown_tx.clone(),
            cancel,
            self.config.max_packet_size,
        )
        .with_buffer(buf)
        .spawn();

        self.set_state(ConnectionState::Connected);
        info!("Connected to {} (generation {})", addr, generation);
        Ok(())
    }

    async fn handshake(&self) -> Result<(ReadHalf<TcpStream>, Writer, BytesMut)> {
        let stream = TcpStream::connect(&self.config.addr).await.map_err(Error::Connection)?;
        let (mut reader, mut writer) = tokio::io::split(stream);

        write_packet(&mut writer, &self.connect_packet()).await?;

        let mut buf = BytesMut::with_capacity(4096);
        match read_packet(&mut reader, &mut buf, self.config.max_packet_size).await? {
            Packet::ConnAck(ack) if ack.code.is_accepted() => {
                debug!("Connection accepted, session_present={}", ack.session_present);
            }
            Packet::ConnAck(ack) => {
                warn!("Connection to {} refused: {}", self.config.addr, ack.code);
                return Err(Error::ConnectionRefused(ack.code));
            }
            other => {
                return Err(Error::UnexpectedPacket {
                    expected: "ConnAck".to_string(),
                    got: other.name().to_string(),
                });
            }
        }

        Ok((reader, writer, buf))
    }

    fn start_supervisor(self: &Arc<Self>) {
        if self.supervising.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(teardowns) = self.teardown_rx.lock().take() else {
            return;
        };
        tokio::spawn(supervise(Arc::clone(self), teardowns));
    }

    /// Remove the current connection if it belongs to `generation`.
    fn take_generation(&self, generation: u64) -> Option<Arc<Connection<Writer>>> {
        let mut current = self.current.write();
        if current.as_ref().is_some_and(|c| c.generation() == generation) {
            current.take()
        } else {
            None
        }
    }

    /// Dial until a generation is installed or the client is disconnected.
    async fn reconnect(&self) {
        loop {
            self.set_state(ConnectionState::Connecting);

            let result = tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = self.establish() => result,
            };

            let e = match result {
                Ok(()) => return,
                Err(Error::Disconnected) => return,
                Err(e) => e,
            };

            let delay = self.backoff.lock().duration();
            self.set_state(ConnectionState::Reconnecting);
            info!("Reconnect to {} failed: {}; retrying in {:?}", self.config.addr, e, delay);

            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Consume teardown signals one at a time. Each signal for the current
/// generation closes it and runs one reconnect sequence; signals from
/// generations that are already gone are dropped.
async fn supervise(inner: Arc<Inner>, mut teardowns: mpsc::UnboundedReceiver<Teardown>) {
    loop {
        let teardown = tokio::select! {
            _ = inner.cancel.cancelled() => break,
            teardown = teardowns.recv() => match teardown {
                Some(teardown) => teardown,
                None => break,
            },
        };

        let Some(conn) = inner.take_generation(teardown.generation) else {
            debug!("Ignoring stale teardown of generation {}", teardown.generation);
            continue;
        };
        conn.close().await;

        inner.set_state(ConnectionState::Reconnecting);
        info!(
            "Generation {} torn down ({}), reconnecting to {}",
            teardown.generation, teardown.reason, inner.config.addr
        );
        inner.reconnect().await;
    }

    trace!("Supervisor stopping");
}
