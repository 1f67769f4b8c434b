//! Receive loop for one connection generation.
//!
//! Reads and decodes packets until the transport fails, acknowledges QoS 1
//! publishes on the same generation's writer, and hands every PUBLISH to the
//! bounded message queue. The first failure produces exactly one
//! [`Teardown`] and ends the loop.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::connection::Outbound;
use crate::error::{Error, Result};
use crate::protocol::{Packet, PubAck, Publish, SubscribeReturnCode, read_packet};
use crate::types::{Message, QoS};

/// Signal that a connection generation has failed.
#[derive(Debug)]
pub struct Teardown {
    /// Generation the failing receiver belonged to.
    pub generation: u64,
    /// Why the receive loop stopped.
    pub reason: Error,
}

/// Receiver task state for one generation.
pub struct Receiver<R, W> {
    generation: u64,
    reader: R,
    outbound: Arc<Outbound<W>>,
    messages: mpsc::Sender<Message>,
    teardown: mpsc::UnboundedSender<Teardown>,
    cancel: CancellationToken,
    max_packet_size: usize,
    buf: BytesMut,
}

impl<R, W> Receiver<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        generation: u64,
        reader: R,
        outbound: Arc<Outbound<W>>,
        messages: mpsc::Sender<Message>,
        teardown: mpsc::UnboundedSender<Teardown>,
        cancel: CancellationToken,
        max_packet_size: usize,
    ) -> Self {
        Self {
            generation,
            reader,
            outbound,
            messages,
            teardown,
            cancel,
            max_packet_size,
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Start from bytes already read off the socket, such as anything the
    /// broker sent right behind CONNACK.
    pub fn with_buffer(mut self, buf: BytesMut) -> Self {
        self.buf = buf;
        self
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until the transport fails or the generation is cancelled.
    ///
    /// Cancellation ends the loop without a teardown signal.
    pub async fn run(mut self) {
        let mut buf = std::mem::take(&mut self.buf);

        let reason = loop {
            let packet = tokio::select! {
                _ = self.cancel.cancelled() => {
                    trace!("Receiver {} cancelled", self.generation);
                    return;
                }
                result = read_packet(&mut self.reader, &mut buf, self.max_packet_size) => match result {
                    Ok(packet) => packet,
                    Err(e) => break e,
                },
            };

            let message = match Self::handle(&self.outbound, packet).await {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(e) => break e,
            };

            // A full queue suspends decoding until the application reads.
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = self.messages.send(message) => {
                    if result.is_err() {
                        debug!("Message queue closed, receiver {} exiting", self.generation);
                        return;
                    }
                }
            }
        };

        info!("Connection generation {} lost: {}", self.generation, reason);
        let _ = self.teardown.send(Teardown {
            generation: self.generation,
            reason,
        });
    }

    async fn handle(outbound: &Outbound<W>, packet: Packet) -> Result<Option<Message>> {
        trace!("Received {}", packet.name());

        match packet {
            Packet::Publish(publish) => {
                match (publish.qos, publish.pkid) {
                    (QoS::AtLeastOnce, Some(pkid)) => {
                        outbound.send(&Packet::PubAck(PubAck { pkid })).await?;
                    }
                    (QoS::ExactlyOnce, pkid) => {
                        debug!("QoS 2 publish {:?} delivered without PUBREC", pkid);
                    }
                    _ => {}
                }
                Ok(Some(into_message(publish)))
            }
            Packet::SubAck(ack) => {
                if ack.return_codes.contains(&SubscribeReturnCode::Failure) {
                    debug!("Subscription {} partially rejected: {:?}", ack.pkid, ack.return_codes);
                }
                Ok(None)
            }
            Packet::Unsupported { packet_type, flags } => {
                debug!("Ignoring unsupported packet type {} (flags {:#06b})", packet_type, flags);
                Ok(None)
            }
            Packet::PubAck(_) | Packet::UnsubAck(_) | Packet::PingResp => Ok(None),
            other => {
                debug!("Ignoring unexpected {} from broker", other.name());
                Ok(None)
            }
        }
    }
}

fn into_message(publish: Publish) -> Message {
    Message {
        topic: publish.topic,
        payload: publish.payload,
        qos: publish.qos,
        retain: publish.retain,
        dup: publish.dup,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;
    use crate::protocol::MAX_PACKET_SIZE;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

    struct Harness {
        server: DuplexStream,
        messages: mpsc::Receiver<Message>,
        teardown: mpsc::UnboundedReceiver<Teardown>,
        cancel: CancellationToken,
        handle: JoinHandle<()>,
    }

    fn start(generation: u64, capacity: usize) -> Harness {
        let (client, server) = tokio::io::duplex(4096);
        let (reader, writer): (ReadHalf<DuplexStream>, WriteHalf<DuplexStream>) = tokio::io::split(client);
        let (msg_tx, messages) = mpsc::channel(capacity);
        let (td_tx, teardown) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let receiver = Receiver::new(
            generation,
            reader,
            Arc::new(Outbound::new(writer)),
            msg_tx,
            td_tx,
            cancel.clone(),
            MAX_PACKET_SIZE,
        );

        Harness {
            server,
            messages,
            teardown,
            cancel,
            handle: receiver.spawn(),
        }
    }

    fn publish(topic: &str, payload: &str, qos: QoS, pkid: Option<u16>) -> Vec<u8> {
        let mut p = Publish::new(topic, payload.to_string());
        p.qos = qos;
        p.pkid = pkid;
        Packet::Publish(p).to_bytes().unwrap().to_vec()
    }

    #[tokio::test]
    async fn test_qos1_publish_acked_once() {
        let mut h = start(1, 8);

        h.server.write_all(&publish("a", "one", QoS::AtLeastOnce, Some(7))).await.unwrap();
        h.server.write_all(&publish("b", "two", QoS::AtMostOnce, None)).await.unwrap();

        let mut ack = [0u8; 4];
        h.server.read_exact(&mut ack).await.unwrap();
        assert_eq!(ack, [0x40, 0x02, 0x00, 0x07]);

        let first = h.messages.recv().await.unwrap();
        assert_eq!(first.topic, "a");
        assert_eq!(first.qos, QoS::AtLeastOnce);
        let second = h.messages.recv().await.unwrap();
        assert_eq!(second.topic, "b");
        assert_eq!(&second.payload[..], b"two");

        h.server.shutdown().await.unwrap();
        let teardown = h.teardown.recv().await.unwrap();
        assert_eq!(teardown.generation, 1);
        assert!(matches!(teardown.reason, Error::ConnectionClosed));
        h.handle.await.unwrap();

        // Nothing but the single PUBACK was written.
        let mut rest = Vec::new();
        h.server.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_delivery_order_with_backpressure() {
        let mut h = start(1, 1);

        let mut wire = Vec::new();
        for i in 0..20 {
            wire.extend(publish("seq", &i.to_string(), QoS::AtMostOnce, None));
        }
        h.server.write_all(&wire).await.unwrap();

        for i in 0..20 {
            let msg = h.messages.recv().await.unwrap();
            assert_eq!(msg.payload, i.to_string().into_bytes());
        }
    }

    #[tokio::test]
    async fn test_protocol_error_tears_down_once() {
        let mut h = start(4, 8);

        h.server.write_all(&[0x00, 0x00]).await.unwrap();

        let teardown = h.teardown.recv().await.unwrap();
        assert_eq!(teardown.generation, 4);
        assert!(matches!(
            teardown.reason,
            Error::Protocol(ProtocolError::InvalidPacketType(0))
        ));

        h.handle.await.unwrap();
        assert!(h.teardown.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_unsupported_packets_are_skipped() {
        let mut h = start(1, 8);

        h.server.write_all(&[0x50, 0x02, 0x00, 0x01]).await.unwrap();
        h.server.write_all(&[0x90, 0x03, 0x00, 0x01, 0x80]).await.unwrap();
        h.server.write_all(&[0xD0, 0x00]).await.unwrap();
        h.server.write_all(&publish("after", "x", QoS::ExactlyOnce, Some(9))).await.unwrap();

        let msg = h.messages.recv().await.unwrap();
        assert_eq!(msg.topic, "after");
        assert_eq!(msg.qos, QoS::ExactlyOnce);
        assert!(h.teardown.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_leftover_bytes_decoded_first() {
        let (client, mut server) = tokio::io::duplex(4096);
        let (reader, writer) = tokio::io::split(client);
        let (msg_tx, mut messages) = mpsc::channel(8);
        let (td_tx, _teardown) = mpsc::unbounded_channel();

        let leftover = BytesMut::from(&publish("early", "1", QoS::AtMostOnce, None)[..]);
        Receiver::new(1, reader, Arc::new(Outbound::new(writer)), msg_tx, td_tx, CancellationToken::new(), MAX_PACKET_SIZE)
            .with_buffer(leftover)
            .spawn();
        server.write_all(&publish("late", "2", QoS::AtMostOnce, None)).await.unwrap();

        assert_eq!(messages.recv().await.unwrap().topic, "early");
        assert_eq!(messages.recv().await.unwrap().topic, "late");
    }

    /// A reader that may move between threads but not be shared.
    struct SendOnlyReader {
        inner: ReadHalf<DuplexStream>,
        _not_sync: std::marker::PhantomData<std::cell::Cell<()>>,
    }

    impl AsyncRead for SendOnlyReader {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.inner).poll_read(cx, buf)
        }
    }

    #[tokio::test]
    async fn test_spawn_with_send_only_reader() {
        let (client, mut server) = tokio::io::duplex(4096);
        let (reader, writer) = tokio::io::split(client);
        let reader = SendOnlyReader {
            inner: reader,
            _not_sync: std::marker::PhantomData,
        };
        let (msg_tx, mut messages) = mpsc::channel(8);
        let (td_tx, _teardown) = mpsc::unbounded_channel();

        Receiver::new(1, reader, Arc::new(Outbound::new(writer)), msg_tx, td_tx, CancellationToken::new(), MAX_PACKET_SIZE)
            .spawn();

        server.write_all(&publish("q", "1", QoS::AtLeastOnce, Some(3))).await.unwrap();
        let mut ack = [0u8; 4];
        server.read_exact(&mut ack).await.unwrap();
        assert_eq!(ack, [0x40, 0x02, 0x00, 0x03]);
        assert_eq!(messages.recv().await.unwrap().topic, "q");
    }

    #[tokio::test]
    async fn test_cancel_exits_without_teardown() {
        let mut h = start(2, 8);

        h.cancel.cancel();
        h.handle.await.unwrap();
        assert!(h.teardown.recv().await.is_none());
    }
}
