//! One connection generation: the write half of a socket, the signal that
//! feeds the keepalive deadline, and the token that stops the generation's
//! background tasks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{Error, Result};
use crate::protocol::Packet;

/// Serialized writer shared by the application, the receiver (acks) and
/// the keepalive task of one generation.
pub struct Outbound<W> {
    writer: Mutex<W>,
    activity: Notify,
}

impl<W: AsyncWrite + Unpin + Send> Outbound<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            activity: Notify::new(),
        }
    }

    /// Encode and write one packet, then push the keepalive deadline back.
    pub async fn send(&self, packet: &Packet) -> Result<()> {
        let buf = packet.to_bytes()?;
        self.write_bytes(&buf).await?;
        trace!("Sent {}", packet.name());
        self.activity.notify_one();
        Ok(())
    }

    async fn write_bytes(&self, buf: &Bytes) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(buf).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Resolves on the next outbound send.
    pub async fn activity(&self) {
        self.activity.notified().await
    }

    /// Shut down the write side. Errors are ignored: the peer may be gone.
    pub async fn shutdown(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

/// A live connection generation.
///
/// Closing is idempotent: the first call cancels the generation's tasks
/// and shuts the socket down, later calls do nothing. The token may already
/// be cancelled through its parent; the socket is still shut down once.
pub struct Connection<W> {
    generation: u64,
    outbound: Arc<Outbound<W>>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl<W: AsyncWrite + Unpin + Send> Connection<W> {
    pub fn new(generation: u64, outbound: Arc<Outbound<W>>, cancel: CancellationToken) -> Self {
        Self {
            generation,
            outbound,
            cancel,
            closed: AtomicBool::new(false),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Send on this generation. Fails with [`Error::NotConnected`] once closed.
    pub async fn send(&self, packet: &Packet) -> Result<()> {
        if self.is_closed() {
            return Err(Error::NotConnected);
        }
        self.outbound.send(packet).await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop the generation's tasks and shut the socket down.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        self.outbound.shutdown().await;
    }
}
