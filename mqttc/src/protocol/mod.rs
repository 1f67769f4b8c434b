//! MQTT 3.1.1 protocol encoding and decoding.
//!
//! [`codec`] holds the wire primitives, [`packet`] the control packets.
//! The async helpers here move whole packets over tokio streams.

pub mod codec;
pub mod packet;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

pub use packet::{
    ConnAck, Connect, Packet, PubAck, Publish, SubAck, Subscribe, SubscribeReturnCode, UnsubAck,
    Unsubscribe,
};

/// Maximum packet size (1MB default).
pub const MAX_PACKET_SIZE: usize = 1024 * 1024;

/// Protocol name for MQTT.
pub const PROTOCOL_NAME: &[u8] = b"MQTT";

/// Protocol level for MQTT 3.1.1.
pub const PROTOCOL_LEVEL: u8 = 4;

/// Read a single packet from an async reader.
///
/// Bytes past the returned packet stay in `buf` for the next call. A
/// stream that ends mid-packet fails with [`Error::ConnectionClosed`].
pub async fn read_packet<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut BytesMut,
    max_size: usize,
) -> Result<Packet> {
    loop {
        if !buf.is_empty() {
            match Packet::decode(buf, max_size) {
                Ok((packet, consumed)) => {
                    let _ = buf.split_to(consumed);
                    return Ok(packet);
                }
                Err(Error::Incomplete { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        let n = reader.read_buf(buf).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
    }
}

/// Write a single packet to an async writer.
pub async fn write_packet<W: AsyncWrite + Unpin>(writer: &mut W, packet: &Packet) -> Result<()> {
    let buf = packet.to_bytes()?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}
