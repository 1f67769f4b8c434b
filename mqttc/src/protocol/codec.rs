//! MQTT packet encoding/decoding primitives.
//!
//! Readers operate on complete slices and hand back the unconsumed tail,
//! so repeated fields can be parsed one after another. Writers append to
//! any [`BufMut`].

use bytes::{BufMut, Bytes};

use crate::error::{Error, ProtocolError, Result};

/// Largest value the remaining length field can carry (4 bytes).
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Largest string or binary field (2-byte length prefix).
pub const MAX_FIELD_LENGTH: usize = u16::MAX as usize;

/// MQTT control packet type, the high nibble of the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Reserved = 0,
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
    Auth = 15,
}

impl PacketType {
    /// Map a 4-bit type code to a packet type.
    pub fn from_u8(code: u8) -> Self {
        match code & 0x0F {
            1 => PacketType::Connect,
            2 => PacketType::ConnAck,
            3 => PacketType::Publish,
            4 => PacketType::PubAck,
            5 => PacketType::PubRec,
            6 => PacketType::PubRel,
            7 => PacketType::PubComp,
            8 => PacketType::Subscribe,
            9 => PacketType::SubAck,
            10 => PacketType::Unsubscribe,
            11 => PacketType::UnsubAck,
            12 => PacketType::PingReq,
            13 => PacketType::PingResp,
            14 => PacketType::Disconnect,
            15 => PacketType::Auth,
            _ => PacketType::Reserved,
        }
    }
}

/// Decoded fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    pub packet_type: PacketType,
    /// Low nibble of the first byte.
    pub flags: u8,
    /// Length of everything after the fixed header.
    pub remaining_length: usize,
    /// Length of the fixed header itself (2..=5).
    pub header_length: usize,
}

impl FixedHeader {
    /// Total size of the packet on the wire.
    pub fn packet_length(&self) -> usize {
        self.header_length + self.remaining_length
    }
}

/// Parse a fixed header from the start of `buf`.
///
/// Fails with [`Error::Incomplete`] when `buf` ends before the header does.
pub fn read_fixed_header(buf: &[u8]) -> Result<FixedHeader> {
    let Some(&first) = buf.first() else {
        return Err(Error::Incomplete { needed: 2 });
    };
    let (remaining_length, len_bytes) = read_remaining_length(&buf[1..])?;

    Ok(FixedHeader {
        packet_type: PacketType::from_u8(first >> 4),
        flags: first & 0x0F,
        remaining_length,
        header_length: 1 + len_bytes,
    })
}

/// Append a fixed header: type/flags byte plus remaining length.
pub fn write_fixed_header<B: BufMut>(
    buf: &mut B,
    packet_type: PacketType,
    flags: u8,
    remaining_length: usize,
) -> Result<usize> {
    buf.put_u8(((packet_type as u8) << 4) | (flags & 0x0F));
    Ok(1 + write_remaining_length(buf, remaining_length)?)
}

/// Read a variable-length integer (remaining length encoding).
///
/// Returns `(value, bytes_consumed)`. Each byte carries 7 value bits, the
/// high bit flags a continuation. A fourth byte with the continuation bit
/// set is malformed.
pub fn read_remaining_length(buf: &[u8]) -> Result<(usize, usize)> {
    let mut multiplier = 1usize;
    let mut value = 0usize;

    for (i, &byte) in buf.iter().enumerate() {
        value += (byte & 0x7F) as usize * multiplier;

        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }

        if i == 3 {
            return Err(ProtocolError::MalformedRemainingLength.into());
        }

        multiplier *= 128;
    }

    Err(Error::Incomplete { needed: 1 })
}

/// Append a variable-length integer, returning the number of bytes written.
pub fn write_remaining_length<B: BufMut>(buf: &mut B, mut value: usize) -> Result<usize> {
    if value > MAX_REMAINING_LENGTH {
        return Err(ProtocolError::MalformedRemainingLength.into());
    }

    let mut written = 0;
    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;

        if value > 0 {
            byte |= 0x80;
        }

        buf.put_u8(byte);
        written += 1;

        if value == 0 {
            return Ok(written);
        }
    }
}

/// Number of bytes needed to encode `value` as a remaining length.
pub const fn remaining_length_len(value: usize) -> usize {
    if value < 128 {
        1
    } else if value < 128 * 128 {
        2
    } else if value < 128 * 128 * 128 {
        3
    } else {
        4
    }
}

/// Read a 2-byte big-endian u16, returning it with the tail.
pub fn read_u16(buf: &[u8]) -> Result<(u16, &[u8])> {
    match buf {
        [hi, lo, rest @ ..] => Ok((u16::from_be_bytes([*hi, *lo]), rest)),
        _ => Err(ProtocolError::MalformedPacket("truncated u16").into()),
    }
}

/// Read one byte, returning it with the tail.
pub fn read_u8(buf: &[u8]) -> Result<(u8, &[u8])> {
    match buf {
        [b, rest @ ..] => Ok((*b, rest)),
        _ => Err(ProtocolError::MalformedPacket("truncated byte").into()),
    }
}

/// Read length-prefixed binary data, returning it with the tail.
pub fn read_binary(buf: &[u8]) -> Result<(&[u8], &[u8])> {
    let (len, rest) = read_u16(buf)?;
    let len = len as usize;

    if rest.len() < len {
        return Err(ProtocolError::MalformedPacket("truncated field").into());
    }

    Ok(rest.split_at(len))
}

/// Read a length-prefixed UTF-8 string, returning it with the tail.
pub fn read_string(buf: &[u8]) -> Result<(String, &[u8])> {
    let (bytes, rest) = read_binary(buf)?;
    let s = std::str::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)?;
    Ok((s.to_string(), rest))
}

/// Read length-prefixed binary data as owned [`Bytes`].
pub fn read_bytes(buf: &[u8]) -> Result<(Bytes, &[u8])> {
    let (bytes, rest) = read_binary(buf)?;
    Ok((Bytes::copy_from_slice(bytes), rest))
}

/// Append length-prefixed binary data.
pub fn write_binary<B: BufMut>(buf: &mut B, data: &[u8]) -> Result<()> {
    if data.len() > MAX_FIELD_LENGTH {
        return Err(ProtocolError::FieldTooLong(data.len()).into());
    }
    buf.put_u16(data.len() as u16);
    buf.put_slice(data);
    Ok(())
}

/// Append a length-prefixed UTF-8 string.
pub fn write_string<B: BufMut>(buf: &mut B, s: &str) -> Result<()> {
    write_binary(buf, s.as_bytes())
}

/// Encoded size of a length-prefixed field.
pub const fn field_len(data_len: usize) -> usize {
    2 + data_len
}
