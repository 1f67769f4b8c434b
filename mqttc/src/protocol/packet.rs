//! MQTT 3.1.1 control packets.
//!
//! PUBREC, PUBREL and PUBCOMP are not modeled: the QoS 2 handshake is not
//! implemented. They decode to [`Packet::Unsupported`] so a receive loop can
//! log and skip them.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, ProtocolError, Result};
use crate::types::{ConnectReturnCode, LastWill, QoS, Topic};

use super::codec::{
    PacketType, field_len, read_bytes, read_fixed_header, read_string, read_u8, read_u16,
    remaining_length_len, write_binary, write_fixed_header, write_string,
};
use super::{PROTOCOL_LEVEL, PROTOCOL_NAME};

/// MQTT 3.1.1 packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    ConnAck(ConnAck),
    Publish(Publish),
    PubAck(PubAck),
    Subscribe(Subscribe),
    SubAck(SubAck),
    Unsubscribe(Unsubscribe),
    UnsubAck(UnsubAck),
    PingReq,
    PingResp,
    Disconnect,
    /// A valid packet type this client does not model (PUBREC, PUBREL, PUBCOMP).
    /// Decode only.
    Unsupported { packet_type: u8, flags: u8 },
}

/// CONNECT packet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Connect {
    pub client_id: String,
    pub keep_alive: u16,
    pub clean_session: bool,
    pub will: Option<LastWill>,
    pub username: Option<String>,
    pub password: Option<Bytes>,
}

/// CONNACK packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAck {
    pub session_present: bool,
    pub code: ConnectReturnCode,
}

/// PUBLISH packet.
///
/// `pkid` is present exactly when `qos` is 1 or 2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub dup: bool,
    pub retain: bool,
    pub pkid: Option<u16>,
}

/// PUBACK packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubAck {
    pub pkid: u16,
}

/// SUBSCRIBE packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub pkid: u16,
    pub topics: Vec<Topic>,
}

/// SUBACK packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAck {
    pub pkid: u16,
    pub return_codes: Vec<SubscribeReturnCode>,
}

/// Per-topic SUBACK result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeReturnCode {
    Success(QoS),
    Failure,
}

impl SubscribeReturnCode {
    pub fn from_u8(value: u8) -> Self {
        match QoS::from_u8(value) {
            Some(qos) => SubscribeReturnCode::Success(qos),
            None => SubscribeReturnCode::Failure,
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            SubscribeReturnCode::Success(qos) => qos as u8,
            SubscribeReturnCode::Failure => 0x80,
        }
    }
}

/// UNSUBSCRIBE packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribe {
    pub pkid: u16,
    pub topics: Vec<String>,
}

/// UNSUBACK packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsubAck {
    pub pkid: u16,
}

// ============================================================================
// Packet dispatch
// ============================================================================

impl Packet {
    /// Wire type of this packet.
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::ConnAck(_) => PacketType::ConnAck,
            Packet::Publish(_) => PacketType::Publish,
            Packet::PubAck(_) => PacketType::PubAck,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::SubAck(_) => PacketType::SubAck,
            Packet::Unsubscribe(_) => PacketType::Unsubscribe,
            Packet::UnsubAck(_) => PacketType::UnsubAck,
            Packet::PingReq => PacketType::PingReq,
            Packet::PingResp => PacketType::PingResp,
            Packet::Disconnect => PacketType::Disconnect,
            Packet::Unsupported { packet_type, .. } => PacketType::from_u8(*packet_type),
        }
    }

    /// Short name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Packet::Connect(_) => "Connect",
            Packet::ConnAck(_) => "ConnAck",
            Packet::Publish(_) => "Publish",
            Packet::PubAck(_) => "PubAck",
            Packet::Subscribe(_) => "Subscribe",
            Packet::SubAck(_) => "SubAck",
            Packet::Unsubscribe(_) => "Unsubscribe",
            Packet::UnsubAck(_) => "UnsubAck",
            Packet::PingReq => "PingReq",
            Packet::PingResp => "PingResp",
            Packet::Disconnect => "Disconnect",
            Packet::Unsupported { .. } => "Unsupported",
        }
    }

    /// Parse one packet from the start of `buf`.
    ///
    /// Returns the packet and the number of bytes it occupied, or
    /// [`Error::Incomplete`] if `buf` does not yet hold the whole packet.
    pub fn decode(buf: &[u8], max_size: usize) -> Result<(Packet, usize)> {
        let header = read_fixed_header(buf)?;
        let total_len = header.packet_length();

        if total_len > max_size {
            return Err(ProtocolError::PacketTooLarge { size: total_len, max: max_size }.into());
        }

        if buf.len() < total_len {
            return Err(Error::Incomplete { needed: total_len - buf.len() });
        }

        let body = &buf[header.header_length..total_len];
        let flags = header.flags;

        let packet = match header.packet_type {
            PacketType::Connect => Packet::Connect(Connect::read(body)?),
            PacketType::ConnAck => Packet::ConnAck(ConnAck::read(body)?),
            PacketType::Publish => Packet::Publish(Publish::read(flags, body)?),
            PacketType::PubAck => Packet::PubAck(PubAck { pkid: read_pkid(body)? }),
            PacketType::Subscribe => {
                expect_flags(PacketType::Subscribe, flags, 0x02)?;
                Packet::Subscribe(Subscribe::read(body)?)
            }
            PacketType::SubAck => Packet::SubAck(SubAck::read(body)?),
            PacketType::Unsubscribe => {
                expect_flags(PacketType::Unsubscribe, flags, 0x02)?;
                Packet::Unsubscribe(Unsubscribe::read(body)?)
            }
            PacketType::UnsubAck => Packet::UnsubAck(UnsubAck { pkid: read_pkid(body)? }),
            PacketType::PingReq => Packet::PingReq,
            PacketType::PingResp => Packet::PingResp,
            PacketType::Disconnect => Packet::Disconnect,
            PacketType::PubRec | PacketType::PubRel | PacketType::PubComp => Packet::Unsupported {
                packet_type: header.packet_type as u8,
                flags,
            },
            PacketType::Reserved | PacketType::Auth => {
                return Err(ProtocolError::InvalidPacketType(header.packet_type as u8).into());
            }
        };

        Ok((packet, total_len))
    }

    /// Append the encoded packet to `buf`, returning the number of bytes written.
    ///
    /// On error nothing is left behind in `buf`.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<usize> {
        let start = buf.len();
        match self.encode_inner(buf) {
            Ok(()) => Ok(buf.len() - start),
            Err(e) => {
                buf.truncate(start);
                Err(e)
            }
        }
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.size());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Encoded size of the packet.
    pub fn size(&self) -> usize {
        let remaining = self.remaining_length();
        1 + remaining_length_len(remaining) + remaining
    }

    fn remaining_length(&self) -> usize {
        match self {
            Packet::Connect(p) => p.remaining_length(),
            Packet::ConnAck(_) => 2,
            Packet::Publish(p) => p.remaining_length(),
            Packet::PubAck(_) | Packet::UnsubAck(_) => 2,
            Packet::Subscribe(p) => p.remaining_length(),
            Packet::SubAck(p) => 2 + p.return_codes.len(),
            Packet::Unsubscribe(p) => p.remaining_length(),
            Packet::PingReq | Packet::PingResp | Packet::Disconnect => 0,
            Packet::Unsupported { .. } => 0,
        }
    }

    fn encode_inner(&self, buf: &mut BytesMut) -> Result<()> {
        let remaining = self.remaining_length();
        buf.reserve(1 + remaining_length_len(remaining) + remaining);

        match self {
            Packet::Connect(p) => {
                write_fixed_header(buf, PacketType::Connect, 0, remaining)?;
                p.write_body(buf)
            }
            Packet::ConnAck(p) => {
                write_fixed_header(buf, PacketType::ConnAck, 0, remaining)?;
                buf.put_u8(p.session_present as u8);
                buf.put_u8(p.code.to_u8());
                Ok(())
            }
            Packet::Publish(p) => {
                let flags = p.flags()?;
                write_fixed_header(buf, PacketType::Publish, flags, remaining)?;
                p.write_body(buf)
            }
            Packet::PubAck(p) => {
                write_fixed_header(buf, PacketType::PubAck, 0, remaining)?;
                buf.put_u16(p.pkid);
                Ok(())
            }
            Packet::Subscribe(p) => {
                if p.topics.is_empty() {
                    return Err(ProtocolError::EmptyTopicList.into());
                }
                write_fixed_header(buf, PacketType::Subscribe, 0x02, remaining)?;
                p.write_body(buf)
            }
            Packet::SubAck(p) => {
                write_fixed_header(buf, PacketType::SubAck, 0, remaining)?;
                buf.put_u16(p.pkid);
                for code in &p.return_codes {
                    buf.put_u8(code.to_u8());
                }
                Ok(())
            }
            Packet::Unsubscribe(p) => {
                if p.topics.is_empty() {
                    return Err(ProtocolError::EmptyTopicList.into());
                }
                write_fixed_header(buf, PacketType::Unsubscribe, 0x02, remaining)?;
                p.write_body(buf)
            }
            Packet::UnsubAck(p) => {
                write_fixed_header(buf, PacketType::UnsubAck, 0, remaining)?;
                buf.put_u16(p.pkid);
                Ok(())
            }
            Packet::PingReq => write_fixed_header(buf, PacketType::PingReq, 0, 0).map(|_| ()),
            Packet::PingResp => write_fixed_header(buf, PacketType::PingResp, 0, 0).map(|_| ()),
            Packet::Disconnect => write_fixed_header(buf, PacketType::Disconnect, 0, 0).map(|_| ()),
            Packet::Unsupported { packet_type, .. } => {
                Err(ProtocolError::InvalidPacketType(*packet_type).into())
            }
        }
    }
}

fn expect_flags(packet_type: PacketType, flags: u8, expected: u8) -> Result<()> {
    if flags != expected {
        return Err(ProtocolError::InvalidFlags { packet_type: packet_type as u8, flags }.into());
    }
    Ok(())
}

fn read_pkid(body: &[u8]) -> Result<u16> {
    read_u16(body).map(|(pkid, _)| pkid)
}

// ============================================================================
// Individual packet implementations
// ============================================================================

impl Connect {
    /// Compose the connect-flags byte.
    pub fn connect_flags(&self) -> u8 {
        let mut flags = 0u8;
        if self.username.is_some() {
            flags |= 0x80;
        }
        if self.password.is_some() {
            flags |= 0x40;
        }
        if let Some(ref will) = self.will {
            if will.retain {
                flags |= 0x20;
            }
            flags |= (will.qos as u8) << 3;
            flags |= 0x04;
        }
        if self.clean_session {
            flags |= 0x02;
        }
        flags
    }

    fn read(body: &[u8]) -> Result<Self> {
        let (name, rest) = read_string(body)?;
        let (level, rest) = read_u8(rest)?;
        if name.as_bytes() != PROTOCOL_NAME || level != PROTOCOL_LEVEL {
            return Err(ProtocolError::UnsupportedProtocol { name, level }.into());
        }

        let (flags, rest) = read_u8(rest)?;
        if flags & 0x01 != 0 {
            return Err(ProtocolError::MalformedPacket("reserved connect flag set").into());
        }
        let (keep_alive, rest) = read_u16(rest)?;
        let (client_id, mut rest) = read_string(rest)?;

        let will = if flags & 0x04 != 0 {
            let qos = QoS::try_from((flags >> 3) & 0x03)?;
            let (topic, tail) = read_string(rest)?;
            let (message, tail) = read_bytes(tail)?;
            rest = tail;
            Some(LastWill {
                topic,
                message,
                qos,
                retain: flags & 0x20 != 0,
            })
        } else {
            None
        };

        let username = if flags & 0x80 != 0 {
            let (username, tail) = read_string(rest)?;
            rest = tail;
            Some(username)
        } else {
            None
        };

        let password = if flags & 0x40 != 0 {
            let (password, _) = read_bytes(rest)?;
            Some(password)
        } else {
            None
        };

        Ok(Connect {
            client_id,
            keep_alive,
            clean_session: flags & 0x02 != 0,
            will,
            username,
            password,
        })
    }

    fn write_body(&self, buf: &mut BytesMut) -> Result<()> {
        write_binary(buf, PROTOCOL_NAME)?;
        buf.put_u8(PROTOCOL_LEVEL);
        buf.put_u8(self.connect_flags());
        buf.put_u16(self.keep_alive);
        write_string(buf, &self.client_id)?;

        if let Some(ref will) = self.will {
            write_string(buf, &will.topic)?;
            write_binary(buf, &will.message)?;
        }
        if let Some(ref username) = self.username {
            write_string(buf, username)?;
        }
        if let Some(ref password) = self.password {
            write_binary(buf, password)?;
        }
        Ok(())
    }

    fn remaining_length(&self) -> usize {
        // protocol name + level + flags + keep alive
        let mut len = field_len(PROTOCOL_NAME.len()) + 1 + 1 + 2;
        len += field_len(self.client_id.len());

        if let Some(ref will) = self.will {
            len += field_len(will.topic.len());
            len += field_len(will.message.len());
        }
        if let Some(ref username) = self.username {
            len += field_len(username.len());
        }
        if let Some(ref password) = self.password {
            len += field_len(password.len());
        }
        len
    }
}

impl ConnAck {
    fn read(body: &[u8]) -> Result<Self> {
        let (ack_flags, rest) = read_u8(body)?;
        let (code, _) = read_u8(rest)?;
        Ok(ConnAck {
            session_present: ack_flags & 0x01 != 0,
            code: ConnectReturnCode::from_u8(code),
        })
    }
}

impl Publish {
    /// Create a QoS 0 publish.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            dup: false,
            retain: false,
            pkid: None,
        }
    }

    fn flags(&self) -> Result<u8> {
        match (self.qos, self.pkid) {
            (QoS::AtMostOnce, Some(_)) => {
                return Err(ProtocolError::MalformedPacket("packet identifier on qos 0 publish").into());
            }
            (QoS::AtLeastOnce | QoS::ExactlyOnce, None) => {
                return Err(ProtocolError::MalformedPacket("missing packet identifier").into());
            }
            _ => {}
        }

        let mut flags = (self.qos as u8) << 1;
        if self.dup {
            flags |= 0x08;
        }
        if self.retain {
            flags |= 0x01;
        }
        Ok(flags)
    }

    fn read(flags: u8, body: &[u8]) -> Result<Self> {
        let qos = QoS::try_from((flags >> 1) & 0x03)?;
        let dup = flags & 0x08 != 0;
        let retain = flags & 0x01 != 0;

        let (topic, rest) = read_string(body)?;

        let (pkid, rest) = if qos == QoS::AtMostOnce {
            (None, rest)
        } else {
            let (pkid, rest) = read_u16(rest)?;
            (Some(pkid), rest)
        };

        Ok(Publish {
            topic,
            payload: Bytes::copy_from_slice(rest),
            qos,
            dup,
            retain,
            pkid,
        })
    }

    fn write_body(&self, buf: &mut BytesMut) -> Result<()> {
        write_string(buf, &self.topic)?;
        if let Some(pkid) = self.pkid {
            buf.put_u16(pkid);
        }
        buf.put_slice(&self.payload);
        Ok(())
    }

    fn remaining_length(&self) -> usize {
        let mut len = field_len(self.topic.len()) + self.payload.len();
        if self.pkid.is_some() {
            len += 2;
        }
        len
    }
}

impl Subscribe {
    fn read(body: &[u8]) -> Result<Self> {
        let (pkid, mut rest) = read_u16(body)?;

        let mut topics = Vec::new();
        while !rest.is_empty() {
            let (name, tail) = read_string(rest)?;
            let (qos, tail) = read_u8(tail)?;
            topics.push(Topic::new(name, QoS::try_from(qos)?));
            rest = tail;
        }

        if topics.is_empty() {
            return Err(ProtocolError::EmptyTopicList.into());
        }

        Ok(Subscribe { pkid, topics })
    }

    fn write_body(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u16(self.pkid);
        for topic in &self.topics {
            write_string(buf, &topic.name)?;
            buf.put_u8(topic.qos as u8);
        }
        Ok(())
    }

    fn remaining_length(&self) -> usize {
        2 + self
            .topics
            .iter()
            .map(|t| field_len(t.name.len()) + 1)
            .sum::<usize>()
    }
}

impl SubAck {
    fn read(body: &[u8]) -> Result<Self> {
        let (pkid, rest) = read_u16(body)?;
        let return_codes = rest.iter().map(|&b| SubscribeReturnCode::from_u8(b)).collect();
        Ok(SubAck { pkid, return_codes })
    }
}

impl Unsubscribe {
    fn read(body: &[u8]) -> Result<Self> {
        let (pkid, mut rest) = read_u16(body)?;

        let mut topics = Vec::new();
        while !rest.is_empty() {
            let (topic, tail) = read_string(rest)?;
            topics.push(topic);
            rest = tail;
        }

        if topics.is_empty() {
            return Err(ProtocolError::EmptyTopicList.into());
        }

        Ok(Unsubscribe { pkid, topics })
    }

    fn write_body(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u16(self.pkid);
        for topic in &self.topics {
            write_string(buf, topic)?;
        }
        Ok(())
    }

    fn remaining_length(&self) -> usize {
        2 + self.topics.iter().map(|t| field_len(t.len())).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 1024 * 1024;

    fn roundtrip(packet: Packet) {
        let bytes = packet.to_bytes().unwrap();
        assert_eq!(bytes.len(), packet.size());
        let (decoded, consumed) = Packet::decode(&bytes, MAX).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_connect_flag_composition() {
        let mut c = Connect::default();
        assert_eq!(c.connect_flags(), 0);

        c.clean_session = true;
        assert_eq!(c.connect_flags(), 2);

        c.will = Some(LastWill::new("topic/a", "Disconnected", QoS::AtMostOnce, false));
        assert_eq!(c.connect_flags(), 6);

        c.will = Some(LastWill::new("topic/a", "Disconnected", QoS::AtLeastOnce, false));
        assert_eq!(c.connect_flags(), 14);

        c.will = Some(LastWill::new("topic/a", "Disconnected", QoS::ExactlyOnce, false));
        assert_eq!(c.connect_flags(), 22);

        c.will = Some(LastWill::new("topic/a", "Disconnected", QoS::ExactlyOnce, true));
        assert_eq!(c.connect_flags(), 54);

        // Username is bit 7, password bit 6.
        c.username = Some("User1".to_string());
        assert_eq!(c.connect_flags(), 182);

        c.password = Some(Bytes::from_static(b"Password"));
        assert_eq!(c.connect_flags(), 246);

        c.username = None;
        assert_eq!(c.connect_flags(), 118);
    }

    #[test]
    fn test_connect_roundtrip() {
        roundtrip(Packet::Connect(Connect {
            client_id: "TestClientID".to_string(),
            keep_alive: 42,
            clean_session: true,
            will: Some(LastWill::new("test/will", "test message", QoS::AtLeastOnce, true)),
            username: Some("testuser".to_string()),
            password: Some(Bytes::from_static(b"testpass")),
        }));

        roundtrip(Packet::Connect(Connect {
            client_id: String::new(),
            keep_alive: 0,
            clean_session: false,
            will: None,
            username: None,
            password: None,
        }));
    }

    #[test]
    fn test_connect_wire_layout() {
        let packet = Packet::Connect(Connect {
            client_id: "c".to_string(),
            keep_alive: 30,
            clean_session: true,
            ..Default::default()
        });
        let bytes = packet.to_bytes().unwrap();
        assert_eq!(
            &bytes[..],
            &[
                0x10, 13, // fixed header
                0x00, 0x04, b'M', b'Q', b'T', b'T', // protocol name
                0x04, // level
                0x02, // flags
                0x00, 0x1E, // keep alive
                0x00, 0x01, b'c', // client id
            ]
        );
    }

    #[test]
    fn test_connect_rejects_other_protocol() {
        let mut bytes = BytesMut::from(
            &Packet::Connect(Connect::default()).to_bytes().unwrap()[..],
        );
        bytes[8] = 3; // protocol level
        let err = Packet::decode(&bytes, MAX).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::UnsupportedProtocol { level: 3, .. })
        ));
    }

    #[test]
    fn test_connack_roundtrip() {
        roundtrip(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Accepted,
        }));
        roundtrip(Packet::ConnAck(ConnAck {
            session_present: true,
            code: ConnectReturnCode::NotAuthorized,
        }));
    }

    #[test]
    fn test_publish_roundtrip_all_flags() {
        for qos in [QoS::AtMostOnce, QoS::AtLeastOnce, QoS::ExactlyOnce] {
            for dup in [false, true] {
                for retain in [false, true] {
                    let pkid = if qos == QoS::AtMostOnce { None } else { Some(7) };
                    roundtrip(Packet::Publish(Publish {
                        topic: "sensors/temperature".to_string(),
                        payload: Bytes::from_static(b"23.5"),
                        qos,
                        dup,
                        retain,
                        pkid,
                    }));
                }
            }
        }
    }

    #[test]
    fn test_publish_topic_lengths() {
        for len in [0usize, 1, 127, 65_535] {
            roundtrip(Packet::Publish(Publish::new("t".repeat(len), vec![0xAB; 3])));
        }
    }

    #[test]
    fn test_publish_fixed_header_flags() {
        let publish = Publish {
            topic: "a".to_string(),
            payload: Bytes::new(),
            qos: QoS::AtLeastOnce,
            dup: true,
            retain: true,
            pkid: Some(1),
        };
        let bytes = Packet::Publish(publish).to_bytes().unwrap();
        assert_eq!(bytes[0], 0x30 | 0x08 | 0x02 | 0x01);
    }

    #[test]
    fn test_publish_pkid_invariant() {
        let mut publish = Publish::new("a", "b");
        publish.pkid = Some(3);
        assert!(Packet::Publish(publish).to_bytes().is_err());

        let mut publish = Publish::new("a", "b");
        publish.qos = QoS::AtLeastOnce;
        assert!(Packet::Publish(publish).to_bytes().is_err());
    }

    #[test]
    fn test_publish_invalid_qos() {
        // QoS bits = 3
        let bytes = [0x36, 0x05, 0x00, 0x01, b'a', 0x00, 0x01];
        let err = Packet::decode(&bytes, MAX).unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::InvalidQoS(3))));
    }

    #[test]
    fn test_large_publish_uses_multi_byte_length() {
        let payload = vec![0u8; 20_000];
        let packet = Packet::Publish(Publish::new("big", payload));
        let bytes = packet.to_bytes().unwrap();
        assert_eq!(bytes.len(), 1 + 3 + 2 + 3 + 20_000);
        roundtrip(packet);
    }

    #[test]
    fn test_ack_roundtrips() {
        roundtrip(Packet::PubAck(PubAck { pkid: 0xBEEF }));
        roundtrip(Packet::UnsubAck(UnsubAck { pkid: 12 }));
        roundtrip(Packet::SubAck(SubAck {
            pkid: 9,
            return_codes: vec![
                SubscribeReturnCode::Success(QoS::AtLeastOnce),
                SubscribeReturnCode::Failure,
            ],
        }));
    }

    #[test]
    fn test_subscribe_roundtrip() {
        let packet = Packet::Subscribe(Subscribe {
            pkid: 1,
            topics: vec![
                Topic::new("a/+", QoS::AtMostOnce),
                Topic::new("b/#", QoS::AtLeastOnce),
                Topic::new("c", QoS::ExactlyOnce),
            ],
        });
        let bytes = packet.to_bytes().unwrap();
        assert_eq!(bytes[0], 0x82);
        roundtrip(packet);
    }

    #[test]
    fn test_unsubscribe_roundtrip() {
        let packet = Packet::Unsubscribe(Unsubscribe {
            pkid: 2,
            topics: vec!["a".to_string(), "b/c".to_string(), String::new()],
        });
        let bytes = packet.to_bytes().unwrap();
        assert_eq!(bytes[0], 0xA2);
        roundtrip(packet);
    }

    #[test]
    fn test_empty_topic_lists_rejected() {
        let mut buf = BytesMut::from(&b"keep"[..]);
        let err = Packet::Unsubscribe(Unsubscribe { pkid: 1, topics: vec![] })
            .encode(&mut buf)
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::EmptyTopicList)));
        assert_eq!(&buf[..], b"keep");

        let err = Packet::Subscribe(Subscribe { pkid: 1, topics: vec![] })
            .to_bytes()
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::EmptyTopicList)));

        // UNSUBSCRIBE with only a packet id
        let err = Packet::decode(&[0xA2, 0x02, 0x00, 0x01], MAX).unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::EmptyTopicList)));
    }

    #[test]
    fn test_subscribe_requires_flags() {
        let err = Packet::decode(&[0xA0, 0x05, 0x00, 0x01, 0x00, 0x01, b'a'], MAX).unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::InvalidFlags { packet_type: 10, flags: 0 })));
    }

    #[test]
    fn test_empty_packets() {
        for (packet, byte) in [
            (Packet::PingReq, 0xC0u8),
            (Packet::PingResp, 0xD0),
            (Packet::Disconnect, 0xE0),
        ] {
            let bytes = packet.to_bytes().unwrap();
            assert_eq!(&bytes[..], &[byte, 0x00]);
            roundtrip(packet);
        }
    }

    #[test]
    fn test_unmodeled_types_are_skippable() {
        // PUBREC pkid=5 followed by PINGRESP
        let bytes = [0x50, 0x02, 0x00, 0x05, 0xD0, 0x00];
        let (packet, consumed) = Packet::decode(&bytes, MAX).unwrap();
        assert_eq!(packet, Packet::Unsupported { packet_type: 5, flags: 0 });
        assert_eq!(consumed, 4);

        let (packet, _) = Packet::decode(&bytes[consumed..], MAX).unwrap();
        assert_eq!(packet, Packet::PingResp);
    }

    #[test]
    fn test_reserved_types_rejected() {
        for first in [0x00u8, 0xF0] {
            let err = Packet::decode(&[first, 0x00], MAX).unwrap_err();
            assert!(matches!(err, Error::Protocol(ProtocolError::InvalidPacketType(_))));
        }
    }

    #[test]
    fn test_decode_incomplete() {
        let bytes = Packet::Publish(Publish::new("topic", "payload")).to_bytes().unwrap();
        for cut in 0..bytes.len() {
            assert!(
                matches!(Packet::decode(&bytes[..cut], MAX), Err(Error::Incomplete { .. })),
                "cut at {}",
                cut
            );
        }
    }

    #[test]
    fn test_decode_too_large() {
        let bytes = Packet::Publish(Publish::new("topic", vec![0u8; 100])).to_bytes().unwrap();
        let err = Packet::decode(&bytes, 64).unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::PacketTooLarge { max: 64, .. })));
    }

    #[test]
    fn test_decode_five_byte_length() {
        let err = Packet::decode(&[0x30, 0xFF, 0xFF, 0xFF, 0xFF, 0x01], MAX).unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::MalformedRemainingLength)));
    }
}
