//! MQTT 3.1.1 packet codec
//!
//! Every packet is framed as:
//! ```text
//! [ 1 byte: type << 4 | flags ][ 1-4 bytes: remaining length ][ N bytes: body ]
//! ```
//!
//! The remaining length uses 7 bits per byte with 0x80 as the continuation
//! bit. Only the packets a command subscriber/publisher needs are supported.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tracing::debug;

/// Maximum accepted body size (1 MB) to prevent memory exhaustion
pub const MAX_PACKET_SIZE: usize = 1024 * 1024;

/// Protocol name sent in CONNECT
pub const PROTOCOL_NAME: &str = "MQTT";

/// Protocol level for MQTT 3.1.1
pub const PROTOCOL_LEVEL: u8 = 4;

/// SUBACK return code signalling a rejected subscription
pub const SUBACK_FAILURE: u8 = 0x80;

/// The remaining length field never exceeds four bytes
const MAX_LENGTH_BYTES: usize = 4;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Packet too large: {0} bytes (max: {MAX_PACKET_SIZE})")]
    PacketTooLarge(usize),

    #[error("Malformed remaining length")]
    MalformedLength,

    #[error("Unsupported packet type: {0}")]
    UnsupportedPacket(u8),

    #[error("Malformed {packet} packet: {reason}")]
    Malformed {
        packet: &'static str,
        reason: &'static str,
    },

    #[error("Invalid UTF-8 in string field")]
    InvalidUtf8,

    #[error("String too long: {0} bytes")]
    StringTooLong(usize),
}

/// Delivery guarantee of a publish or subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    fn from_bits(bits: u8, packet: &'static str) -> Result<Self, CodecError> {
        match bits {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(CodecError::Malformed {
                packet,
                reason: "invalid QoS",
            }),
        }
    }
}

/// CONNECT packet fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub client_id: String,
    pub keep_alive_secs: u16,
    pub clean_session: bool,
}

/// PUBLISH packet fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    /// Present only when `qos` is above `AtMostOnce`
    pub packet_id: Option<u16>,
}

impl Publish {
    /// Fire-and-forget publish
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
            packet_id: None,
        }
    }
}

/// Supported MQTT control packets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    ConnAck { session_present: bool, return_code: u8 },
    Publish(Publish),
    PubAck { packet_id: u16 },
    Subscribe { packet_id: u16, filters: Vec<(String, QoS)> },
    SubAck { packet_id: u16, return_codes: Vec<u8> },
    PingReq,
    PingResp,
    Disconnect,
}

impl Packet {
    /// Packet name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Packet::Connect(_) => "CONNECT",
            Packet::ConnAck { .. } => "CONNACK",
            Packet::Publish(_) => "PUBLISH",
            Packet::PubAck { .. } => "PUBACK",
            Packet::Subscribe { .. } => "SUBSCRIBE",
            Packet::SubAck { .. } => "SUBACK",
            Packet::PingReq => "PINGREQ",
            Packet::PingResp => "PINGRESP",
            Packet::Disconnect => "DISCONNECT",
        }
    }
}

/// Human-readable meaning of a CONNACK return code
pub fn connack_reason(return_code: u8) -> &'static str {
    match return_code {
        0 => "connection accepted",
        1 => "unacceptable protocol version",
        2 => "identifier rejected",
        3 => "server unavailable",
        4 => "bad user name or password",
        5 => "not authorized",
        _ => "unknown return code",
    }
}

/// Encode a packet into a framed byte buffer
pub fn encode(packet: &Packet) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::new();
    encode_into(packet, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a packet directly into a provided buffer
pub fn encode_into(packet: &Packet, buf: &mut BytesMut) -> Result<(), CodecError> {
    let mut body = BytesMut::new();

    let first_byte = match packet {
        Packet::Connect(connect) => {
            put_string(&mut body, PROTOCOL_NAME)?;
            body.put_u8(PROTOCOL_LEVEL);
            body.put_u8(if connect.clean_session { 0x02 } else { 0x00 });
            body.put_u16(connect.keep_alive_secs);
            put_string(&mut body, &connect.client_id)?;
            0x10
        }
        Packet::ConnAck {
            session_present,
            return_code,
        } => {
            body.put_u8(u8::from(*session_present));
            body.put_u8(*return_code);
            0x20
        }
        Packet::Publish(publish) => {
            put_string(&mut body, &publish.topic)?;
            if publish.qos != QoS::AtMostOnce {
                let packet_id = publish.packet_id.ok_or(CodecError::Malformed {
                    packet: "PUBLISH",
                    reason: "missing packet id",
                })?;
                body.put_u16(packet_id);
            }
            body.put_slice(&publish.payload);
            0x30 | ((publish.qos as u8) << 1) | u8::from(publish.retain)
        }
        Packet::PubAck { packet_id } => {
            body.put_u16(*packet_id);
            0x40
        }
        Packet::Subscribe { packet_id, filters } => {
            body.put_u16(*packet_id);
            for (filter, qos) in filters {
                put_string(&mut body, filter)?;
                body.put_u8(*qos as u8);
            }
            0x82
        }
        Packet::SubAck {
            packet_id,
            return_codes,
        } => {
            body.put_u16(*packet_id);
            body.put_slice(return_codes);
            0x90
        }
        Packet::PingReq => 0xC0,
        Packet::PingResp => 0xD0,
        Packet::Disconnect => 0xE0,
    };

    if body.len() > MAX_PACKET_SIZE {
        return Err(CodecError::PacketTooLarge(body.len()));
    }

    buf.reserve(1 + MAX_LENGTH_BYTES + body.len());
    buf.put_u8(first_byte);
    encode_remaining_length(body.len(), buf);
    buf.put_slice(&body);

    Ok(())
}

/// Try to decode one packet from a buffer
///
/// Returns:
/// - `Ok(Some(packet))` if a complete packet was decoded
/// - `Ok(None)` if more data is needed (nothing is consumed)
/// - `Err(...)` if the data is invalid
pub fn decode(buf: &mut BytesMut) -> Result<Option<Packet>, CodecError> {
    // Fixed header byte plus at least one length byte
    if buf.len() < 2 {
        return Ok(None);
    }

    // Peek at the remaining length without consuming
    let mut remaining_len = 0usize;
    let mut multiplier = 1usize;
    let mut header_len = None;
    for i in 0..MAX_LENGTH_BYTES {
        let idx = 1 + i;
        if idx >= buf.len() {
            return Ok(None);
        }
        let byte = buf[idx];
        remaining_len += (byte & 0x7F) as usize * multiplier;
        if byte & 0x80 == 0 {
            header_len = Some(idx + 1);
            break;
        }
        multiplier *= 128;
    }
    let header_len = header_len.ok_or(CodecError::MalformedLength)?;

    if remaining_len > MAX_PACKET_SIZE {
        return Err(CodecError::PacketTooLarge(remaining_len));
    }

    // Check if we have the complete packet
    if buf.len() < header_len + remaining_len {
        return Ok(None);
    }

    let first_byte = buf[0];
    buf.advance(header_len);
    let body = buf.split_to(remaining_len).freeze();

    decode_body(first_byte, body).map(Some)
}

fn decode_body(first_byte: u8, mut body: Bytes) -> Result<Packet, CodecError> {
    let packet_type = first_byte >> 4;
    let flags = first_byte & 0x0F;

    match packet_type {
        1 => {
            const NAME: &str = "CONNECT";
            let protocol = read_string(&mut body, NAME)?;
            if protocol != PROTOCOL_NAME {
                return Err(CodecError::Malformed {
                    packet: NAME,
                    reason: "unexpected protocol name",
                });
            }
            let _level = read_u8(&mut body, NAME)?;
            let connect_flags = read_u8(&mut body, NAME)?;
            let keep_alive_secs = read_u16(&mut body, NAME)?;
            let client_id = read_string(&mut body, NAME)?;
            Ok(Packet::Connect(Connect {
                client_id,
                keep_alive_secs,
                clean_session: connect_flags & 0x02 != 0,
            }))
        }
        2 => {
            const NAME: &str = "CONNACK";
            let ack_flags = read_u8(&mut body, NAME)?;
            let return_code = read_u8(&mut body, NAME)?;
            Ok(Packet::ConnAck {
                session_present: ack_flags & 0x01 != 0,
                return_code,
            })
        }
        3 => {
            const NAME: &str = "PUBLISH";
            let qos = QoS::from_bits((flags >> 1) & 0x03, NAME)?;
            let topic = read_string(&mut body, NAME)?;
            let packet_id = match qos {
                QoS::AtMostOnce => None,
                _ => Some(read_u16(&mut body, NAME)?),
            };
            Ok(Packet::Publish(Publish {
                topic,
                payload: body,
                qos,
                retain: flags & 0x01 != 0,
                packet_id,
            }))
        }
        4 => Ok(Packet::PubAck {
            packet_id: read_u16(&mut body, "PUBACK")?,
        }),
        8 => {
            const NAME: &str = "SUBSCRIBE";
            let packet_id = read_u16(&mut body, NAME)?;
            let mut filters = Vec::new();
            while body.has_remaining() {
                let filter = read_string(&mut body, NAME)?;
                let qos = QoS::from_bits(read_u8(&mut body, NAME)?, NAME)?;
                filters.push((filter, qos));
            }
            if filters.is_empty() {
                return Err(CodecError::Malformed {
                    packet: NAME,
                    reason: "no topic filters",
                });
            }
            Ok(Packet::Subscribe { packet_id, filters })
        }
        9 => {
            let packet_id = read_u16(&mut body, "SUBACK")?;
            Ok(Packet::SubAck {
                packet_id,
                return_codes: body.to_vec(),
            })
        }
        12 => Ok(Packet::PingReq),
        13 => Ok(Packet::PingResp),
        14 => Ok(Packet::Disconnect),
        other => Err(CodecError::UnsupportedPacket(other)),
    }
}

fn encode_remaining_length(mut len: usize, buf: &mut BytesMut) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if len == 0 {
            break;
        }
    }
}

fn put_string(buf: &mut BytesMut, value: &str) -> Result<(), CodecError> {
    let len = value.len();
    if len > u16::MAX as usize {
        return Err(CodecError::StringTooLong(len));
    }
    buf.put_u16(len as u16);
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn read_u8(body: &mut Bytes, packet: &'static str) -> Result<u8, CodecError> {
    if body.remaining() < 1 {
        return Err(CodecError::Malformed {
            packet,
            reason: "truncated body",
        });
    }
    Ok(body.get_u8())
}

fn read_u16(body: &mut Bytes, packet: &'static str) -> Result<u16, CodecError> {
    if body.remaining() < 2 {
        return Err(CodecError::Malformed {
            packet,
            reason: "truncated body",
        });
    }
    Ok(body.get_u16())
}

fn read_string(body: &mut Bytes, packet: &'static str) -> Result<String, CodecError> {
    let len = read_u16(body, packet)? as usize;
    if body.remaining() < len {
        return Err(CodecError::Malformed {
            packet,
            reason: "truncated string",
        });
    }
    let raw = body.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)
}

/// Decoder state machine for streaming decoding
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Partial packet data being accumulated
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Create a new frame decoder
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next packet from the buffer
    ///
    /// Call this repeatedly until it returns `Ok(None)` to drain all complete packets.
    /// Complete packets of a type this codec does not handle are dropped.
    pub fn decode_next(&mut self) -> Result<Option<Packet>, CodecError> {
        loop {
            match decode(&mut self.buffer) {
                // The frame is already consumed; the stream stays in sync
                Err(CodecError::UnsupportedPacket(packet_type)) => {
                    debug!("[MQTT] Skipping unsupported packet type {}", packet_type);
                }
                result => return result,
            }
        }
    }

    /// Get the current buffer length (for debugging)
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}
