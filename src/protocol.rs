//! Wire protocol
//!
//! Two datagram kinds share one UDP port:
//!
//! ```text
//! Control:  [type:str][serverIp:str][serverPort:i32]
//! Audio:    [identity:str][payloadLen:i32][payload][posX posY posZ:f32][dirX dirY dirZ:f32]
//!
//! str = [byteLen:i32][UTF-8 bytes]      all integers and floats little-endian
//! ```
//!
//! Both kinds start with a string, so the kind is sniffed from that leading
//! string: `"handshake"` is a control message, anything else is the identity
//! of an audio frame. A participant whose identity is literally `"handshake"`
//! cannot be told apart from a handshake request. There is no version byte;
//! any layout change breaks compatibility with deployed clients.
//!
//! String lengths are fixed 4-byte `i32` prefixes. .NET `BinaryWriter` based
//! clients write a 7-bit varint prefix instead, so they are not byte-compatible
//! with this format without a matching change on their side.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::IpAddr;

use crate::error::DecodeError;
use crate::spatial::Vec3;

/// Type string of a handshake request
pub const HANDSHAKE_REQUEST: &str = "handshake";

/// Type string of a handshake reply
pub const HANDSHAKE_REPLY: &str = "handshake-reply";

/// One encoded audio frame plus the sender's spatial state
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Sender identity
    pub identity: String,
    /// Opaque codec payload
    pub payload: Bytes,
    /// Sender position
    pub position: Vec3,
    /// Sender facing or motion direction
    pub direction: Vec3,
}

impl AudioFrame {
    pub fn new(
        identity: impl Into<String>,
        payload: impl Into<Bytes>,
        position: Vec3,
        direction: Vec3,
    ) -> Self {
        Self {
            identity: identity.into(),
            payload: payload.into(),
            position,
            direction,
        }
    }

    /// Size of this frame on the wire
    pub fn encoded_len(&self) -> usize {
        4 + self.identity.len() + 4 + self.payload.len() + 6 * 4
    }

    /// Encode to wire format
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        put_string(&mut buf, &self.identity);
        put_len(&mut buf, self.payload.len());
        buf.put_slice(&self.payload);
        put_vec3(&mut buf, &self.position);
        put_vec3(&mut buf, &self.direction);
        buf.freeze()
    }

    /// Decode from wire format. Bytes after the direction are ignored.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = WireReader::new(data);
        let identity = reader.read_string()?;
        let payload_len = reader.read_len()?;
        let payload = Bytes::copy_from_slice(reader.read_bytes(payload_len)?);
        let position = reader.read_vec3()?;
        let direction = reader.read_vec3()?;

        Ok(Self {
            identity,
            payload,
            position,
            direction,
        })
    }
}

/// Handshake control message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Client asks the relay for its endpoint
    HandshakeRequest,
    /// Relay answers with the address it observed and its listening port
    HandshakeReply { server_ip: IpAddr, server_port: u16 },
}

impl ControlMessage {
    /// Wire type string
    pub fn type_str(&self) -> &'static str {
        match self {
            ControlMessage::HandshakeRequest => HANDSHAKE_REQUEST,
            ControlMessage::HandshakeReply { .. } => HANDSHAKE_REPLY,
        }
    }

    /// Encode to wire format. Requests carry an empty address and port 0.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        put_string(&mut buf, self.type_str());
        match self {
            ControlMessage::HandshakeRequest => {
                put_string(&mut buf, "");
                buf.put_i32_le(0);
            }
            ControlMessage::HandshakeReply {
                server_ip,
                server_port,
            } => {
                put_string(&mut buf, &server_ip.to_string());
                buf.put_i32_le(i32::from(*server_port));
            }
        }
        buf.freeze()
    }

    /// Decode from wire format
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = WireReader::new(data);
        let kind = reader.read_string()?;
        let ip = reader.read_string()?;
        let port = reader.read_i32()?;

        match kind.as_str() {
            HANDSHAKE_REQUEST => Ok(ControlMessage::HandshakeRequest),
            HANDSHAKE_REPLY => {
                let server_ip = ip
                    .parse::<IpAddr>()
                    .map_err(|_| DecodeError::InvalidAddress(ip.clone()))?;
                let server_port = u16::try_from(port).map_err(|_| DecodeError::InvalidPort(port))?;
                Ok(ControlMessage::HandshakeReply {
                    server_ip,
                    server_port,
                })
            }
            _ => Err(DecodeError::UnknownControlType(kind)),
        }
    }
}

/// Datagram kind as sniffed from the leading string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Control,
    Audio,
}

/// A decoded datagram
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Control(ControlMessage),
    Audio(AudioFrame),
}

impl Packet {
    /// Classify and decode a datagram
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        match classify(data)? {
            PacketKind::Control => decode_control(data).map(Packet::Control),
            PacketKind::Audio => decode_audio(data).map(Packet::Audio),
        }
    }

    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Control(_) => PacketKind::Control,
            Packet::Audio(_) => PacketKind::Audio,
        }
    }
}

/// Determine the datagram kind by decoding only its leading string
pub fn classify(data: &[u8]) -> Result<PacketKind, DecodeError> {
    let mut reader = WireReader::new(data);
    let leading = reader.read_str()?;
    if leading == HANDSHAKE_REQUEST {
        Ok(PacketKind::Control)
    } else {
        Ok(PacketKind::Audio)
    }
}

pub fn encode_audio(frame: &AudioFrame) -> Bytes {
    frame.encode()
}

pub fn decode_audio(data: &[u8]) -> Result<AudioFrame, DecodeError> {
    AudioFrame::decode(data)
}

pub fn encode_control(msg: &ControlMessage) -> Bytes {
    msg.encode()
}

pub fn decode_control(data: &[u8]) -> Result<ControlMessage, DecodeError> {
    ControlMessage::decode(data)
}

fn put_len(buf: &mut BytesMut, len: usize) {
    // Datagrams are far below i32::MAX, saturate rather than wrap
    buf.put_i32_le(i32::try_from(len).unwrap_or(i32::MAX));
}

fn put_string(buf: &mut BytesMut, value: &str) {
    put_len(buf, value.len());
    buf.put_slice(value.as_bytes());
}

fn put_vec3(buf: &mut BytesMut, v: &Vec3) {
    buf.put_f32_le(v.x);
    buf.put_f32_le(v.y);
    buf.put_f32_le(v.z);
}

/// Bounds-checked little-endian reader over a datagram
struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn ensure(&self, needed: usize) -> Result<(), DecodeError> {
        if self.buf.remaining() < needed {
            return Err(DecodeError::Truncated {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    fn read_i32(&mut self) -> Result<i32, DecodeError> {
        self.ensure(4)?;
        Ok(self.buf.get_i32_le())
    }

    fn read_f32(&mut self) -> Result<f32, DecodeError> {
        self.ensure(4)?;
        Ok(self.buf.get_f32_le())
    }

    fn read_len(&mut self) -> Result<usize, DecodeError> {
        let len = self.read_i32()?;
        usize::try_from(len).map_err(|_| DecodeError::NegativeLength(len))
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        self.ensure(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    fn read_str(&mut self) -> Result<&'a str, DecodeError> {
        let len = self.read_len()?;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)
    }

    fn read_string(&mut self) -> Result<String, DecodeError> {
        self.read_str().map(str::to_owned)
    }

    fn read_vec3(&mut self) -> Result<Vec3, DecodeError> {
        let x = self.read_f32()?;
        let y = self.read_f32()?;
        let z = self.read_f32()?;
        Ok(Vec3::new(x, y, z))
    }
}
