//! Frame envelope
//!
//! Every command exchanged with an agent is a fixed 28-byte little-endian header followed by
//! an opaque payload. The header carries its own checksum so a desynchronised stream is
//! detected before the payload length is trusted.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::errors::ProtocolError;
use crate::types::RequestTag;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Wire protocol version spoken by this controller
pub const PROTOCOL_VERSION: u16 = 1;

/// Size of the encoded frame header
pub const HEADER_LEN: usize = 28;

/// Bytes of the header covered by the header checksum
const HEADER_CRC_SPAN: usize = 20;

/// Largest payload a frame may announce
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024 * 1024;

// ----------------------------------------------------------------------------
// Opcodes
// ----------------------------------------------------------------------------

/// Command opcode carried in the frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    Quit,
    Exit,
    Job,
    JobLine,
    Text,
    ThreadStatus,
    GroupStats,
    SendEta,
    Eta,
    Probe,
    Start,
    Stop,
    DiskUtil,
    ServerStart,
    AddJob,
    Run,
    /// Opcode this controller does not know; kept so it can be logged
    Unknown(u16),
}

impl Opcode {
    pub fn from_u16(raw: u16) -> Self {
        match raw {
            1 => Opcode::Quit,
            2 => Opcode::Exit,
            3 => Opcode::Job,
            4 => Opcode::JobLine,
            5 => Opcode::Text,
            6 => Opcode::ThreadStatus,
            7 => Opcode::GroupStats,
            8 => Opcode::SendEta,
            9 => Opcode::Eta,
            10 => Opcode::Probe,
            11 => Opcode::Start,
            12 => Opcode::Stop,
            13 => Opcode::DiskUtil,
            14 => Opcode::ServerStart,
            15 => Opcode::AddJob,
            16 => Opcode::Run,
            other => Opcode::Unknown(other),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            Opcode::Quit => 1,
            Opcode::Exit => 2,
            Opcode::Job => 3,
            Opcode::JobLine => 4,
            Opcode::Text => 5,
            Opcode::ThreadStatus => 6,
            Opcode::GroupStats => 7,
            Opcode::SendEta => 8,
            Opcode::Eta => 9,
            Opcode::Probe => 10,
            Opcode::Start => 11,
            Opcode::Stop => 12,
            Opcode::DiskUtil => 13,
            Opcode::ServerStart => 14,
            Opcode::AddJob => 15,
            Opcode::Run => 16,
            Opcode::Unknown(raw) => *raw,
        }
    }

    /// Display name used in log output
    pub fn name(&self) -> &'static str {
        match self {
            Opcode::Quit => "QUIT",
            Opcode::Exit => "EXIT",
            Opcode::Job => "JOB",
            Opcode::JobLine => "JOBLINE",
            Opcode::Text => "TEXT",
            Opcode::ThreadStatus => "TS",
            Opcode::GroupStats => "GS",
            Opcode::SendEta => "SEND_ETA",
            Opcode::Eta => "ETA",
            Opcode::Probe => "PROBE",
            Opcode::Start => "START",
            Opcode::Stop => "STOP",
            Opcode::DiskUtil => "DISK_UTIL",
            Opcode::ServerStart => "SERVER_START",
            Opcode::AddJob => "ADD_JOB",
            Opcode::Run => "RUN",
            Opcode::Unknown(_) => "UNKNOWN",
        }
    }
}

// ----------------------------------------------------------------------------
// Frame Header
// ----------------------------------------------------------------------------

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u16,
    pub opcode: Opcode,
    pub flags: u32,
    pub tag: RequestTag,
    pub payload_len: u32,
    pub header_crc: u32,
    pub payload_crc: u32,
}

impl FrameHeader {
    /// Build a header for `payload`, computing both checksums
    pub fn for_payload(opcode: Opcode, flags: u32, tag: RequestTag, payload: &[u8]) -> Self {
        let mut header = Self {
            version: PROTOCOL_VERSION,
            opcode,
            flags,
            tag,
            payload_len: payload.len() as u32,
            header_crc: 0,
            payload_crc: payload_checksum(payload),
        };
        header.header_crc = header.compute_header_crc();
        header
    }

    fn put_unchecked_fields(&self, buf: &mut impl BufMut) {
        buf.put_u16_le(self.version);
        buf.put_u16_le(self.opcode.as_u16());
        buf.put_u32_le(self.flags);
        buf.put_u64_le(self.tag.as_u64());
        buf.put_u32_le(self.payload_len);
    }

    fn compute_header_crc(&self) -> u32 {
        let mut span = [0u8; HEADER_CRC_SPAN];
        self.put_unchecked_fields(&mut &mut span[..]);
        crc32fast::hash(&span)
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        self.put_unchecked_fields(buf);
        buf.put_u32_le(self.header_crc);
        buf.put_u32_le(self.payload_crc);
    }

    /// Decode and validate a header against the given payload limit
    pub fn decode(bytes: &[u8], max_payload_len: usize) -> Result<Self, ProtocolError> {
        if bytes.len() < HEADER_LEN {
            return Err(ProtocolError::HeaderTooShort {
                expected: HEADER_LEN,
                actual: bytes.len(),
            });
        }

        let mut buf = &bytes[..HEADER_LEN];
        let header = Self {
            version: buf.get_u16_le(),
            opcode: Opcode::from_u16(buf.get_u16_le()),
            flags: buf.get_u32_le(),
            tag: RequestTag::new(buf.get_u64_le()),
            payload_len: buf.get_u32_le(),
            header_crc: buf.get_u32_le(),
            payload_crc: buf.get_u32_le(),
        };

        let expected = crc32fast::hash(&bytes[..HEADER_CRC_SPAN]);
        if expected != header.header_crc {
            return Err(ProtocolError::HeaderChecksum {
                expected,
                actual: header.header_crc,
            });
        }
        if header.version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion {
                version: header.version,
            });
        }
        if header.payload_len as usize > max_payload_len {
            return Err(ProtocolError::PayloadTooLarge {
                len: header.payload_len as usize,
                max: max_payload_len,
            });
        }

        Ok(header)
    }

    /// Check a received payload against the header checksum
    pub fn verify_payload(&self, payload: &[u8]) -> Result<(), ProtocolError> {
        let actual = payload_checksum(payload);
        if actual != self.payload_crc {
            return Err(ProtocolError::PayloadChecksum {
                expected: self.payload_crc,
                actual,
            });
        }
        Ok(())
    }
}

fn payload_checksum(payload: &[u8]) -> u32 {
    if payload.is_empty() {
        0
    } else {
        crc32fast::hash(payload)
    }
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One command with its payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: Opcode,
    pub flags: u32,
    pub tag: RequestTag,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(opcode: Opcode, tag: RequestTag, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            flags: 0,
            tag,
            payload: payload.into(),
        }
    }

    /// Command without payload or tag
    pub fn command(opcode: Opcode) -> Self {
        Self::new(opcode, RequestTag::NONE, Bytes::new())
    }

    pub fn header(&self) -> FrameHeader {
        FrameHeader::for_payload(self.opcode, self.flags, self.tag, &self.payload)
    }

    /// Encode header and payload into one contiguous buffer
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        if self.payload.len() > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::PayloadTooLarge {
                len: self.payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        self.header().encode(&mut buf);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Decode one complete frame occupying exactly `bytes`
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let header = FrameHeader::decode(bytes, MAX_PAYLOAD_LEN)?;
        let payload = &bytes[HEADER_LEN..];
        if payload.len() < header.payload_len as usize {
            return Err(ProtocolError::Truncated {
                opcode: header.opcode,
                needed: header.payload_len as usize,
                remaining: payload.len(),
            });
        }
        if payload.len() > header.payload_len as usize {
            return Err(ProtocolError::TrailingBytes {
                opcode: header.opcode,
                extra: payload.len() - header.payload_len as usize,
            });
        }
        header.verify_payload(payload)?;
        Ok(Self::from_parts(&header, Bytes::copy_from_slice(payload)))
    }

    /// Assemble a frame from a validated header and its payload
    pub fn from_parts(header: &FrameHeader, payload: Bytes) -> Self {
        Self {
            opcode: header.opcode,
            flags: header.flags,
            tag: header.tag,
            payload,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
