//! Payload codec primitives
//!
//! `WireEncode` / `WireDecode` convert payload structs to and from their fixed little-endian
//! layout. Decoding goes through `WireReader`, which bounds-checks every read so a short
//! payload surfaces as `ProtocolError::Truncated` instead of a panic inside `bytes`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::errors::ProtocolError;
use crate::protocol::frame::Opcode;

// ----------------------------------------------------------------------------
// Codec Traits
// ----------------------------------------------------------------------------

/// Types with a fixed on-wire encoding
pub trait WireEncode {
    fn encode(&self, buf: &mut BytesMut);

    /// Encode into a fresh payload buffer
    fn to_payload(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

/// Types decodable from their on-wire encoding
pub trait WireDecode: Sized {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError>;

    /// Decode a payload that must contain exactly one value
    fn from_payload(opcode: Opcode, payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = WireReader::new(opcode, payload);
        let value = Self::decode(&mut reader)?;
        reader.finish()?;
        Ok(value)
    }
}

// ----------------------------------------------------------------------------
// Reader
// ----------------------------------------------------------------------------

/// Bounds-checked little-endian cursor over a payload
pub struct WireReader<'a> {
    opcode: Opcode,
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub fn new(opcode: Opcode, buf: &'a [u8]) -> Self {
        Self { opcode, buf }
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, needed: usize) -> Result<(), ProtocolError> {
        if self.buf.remaining() < needed {
            return Err(ProtocolError::Truncated {
                opcode: self.opcode,
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8, ProtocolError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn u16(&mut self) -> Result<u16, ProtocolError> {
        self.ensure(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn u32(&mut self) -> Result<u32, ProtocolError> {
        self.ensure(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn i32(&mut self) -> Result<i32, ProtocolError> {
        self.ensure(4)?;
        Ok(self.buf.get_i32_le())
    }

    pub fn u64(&mut self) -> Result<u64, ProtocolError> {
        self.ensure(8)?;
        Ok(self.buf.get_u64_le())
    }

    /// Floats travel as their IEEE-754 bit pattern in a little-endian u64
    pub fn f64(&mut self) -> Result<f64, ProtocolError> {
        Ok(f64::from_bits(self.u64()?))
    }

    pub fn u32_array<const N: usize>(&mut self) -> Result<[u32; N], ProtocolError> {
        let mut out = [0u32; N];
        for slot in out.iter_mut() {
            *slot = self.u32()?;
        }
        Ok(out)
    }

    pub fn u64_array<const N: usize>(&mut self) -> Result<[u64; N], ProtocolError> {
        let mut out = [0u64; N];
        for slot in out.iter_mut() {
            *slot = self.u64()?;
        }
        Ok(out)
    }

    pub fn f64_array<const N: usize>(&mut self) -> Result<[f64; N], ProtocolError> {
        let mut out = [0f64; N];
        for slot in out.iter_mut() {
            *slot = self.f64()?;
        }
        Ok(out)
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        self.ensure(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    /// NUL-padded fixed-width string field
    pub fn fixed_str(&mut self, width: usize) -> Result<String, ProtocolError> {
        let raw = self.bytes(width)?;
        Ok(nul_terminated(raw))
    }

    /// Everything left in the payload
    pub fn rest(&mut self) -> &'a [u8] {
        let rest = self.buf;
        self.buf = &[];
        rest
    }

    /// Fail if any bytes were left unread
    pub fn finish(self) -> Result<(), ProtocolError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::TrailingBytes {
                opcode: self.opcode,
                extra: self.buf.len(),
            })
        }
    }
}

/// Text up to the first NUL, invalid UTF-8 replaced
pub fn nul_terminated(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

// ----------------------------------------------------------------------------
// Writer Helpers
// ----------------------------------------------------------------------------

pub fn put_f64(buf: &mut BytesMut, value: f64) {
    buf.put_u64_le(value.to_bits());
}

/// Write `value` into a `width`-byte NUL-padded field, truncating so one NUL always remains
pub fn put_fixed_str(buf: &mut BytesMut, value: &str, width: usize) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(width.saturating_sub(1));
    buf.put_slice(&bytes[..len]);
    buf.put_bytes(0, width - len);
}

pub fn put_u32_slice(buf: &mut BytesMut, values: &[u32]) {
    for v in values {
        buf.put_u32_le(*v);
    }
}

pub fn put_u64_slice(buf: &mut BytesMut, values: &[u64]) {
    for v in values {
        buf.put_u64_le(*v);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
