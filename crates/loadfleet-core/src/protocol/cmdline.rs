//! Forwarded command-line arguments
//!
//! Layout: `lines: u16`, then per argument `len: u16` (string length plus one) followed by
//! the argument bytes and a terminating NUL.

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::errors::ProtocolError;
use crate::protocol::codec::{nul_terminated, WireDecode, WireEncode, WireReader};

/// Name the agent expects as the first argument
pub const PROGRAM_NAME: &str = "fio";

/// Argument vector sent with a JOBLINE command
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommandLine {
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(args: Vec<String>) -> Self {
        Self { args }
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

impl WireEncode for CommandLine {
    fn encode(&self, buf: &mut BytesMut) {
        // Argument lists come from a handful of flags; both counts fit a u16 in practice
        buf.put_u16_le(self.args.len().min(u16::MAX as usize) as u16);
        for arg in self.args.iter().take(u16::MAX as usize) {
            let bytes = arg.as_bytes();
            let len = bytes.len().min(u16::MAX as usize - 1);
            buf.put_u16_le(len as u16 + 1);
            buf.put_slice(&bytes[..len]);
            buf.put_u8(0);
        }
    }
}

impl WireDecode for CommandLine {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        let count = reader.u16()? as usize;
        let mut args = Vec::with_capacity(count);
        for index in 0..count {
            let len = reader.u16()? as usize;
            if len == 0 || len > reader.remaining() {
                return Err(ProtocolError::MalformedArgument { index, count });
            }
            args.push(nul_terminated(reader.bytes(len)?));
        }
        Ok(Self { args })
    }
}
