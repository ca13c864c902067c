//! Wire protocol
//!
//! - `frame`: the 28-byte checksummed frame envelope and opcode table
//! - `codec`: bounds-checked little-endian payload reader and writer helpers
//! - `payloads`: structured payloads and per-opcode decoding
//! - `cmdline`: forwarded argument vectors
//! - `platform`: OS and architecture codes from the probe reply

pub mod cmdline;
pub mod codec;
pub mod frame;
pub mod payloads;
pub mod platform;

pub use cmdline::{CommandLine, PROGRAM_NAME};
pub use codec::{WireDecode, WireEncode, WireReader};
pub use frame::{Frame, FrameHeader, Opcode, HEADER_LEN, MAX_PAYLOAD_LEN, PROTOCOL_VERSION};
pub use payloads::{DiskUtil, Payload, ProbeReply, StartAck, StopReport, TextLine, ThreadStatus};
pub use platform::{arch_name, os_name, UNKNOWN_PLATFORM};
