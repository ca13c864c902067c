//! Structured payloads carried by individual opcodes

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::errors::ProtocolError;
use crate::protocol::cmdline::CommandLine;
use crate::protocol::codec::{put_fixed_str, WireDecode, WireEncode, WireReader};
use crate::protocol::frame::{Frame, Opcode};
use crate::protocol::platform::{arch_name, os_name};
use crate::stats::{DiskUtilAgg, DiskUtilStat, GroupRunStats, JobsEta, ThreadStat};
use crate::types::RequestTag;

/// Width of the hostname field in the probe reply
pub const PROBE_HOSTNAME_LEN: usize = 64;

// ----------------------------------------------------------------------------
// Probe Reply
// ----------------------------------------------------------------------------

/// Capabilities announced by an agent right after connecting
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProbeReply {
    pub hostname: String,
    pub bigendian: bool,
    pub version_major: u8,
    pub version_minor: u8,
    pub version_patch: u8,
    pub os: u8,
    pub arch: u8,
    /// Pointer width in bytes
    pub bpp: u8,
}

impl ProbeReply {
    pub fn os_name(&self) -> &'static str {
        os_name(self.os)
    }

    pub fn arch_name(&self) -> &'static str {
        arch_name(self.arch)
    }

    pub fn word_bits(&self) -> u32 {
        u32::from(self.bpp) * 8
    }

    pub fn version(&self) -> String {
        format!(
            "{}.{}.{}",
            self.version_major, self.version_minor, self.version_patch
        )
    }
}

impl WireEncode for ProbeReply {
    fn encode(&self, buf: &mut BytesMut) {
        put_fixed_str(buf, &self.hostname, PROBE_HOSTNAME_LEN);
        buf.put_u8(u8::from(self.bigendian));
        buf.put_u8(self.version_major);
        buf.put_u8(self.version_minor);
        buf.put_u8(self.version_patch);
        buf.put_u8(self.os);
        buf.put_u8(self.arch);
        buf.put_u8(self.bpp);
    }
}

impl WireDecode for ProbeReply {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            hostname: reader.fixed_str(PROBE_HOSTNAME_LEN)?,
            bigendian: reader.u8()? != 0,
            version_major: reader.u8()?,
            version_minor: reader.u8()?,
            version_patch: reader.u8()?,
            os: reader.u8()?,
            arch: reader.u8()?,
            bpp: reader.u8()?,
        })
    }
}

// ----------------------------------------------------------------------------
// Start / Stop
// ----------------------------------------------------------------------------

/// Acknowledgement of a start, announcing how many jobs the agent will run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StartAck {
    pub jobs: u32,
}

impl WireEncode for StartAck {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.jobs);
    }
}

impl WireDecode for StartAck {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self { jobs: reader.u32()? })
    }
}

/// Final status of an agent's run; non-zero `error` is a remote failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StopReport {
    pub error: i32,
}

impl WireEncode for StopReport {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32_le(self.error);
    }
}

impl WireDecode for StopReport {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            error: reader.i32()?,
        })
    }
}

// ----------------------------------------------------------------------------
// Text
// ----------------------------------------------------------------------------

/// One chunk of log output produced by an agent
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TextLine {
    pub level: u32,
    pub log_sec: u64,
    pub log_usec: u64,
    pub text: String,
}

impl TextLine {
    /// Whether the chunk finishes a line
    pub fn ends_line(&self) -> bool {
        self.text.contains('\n')
    }
}

impl WireEncode for TextLine {
    fn encode(&self, buf: &mut BytesMut) {
        let text = self.text.as_bytes();
        buf.put_u32_le(self.level);
        buf.put_u32_le(text.len() as u32);
        buf.put_u64_le(self.log_sec);
        buf.put_u64_le(self.log_usec);
        buf.put_slice(text);
    }
}

impl WireDecode for TextLine {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        let level = reader.u32()?;
        let buf_len = reader.u32()? as usize;
        let log_sec = reader.u64()?;
        let log_usec = reader.u64()?;
        let raw = reader.bytes(buf_len)?;
        let text = String::from_utf8_lossy(raw)
            .trim_end_matches('\0')
            .to_string();
        Ok(Self {
            level,
            log_sec,
            log_usec,
            text,
        })
    }
}

// ----------------------------------------------------------------------------
// Composite Payloads
// ----------------------------------------------------------------------------

/// Disk utilization of one device plus its stacked-device aggregate
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DiskUtil {
    pub stat: DiskUtilStat,
    pub agg: DiskUtilAgg,
}

impl WireEncode for DiskUtil {
    fn encode(&self, buf: &mut BytesMut) {
        self.stat.encode(buf);
        self.agg.encode(buf);
    }
}

impl WireDecode for DiskUtil {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            stat: DiskUtilStat::decode(reader)?,
            agg: DiskUtilAgg::decode(reader)?,
        })
    }
}

/// Terminal report of one job with the statistics of its group
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ThreadStatus {
    pub ts: ThreadStat,
    pub rs: GroupRunStats,
}

impl WireEncode for ThreadStatus {
    fn encode(&self, buf: &mut BytesMut) {
        self.ts.encode(buf);
        self.rs.encode(buf);
    }
}

impl WireDecode for ThreadStatus {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            ts: ThreadStat::decode(reader)?,
            rs: GroupRunStats::decode(reader)?,
        })
    }
}

// ----------------------------------------------------------------------------
// Decoded Payload
// ----------------------------------------------------------------------------

/// Payload of a frame decoded according to its opcode
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Opcodes without a meaningful body
    Empty,
    Job(Bytes),
    JobLine(CommandLine),
    Text(TextLine),
    ThreadStatus(Box<ThreadStatus>),
    GroupStats(GroupRunStats),
    Eta(JobsEta),
    Probe(ProbeReply),
    Start(StartAck),
    Stop(StopReport),
    DiskUtil(Box<DiskUtil>),
    AddJob(Bytes),
}

impl Payload {
    /// Decode the body of a frame received from an agent
    pub fn decode(frame: &Frame) -> Result<Self, ProtocolError> {
        let op = frame.opcode;
        let body = &frame.payload[..];
        let payload = match op {
            Opcode::Quit
            | Opcode::Exit
            | Opcode::SendEta
            | Opcode::ServerStart
            | Opcode::Run => Payload::Empty,
            Opcode::Job => Payload::Job(frame.payload.clone()),
            Opcode::AddJob => Payload::AddJob(frame.payload.clone()),
            Opcode::JobLine => Payload::JobLine(CommandLine::from_payload(op, body)?),
            Opcode::Text => Payload::Text(TextLine::from_payload(op, body)?),
            Opcode::ThreadStatus => {
                Payload::ThreadStatus(Box::new(ThreadStatus::from_payload(op, body)?))
            }
            Opcode::GroupStats => Payload::GroupStats(GroupRunStats::from_payload(op, body)?),
            Opcode::Eta => Payload::Eta(JobsEta::from_payload(op, body)?),
            Opcode::Probe => Payload::Probe(ProbeReply::from_payload(op, body)?),
            Opcode::Start => Payload::Start(StartAck::from_payload(op, body)?),
            Opcode::Stop => Payload::Stop(StopReport::from_payload(op, body)?),
            Opcode::DiskUtil => Payload::DiskUtil(Box::new(DiskUtil::from_payload(op, body)?)),
            Opcode::Unknown(raw) => return Err(ProtocolError::UnknownOpcode { raw }),
        };
        Ok(payload)
    }
}

impl Frame {
    /// Frame carrying an encoded payload
    pub fn with_payload<M: WireEncode>(opcode: Opcode, tag: RequestTag, message: &M) -> Self {
        Frame::new(opcode, tag, message.to_payload())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_reply_decoding() {
        let probe = ProbeReply {
            hostname: "loadgen-01".into(),
            bigendian: false,
            version_major: 2,
            version_minor: 0,
            version_patch: 7,
            os: 1,
            arch: 200,
            bpp: 8,
        };
        let frame = Frame::with_payload(Opcode::Probe, RequestTag::new(3), &probe);
        let decoded = match Payload::decode(&frame).unwrap() {
            Payload::Probe(p) => p,
            other => panic!("unexpected payload {:?}", other),
        };

        assert_eq!(decoded, probe);
        assert_eq!(decoded.os_name(), "Linux");
        assert_eq!(decoded.arch_name(), "unknown");
        assert_eq!(decoded.word_bits(), 64);
        assert_eq!(decoded.version(), "2.0.7");
    }

    #[test]
    fn test_stop_report_negative_error() {
        let frame = Frame::with_payload(Opcode::Stop, RequestTag::NONE, &StopReport { error: -5 });
        assert_eq!(
            Payload::decode(&frame).unwrap(),
            Payload::Stop(StopReport { error: -5 })
        );
    }

    #[test]
    fn test_text_line_tracks_newline() {
        let line = TextLine {
            level: 1,
            log_sec: 17,
            log_usec: 250,
            text: "partial".into(),
        };
        let frame = Frame::with_payload(Opcode::Text, RequestTag::NONE, &line);
        let Payload::Text(decoded) = Payload::decode(&frame).unwrap() else {
            panic!("expected text payload");
        };
        assert_eq!(decoded, line);
        assert!(!decoded.ends_line());
    }

    #[test]
    fn test_truncated_start_ack_rejected() {
        let frame = Frame::new(Opcode::Start, RequestTag::NONE, vec![1u8, 0]);
        assert!(matches!(
            Payload::decode(&frame),
            Err(ProtocolError::Truncated { .. })
        ));
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        let frame = Frame::command(Opcode::Unknown(99));
        assert_eq!(
            Payload::decode(&frame),
            Err(ProtocolError::UnknownOpcode { raw: 99 })
        );
    }

    #[test]
    fn test_quit_ignores_body() {
        let frame = Frame::new(Opcode::Quit, RequestTag::NONE, vec![1u8, 2, 3]);
        assert_eq!(Payload::decode(&frame).unwrap(), Payload::Empty);
    }
}
