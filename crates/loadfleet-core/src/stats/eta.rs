//! Progress snapshots

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::errors::ProtocolError;
use crate::protocol::codec::{nul_terminated, put_u32_slice, WireDecode, WireEncode, WireReader};
use crate::stats::thread::DATA_DIRECTIONS;

/// Progress snapshot reported by an agent in reply to an ETA request
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobsEta {
    pub nr_running: u32,
    pub nr_ramp: u32,
    pub nr_pending: u32,
    pub files_open: u32,
    pub m_rate: [u32; DATA_DIRECTIONS],
    pub t_rate: [u32; DATA_DIRECTIONS],
    pub m_iops: [u32; DATA_DIRECTIONS],
    pub t_iops: [u32; DATA_DIRECTIONS],
    pub rate: [u32; DATA_DIRECTIONS],
    pub iops: [u32; DATA_DIRECTIONS],
    pub elapsed_sec: u64,
    pub eta_sec: u64,
    pub nr_threads: u32,
    /// One status character per job; local to the reporting agent
    pub run_str: String,
}

fn add_pair(dst: &mut [u32; DATA_DIRECTIONS], src: &[u32; DATA_DIRECTIONS]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d = d.wrapping_add(*s);
    }
}

impl JobsEta {
    /// Fold another agent's snapshot into a fleet total
    ///
    /// Remaining time is the slowest agent's, never the sum. The per-job status string is
    /// meaningless across agents and is left untouched.
    pub fn merge(&mut self, src: &JobsEta) {
        self.nr_running = self.nr_running.wrapping_add(src.nr_running);
        self.nr_ramp = self.nr_ramp.wrapping_add(src.nr_ramp);
        self.nr_pending = self.nr_pending.wrapping_add(src.nr_pending);
        self.files_open = self.files_open.wrapping_add(src.files_open);
        self.nr_threads = self.nr_threads.wrapping_add(src.nr_threads);

        add_pair(&mut self.m_rate, &src.m_rate);
        add_pair(&mut self.t_rate, &src.t_rate);
        add_pair(&mut self.m_iops, &src.m_iops);
        add_pair(&mut self.t_iops, &src.t_iops);
        add_pair(&mut self.rate, &src.rate);
        add_pair(&mut self.iops, &src.iops);

        self.elapsed_sec = self.elapsed_sec.wrapping_add(src.elapsed_sec);
        self.eta_sec = self.eta_sec.max(src.eta_sec);
    }
}

impl WireEncode for JobsEta {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.nr_running);
        buf.put_u32_le(self.nr_ramp);
        buf.put_u32_le(self.nr_pending);
        buf.put_u32_le(self.files_open);
        put_u32_slice(buf, &self.m_rate);
        put_u32_slice(buf, &self.t_rate);
        put_u32_slice(buf, &self.m_iops);
        put_u32_slice(buf, &self.t_iops);
        put_u32_slice(buf, &self.rate);
        put_u32_slice(buf, &self.iops);
        buf.put_u64_le(self.elapsed_sec);
        buf.put_u64_le(self.eta_sec);
        buf.put_u32_le(self.nr_threads);
        buf.put_slice(self.run_str.as_bytes());
        buf.put_u8(0);
    }
}

impl WireDecode for JobsEta {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            nr_running: reader.u32()?,
            nr_ramp: reader.u32()?,
            nr_pending: reader.u32()?,
            files_open: reader.u32()?,
            m_rate: reader.u32_array()?,
            t_rate: reader.u32_array()?,
            m_iops: reader.u32_array()?,
            t_iops: reader.u32_array()?,
            rate: reader.u32_array()?,
            iops: reader.u32_array()?,
            elapsed_sec: reader.u64()?,
            eta_sec: reader.u64()?,
            nr_threads: reader.u32()?,
            run_str: nul_terminated(reader.rest()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Opcode;

    #[test]
    fn test_merge_sums_counters_and_maxes_eta() {
        let mut total = JobsEta {
            nr_running: 5,
            iops: [100, 200],
            elapsed_sec: 10,
            eta_sec: 30,
            ..Default::default()
        };
        let other = JobsEta {
            nr_running: 3,
            iops: [50, 75],
            elapsed_sec: 12,
            eta_sec: 45,
            ..Default::default()
        };

        total.merge(&other);

        assert_eq!(total.nr_running, 8);
        assert_eq!(total.iops, [150, 275]);
        assert_eq!(total.elapsed_sec, 22);
        assert_eq!(total.eta_sec, 45);
    }

    #[test]
    fn test_codec_carries_run_string() {
        let eta = JobsEta {
            nr_running: 2,
            t_rate: [1, 2],
            eta_sec: 99,
            nr_threads: 2,
            run_str: "RW".into(),
            ..Default::default()
        };
        let payload = eta.to_payload();
        assert_eq!(JobsEta::from_payload(Opcode::Eta, &payload).unwrap(), eta);
    }
}
