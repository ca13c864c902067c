//! Per-job statistics and their cross-host merge
//!
//! A terminal `ThreadStat` report from each agent is folded into a fleet-wide accumulator.
//! Latency and bandwidth samples are combined with the parallel-variance formula so the
//! merged mean and variance equal those of the concatenated sample sets, whatever the order
//! the reports arrive in.

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::errors::ProtocolError;
use crate::protocol::codec::{
    put_f64, put_fixed_str, put_u32_slice, put_u64_slice, WireDecode, WireEncode, WireReader,
};

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Read and write directions
pub const DATA_DIRECTIONS: usize = 2;
/// Read, write and trim directions for the io unit totals
pub const IO_U_DIRECTIONS: usize = 3;
pub const JOB_NAME_LEN: usize = 128;
pub const JOB_DESC_LEN: usize = 256;
pub const PERCENTILE_LIST_LEN: usize = 20;
pub const IO_DEPTH_BUCKETS: usize = 7;
pub const LAT_USEC_BUCKETS: usize = 10;
pub const LAT_MSEC_BUCKETS: usize = 12;
pub const PLAT_BUCKETS: usize = 1216;

/// Name under which the merged report is delivered
pub const FLEET_SUMMARY_NAME: &str = "All clients";

// ----------------------------------------------------------------------------
// IoStat
// ----------------------------------------------------------------------------

/// Streaming summary of one sample series
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct IoStat {
    pub max_val: u64,
    pub min_val: u64,
    pub samples: u64,
    pub mean: f64,
    /// Sum of squared deviations from the mean
    pub s: f64,
}

impl IoStat {
    /// Fold `src` into `self`
    pub fn merge(&mut self, src: &IoStat) {
        if src.samples == 0 {
            return;
        }
        if self.samples == 0 {
            *self = *src;
            return;
        }

        self.max_val = self.max_val.max(src.max_val);
        self.min_val = self.min_val.min(src.min_val);

        let nd = self.samples as f64;
        let ns = src.samples as f64;
        let total = nd + ns;
        let delta = src.mean - self.mean;

        self.mean = (self.mean * nd + src.mean * ns) / total;
        self.s = self.s + src.s + delta * delta * nd * ns / total;
        self.samples += src.samples;
    }

    /// Sample variance, zero with fewer than two samples
    pub fn variance(&self) -> f64 {
        if self.samples < 2 {
            0.0
        } else {
            self.s / (self.samples - 1) as f64
        }
    }
}

impl WireEncode for IoStat {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.max_val);
        buf.put_u64_le(self.min_val);
        buf.put_u64_le(self.samples);
        put_f64(buf, self.mean);
        put_f64(buf, self.s);
    }
}

impl WireDecode for IoStat {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            max_val: reader.u64()?,
            min_val: reader.u64()?,
            samples: reader.u64()?,
            mean: reader.f64()?,
            s: reader.f64()?,
        })
    }
}

// ----------------------------------------------------------------------------
// ThreadStat
// ----------------------------------------------------------------------------

/// Final statistics of one job (or job group) on one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadStat {
    pub name: String,
    pub description: String,
    pub error: u32,
    pub groupid: u32,
    pub pid: u32,
    pub members: u32,

    pub clat_stat: [IoStat; DATA_DIRECTIONS],
    pub slat_stat: [IoStat; DATA_DIRECTIONS],
    pub lat_stat: [IoStat; DATA_DIRECTIONS],
    pub bw_stat: [IoStat; DATA_DIRECTIONS],

    pub usr_time: u64,
    pub sys_time: u64,
    pub ctx: u64,
    pub minf: u64,
    pub majf: u64,

    pub clat_percentiles: u64,
    pub percentile_list: [f64; PERCENTILE_LIST_LEN],

    pub io_u_map: [u32; IO_DEPTH_BUCKETS],
    pub io_u_submit: [u32; IO_DEPTH_BUCKETS],
    pub io_u_complete: [u32; IO_DEPTH_BUCKETS],
    pub io_u_lat_u: [u32; LAT_USEC_BUCKETS],
    pub io_u_lat_m: [u32; LAT_MSEC_BUCKETS],
    /// Completion latency histogram, `PLAT_BUCKETS` entries per direction
    pub io_u_plat: [Vec<u32>; DATA_DIRECTIONS],
    pub total_io_u: [u64; IO_U_DIRECTIONS],
    pub short_io_u: [u64; IO_U_DIRECTIONS],
    pub total_submit: u64,
    pub total_complete: u64,

    pub io_bytes: [u64; DATA_DIRECTIONS],
    pub runtime: [u64; DATA_DIRECTIONS],
    pub total_run_time: u64,

    pub continue_on_error: u16,
    pub total_err_count: u64,
    pub first_error: u32,
    pub kb_base: u32,
}

impl Default for ThreadStat {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            error: 0,
            groupid: 0,
            pid: 0,
            members: 0,
            clat_stat: Default::default(),
            slat_stat: Default::default(),
            lat_stat: Default::default(),
            bw_stat: Default::default(),
            usr_time: 0,
            sys_time: 0,
            ctx: 0,
            minf: 0,
            majf: 0,
            clat_percentiles: 0,
            percentile_list: [0.0; PERCENTILE_LIST_LEN],
            io_u_map: [0; IO_DEPTH_BUCKETS],
            io_u_submit: [0; IO_DEPTH_BUCKETS],
            io_u_complete: [0; IO_DEPTH_BUCKETS],
            io_u_lat_u: [0; LAT_USEC_BUCKETS],
            io_u_lat_m: [0; LAT_MSEC_BUCKETS],
            io_u_plat: [vec![0; PLAT_BUCKETS], vec![0; PLAT_BUCKETS]],
            total_io_u: [0; IO_U_DIRECTIONS],
            short_io_u: [0; IO_U_DIRECTIONS],
            total_submit: 0,
            total_complete: 0,
            io_bytes: [0; DATA_DIRECTIONS],
            runtime: [0; DATA_DIRECTIONS],
            total_run_time: 0,
            continue_on_error: 0,
            total_err_count: 0,
            first_error: 0,
            kb_base: 0,
        }
    }
}

fn add_u32(dst: &mut [u32], src: &[u32]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d = d.wrapping_add(*s);
    }
}

fn add_u64(dst: &mut [u64], src: &[u64]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d = d.wrapping_add(*s);
    }
}

impl ThreadStat {
    /// Accumulator for a fleet-wide summary
    pub fn fleet_accumulator() -> Self {
        Self {
            name: FLEET_SUMMARY_NAME.to_string(),
            ..Self::default()
        }
    }

    /// Fold another report into `self`
    ///
    /// Counters and histograms are summed and runtime takes the longest direction time.
    /// `members` and `groupid` are left to the caller, which knows how many reports it has
    /// merged.
    pub fn merge(&mut self, src: &ThreadStat) {
        for dir in 0..DATA_DIRECTIONS {
            self.clat_stat[dir].merge(&src.clat_stat[dir]);
            self.slat_stat[dir].merge(&src.slat_stat[dir]);
            self.lat_stat[dir].merge(&src.lat_stat[dir]);
            self.bw_stat[dir].merge(&src.bw_stat[dir]);

            self.io_bytes[dir] = self.io_bytes[dir].wrapping_add(src.io_bytes[dir]);
            self.runtime[dir] = self.runtime[dir].max(src.runtime[dir]);
            add_u32(&mut self.io_u_plat[dir], &src.io_u_plat[dir]);
        }

        self.usr_time = self.usr_time.wrapping_add(src.usr_time);
        self.sys_time = self.sys_time.wrapping_add(src.sys_time);
        self.ctx = self.ctx.wrapping_add(src.ctx);
        self.minf = self.minf.wrapping_add(src.minf);
        self.majf = self.majf.wrapping_add(src.majf);

        add_u32(&mut self.io_u_map, &src.io_u_map);
        add_u32(&mut self.io_u_submit, &src.io_u_submit);
        add_u32(&mut self.io_u_complete, &src.io_u_complete);
        add_u32(&mut self.io_u_lat_u, &src.io_u_lat_u);
        add_u32(&mut self.io_u_lat_m, &src.io_u_lat_m);
        add_u64(&mut self.total_io_u, &src.total_io_u);
        add_u64(&mut self.short_io_u, &src.short_io_u);

        self.total_submit = self.total_submit.wrapping_add(src.total_submit);
        self.total_complete = self.total_complete.wrapping_add(src.total_complete);
        self.total_run_time = self.total_run_time.wrapping_add(src.total_run_time);
        self.total_err_count = self.total_err_count.wrapping_add(src.total_err_count);

        if self.error == 0 && src.error != 0 {
            self.error = src.error;
            self.first_error = src.first_error;
        }
        if self.kb_base == 0 {
            self.kb_base = src.kb_base;
        }
        if self.clat_percentiles == 0 && src.clat_percentiles != 0 {
            self.clat_percentiles = src.clat_percentiles;
            self.percentile_list = src.percentile_list;
        }
        self.continue_on_error |= src.continue_on_error;
    }
}

impl WireEncode for ThreadStat {
    fn encode(&self, buf: &mut BytesMut) {
        put_fixed_str(buf, &self.name, JOB_NAME_LEN);
        put_fixed_str(buf, &self.description, JOB_DESC_LEN);
        buf.put_u32_le(self.error);
        buf.put_u32_le(self.groupid);
        buf.put_u32_le(self.pid);
        buf.put_u32_le(self.members);

        for dir in 0..DATA_DIRECTIONS {
            self.clat_stat[dir].encode(buf);
            self.slat_stat[dir].encode(buf);
            self.lat_stat[dir].encode(buf);
            self.bw_stat[dir].encode(buf);
        }

        buf.put_u64_le(self.usr_time);
        buf.put_u64_le(self.sys_time);
        buf.put_u64_le(self.ctx);
        buf.put_u64_le(self.minf);
        buf.put_u64_le(self.majf);
        buf.put_u64_le(self.clat_percentiles);
        for p in &self.percentile_list {
            put_f64(buf, *p);
        }

        put_u32_slice(buf, &self.io_u_map);
        put_u32_slice(buf, &self.io_u_submit);
        put_u32_slice(buf, &self.io_u_complete);
        put_u32_slice(buf, &self.io_u_lat_u);
        put_u32_slice(buf, &self.io_u_lat_m);
        for dir in 0..DATA_DIRECTIONS {
            // Short histograms are zero-filled so the layout stays fixed
            let plat = &self.io_u_plat[dir];
            let len = plat.len().min(PLAT_BUCKETS);
            put_u32_slice(buf, &plat[..len]);
            buf.put_bytes(0, (PLAT_BUCKETS - len) * 4);
        }
        put_u64_slice(buf, &self.total_io_u);
        put_u64_slice(buf, &self.short_io_u);
        buf.put_u64_le(self.total_submit);
        buf.put_u64_le(self.total_complete);

        put_u64_slice(buf, &self.io_bytes);
        put_u64_slice(buf, &self.runtime);
        buf.put_u64_le(self.total_run_time);
        buf.put_u16_le(self.continue_on_error);
        buf.put_u64_le(self.total_err_count);
        buf.put_u32_le(self.first_error);
        buf.put_u32_le(self.kb_base);
    }
}

impl WireDecode for ThreadStat {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        let mut ts = ThreadStat {
            name: reader.fixed_str(JOB_NAME_LEN)?,
            description: reader.fixed_str(JOB_DESC_LEN)?,
            error: reader.u32()?,
            groupid: reader.u32()?,
            pid: reader.u32()?,
            members: reader.u32()?,
            ..ThreadStat::default()
        };

        for dir in 0..DATA_DIRECTIONS {
            ts.clat_stat[dir] = IoStat::decode(reader)?;
            ts.slat_stat[dir] = IoStat::decode(reader)?;
            ts.lat_stat[dir] = IoStat::decode(reader)?;
            ts.bw_stat[dir] = IoStat::decode(reader)?;
        }

        ts.usr_time = reader.u64()?;
        ts.sys_time = reader.u64()?;
        ts.ctx = reader.u64()?;
        ts.minf = reader.u64()?;
        ts.majf = reader.u64()?;
        ts.clat_percentiles = reader.u64()?;
        ts.percentile_list = reader.f64_array()?;

        ts.io_u_map = reader.u32_array()?;
        ts.io_u_submit = reader.u32_array()?;
        ts.io_u_complete = reader.u32_array()?;
        ts.io_u_lat_u = reader.u32_array()?;
        ts.io_u_lat_m = reader.u32_array()?;
        for dir in 0..DATA_DIRECTIONS {
            for bucket in ts.io_u_plat[dir].iter_mut() {
                *bucket = reader.u32()?;
            }
        }
        ts.total_io_u = reader.u64_array()?;
        ts.short_io_u = reader.u64_array()?;
        ts.total_submit = reader.u64()?;
        ts.total_complete = reader.u64()?;

        ts.io_bytes = reader.u64_array()?;
        ts.runtime = reader.u64_array()?;
        ts.total_run_time = reader.u64()?;
        ts.continue_on_error = reader.u16()?;
        ts.total_err_count = reader.u64()?;
        ts.first_error = reader.u32()?;
        ts.kb_base = reader.u32()?;

        Ok(ts)
    }
}

// ----------------------------------------------------------------------------
// GroupRunStats
// ----------------------------------------------------------------------------

/// Aggregate run statistics of one reporting group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GroupRunStats {
    pub max_run: [u64; DATA_DIRECTIONS],
    pub min_run: [u64; DATA_DIRECTIONS],
    pub max_bw: [u64; DATA_DIRECTIONS],
    pub min_bw: [u64; DATA_DIRECTIONS],
    pub io_kb: [u64; DATA_DIRECTIONS],
    pub agg: [u64; DATA_DIRECTIONS],
    pub kb_base: u32,
    pub groupid: u32,
}

impl GroupRunStats {
    /// Accumulator whose minimums are replaced by the first real value
    pub fn fleet_accumulator() -> Self {
        Self {
            min_run: [u64::MAX; DATA_DIRECTIONS],
            min_bw: [u64::MAX; DATA_DIRECTIONS],
            ..Self::default()
        }
    }

    pub fn merge(&mut self, src: &GroupRunStats) {
        for dir in 0..DATA_DIRECTIONS {
            self.max_run[dir] = self.max_run[dir].max(src.max_run[dir]);
            self.max_bw[dir] = self.max_bw[dir].max(src.max_bw[dir]);

            self.min_run[dir] = min_nonzero(self.min_run[dir], src.min_run[dir]);
            self.min_bw[dir] = min_nonzero(self.min_bw[dir], src.min_bw[dir]);

            self.io_kb[dir] = self.io_kb[dir].wrapping_add(src.io_kb[dir]);
            self.agg[dir] = self.agg[dir].wrapping_add(src.agg[dir]);
        }

        if self.kb_base == 0 {
            self.kb_base = src.kb_base;
        }
    }
}

/// Minimum where zero on either side means "no value"
fn min_nonzero(a: u64, b: u64) -> u64 {
    match (a, b) {
        (0, v) | (v, 0) => v,
        (a, b) => a.min(b),
    }
}

impl WireEncode for GroupRunStats {
    fn encode(&self, buf: &mut BytesMut) {
        for dir in 0..DATA_DIRECTIONS {
            buf.put_u64_le(self.max_run[dir]);
            buf.put_u64_le(self.min_run[dir]);
            buf.put_u64_le(self.max_bw[dir]);
            buf.put_u64_le(self.min_bw[dir]);
            buf.put_u64_le(self.io_kb[dir]);
            buf.put_u64_le(self.agg[dir]);
        }
        buf.put_u32_le(self.kb_base);
        buf.put_u32_le(self.groupid);
    }
}

impl WireDecode for GroupRunStats {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        let mut gs = GroupRunStats::default();
        for dir in 0..DATA_DIRECTIONS {
            gs.max_run[dir] = reader.u64()?;
            gs.min_run[dir] = reader.u64()?;
            gs.max_bw[dir] = reader.u64()?;
            gs.min_bw[dir] = reader.u64()?;
            gs.io_kb[dir] = reader.u64()?;
            gs.agg[dir] = reader.u64()?;
        }
        gs.kb_base = reader.u32()?;
        gs.groupid = reader.u32()?;
        Ok(gs)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Opcode;

    fn series(values: &[f64]) -> IoStat {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let s = values.iter().map(|v| (v - mean) * (v - mean)).sum();
        IoStat {
            max_val: values.iter().cloned().fold(f64::MIN, f64::max) as u64,
            min_val: values.iter().cloned().fold(f64::MAX, f64::min) as u64,
            samples: values.len() as u64,
            mean,
            s,
        }
    }

    #[test]
    fn test_io_stat_merge_matches_concatenation() {
        let a = [10.0, 20.0, 30.0];
        let b = [5.0, 45.0];
        let all = [10.0, 20.0, 30.0, 5.0, 45.0];

        let mut merged = series(&a);
        merged.merge(&series(&b));
        let expected = series(&all);

        assert_eq!(merged.samples, 5);
        assert_eq!(merged.min_val, 5);
        assert_eq!(merged.max_val, 45);
        assert!((merged.mean - expected.mean).abs() < 1e-9);
        assert!((merged.s - expected.s).abs() < 1e-9);
    }

    #[test]
    fn test_io_stat_empty_cases() {
        let src = series(&[3.0, 4.0]);

        let mut empty = IoStat::default();
        empty.merge(&src);
        assert_eq!(empty, src);

        let mut dst = src;
        dst.merge(&IoStat::default());
        assert_eq!(dst, src);
    }

    #[test]
    fn test_thread_stat_merge_sums_and_maxes() {
        let mut a = ThreadStat::default();
        a.io_bytes = [100, 200];
        a.runtime = [1000, 500];
        a.io_u_plat[0][10] = 3;
        a.total_io_u = [1, 2, 3];

        let mut b = ThreadStat::default();
        b.io_bytes = [1, 2];
        b.runtime = [700, 900];
        b.io_u_plat[0][10] = 4;
        b.total_io_u = [10, 20, 30];
        b.error = 5;
        b.first_error = 5;

        let mut acc = ThreadStat::fleet_accumulator();
        acc.merge(&a);
        acc.merge(&b);

        assert_eq!(acc.name, FLEET_SUMMARY_NAME);
        assert_eq!(acc.io_bytes, [101, 202]);
        assert_eq!(acc.runtime, [1000, 900]);
        assert_eq!(acc.io_u_plat[0][10], 7);
        assert_eq!(acc.total_io_u, [11, 22, 33]);
        assert_eq!(acc.error, 5);
    }

    #[test]
    fn test_group_stats_merge() {
        let a = GroupRunStats {
            max_run: [100, 10],
            min_run: [50, 0],
            max_bw: [9, 9],
            min_bw: [3, 3],
            io_kb: [1, 1],
            agg: [2, 2],
            kb_base: 1024,
            groupid: 0,
        };
        let b = GroupRunStats {
            max_run: [80, 20],
            min_run: [40, 7],
            max_bw: [12, 1],
            min_bw: [4, 1],
            io_kb: [5, 5],
            agg: [6, 6],
            kb_base: 1024,
            groupid: 0,
        };

        let mut acc = GroupRunStats::fleet_accumulator();
        acc.merge(&a);
        acc.merge(&b);

        assert_eq!(acc.max_run, [100, 20]);
        assert_eq!(acc.min_run, [40, 7]);
        assert_eq!(acc.max_bw, [12, 9]);
        assert_eq!(acc.min_bw, [3, 1]);
        assert_eq!(acc.io_kb, [6, 6]);
        assert_eq!(acc.agg, [8, 8]);
        assert_eq!(acc.kb_base, 1024);
    }

    #[test]
    fn test_group_stats_zero_minimum_is_order_independent() {
        let idle = GroupRunStats {
            min_run: [0, 5],
            min_bw: [0, 2],
            ..Default::default()
        };
        let busy = GroupRunStats {
            min_run: [7, 5],
            min_bw: [3, 2],
            ..Default::default()
        };

        let mut forward = GroupRunStats::fleet_accumulator();
        forward.merge(&idle);
        forward.merge(&busy);
        let mut reverse = GroupRunStats::fleet_accumulator();
        reverse.merge(&busy);
        reverse.merge(&idle);

        assert_eq!(forward, reverse);
        assert_eq!(forward.min_run, [7, 5]);
        assert_eq!(forward.min_bw, [3, 2]);

        // a plain accumulator gives the same answer
        let mut plain = GroupRunStats::default();
        plain.merge(&idle);
        plain.merge(&busy);
        assert_eq!(plain.min_run, [7, 5]);
    }

    #[test]
    fn test_thread_stat_codec_preserves_histogram() {
        let mut ts = ThreadStat::default();
        ts.name = "seq-read".into();
        ts.description = "sequential read".into();
        ts.clat_stat[1] = series(&[1.5, 2.5, 9.25]);
        ts.io_u_plat[1][PLAT_BUCKETS - 1] = 42;
        ts.percentile_list[3] = 99.9;
        ts.continue_on_error = 1;
        ts.kb_base = 1000;

        let payload = ts.to_payload();
        let decoded = ThreadStat::from_payload(Opcode::ThreadStatus, &payload).unwrap();
        assert_eq!(decoded, ts);
    }
}
