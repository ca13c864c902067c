//! Disk utilization counters

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::errors::ProtocolError;
use crate::protocol::codec::{
    put_f64, put_fixed_str, put_u32_slice, put_u64_slice, WireDecode, WireEncode, WireReader,
};
use crate::stats::thread::DATA_DIRECTIONS;

/// Width of the device name field
pub const DISK_NAME_LEN: usize = 64;

/// Counters of one block device
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiskUtilStat {
    pub name: String,
    pub ios: [u32; DATA_DIRECTIONS],
    pub merges: [u32; DATA_DIRECTIONS],
    pub sectors: [u64; DATA_DIRECTIONS],
    pub ticks: [u32; DATA_DIRECTIONS],
    pub io_ticks: u32,
    pub time_in_queue: u32,
    pub msec: u64,
}

impl DiskUtilStat {
    /// Utilization over the sampling window, as a percentage
    pub fn utilization(&self) -> f64 {
        if self.msec == 0 {
            return 0.0;
        }
        (self.io_ticks as f64 * 100.0 / self.msec as f64).min(100.0)
    }
}

/// Counters summed over the slaves of a stacked device
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DiskUtilAgg {
    pub ios: [u32; DATA_DIRECTIONS],
    pub merges: [u32; DATA_DIRECTIONS],
    pub sectors: [u64; DATA_DIRECTIONS],
    pub ticks: [u32; DATA_DIRECTIONS],
    pub io_ticks: u32,
    pub time_in_queue: u32,
    pub slavecount: u32,
    pub max_util: f64,
}

impl WireEncode for DiskUtilStat {
    fn encode(&self, buf: &mut BytesMut) {
        put_fixed_str(buf, &self.name, DISK_NAME_LEN);
        put_u32_slice(buf, &self.ios);
        put_u32_slice(buf, &self.merges);
        put_u64_slice(buf, &self.sectors);
        put_u32_slice(buf, &self.ticks);
        buf.put_u32_le(self.io_ticks);
        buf.put_u32_le(self.time_in_queue);
        buf.put_u64_le(self.msec);
    }
}

impl WireDecode for DiskUtilStat {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            name: reader.fixed_str(DISK_NAME_LEN)?,
            ios: reader.u32_array()?,
            merges: reader.u32_array()?,
            sectors: reader.u64_array()?,
            ticks: reader.u32_array()?,
            io_ticks: reader.u32()?,
            time_in_queue: reader.u32()?,
            msec: reader.u64()?,
        })
    }
}

impl WireEncode for DiskUtilAgg {
    fn encode(&self, buf: &mut BytesMut) {
        put_u32_slice(buf, &self.ios);
        put_u32_slice(buf, &self.merges);
        put_u64_slice(buf, &self.sectors);
        put_u32_slice(buf, &self.ticks);
        buf.put_u32_le(self.io_ticks);
        buf.put_u32_le(self.time_in_queue);
        buf.put_u32_le(self.slavecount);
        put_f64(buf, self.max_util);
    }
}

impl WireDecode for DiskUtilAgg {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            ios: reader.u32_array()?,
            merges: reader.u32_array()?,
            sectors: reader.u64_array()?,
            ticks: reader.u32_array()?,
            io_ticks: reader.u32()?,
            time_in_queue: reader.u32()?,
            slavecount: reader.u32()?,
            max_util: reader.f64()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utilization_is_clamped() {
        let mut stat = DiskUtilStat {
            io_ticks: 500,
            msec: 1000,
            ..Default::default()
        };
        assert!((stat.utilization() - 50.0).abs() < f64::EPSILON);

        stat.io_ticks = 5000;
        assert!((stat.utilization() - 100.0).abs() < f64::EPSILON);

        stat.msec = 0;
        assert_eq!(stat.utilization(), 0.0);
    }
}
