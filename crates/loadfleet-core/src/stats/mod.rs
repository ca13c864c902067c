//! Statistics reported by agents and the formulas that merge them across the fleet
//!
//! - `thread`: per-job statistics (`IoStat`, `ThreadStat`, `GroupRunStats`)
//! - `eta`: progress snapshots (`JobsEta`)
//! - `disk`: block device counters (`DiskUtilStat`, `DiskUtilAgg`)

pub mod disk;
pub mod eta;
pub mod thread;

pub use disk::{DiskUtilAgg, DiskUtilStat, DISK_NAME_LEN};
pub use eta::JobsEta;
pub use thread::{
    GroupRunStats, IoStat, ThreadStat, DATA_DIRECTIONS, FLEET_SUMMARY_NAME, PLAT_BUCKETS,
};
