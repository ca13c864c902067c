//! Wire codec tests against hand-assembled little-endian byte images
//!
//! The expected bytes are built with explicit `to_le_bytes` calls so the tests hold on hosts
//! of either byte order.

use loadfleet_core::protocol::{
    CommandLine, DiskUtil, Frame, FrameHeader, Opcode, Payload, ThreadStatus, WireDecode,
    WireEncode, HEADER_LEN, MAX_PAYLOAD_LEN,
};
use loadfleet_core::stats::{DiskUtilAgg, DiskUtilStat, GroupRunStats, IoStat, ThreadStat};
use loadfleet_core::{JobsEta, ProtocolError, RequestTag};

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

// ----------------------------------------------------------------------------
// Frame Stream
// ----------------------------------------------------------------------------

#[test]
fn test_consecutive_frames_split_by_header() {
    let first = Frame::new(Opcode::Text, RequestTag::NONE, &b"one\n"[..]);
    let second = Frame::new(Opcode::Eta, RequestTag::new(12), vec![0u8; 40]);

    let mut stream = first.encode().unwrap().to_vec();
    stream.extend_from_slice(&second.encode().unwrap());

    let header = FrameHeader::decode(&stream, MAX_PAYLOAD_LEN).unwrap();
    let first_end = HEADER_LEN + header.payload_len as usize;
    assert_eq!(Frame::decode(&stream[..first_end]).unwrap(), first);
    assert_eq!(Frame::decode(&stream[first_end..]).unwrap(), second);
}

#[test]
fn test_truncated_frame_rejected() {
    let bytes = Frame::new(Opcode::Job, RequestTag::NONE, vec![7u8; 32])
        .encode()
        .unwrap();
    assert!(matches!(
        Frame::decode(&bytes[..bytes.len() - 1]),
        Err(ProtocolError::Truncated { .. })
    ));
}

// ----------------------------------------------------------------------------
// Endianness
// ----------------------------------------------------------------------------

#[test]
fn test_jobs_eta_decodes_from_le_image() {
    let mut image = Vec::new();
    for v in [4u32, 1, 2, 9] {
        put_u32(&mut image, v);
    }
    // m_rate, t_rate, m_iops, t_iops, rate, iops
    for v in 1u32..=12 {
        put_u32(&mut image, v * 1000);
    }
    put_u64(&mut image, 3600);
    put_u64(&mut image, 0x0102_0304_0506_0708);
    put_u32(&mut image, 4);
    image.extend_from_slice(b"RRWW\0");

    let eta = JobsEta::from_payload(Opcode::Eta, &image).unwrap();
    assert_eq!(eta.nr_running, 4);
    assert_eq!(eta.files_open, 9);
    assert_eq!(eta.m_rate, [1000, 2000]);
    assert_eq!(eta.iops, [11000, 12000]);
    assert_eq!(eta.elapsed_sec, 3600);
    assert_eq!(eta.eta_sec, 0x0102_0304_0506_0708);
    assert_eq!(eta.run_str, "RRWW");
}

#[test]
fn test_float_statistic_survives_byte_order_conversion() {
    let mean: f64 = 1.0 / 3.0;
    let s = 6.02214076e23;

    let mut image = Vec::new();
    put_u64(&mut image, 900);
    put_u64(&mut image, 3);
    put_u64(&mut image, 17);
    put_u64(&mut image, mean.to_bits());
    put_u64(&mut image, f64::to_bits(s));

    let stat = IoStat::from_payload(Opcode::ThreadStatus, &image).unwrap();
    assert_eq!(stat.mean.to_bits(), mean.to_bits());
    assert_eq!(stat.s.to_bits(), s.to_bits());
    assert_eq!(stat.to_payload().to_vec(), image);
}

#[test]
fn test_disk_util_layout() {
    let du = DiskUtil {
        stat: DiskUtilStat {
            name: "nvme0n1".into(),
            ios: [10, 20],
            sectors: [1 << 40, 2],
            io_ticks: 300,
            msec: 1000,
            ..Default::default()
        },
        agg: DiskUtilAgg {
            slavecount: 2,
            max_util: 87.5,
            ..Default::default()
        },
    };

    let payload = du.to_payload();
    // name + ios + merges + sectors + ticks + io_ticks + time_in_queue + msec
    let stat_len = 64 + 8 + 8 + 16 + 8 + 4 + 4 + 8;
    // ios + merges + sectors + ticks + io_ticks + time_in_queue + slavecount + max_util
    let agg_len = 8 + 8 + 16 + 8 + 4 + 4 + 4 + 8;
    assert_eq!(payload.len(), stat_len + agg_len);
    assert_eq!(&payload[..7], b"nvme0n1");

    let frame = Frame::new(Opcode::DiskUtil, RequestTag::NONE, payload);
    match Payload::decode(&frame).unwrap() {
        Payload::DiskUtil(decoded) => assert_eq!(*decoded, du),
        other => panic!("unexpected payload {:?}", other),
    }
}

// ----------------------------------------------------------------------------
// Composite Payloads
// ----------------------------------------------------------------------------

#[test]
fn test_thread_status_roundtrip_through_frame() {
    let mut ts = ThreadStat::default();
    ts.name = "randwrite".into();
    ts.groupid = 3;
    ts.members = 1;
    ts.lat_stat[0] = IoStat {
        max_val: 800,
        min_val: 12,
        samples: 1000,
        mean: 95.25,
        s: 1234.5,
    };
    ts.io_u_lat_m[11] = 2;
    ts.io_bytes = [4096, 8192];

    let status = ThreadStatus {
        ts,
        rs: GroupRunStats {
            max_run: [5000, 0],
            min_run: [4000, 0],
            kb_base: 1024,
            groupid: 3,
            ..Default::default()
        },
    };

    let frame = Frame::with_payload(Opcode::ThreadStatus, RequestTag::NONE, &status);
    let bytes = frame.encode().unwrap();
    let received = Frame::decode(&bytes).unwrap();
    match Payload::decode(&received).unwrap() {
        Payload::ThreadStatus(decoded) => assert_eq!(*decoded, status),
        other => panic!("unexpected payload {:?}", other),
    }
}

#[test]
fn test_command_line_in_jobline_frame() {
    let args = CommandLine::new(vec![
        "fio".to_string(),
        "--foo".to_string(),
        "--bar=1".to_string(),
    ]);
    let frame = Frame::with_payload(Opcode::JobLine, RequestTag::NONE, &args);
    match Payload::decode(&frame).unwrap() {
        Payload::JobLine(decoded) => assert_eq!(decoded, args),
        other => panic!("unexpected payload {:?}", other),
    }
}

#[test]
fn test_group_stats_rejects_trailing_bytes() {
    let mut payload = GroupRunStats::default().to_payload().to_vec();
    payload.push(0);
    let frame = Frame::new(Opcode::GroupStats, RequestTag::NONE, payload);
    assert!(matches!(
        Payload::decode(&frame),
        Err(ProtocolError::TrailingBytes { extra: 1, .. })
    ));
}
