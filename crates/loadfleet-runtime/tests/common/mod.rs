//! Shared fixtures for driving a fleet against in-process agents
//!
//! Agents live on the far end of `tokio::io::duplex` pipes, the clock is fully manual, and a
//! recording handler captures every callback so tests can assert on what the fleet reported.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use loadfleet_core::protocol::{
    Frame, Opcode, ProbeReply, StartAck, StopReport, TextLine, ThreadStatus, MAX_PAYLOAD_LEN,
};
use loadfleet_core::stats::{GroupRunStats, JobsEta, ThreadStat};
use loadfleet_core::{FleetConfig, RequestTag, TimeSource, Timestamp};
use loadfleet_runtime::{
    read_frame, write_frame, Connector, Fleet, FleetHandler, Peer, PeerAddress, Stream,
};
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

/// How long an agent waits for the controller before the test fails
pub const AGENT_WAIT: Duration = Duration::from_secs(2);

// ----------------------------------------------------------------------------
// Mock Time Source
// ----------------------------------------------------------------------------

/// Clock that only moves when the test says so
#[derive(Debug, Clone, Default)]
pub struct MockTimeSource {
    current_time: Arc<AtomicU64>,
}

impl MockTimeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, millis: u64) {
        self.current_time.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn set_time(&self, millis: u64) {
        self.current_time.store(millis, Ordering::SeqCst);
    }
}

impl TimeSource for MockTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.current_time.load(Ordering::SeqCst))
    }
}

// ----------------------------------------------------------------------------
// Duplex Connector
// ----------------------------------------------------------------------------

/// Connector handing out pre-registered in-memory pipes keyed by socket path
#[derive(Default)]
pub struct DuplexConnector {
    streams: Mutex<HashMap<PathBuf, DuplexStream>>,
}

impl DuplexConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register an agent reachable as `sock:<path>`
    pub fn agent(&self, path: &str) -> MockAgent {
        let (local, remote) = tokio::io::duplex(256 * 1024);
        self.streams
            .lock()
            .unwrap()
            .insert(PathBuf::from(path), local);
        MockAgent::new(remote)
    }
}

#[async_trait]
impl Connector for DuplexConnector {
    async fn connect(&self, address: &PeerAddress) -> io::Result<Stream> {
        let PeerAddress::Unix { path } = address else {
            return Err(io::Error::new(io::ErrorKind::Unsupported, "only sockets"));
        };
        let stream = self
            .streams
            .lock()
            .unwrap()
            .remove(Path::new(path))
            .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, "no agent"))?;
        Ok(Stream::from_io(stream))
    }
}

// ----------------------------------------------------------------------------
// Mock Agent
// ----------------------------------------------------------------------------

/// The remote end of one connection, scripted by the test
pub struct MockAgent {
    reader: ReadHalf<DuplexStream>,
    writer: WriteHalf<DuplexStream>,
}

impl MockAgent {
    fn new(stream: DuplexStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self { reader, writer }
    }

    /// Next frame from the controller
    pub async fn recv(&mut self) -> Frame {
        tokio::time::timeout(AGENT_WAIT, read_frame(&mut self.reader, MAX_PAYLOAD_LEN))
            .await
            .expect("controller went quiet")
            .expect("read failed")
            .expect("controller closed the stream")
    }

    /// Next frame, which must carry `opcode`
    pub async fn expect(&mut self, opcode: Opcode) -> Frame {
        let frame = self.recv().await;
        assert_eq!(frame.opcode, opcode, "unexpected frame {:?}", frame);
        frame
    }

    /// Whether the controller closed its side
    pub async fn closed(&mut self) -> bool {
        matches!(
            tokio::time::timeout(AGENT_WAIT, read_frame(&mut self.reader, MAX_PAYLOAD_LEN)).await,
            Ok(Ok(None)) | Ok(Err(_))
        )
    }

    pub async fn send(&mut self, frame: Frame) {
        write_frame(&mut self.writer, &frame)
            .await
            .expect("write failed");
    }

    /// Answer the connection probe with `hostname`
    pub async fn answer_probe(&mut self, hostname: &str) {
        let probe = self.expect(Opcode::Probe).await;
        let reply = ProbeReply {
            hostname: hostname.to_string(),
            version_major: 3,
            version_minor: 36,
            os: 1,
            arch: 3,
            bpp: 8,
            ..Default::default()
        };
        self.send(Frame::with_payload(Opcode::Probe, probe.tag, &reply))
            .await;
    }

    pub async fn send_start(&mut self, jobs: u32) {
        self.send(Frame::with_payload(
            Opcode::Start,
            RequestTag::NONE,
            &StartAck { jobs },
        ))
        .await;
    }

    pub async fn send_stop(&mut self, error: i32) {
        self.send(Frame::with_payload(
            Opcode::Stop,
            RequestTag::NONE,
            &StopReport { error },
        ))
        .await;
    }

    pub async fn send_text(&mut self, text: &str) {
        let line = TextLine {
            level: 0,
            text: text.to_string(),
            ..Default::default()
        };
        self.send(Frame::with_payload(Opcode::Text, RequestTag::NONE, &line))
            .await;
    }

    pub async fn send_command(&mut self, opcode: Opcode) {
        self.send(Frame::command(opcode)).await;
    }
}

/// Terminal report for one job
pub fn thread_status(job: &str, groupid: u32, read_bytes: u64) -> ThreadStatus {
    let mut status = ThreadStatus::default();
    status.ts.name = job.to_string();
    status.ts.groupid = groupid;
    status.ts.io_bytes = [read_bytes, 0];
    status.ts.total_run_time = 1000;
    status.rs.groupid = groupid;
    status.rs.min_run = [1000, 0];
    status.rs.max_run = [1000, 0];
    status.rs.io_kb = [read_bytes / 1024, 0];
    status
}

// ----------------------------------------------------------------------------
// Recording Handler
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Probe { peer: String, hostname: String },
    Text { peer: String, text: String, continued: bool },
    Start { peer: String, jobs: u32 },
    JobStart { peer: String },
    ThreadStatus { peer: String, job: String },
    Stop { peer: String, error: i32 },
    Quit { peer: String },
    Eta { peer: String, running: u32 },
    EtaMerged(JobsEta),
    Summary { name: String, members: u32, read_bytes: u64 },
    Timeout { peer: String },
}

/// Handler that appends every callback to a shared log
#[derive(Debug, Clone, Default)]
pub struct RecordingHandler {
    events: Arc<Mutex<Vec<Event>>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    /// Poll the log until `pred` holds for some event
    pub async fn wait_for(&self, pred: impl Fn(&Event) -> bool) {
        let deadline = tokio::time::Instant::now() + AGENT_WAIT;
        while tokio::time::Instant::now() < deadline {
            if self.events().iter().any(&pred) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("event never recorded: {:?}", self.events());
    }

    /// Poll the log until `count` events satisfy `pred`
    pub async fn wait_for_count(&self, count: usize, pred: impl Fn(&Event) -> bool) {
        let deadline = tokio::time::Instant::now() + AGENT_WAIT;
        while tokio::time::Instant::now() < deadline {
            if self.events().iter().filter(|e| pred(e)).count() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} events: {:?}", count, self.events());
    }
}

impl FleetHandler for RecordingHandler {
    fn on_text(&mut self, peer: &Peer, line: &TextLine) {
        self.push(Event::Text {
            peer: peer.display_name().to_string(),
            text: line.text.clone(),
            continued: peer.skip_newline(),
        });
    }

    fn on_thread_status(&mut self, peer: &Peer, status: &ThreadStatus) {
        self.push(Event::ThreadStatus {
            peer: peer.display_name().to_string(),
            job: status.ts.name.clone(),
        });
    }

    fn on_eta(&mut self, peer: &Peer, eta: &JobsEta) {
        self.push(Event::Eta {
            peer: peer.display_name().to_string(),
            running: eta.nr_running,
        });
    }

    fn on_eta_merged(&mut self, eta: &JobsEta) {
        self.push(Event::EtaMerged(eta.clone()));
    }

    fn on_fleet_summary(&mut self, ts: &ThreadStat, _gs: &GroupRunStats) {
        self.push(Event::Summary {
            name: ts.name.clone(),
            members: ts.members,
            read_bytes: ts.io_bytes[0],
        });
    }

    fn on_probe(&mut self, peer: &Peer, probe: &ProbeReply) {
        self.push(Event::Probe {
            peer: peer.display_name().to_string(),
            hostname: probe.hostname.clone(),
        });
    }

    fn on_start(&mut self, peer: &Peer, ack: &StartAck) {
        self.push(Event::Start {
            peer: peer.display_name().to_string(),
            jobs: ack.jobs,
        });
    }

    fn on_job_start(&mut self, peer: &Peer) {
        self.push(Event::JobStart {
            peer: peer.display_name().to_string(),
        });
    }

    fn on_stop(&mut self, peer: &Peer, report: &StopReport) {
        self.push(Event::Stop {
            peer: peer.display_name().to_string(),
            error: report.error,
        });
    }

    fn on_quit(&mut self, peer: &Peer) {
        self.push(Event::Quit {
            peer: peer.display_name().to_string(),
        });
    }

    fn on_timeout(&mut self, peer: &Peer) {
        self.push(Event::Timeout {
            peer: peer.display_name().to_string(),
        });
    }
}

// ----------------------------------------------------------------------------
// Fleet Construction
// ----------------------------------------------------------------------------

pub type Harness = (
    Fleet<MockTimeSource>,
    Vec<MockAgent>,
    RecordingHandler,
    MockTimeSource,
);

/// Fleet on a frozen mock clock with one registered agent per name
pub fn fleet_with_agents(names: &[&str]) -> Harness {
    fleet_with_config(names, FleetConfig::testing())
}

pub fn fleet_with_config(names: &[&str], config: FleetConfig) -> Harness {
    let connector = DuplexConnector::new();
    let handler = RecordingHandler::new();
    let clock = MockTimeSource::new();
    let mut fleet = Fleet::with_time_source(
        config,
        connector.clone(),
        Box::new(handler.clone()),
        clock.clone(),
    )
    .unwrap();

    let mut agents = Vec::new();
    for name in names {
        let path = format!("/agent/{}", name);
        agents.push(connector.agent(&path));
        fleet.add_client(&format!("sock:{}", path)).unwrap();
    }
    (fleet, agents, handler, clock)
}
