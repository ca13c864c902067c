//! Stream transport to agents
//!
//! A `Connector` opens a byte stream to a `PeerAddress`. The fleet splits each stream: the
//! write half stays with the control task inside `Connection`, the read half moves into a
//! reader task that turns bytes into frames and forwards them over the fleet's inbound
//! channel. Dropping a `Connection` closes the write half and aborts its reader.

use std::fmt;
use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use loadfleet_core::protocol::{Frame, FrameHeader, HEADER_LEN};
use loadfleet_core::ConnectionId;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::address::PeerAddress;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

// ----------------------------------------------------------------------------
// Connector
// ----------------------------------------------------------------------------

/// An opened stream, already split into halves
pub struct Stream {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
}

impl Stream {
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    /// Split a bidirectional stream such as `tokio::io::DuplexStream`
    pub fn from_io(io: impl AsyncRead + AsyncWrite + Send + 'static) -> Self {
        let (reader, writer) = tokio::io::split(io);
        Self::new(reader, writer)
    }
}

/// Opens transport streams to agents
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &PeerAddress) -> io::Result<Stream>;
}

/// TCP and Unix domain socket connector
#[derive(Debug, Clone, Copy, Default)]
pub struct NetConnector;

#[async_trait]
impl Connector for NetConnector {
    async fn connect(&self, address: &PeerAddress) -> io::Result<Stream> {
        match address {
            PeerAddress::Inet { addr, .. } => {
                let stream = tokio::net::TcpStream::connect(addr).await?;
                stream.set_nodelay(true)?;
                let (reader, writer) = stream.into_split();
                Ok(Stream::new(reader, writer))
            }
            #[cfg(unix)]
            PeerAddress::Unix { path } => {
                let stream = tokio::net::UnixStream::connect(path).await?;
                let (reader, writer) = stream.into_split();
                Ok(Stream::new(reader, writer))
            }
            #[cfg(not(unix))]
            PeerAddress::Unix { .. } => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "local sockets are not supported on this platform",
            )),
        }
    }
}

// ----------------------------------------------------------------------------
// Framing
// ----------------------------------------------------------------------------

fn invalid_data(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

/// Read one frame; `Ok(None)` on a clean end of stream between frames
pub async fn read_frame<R>(reader: &mut R, max_payload_len: usize) -> io::Result<Option<Frame>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream ended inside a frame header",
            ));
        }
        filled += n;
    }

    let header = FrameHeader::decode(&header, max_payload_len).map_err(invalid_data)?;
    let mut payload = vec![0u8; header.payload_len as usize];
    reader.read_exact(&mut payload).await?;
    header.verify_payload(&payload).map_err(invalid_data)?;

    Ok(Some(Frame::from_parts(&header, Bytes::from(payload))))
}

/// Write one frame and flush it
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let bytes = frame.encode().map_err(invalid_data)?;
    writer.write_all(&bytes).await?;
    writer.flush().await
}

// ----------------------------------------------------------------------------
// Inbound Events
// ----------------------------------------------------------------------------

/// What a reader task observed on its connection
#[derive(Debug)]
pub enum InboundKind {
    Frame(Frame),
    /// The agent closed the stream
    Closed,
    /// Reading or framing failed; the stream cannot be resynchronised
    Failed(io::Error),
}

/// Event forwarded from a reader task to the control task
#[derive(Debug)]
pub struct InboundEvent {
    pub connection: ConnectionId,
    pub kind: InboundKind,
}

async fn reader_loop(
    connection: ConnectionId,
    mut reader: BoxedReader,
    max_payload_len: usize,
    events: mpsc::Sender<InboundEvent>,
) {
    loop {
        let kind = match read_frame(&mut reader, max_payload_len).await {
            Ok(Some(frame)) => {
                trace!(%connection, opcode = ?frame.opcode, len = frame.payload.len(), "frame received");
                InboundKind::Frame(frame)
            }
            Ok(None) => InboundKind::Closed,
            Err(err) => InboundKind::Failed(err),
        };
        let last = !matches!(kind, InboundKind::Frame(_));
        if events.send(InboundEvent { connection, kind }).await.is_err() {
            debug!(%connection, "inbound channel closed, stopping reader");
            return;
        }
        if last {
            return;
        }
    }
}

// ----------------------------------------------------------------------------
// Connection
// ----------------------------------------------------------------------------

/// Live connection to one agent
pub struct Connection {
    id: ConnectionId,
    writer: BoxedWriter,
    reader: JoinHandle<()>,
}

impl Connection {
    /// Take ownership of `stream` and start its reader task
    pub fn spawn(
        id: ConnectionId,
        stream: Stream,
        max_payload_len: usize,
        events: mpsc::Sender<InboundEvent>,
    ) -> Self {
        let reader = tokio::spawn(reader_loop(id, stream.reader, max_payload_len, events));
        Self {
            id,
            writer: stream.writer,
            reader,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub async fn send(&mut self, frame: &Frame) -> io::Result<()> {
        write_frame(&mut self.writer, frame).await
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("reader_finished", &self.reader.is_finished())
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
