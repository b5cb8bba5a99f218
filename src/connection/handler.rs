//! Connection Handler Module
//!
//! This module handles individual client connections. Each client gets its
//! own handler task that reads bytes, assembles records, appends them to the
//! shared log and replays the log back to the client.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects (TCP handshake)
//!        │
//!        ▼
//! 2. ConnectionHandler spawned, connection registered
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │      Main Loop               │
//!    │                              │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Read bytes from socket  │ │  Reading
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Assemble records        │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Lock log, append record │ │  Appending
//!    │  │ and take a snapshot     │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Send snapshot           │ │  Replaying
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │         [Loop back]          │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 4. Peer closes / error / shutdown requested
//!        │
//!        ▼
//! 5. Socket closed, connection deregistered
//! ```
//!
//! ## Shutdown
//!
//! A handler idling between records stops as soon as the server starts
//! draining. A handler holding part of a record gets `drain_timeout` to
//! receive the rest; a cycle that has already started always completes.

use crate::connection::registry::Registration;
use crate::protocol::{Frame, PacketAssembler};
use crate::server::Lifecycle;
use crate::storage::{LogError, LogStore};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Default size of the fixed receive buffer
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

/// Default grace period for finishing a partial record during shutdown
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Records appended to the shared log
    pub records_appended: AtomicU64,
    /// Records dropped by the size policy
    pub records_discarded: AtomicU64,
    /// Appends that failed
    pub append_failures: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_appended(&self) {
        self.records_appended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discarded(&self) {
        self.records_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn append_failed(&self) {
        self.append_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Counts a connection as active until dropped, even if its task panics.
#[derive(Debug)]
struct ActiveConnection {
    stats: Arc<ConnectionStats>,
}

impl ActiveConnection {
    fn open(stats: Arc<ConnectionStats>) -> Self {
        stats.connection_opened();
        Self { stats }
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        self.stats.connection_closed();
    }
}

/// Per-connection tunables.
#[derive(Debug, Clone, Copy)]
pub struct HandlerSettings {
    /// Size of the fixed receive buffer
    pub read_buffer_size: usize,
    /// Largest record accepted, delimiter included. `None` = unbounded
    pub max_record_size: Option<usize>,
    /// How long a partial record may keep the connection open after shutdown
    pub drain_timeout: Duration,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_record_size: None,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

/// Everything a handler shares with the server and its siblings.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    /// The shared log
    pub log: Arc<LogStore>,
    /// Connection statistics (shared)
    pub stats: Arc<ConnectionStats>,
    /// Server lifecycle, watched for the start of draining
    pub lifecycle: watch::Receiver<Lifecycle>,
    /// Per-connection tunables
    pub settings: HandlerSettings,
}

/// Handles a single client connection.
///
/// This struct owns the socket and the pending record buffer for one
/// connected client. Nothing in it is shared with other handlers.
pub struct ConnectionHandler<S> {
    /// The client stream
    stream: S,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Reassembles records from received chunks
    assembler: PacketAssembler,

    /// The shared log
    log: Arc<LogStore>,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,

    /// Server lifecycle
    lifecycle: watch::Receiver<Lifecycle>,

    settings: HandlerSettings,

    /// Set once shutdown was requested while a record was pending
    drain_deadline: Option<Instant>,

    _active: ActiveConnection,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new connection handler.
    ///
    /// # Arguments
    ///
    /// * `stream` - The client stream
    /// * `addr` - The client's socket address
    /// * `ctx` - Shared log, statistics and lifecycle
    pub fn new(stream: S, addr: SocketAddr, ctx: ConnectionContext) -> Self {
        let active = ActiveConnection::open(Arc::clone(&ctx.stats));

        Self {
            stream,
            addr,
            assembler: PacketAssembler::with_max_record_size(ctx.settings.max_record_size),
            log: ctx.log,
            stats: ctx.stats,
            lifecycle: ctx.lifecycle,
            settings: ctx.settings,
            drain_deadline: None,
            _active: active,
        }
    }

    /// Runs the connection until the peer leaves, an error occurs, or the
    /// server shuts down. The stream is closed before returning.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Accepted connection");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => debug!(client = %self.addr, "Connection stopped for shutdown"),
            Err(e) => match e {
                ConnectionError::ClientDisconnected => {
                    debug!(client = %self.addr, "Client disconnected")
                }
                ConnectionError::IoError(io_err)
                    if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
                {
                    debug!(client = %self.addr, "Connection reset by client")
                }
                _ => warn!(client = %self.addr, error = %e, "Connection error"),
            },
        }

        if let Err(e) = self.stream.shutdown().await {
            trace!(client = %self.addr, error = %e, "Socket shutdown failed");
        }

        info!(client = %self.addr, "Closed connection");
        result
    }

    /// The read-assemble-append-replay loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        let mut chunk = vec![0u8; self.settings.read_buffer_size.max(1)];

        loop {
            let n = match self.read_chunk(&mut chunk).await? {
                Some(n) => n,
                None => return Ok(()),
            };

            if n == 0 {
                // Connection closed by client
                if self.assembler.has_partial() {
                    return Err(ConnectionError::UnexpectedEof {
                        pending: self.assembler.pending(),
                    });
                }
                return Err(ConnectionError::ClientDisconnected);
            }

            self.stats.bytes_read(n);
            trace!(client = %self.addr, bytes = n, "Read data");

            self.assembler.extend(&chunk[..n]);
            self.process_frames().await?;
        }
    }

    /// Receives one chunk. Returns `None` when the handler should stop for
    /// shutdown.
    async fn read_chunk(&mut self, chunk: &mut [u8]) -> Result<Option<usize>, ConnectionError> {
        loop {
            if let Some(deadline) = self.drain_deadline {
                if !self.assembler.has_partial() {
                    return Ok(None);
                }

                return match tokio::time::timeout_at(deadline, self.stream.read(chunk)).await {
                    Ok(result) => Ok(Some(result?)),
                    Err(_) => {
                        warn!(
                            client = %self.addr,
                            pending = self.assembler.pending(),
                            "Drain timeout elapsed, dropping partial record"
                        );
                        Ok(None)
                    }
                };
            }

            // Bytes already received win over the drain signal
            tokio::select! {
                biased;

                result = self.stream.read(chunk) => return Ok(Some(result?)),
                _ = wait_for_draining(&mut self.lifecycle) => {
                    debug!(
                        client = %self.addr,
                        pending = self.assembler.pending(),
                        "Shutdown requested"
                    );
                    self.drain_deadline = Some(Instant::now() + self.settings.drain_timeout);
                }
            }
        }
    }

    /// Commits every complete record currently buffered, in arrival order.
    async fn process_frames(&mut self) -> Result<(), ConnectionError> {
        while let Some(frame) = self.assembler.next_frame() {
            match frame {
                Frame::Record(record) => self.commit(record).await?,
                Frame::Discarded(bytes) => {
                    warn!(
                        client = %self.addr,
                        bytes,
                        max = ?self.assembler.max_record_size(),
                        "Record exceeds maximum size, discarding"
                    );
                    self.stats.record_discarded();
                }
            }
        }
        Ok(())
    }

    /// Appends one record and replays the log to the client.
    async fn commit(&mut self, record: Bytes) -> Result<(), ConnectionError> {
        let snapshot = {
            let mut log = self.log.lock().await;

            match log.append(&record).await {
                Ok(()) => self.stats.record_appended(),
                Err(e) => {
                    warn!(client = %self.addr, error = %e, "Failed to append record");
                    self.stats.append_failed();
                }
            }

            log.read_all().await?
        };

        self.send_snapshot(&snapshot).await
    }

    /// Sends the full log snapshot to the client.
    async fn send_snapshot(&mut self, snapshot: &[u8]) -> Result<(), ConnectionError> {
        self.stream.write_all(snapshot).await?;
        self.stream.flush().await?;
        self.stats.bytes_written(snapshot.len());
        trace!(
            client = %self.addr,
            bytes = snapshot.len(),
            "Sent log snapshot"
        );
        Ok(())
    }
}

async fn wait_for_draining(lifecycle: &mut watch::Receiver<Lifecycle>) {
    // A dropped sender means the server is gone, which also ends the connection
    let _ = lifecycle.wait_for(Lifecycle::is_draining).await;
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The shared log could not be read for replay
    #[error("log error: {0}")]
    LogError(#[from] LogError),

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Client disconnected in the middle of a record
    #[error("Unexpected end of stream with {pending} bytes pending")]
    UnexpectedEof { pending: usize },
}

/// Handles a client connection.
///
/// This is a convenience function that creates a ConnectionHandler, runs it
/// to completion, and then drops `registration` so the connection leaves the
/// registry only after its socket is closed.
pub async fn handle_connection(
    stream: TcpStream,
    registration: Registration,
    ctx: ConnectionContext,
) {
    let addr = registration.addr();
    let handler = ConnectionHandler::new(stream, addr, ctx);

    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            ConnectionError::IoError(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, id = registration.id(), error = %e, "Connection ended with error");
            }
        }
    }

    drop(registration);
}
