//! Listener and Supervisor
//!
//! Owns the listening socket, the shared log and the connection registry.
//! Accepts clients, spawns one handler task per connection, and drives the
//! graceful shutdown sequence.
//!
//! ## Lifecycle
//!
//! ```text
//! Starting ──bind/listen ok──> Listening ──shutdown signal──> Draining ──> Terminated
//!                                  │                             │
//!                            accept + spawn               wait_for_all()
//!                                                         destroy log
//! ```
//!
//! The lifecycle is published on a `watch` channel. Handlers subscribe to it
//! and stop cooperatively once it reaches `Draining`.

use crate::config::Config;
use crate::connection::{
    handle_connection, ConnectionContext, ConnectionRegistry, ConnectionStats,
};
use crate::storage::{LogError, LogStore};
use socket2::{Domain, Protocol, Socket, Type};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// First pause after a failed accept
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);

/// Longest pause between failed accepts
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Process-wide server state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Socket not yet listening
    Starting,
    /// Accepting connections
    Listening,
    /// Shutdown requested; no new accepts, handlers finishing
    Draining,
    /// Handlers joined, log destroyed
    Terminated,
}

impl Lifecycle {
    /// Returns true once shutdown has begun.
    pub fn is_draining(&self) -> bool {
        matches!(self, Lifecycle::Draining | Lifecycle::Terminated)
    }
}

/// Fatal startup and shutdown errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to create socket: {0}")]
    Socket(#[source] io::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("failed to listen: {0}")]
    Listen(#[source] io::Error),

    #[error(transparent)]
    Log(#[from] LogError),
}

/// Totals reported once the server has shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    pub connections_served: u64,
    pub records_appended: u64,
    pub records_discarded: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl ShutdownReport {
    fn from_stats(stats: &ConnectionStats) -> Self {
        Self {
            connections_served: stats.connections_accepted.load(Ordering::Relaxed),
            records_appended: stats.records_appended.load(Ordering::Relaxed),
            records_discarded: stats.records_discarded.load(Ordering::Relaxed),
            bytes_read: stats.bytes_read.load(Ordering::Relaxed),
            bytes_written: stats.bytes_written.load(Ordering::Relaxed),
        }
    }
}

/// The listener/supervisor.
pub struct Server {
    config: Config,
    listener: std::net::TcpListener,
    log: Arc<LogStore>,
    registry: Arc<ConnectionRegistry>,
    stats: Arc<ConnectionStats>,
    lifecycle: watch::Sender<Lifecycle>,
}

impl Server {
    /// Creates the listening socket and the shared log.
    ///
    /// Runs without an async runtime, so it can be called before the process
    /// daemonizes. Anything acquired before a failure is released on return.
    pub fn bind(config: Config) -> Result<Self, ServerError> {
        let (lifecycle, _) = watch::channel(Lifecycle::Starting);

        let listener = create_listener(config.listen_addr(), config.backlog)?;
        let log = LogStore::create(&config.data_file)?;

        lifecycle.send_replace(Lifecycle::Listening);
        info!(
            address = %config.listen_addr(),
            backlog = config.backlog,
            data_file = %log.path().display(),
            "Server listening"
        );

        Ok(Self {
            config,
            listener,
            log: Arc::new(log),
            registry: Arc::new(ConnectionRegistry::new()),
            stats: Arc::new(ConnectionStats::new()),
            lifecycle,
        })
    }

    /// The address actually bound (useful with port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Subscribes to lifecycle transitions.
    pub fn lifecycle(&self) -> watch::Receiver<Lifecycle> {
        self.lifecycle.subscribe()
    }

    pub fn stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.stats)
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn log(&self) -> Arc<LogStore> {
        Arc::clone(&self.log)
    }

    /// Serves connections until `shutdown` completes, then drains.
    ///
    /// Shutdown stops accepting, waits for every handler to finish, and
    /// removes the shared log. Must be called inside a tokio runtime.
    pub async fn run<F>(self, shutdown: F) -> Result<ShutdownReport, ServerError>
    where
        F: Future,
    {
        let listener = TcpListener::from_std(self.listener).map_err(ServerError::Listen)?;

        tokio::select! {
            _ = accept_loop(
                &listener,
                &self.config,
                &self.log,
                &self.registry,
                &self.stats,
                &self.lifecycle,
            ) => {}
            _ = shutdown => {}
        }

        info!("Shutdown initiated, no longer accepting connections");
        self.lifecycle.send_replace(Lifecycle::Draining);
        drop(listener);

        let live = self.registry.len();
        if live > 0 {
            info!(connections = live, "Waiting for connections to finish");
        }
        self.registry.wait_for_all().await;

        let destroyed = self.log.destroy().await;
        self.lifecycle.send_replace(Lifecycle::Terminated);

        let report = ShutdownReport::from_stats(&self.stats);
        info!(
            connections = report.connections_served,
            records = report.records_appended,
            discarded = report.records_discarded,
            "Server shutdown complete"
        );

        destroyed?;
        Ok(report)
    }
}

/// Main loop that accepts incoming connections
async fn accept_loop(
    listener: &TcpListener,
    config: &Config,
    log: &Arc<LogStore>,
    registry: &Arc<ConnectionRegistry>,
    stats: &Arc<ConnectionStats>,
    lifecycle: &watch::Sender<Lifecycle>,
) {
    let settings = config.handler_settings();
    let mut failures = 0u32;

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                failures = 0;
                let registration = registry.register(addr);
                debug!(client = %addr, id = registration.id(), "Spawning handler");

                let ctx = ConnectionContext {
                    log: Arc::clone(log),
                    stats: Arc::clone(stats),
                    lifecycle: lifecycle.subscribe(),
                    settings,
                };

                // Spawn a task to handle this connection
                tokio::spawn(handle_connection(stream, registration, ctx));
            }
            Err(e) => {
                // Shutdown cancels this loop before the listener closes, so
                // nothing here is a teardown artifact
                failures = failures.saturating_add(1);
                let pause = accept_backoff(failures);
                error!(error = %e, failures, ?pause, "Failed to accept connection");
                tokio::time::sleep(pause).await;
            }
        }
    }
}

/// Pause before retrying after `failures` consecutive accept errors.
fn accept_backoff(failures: u32) -> Duration {
    let doublings = failures.saturating_sub(1).min(16);
    ACCEPT_BACKOFF_MIN
        .saturating_mul(1 << doublings)
        .min(ACCEPT_BACKOFF_MAX)
}

/// Create a TCP listener with SO_REUSEADDR so a restart can rebind at once.
fn create_listener(addr: SocketAddr, backlog: i32) -> Result<std::net::TcpListener, ServerError> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(ServerError::Socket)?;

    socket.set_reuse_address(true).map_err(ServerError::Socket)?;
    socket.set_nonblocking(true).map_err(ServerError::Socket)?;
    socket
        .bind(&addr.into())
        .map_err(|source| ServerError::Bind { addr, source })?;
    socket.listen(backlog).map_err(ServerError::Listen)?;

    Ok(socket.into())
}
