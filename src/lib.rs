//! # linelogd - A Shared Record Log over TCP
//!
//! linelogd accepts any number of TCP clients, reassembles newline-delimited
//! records from each byte stream, appends every complete record to a single
//! shared log file, and answers each record with the entire log as it stands.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              linelogd                                   │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│   Packet    │                  │
//! │  │ (Listener)  │    │  Handler    │    │  Assembler  │                  │
//! │  └──────┬──────┘    └──────┬──────┘    └─────────────┘                  │
//! │         │                  │                                            │
//! │         ▼                  ▼                                            │
//! │  ┌─────────────┐    ┌──────────────────────────────────────────────┐    │
//! │  │ Connection  │    │                 LogStore                     │    │
//! │  │  Registry   │    │   Mutex ──> append + snapshot ──> log file   │    │
//! │  └─────────────┘    └──────────────────────────────────────────────┘    │
//! │                                                                         │
//! │  SIGINT / SIGTERM ──> Lifecycle (watch) ──> handlers drain ──> exit     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use linelogd::config::Config;
//! use linelogd::server::Server;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = Server::bind(Config::default())?;
//!
//!     // Serve until Ctrl+C, then drain and remove the log
//!     let report = server
//!         .run(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!
//!     println!("served {} connections", report.connections_served);
//!     Ok(())
//! }
//! ```
//!
//! ## Wire Protocol
//!
//! ```text
//! client ──> "hello\n"          server appends, log = "hello\n"
//! client <── "hello\n"
//! other  ──> "world\n"          server appends, log = "hello\nworld\n"
//! other  <── "hello\nworld\n"
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: Record reassembly from arbitrary read boundaries
//! - [`storage`]: The shared log and its exclusive access window
//! - [`connection`]: Per-client handlers and the live connection registry
//! - [`server`]: Listener, supervisor, and lifecycle
//! - [`signal`]: SIGINT/SIGTERM as a future
//! - [`config`]: CLI and TOML configuration
//! - [`system`]: Daemonization and small process helpers
//!
//! ## Design Highlights
//!
//! ### One Critical Section
//!
//! A connection appends its record and snapshots the log under the same
//! guard, then sends the snapshot after releasing it. Appends never
//! interleave, readers never see half a record, and a slow client never
//! holds the lock while its socket drains.
//!
//! ### Cooperative Shutdown
//!
//! Signals are turned into a lifecycle transition on a `watch` channel.
//! Handlers finish the cycle they are in, the supervisor waits on the
//! registry, and only then is the log removed.

pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod signal;
pub mod storage;
pub mod system;

// Re-export commonly used types for convenience
pub use config::{Config, ConfigError, DEFAULT_PORT};
pub use connection::{handle_connection, ConnectionRegistry, ConnectionStats};
pub use protocol::{Frame, PacketAssembler};
pub use server::{Lifecycle, Server, ServerError, ShutdownReport};
pub use storage::{LogError, LogStore};

/// Version of linelogd
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
