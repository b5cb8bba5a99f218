//! Storage Module
//!
//! This module provides the shared record log that every connection appends
//! to and replays from.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        LogStore                             │
//! │  ┌───────────────────────────────────────────────────────┐  │
//! │  │ Mutex<LogState>  ──>  file handle + committed length  │  │
//! │  └───────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//!            ▲                ▲                ▲
//!            │ LogGuard       │ LogGuard       │ LogGuard
//!       connection 1     connection 2     connection N
//! ```
//!
//! ## Features
//!
//! - **Exclusive access window**: append and snapshot under one guard
//! - **Rollback**: a failed append is truncated away
//! - **Ephemeral**: created (truncated) at startup, unlinked at shutdown
//!
//! ## Example
//!
//! ```no_run
//! use linelogd::storage::LogStore;
//!
//! # async fn demo() -> Result<(), linelogd::storage::LogError> {
//! let store = LogStore::create("/var/tmp/aesdsocketdata")?;
//!
//! let snapshot = {
//!     let mut guard = store.lock().await;
//!     guard.append(b"hello\n").await?;
//!     guard.read_all().await?
//! };
//! assert_eq!(&snapshot[..], b"hello\n");
//!
//! store.destroy().await?;
//! # Ok(())
//! # }
//! ```

pub mod log;

// Re-export commonly used types
pub use log::{LogError, LogGuard, LogStore};
