//! Connection Handling Module
//!
//! This module manages individual client connections and the registry that
//! tracks them. Each client connection is handled by its own async task,
//! allowing the server to handle thousands of concurrent clients.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TCP Listener                            │
//! │                    (server.rs)                              │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ accept() + register()
//!                        ▼
//!           ┌────────────────────────┐      ┌──────────────────┐
//!           │   For each client...   │─────>│ConnectionRegistry│
//!           └────────────┬───────────┘      └──────────────────┘
//!                        │
//!                        │ spawn task
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │ Read bytes  │───>│ Assemble    │───>│ Append to   │     │
//! │  └─────────────┘    │ records     │    │ shared log  │     │
//! │                     └─────────────┘    └──────┬──────┘     │
//! │                                               ▼             │
//! │                                      ┌─────────────┐        │
//! │                                      │ Replay log  │        │
//! │                                      └─────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Async I/O**: Uses Tokio for non-blocking network operations
//! - **Record Reassembly**: Handles records split across reads and several
//!   records in one read
//! - **Cooperative Shutdown**: Handlers watch the server lifecycle
//! - **Statistics**: Tracks connection and record metrics

pub mod handler;
pub mod registry;

// Re-export commonly used types
pub use handler::{
    handle_connection, ConnectionContext, ConnectionError, ConnectionHandler, ConnectionStats,
    HandlerSettings,
};
pub use registry::{ConnectionId, ConnectionRegistry, Registration};
