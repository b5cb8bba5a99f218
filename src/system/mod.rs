//! Process-level helpers that live outside the server core.
//!
//! - `daemon`: detach from the terminal before serving
//! - `exec`: run an external command and report whether it succeeded
//! - `writer`: create or truncate a file with a single string

pub mod daemon;
pub mod exec;
pub mod writer;

pub use daemon::daemonize;
pub use exec::{run, run_redirect, run_shell, ExecError};
pub use writer::write_string;
