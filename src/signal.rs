//! Shutdown Signals
//!
//! Turns SIGINT and SIGTERM into a future the server awaits. Handlers are
//! installed up front so a failure to install is a startup error, and no
//! state is touched from signal context.

use std::io;
use tokio::signal::unix::{signal, Signal, SignalKind};

/// Which signal asked the process to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

/// Installed SIGINT/SIGTERM listeners.
#[derive(Debug)]
pub struct ShutdownSignals {
    interrupt: Signal,
    terminate: Signal,
}

impl ShutdownSignals {
    /// Installs the listeners. Must be called inside a tokio runtime.
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Waits for the first SIGINT or SIGTERM.
    pub async fn recv(&mut self) -> ShutdownSignal {
        tokio::select! {
            _ = self.interrupt.recv() => ShutdownSignal::Interrupt,
            _ = self.terminate.recv() => ShutdownSignal::Terminate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sigterm_is_delivered() {
        let mut signals = ShutdownSignals::install().unwrap();

        // SAFETY: the handler above is installed, so this does not kill the process
        unsafe {
            libc::kill(libc::getpid(), libc::SIGTERM);
        }

        let received = tokio::time::timeout(Duration::from_secs(2), signals.recv())
            .await
            .expect("signal should arrive");
        assert_eq!(received, ShutdownSignal::Terminate);
    }
}
