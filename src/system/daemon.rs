//! Single-fork daemonization: new session, no controlling terminal.

use std::fs::OpenOptions;
use std::io;
use std::os::unix::io::AsRawFd;
use tracing::debug;

/// Detaches the process from its controlling terminal.
///
/// The parent exits with status 0; the child becomes a session leader,
/// changes to `/` and points stdin, stdout and stderr at `/dev/null`.
///
/// Must be called before any threads are started (in particular before the
/// tokio runtime is built), since only the calling thread survives `fork`.
pub fn daemonize() -> io::Result<()> {
    // SAFETY: single-threaded at this point; the child only continues with
    // async-signal-safe work until it returns to the caller
    match unsafe { libc::fork() } {
        -1 => return Err(io::Error::last_os_error()),
        0 => {}
        _ => unsafe { libc::_exit(0) },
    }

    // SAFETY: plain syscall, no memory is shared
    if unsafe { libc::setsid() } == -1 {
        return Err(io::Error::last_os_error());
    }

    std::env::set_current_dir("/")?;
    redirect_std_streams()?;

    debug!(pid = std::process::id(), "Daemonized");
    Ok(())
}

fn redirect_std_streams() -> io::Result<()> {
    let devnull = OpenOptions::new().read(true).write(true).open("/dev/null")?;
    let fd = devnull.as_raw_fd();

    for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        // SAFETY: both descriptors are valid for the duration of the call
        if unsafe { libc::dup2(fd, target) } == -1 {
            return Err(io::Error::last_os_error());
        }
    }

    Ok(())
}
