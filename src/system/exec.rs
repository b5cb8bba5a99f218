//! Synchronous command execution.
//!
//! Each helper runs a child process to completion and reports success only
//! when the child exits with status 0. A child killed by a signal counts as
//! a failure.

use std::ffi::OsStr;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use tracing::{debug, warn};

/// Errors that prevent a command from running at all.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("no command given")]
    EmptyCommand,

    /// Programs are run directly, without a PATH search
    #[error("command path must be absolute: {}", .0.display())]
    RelativePath(PathBuf),

    #[error("failed to run {program}: {source}")]
    Spawn { program: String, source: io::Error },

    #[error("failed to open output file {}: {source}", .path.display())]
    Output { path: PathBuf, source: io::Error },
}

/// Runs `cmd` through `/bin/sh -c` and waits for it.
pub fn run_shell(cmd: &str) -> Result<bool, ExecError> {
    let status = Command::new("/bin/sh")
        .arg("-c")
        .arg(cmd)
        .status()
        .map_err(|source| ExecError::Spawn {
            program: "/bin/sh".to_string(),
            source,
        })?;

    Ok(report(cmd, status))
}

/// Runs `argv[0]` (an absolute path) with the remaining arguments.
pub fn run<S: AsRef<OsStr>>(argv: &[S]) -> Result<bool, ExecError> {
    let mut command = build(argv)?;
    wait(&mut command, argv)
}

/// Like [`run`], with the child's stdout sent to `output` (created or truncated).
pub fn run_redirect<S: AsRef<OsStr>>(
    output: impl AsRef<Path>,
    argv: &[S],
) -> Result<bool, ExecError> {
    let mut command = build(argv)?;

    let path = output.as_ref();
    let file = File::create(path).map_err(|source| ExecError::Output {
        path: path.to_path_buf(),
        source,
    })?;
    command.stdout(Stdio::from(file));

    wait(&mut command, argv)
}

fn build<S: AsRef<OsStr>>(argv: &[S]) -> Result<Command, ExecError> {
    let (program, args) = argv.split_first().ok_or(ExecError::EmptyCommand)?;

    let program = Path::new(program.as_ref());
    if !program.is_absolute() {
        return Err(ExecError::RelativePath(program.to_path_buf()));
    }

    let mut command = Command::new(program);
    command.args(args);
    Ok(command)
}

fn wait<S: AsRef<OsStr>>(command: &mut Command, argv: &[S]) -> Result<bool, ExecError> {
    let program = Path::new(argv[0].as_ref()).display().to_string();

    let status = command.status().map_err(|source| ExecError::Spawn {
        program: program.clone(),
        source,
    })?;

    Ok(report(&program, status))
}

fn report(what: &str, status: ExitStatus) -> bool {
    if status.success() {
        debug!(command = what, "Command succeeded");
        true
    } else {
        warn!(command = what, %status, "Command failed");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_exit_status() {
        assert!(run_shell("exit 0").unwrap());
        assert!(!run_shell("exit 3").unwrap());
        assert!(run_shell("echo hello > /dev/null").unwrap());
    }

    #[test]
    fn test_run_absolute_program() {
        assert!(run(&["/bin/sh", "-c", "exit 0"]).unwrap());
        assert!(!run(&["/bin/sh", "-c", "exit 1"]).unwrap());
    }

    #[test]
    fn test_run_rejects_relative_path() {
        assert!(matches!(
            run(&["sh", "-c", "exit 0"]),
            Err(ExecError::RelativePath(_))
        ));
    }

    #[test]
    fn test_run_rejects_empty_command() {
        let argv: [&str; 0] = [];
        assert!(matches!(run(&argv), Err(ExecError::EmptyCommand)));
    }

    #[test]
    fn test_run_missing_program() {
        assert!(matches!(
            run(&["/nonexistent/program"]),
            Err(ExecError::Spawn { .. })
        ));
    }

    #[test]
    fn test_run_redirect_captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        std::fs::write(&out, "previous contents that should vanish\n").unwrap();

        assert!(run_redirect(&out, &["/bin/sh", "-c", "echo home is $HOME"]).unwrap());

        let captured = std::fs::read_to_string(&out).unwrap();
        assert!(captured.starts_with("home is "));
        assert!(!captured.contains("previous"));
    }

    #[test]
    fn test_run_redirect_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        assert!(!run_redirect(&out, &["/bin/sh", "-c", "echo partial; exit 2"]).unwrap());
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "partial\n");
    }
}
