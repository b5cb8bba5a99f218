//! Shared Append-Only Log
//!
//! One file, shared by every connection for the lifetime of the process.
//! Every record a client completes is appended here, and the whole file is
//! streamed back to that client afterwards.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Connection A │   │ Connection B │   │ Connection C │
//! └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!        │ lock()           │ lock()           │ lock()
//!        ▼                  ▼                  ▼
//! ┌─────────────────────────────────────────────────────┐
//! │              tokio::sync::Mutex<LogState>           │
//! │   (one connection inside append/read at a time)     │
//! └──────────────────────────┬──────────────────────────┘
//!                            ▼
//!                  ┌───────────────────┐
//!                  │   log file (fd)   │
//!                  └───────────────────┘
//! ```
//!
//! The critical section is a [`LogGuard`]. A connection takes the guard,
//! appends its record, takes a snapshot with [`LogGuard::read_all`], and
//! drops the guard before sending the snapshot. Appends from different
//! connections never interleave and no reader ever sees half a record.
//!
//! ## Failure Handling
//!
//! The store tracks the committed length. If a write fails partway the file is
//! truncated back to that length, so a failed append leaves no trace.

use bytes::Bytes;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, trace, warn};

/// Errors raised by the shared log.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// The log file could not be created
    #[error("failed to open log {}: {source}", .path.display())]
    Open { path: PathBuf, source: io::Error },

    /// A record could not be fully written
    #[error("failed to append {len} bytes: {source}")]
    Append { len: usize, source: io::Error },

    /// The log could not be read back
    #[error("failed to read log: {0}")]
    Read(#[source] io::Error),

    /// The log file could not be removed
    #[error("failed to remove log {}: {source}", .path.display())]
    Remove { path: PathBuf, source: io::Error },

    /// The log was already destroyed at shutdown
    #[error("log has been destroyed")]
    Destroyed,
}

/// State protected by the store's mutex.
#[derive(Debug)]
struct LogState {
    /// Open handle, `None` once destroyed
    file: Option<File>,

    /// Bytes of fully appended records
    len: u64,

    /// Writes longer than this stop short and fail
    #[cfg(test)]
    write_limit: Option<usize>,
}

/// The shared, append-ordered record log.
#[derive(Debug)]
pub struct LogStore {
    path: PathBuf,
    state: Mutex<LogState>,
}

impl LogStore {
    /// Creates the log at `path`, truncating anything already there.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, LogError> {
        let path = path.into();

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|source| LogError::Open {
                path: path.clone(),
                source,
            })?;

        // Absolute, so the file can still be removed after a chdir
        let path = std::fs::canonicalize(&path).unwrap_or(path);

        info!(path = %path.display(), "Shared log created");

        Ok(Self {
            path,
            state: Mutex::new(LogState {
                file: Some(File::from_std(file)),
                len: 0,
                #[cfg(test)]
                write_limit: None,
            }),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Enters the exclusive access window.
    ///
    /// Waits for any other connection to leave its window first. The window
    /// closes when the returned guard is dropped.
    pub async fn lock(&self) -> LogGuard<'_> {
        LogGuard {
            state: self.state.lock().await,
        }
    }

    /// Appends one record in its own access window.
    pub async fn append(&self, record: &[u8]) -> Result<(), LogError> {
        self.lock().await.append(record).await
    }

    /// Reads the full log in its own access window.
    pub async fn read_all(&self) -> Result<Bytes, LogError> {
        self.lock().await.read_all().await
    }

    /// Number of committed bytes.
    pub async fn len(&self) -> u64 {
        self.state.lock().await.len
    }

    /// Returns true if nothing has been appended yet.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Closes and unlinks the log file.
    ///
    /// Waits for any in-flight access window to finish. Later calls to
    /// [`append`](Self::append) or [`read_all`](Self::read_all) fail with
    /// [`LogError::Destroyed`]. Calling this twice is harmless.
    pub async fn destroy(&self) -> Result<(), LogError> {
        let mut state = self.state.lock().await;

        let Some(file) = state.file.take() else {
            return Ok(());
        };
        state.len = 0;
        drop(file);

        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "Shared log already removed");
            }
            Err(source) => {
                return Err(LogError::Remove {
                    path: self.path.clone(),
                    source,
                })
            }
        }

        info!(path = %self.path.display(), "Shared log destroyed");
        Ok(())
    }

    /// Makes every later write longer than `limit` fail after `limit` bytes.
    #[cfg(test)]
    pub(crate) async fn set_write_limit(&self, limit: Option<usize>) {
        self.state.lock().await.write_limit = limit;
    }
}

/// Exclusive access to the shared log.
///
/// Only one guard exists at a time. Everything done through a guard is
/// atomic with respect to every other connection.
pub struct LogGuard<'a> {
    state: MutexGuard<'a, LogState>,
}

impl LogGuard<'_> {
    /// Appends `record` at the end of the log.
    ///
    /// Succeeds only if every byte was written. On failure the log is rolled
    /// back to its previous length.
    pub async fn append(&mut self, record: &[u8]) -> Result<(), LogError> {
        let committed = self.state.len;
        #[cfg(test)]
        let limit = self.state.write_limit;
        #[cfg(not(test))]
        let limit = None;
        let file = self.state.file.as_mut().ok_or(LogError::Destroyed)?;

        match write_at(file, committed, record, limit).await {
            Ok(()) => {
                self.state.len = committed + record.len() as u64;
                trace!(bytes = record.len(), total = self.state.len, "Record appended");
                Ok(())
            }
            Err(source) => {
                if let Err(e) = file.set_len(committed).await {
                    warn!(error = %e, "Failed to roll back partial append");
                }
                Err(LogError::Append {
                    len: record.len(),
                    source,
                })
            }
        }
    }

    /// Returns everything appended so far.
    pub async fn read_all(&mut self) -> Result<Bytes, LogError> {
        let len = self.state.len;
        let file = self.state.file.as_mut().ok_or(LogError::Destroyed)?;

        let mut buf = vec![0u8; len as usize];
        file.seek(SeekFrom::Start(0)).await.map_err(LogError::Read)?;
        file.read_exact(&mut buf).await.map_err(LogError::Read)?;

        debug!(bytes = len, "Log snapshot taken");
        Ok(Bytes::from(buf))
    }

    /// Number of committed bytes.
    pub fn len(&self) -> u64 {
        self.state.len
    }

    /// Returns true if nothing has been appended yet.
    pub fn is_empty(&self) -> bool {
        self.state.len == 0
    }
}

async fn write_at(
    file: &mut File,
    offset: u64,
    data: &[u8],
    limit: Option<usize>,
) -> io::Result<()> {
    file.seek(SeekFrom::Start(offset)).await?;

    match limit {
        Some(limit) if data.len() > limit => {
            file.write_all(&data[..limit]).await?;
            file.flush().await?;
            Err(io::Error::new(io::ErrorKind::WriteZero, "short write"))
        }
        _ => {
            file.write_all(data).await?;
            file.flush().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn temp_log() -> (tempfile::TempDir, LogStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::create(dir.path().join("shared.log")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_append_and_read() {
        let (_dir, store) = temp_log();

        store.append(b"hello\n").await.unwrap();
        assert_eq!(store.read_all().await.unwrap(), Bytes::from_static(b"hello\n"));

        store.append(b"world\n").await.unwrap();
        assert_eq!(
            store.read_all().await.unwrap(),
            Bytes::from_static(b"hello\nworld\n")
        );
        assert_eq!(store.len().await, 12);
    }

    #[tokio::test]
    async fn test_read_is_idempotent() {
        let (_dir, store) = temp_log();
        store.append(b"same\n").await.unwrap();

        let first = store.read_all().await.unwrap();
        let second = store.read_all().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_empty_log_reads_empty() {
        let (_dir, store) = temp_log();
        assert!(store.is_empty().await);
        assert!(store.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_truncates_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.log");
        std::fs::write(&path, b"stale content\n").unwrap();

        let store = LogStore::create(&path).unwrap();
        assert!(store.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_fails_for_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let result = LogStore::create(dir.path().join("missing").join("shared.log"));
        assert!(matches!(result, Err(LogError::Open { .. })));
    }

    #[tokio::test]
    async fn test_guard_sees_its_own_append() {
        let (_dir, store) = temp_log();

        let mut guard = store.lock().await;
        guard.append(b"mine\n").await.unwrap();
        assert_eq!(guard.read_all().await.unwrap(), Bytes::from_static(b"mine\n"));
        assert_eq!(guard.len(), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_stay_contiguous() {
        let (_dir, store) = temp_log();
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for i in 0..32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let record = format!("record-{:02}-{}\n", i, "x".repeat(i * 16));
                store.append(record.as_bytes()).await.unwrap();
                record
            }));
        }

        let mut expected = HashSet::new();
        for handle in handles {
            expected.insert(handle.await.unwrap());
        }

        let content = store.read_all().await.unwrap();
        let text = std::str::from_utf8(&content).unwrap();
        let found: HashSet<String> = text.split_inclusive('\n').map(String::from).collect();

        assert_eq!(found.len(), 32);
        assert_eq!(found, expected);
    }

    #[tokio::test]
    async fn test_failed_append_is_rolled_back() {
        let (_dir, store) = temp_log();
        store.append(b"hello\n").await.unwrap();

        store.set_write_limit(Some(4)).await;
        let result = store.append(b"worldwide\n").await;
        assert!(matches!(result, Err(LogError::Append { len: 10, .. })));

        // The four bytes that made it to disk are gone again
        assert_eq!(std::fs::metadata(store.path()).unwrap().len(), 6);
        assert_eq!(store.len().await, 6);
        assert_eq!(store.read_all().await.unwrap(), Bytes::from_static(b"hello\n"));

        store.append(b"ok\n").await.unwrap();
        assert_eq!(
            store.read_all().await.unwrap(),
            Bytes::from_static(b"hello\nok\n")
        );
        assert_eq!(std::fs::metadata(store.path()).unwrap().len(), 9);
    }

    #[tokio::test]
    async fn test_destroy_removes_file() {
        let (_dir, store) = temp_log();
        store.append(b"gone\n").await.unwrap();
        assert!(store.path().exists());

        store.destroy().await.unwrap();
        assert!(!store.path().exists());

        assert!(matches!(store.append(b"late\n").await, Err(LogError::Destroyed)));
        assert!(matches!(store.read_all().await, Err(LogError::Destroyed)));

        // Second destroy is a no-op
        store.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_destroy_tolerates_missing_file() {
        let (_dir, store) = temp_log();
        std::fs::remove_file(store.path()).unwrap();
        store.destroy().await.unwrap();
    }
}
