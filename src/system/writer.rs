//! Write a single string to a file, replacing whatever was there.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use tracing::{debug, error, info};

/// Creates or truncates `path` and writes `contents` to it.
pub fn write_string(path: impl AsRef<Path>, contents: &str) -> io::Result<()> {
    let path = path.as_ref();

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| {
            error!(path = %path.display(), error = %e, "Failed to open file");
            e
        })?;
    info!(path = %path.display(), "File created");

    debug!(path = %path.display(), contents, "Writing");
    file.write_all(contents.as_bytes()).map_err(|e| {
        error!(path = %path.display(), error = %e, "Failed to write file");
        e
    })?;
    info!(path = %path.display(), bytes = contents.len(), "File written");

    Ok(())
}
