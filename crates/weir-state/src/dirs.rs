//! Validity checks for locally cached logged-store directories.

use crate::offset_file;
use crate::paths::offset_file_path;
use crate::store::StoreProperties;
use std::fs;
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};

/// Whether a logged store's partition directory can be reused instead of
/// being rebuilt from the changelog. A directory is valid only when the store
/// persists to disk, its `OFFSET` file exists with non-empty content, and the
/// file was modified within the changelog's delete-retention window. A
/// missing directory is simply absent, not stale.
pub fn is_logged_dir_valid(
    dir: &Path,
    properties: StoreProperties,
    retention: Duration,
) -> io::Result<bool> {
    if !properties.is_persisted_to_disk {
        return Ok(false);
    }

    let metadata = match fs::metadata(offset_file_path(dir)) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if offset_file::read_offset(dir)?.is_none() {
        return Ok(false);
    }

    // An OFFSET older than the retention window means compaction may already
    // have purged records this copy is missing; incremental catch-up would
    // silently lose data.
    let age = SystemTime::now()
        .duration_since(metadata.modified()?)
        .unwrap_or(Duration::ZERO);
    Ok(age < retention)
}

/// Recursively delete a directory, treating an already-absent path as success.
pub fn remove_dir_recursive(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
