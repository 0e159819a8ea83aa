//! Reading and atomically replacing the `OFFSET` checkpoint file.
//!
//! The file holds a single offset token as UTF-8. A reader must never observe
//! a truncated file, so writes go to a temp file which is fsynced and renamed
//! over the destination, followed by an fsync of the parent directory.

use crate::paths::{offset_file_path, OFFSET_FILE_NAME};
use std::fs::{self, File};
use std::io;
use std::path::Path;

/// Read the saved changelog offset from a store partition directory.
///
/// Returns `None` when the file is absent or empty. A trailing newline is
/// tolerated but not required.
pub fn read_offset(dir: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(offset_file_path(dir)) {
        Ok(contents) => {
            let token = contents.trim_end_matches(['\r', '\n']);
            if token.is_empty() {
                Ok(None)
            } else {
                Ok(Some(token.to_owned()))
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Atomically replace the `OFFSET` file with the given token.
pub fn write_offset(dir: &Path, offset: &str) -> io::Result<()> {
    let dst = offset_file_path(dir);
    let tmp = dir.join(format!("{OFFSET_FILE_NAME}.tmp"));

    fs::write(&tmp, offset.as_bytes())?;
    // fsync temp file before rename so the rename never exposes partial data
    File::open(&tmp)?.sync_all()?;
    fs::rename(&tmp, &dst)?;
    // fsync parent directory so the rename itself is durable
    if let Ok(parent) = File::open(dir) {
        let _ = parent.sync_all();
    }
    Ok(())
}

/// Remove the `OFFSET` file if present.
pub fn delete_offset(dir: &Path) -> io::Result<()> {
    match fs::remove_file(offset_file_path(dir)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
