//! Path layout for store partition directories.

use crate::task::TaskName;
use std::path::{Path, PathBuf};

/// Name of the checkpoint file inside each logged store partition directory.
pub const OFFSET_FILE_NAME: &str = "OFFSET";

/// Directory holding one task's partition of a store:
/// `<base>/<store name>/<sanitized task name>`.
pub fn store_partition_dir(base: &Path, store_name: &str, task: &TaskName) -> PathBuf {
    base.join(store_name).join(task.sanitized())
}

/// Path of the `OFFSET` file inside a logged store partition directory.
pub fn offset_file_path(logged_partition_dir: &Path) -> PathBuf {
    logged_partition_dir.join(OFFSET_FILE_NAME)
}
