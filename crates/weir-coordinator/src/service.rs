//! Seam to the hierarchical coordination service.
//!
//! The service is an abstract key-value tree offering ephemeral sequential
//! nodes, child listings, existence checks and data watches. The client is
//! shared per-process and assumed thread-safe; watch callbacks arrive on the
//! client's own thread.

use crate::error::Result;
use std::sync::Arc;

/// Callback interface for data watches on a single path.
pub trait DataListener: Send + Sync {
    fn on_data_changed(&self, path: &str);
    fn on_data_deleted(&self, path: &str);
}

/// Abstract coordination-service client.
pub trait CoordinationService: Send + Sync {
    /// Create an ephemeral sequential child of `parent` carrying `payload`,
    /// returning its full path. The service appends a monotonically
    /// increasing sequence to the child's name and deletes the node when the
    /// creating session ends.
    fn create_ephemeral_sequential(&self, parent: &str, payload: &[u8]) -> Result<String>;

    /// Basenames of `parent`'s children, in no particular order.
    fn get_children(&self, parent: &str) -> Result<Vec<String>>;

    fn exists(&self, path: &str) -> Result<bool>;

    /// Attach a data watch to `path`. Watches may be attached to paths that
    /// do not exist and then never fire; callers must verify existence
    /// separately.
    fn subscribe_data_changes(&self, path: &str, listener: Arc<dyn DataListener>) -> Result<()>;

    /// Detach a previously attached watch, identified by listener identity.
    fn unsubscribe_data_changes(&self, path: &str, listener: &Arc<dyn DataListener>) -> Result<()>;
}

/// Server-assigned sequence of a participant basename, parsed from its
/// trailing decimal digits (`"participant-0000000042"` → 42).
pub fn sequence_of(basename: &str) -> Option<u64> {
    let digits = basename
        .chars()
        .rev()
        .take_while(char::is_ascii_digit)
        .count();
    if digits == 0 {
        return None;
    }
    basename[basename.len() - digits..].parse().ok()
}

/// Sort participant basenames by ascending sequence. Names without a
/// sequence sort last.
pub fn sort_participants(names: &mut [String]) {
    names.sort_by_key(|name| sequence_of(name).unwrap_or(u64::MAX));
}
