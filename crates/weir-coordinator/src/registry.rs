//! Participant registration under the processors path.

use crate::error::{CoordinatorError, Result};
use crate::service::CoordinationService;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

/// Ensures this process owns exactly one ephemeral sequential child under
/// the processors path.
///
/// Registration is idempotent for the life of a session: the first call
/// creates the node, later calls return the same path. After a session loss
/// the caller invalidates the cached path with [`ParticipantRegistry::reset`]
/// and the next registration creates a new node with a new sequence.
pub struct ParticipantRegistry {
    service: Arc<dyn CoordinationService>,
    processors_path: String,
    hostname: String,
    registered: Mutex<Option<String>>,
}

impl ParticipantRegistry {
    /// Build a registry using the local hostname as the node payload. Fails
    /// when the hostname cannot be resolved.
    pub fn new(
        service: Arc<dyn CoordinationService>,
        processors_path: impl Into<String>,
    ) -> Result<Self> {
        let hostname = local_hostname()?;
        Ok(Self::with_hostname(service, processors_path, hostname))
    }

    /// Build a registry with an explicit hostname payload.
    pub fn with_hostname(
        service: Arc<dyn CoordinationService>,
        processors_path: impl Into<String>,
        hostname: impl Into<String>,
    ) -> Self {
        Self {
            service,
            processors_path: processors_path.into(),
            hostname: hostname.into(),
            registered: Mutex::new(None),
        }
    }

    pub fn processors_path(&self) -> &str {
        &self.processors_path
    }

    /// Full path of this process's participant node, registering it first if
    /// needed.
    pub fn register(&self) -> Result<String> {
        let mut registered = self.registered.lock();
        if let Some(path) = registered.as_ref() {
            return Ok(path.clone());
        }
        let path = self
            .service
            .create_ephemeral_sequential(&self.processors_path, self.hostname.as_bytes())?;
        info!(path = %path, "Registered participant");
        *registered = Some(path.clone());
        Ok(path)
    }

    /// Drop the cached registration after a session loss.
    pub fn reset(&self) {
        *self.registered.lock() = None;
    }
}

/// Resolve the machine's hostname via the `hostname` command.
fn local_hostname() -> Result<String> {
    let output = std::process::Command::new("hostname")
        .output()
        .map_err(|_| CoordinatorError::UnknownHost)?;
    if !output.status.success() {
        return Err(CoordinatorError::UnknownHost);
    }
    let name = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    if name.is_empty() {
        return Err(CoordinatorError::UnknownHost);
    }
    Ok(name)
}
