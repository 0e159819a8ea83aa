use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoordinatorError>;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Our own participant node is missing from the children listing: the
    /// session, and with it the ephemeral node, is gone. The caller decides
    /// whether and when to reconnect.
    #[error("participant not present under {parent}; reconnect needed")]
    ReconnectNeeded { parent: String },

    #[error("failed to resolve the local hostname")]
    UnknownHost,

    #[error("coordination service error: {0}")]
    Service(String),
}

impl CoordinatorError {
    /// Whether this error signals a lost session that requires reconnecting
    /// before another election attempt can succeed.
    pub fn is_reconnect_needed(&self) -> bool {
        matches!(self, CoordinatorError::ReconnectNeeded { .. })
    }
}
