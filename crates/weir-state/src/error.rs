use crate::task::StreamPartition;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("no system admin registered for system: {0}")]
    MissingSystemAdmin(String),

    #[error("no system consumer registered for system: {0}")]
    MissingSystemConsumer(String),

    #[error("no changelog offset available for {ssp}")]
    MissingChangelogOffset { ssp: StreamPartition },

    #[error("changelog validation failed: {0}")]
    ChangelogValidation(String),

    #[error("metadata error: {0}")]
    Metadata(String),

    #[error("consumer error: {0}")]
    Consumer(String),

    #[error("storage engine error: {0}")]
    Storage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
