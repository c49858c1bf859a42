//! Error types for the guest agent.

use crate::command::CommandError;

/// Agent error type covering all failure modes.
///
/// Every variant is recoverable: a failed item is logged and retried on a
/// later reconciliation pass. The daemons have no fatal error path.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("command: {0}")]
    Command(#[from] CommandError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("write: {0}")]
    Write(#[from] guest_common::atomic::WriteError),

    #[error("lock: {0}")]
    Lock(#[from] guest_common::lock::LockError),

    #[error("metadata: {0}")]
    Metadata(#[from] metadata_client::MetadataError),

    #[error("{0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;
