use crate::ids::{ChunkId, MediumIndex, ObjectId};

/// The request-handler-facing error taxonomy (`spec.md` §7). Every
/// synchronous entry point on the manager facade returns this type.
/// `InvariantViolation` is deliberately absent: per §7 it is never raised as
/// an error, only logged as an alert and the mutation proceeds.
#[derive(Debug, thiserror::Error)]
pub enum ChunkManagerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no such chunk {0}")]
    NoSuchChunk(ChunkId),

    #[error("no such chunk list {0}")]
    NoSuchChunkList(ObjectId),

    #[error("no such chunk view {0}")]
    NoSuchChunkView(ObjectId),

    #[error("no such medium index {0}")]
    NoSuchMedium(MediumIndex),

    #[error("no such dynamic store {0}")]
    NoSuchDynamicStore(ObjectId),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("account {account} cannot admit requested resource increase: {reason}")]
    AccountLimitExceeded { account: u64, reason: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ChunkManagerError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        ChunkManagerError::InvalidArgument(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ChunkManagerError::Internal(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ChunkManagerError>;
