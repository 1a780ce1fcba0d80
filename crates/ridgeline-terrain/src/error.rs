//! Chunk generation error types.

use std::time::Duration;

/// Errors a chunk request can settle with.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChunkError {
    /// The request's parameters are malformed or out of range.
    #[error("invalid chunk request: `{field}` {reason}")]
    InvalidParameter {
        /// Offending request field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The worker that owned the request crashed before replying.
    #[error("worker {worker} crashed: {reason}")]
    WorkerFatal {
        /// Pool slot of the crashed worker.
        worker: usize,
        /// Panic message, if one could be recovered.
        reason: String,
    },

    /// The OS refused to start a pool thread.
    #[error("failed to spawn worker {worker}: {reason}")]
    WorkerSpawn {
        /// Pool slot being started.
        worker: usize,
        /// Underlying I/O error.
        reason: String,
    },

    /// No reply arrived before the deadline.
    #[error("chunk request {id} timed out after {waited:?}")]
    Timeout {
        /// Request id.
        id: u64,
        /// How long the caller waited.
        waited: Duration,
    },

    /// The caller cancelled the request.
    #[error("chunk request {id} was cancelled")]
    Cancelled {
        /// Request id.
        id: u64,
    },

    /// The pool shut down before the request settled.
    #[error("worker pool shut down")]
    PoolShutDown,
}

impl ChunkError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ChunkError::InvalidParameter {
            field,
            reason: reason.into(),
        }
    }
}
