use thiserror::Error;

pub type PregelResult<T> = Result<T, PregelError>;

#[derive(Debug, Error)]
pub enum PregelError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("no worker is responsible for shard {0}")]
    UnknownShard(String),

    #[error("algorithm error: {0}")]
    Algorithm(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("illegal worker transition from {from} on {event}")]
    IllegalTransition { from: String, event: String },

    #[error("superstep out of sync: expected {expected}, got {actual}")]
    SuperstepMismatch { expected: u64, actual: u64 },

    #[error("stale message batch from recovery epoch {actual}, worker is at {expected}")]
    StaleEpoch { expected: u64, actual: u64 },

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("execution {0} was cancelled")]
    Cancelled(u64),

    #[error("execution {0} not found")]
    ExecutionNotFound(u64),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PregelError {
    /// Errors that must abort an execution before its first superstep.
    pub fn is_configuration(&self) -> bool {
        matches!(self, PregelError::Config(_) | PregelError::UnknownShard(_))
    }
}
