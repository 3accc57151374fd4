use thiserror::Error;

/// Errors raised by the stem store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage engine error: {0}")]
    Engine(#[from] rocksdb::Error),

    #[error("bucket '{0}' does not exist")]
    MissingBucket(String),

    #[error("stem must not be empty")]
    EmptyStem,
}

/// Errors raised while running a listener
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type StoreResult<T> = Result<T, StoreError>;
pub type ServerResult<T> = Result<T, ServerError>;
