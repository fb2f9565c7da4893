/// Error taxonomy for the scheduler core, mirroring the buckets in the
/// error-handling design: validation, transient storage, agent misbehavior,
/// system, and consistency failures are all distinguished so callers can
/// decide what is fatal versus what is merely logged and dropped.
#[derive(Debug, thiserror::Error)]
pub enum KhError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("storage: {0}")]
    Storage(#[from] tokio_rusqlite::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("keyspace unknown: {0}")]
    KeyspaceUnknown(String),

    #[error("config: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, KhError>;
