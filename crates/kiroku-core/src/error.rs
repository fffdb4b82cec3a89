use kiroku_api::{ErrorClass, ServiceError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KirokuError {
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("job payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a job did not succeed, sorted by how the scheduler reacts to it.
#[derive(Debug, Error)]
pub enum JobError {
    /// Held until credentials are available again.
    #[error("authentication required: {0}")]
    AuthRequired(String),

    /// Requeued with backoff.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The remote resource is gone. Treated as a no-op.
    #[error("remote resource not found: {0}")]
    NotFound(String),

    #[error("fatal: {0}")]
    Fatal(String),

    /// Local store failure. Fatal for the job, never partially applied.
    #[error(transparent)]
    Store(#[from] KirokuError),
}

impl JobError {
    /// Map a remote service error onto the scheduler's taxonomy.
    pub fn from_service<E: ServiceError>(err: E) -> Self {
        let message = err.to_string();
        match err.class() {
            ErrorClass::Auth => Self::AuthRequired(message),
            ErrorClass::Transient => Self::Transient(message),
            ErrorClass::NotFound => Self::NotFound(message),
            ErrorClass::Fatal => Self::Fatal(message),
        }
    }
}

impl From<rusqlite::Error> for JobError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(KirokuError::Storage(err))
    }
}
