//! Error types for storage, transport and per-author ingestion.

use log::Level;
use thiserror::Error;

/// A durable-store operation failed. Aborts the whole cycle.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("could not connect to registry: {0}")]
    Connection(String),

    #[error("registry query failed: {0}")]
    Query(String),

    #[error("registry row could not be converted: {0}")]
    Conversion(String),
}

/// A call to the hosting service failed.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The requested repo, run, artifact or file does not exist (yet).
    #[error("not found: {0}")]
    NotFound(String),

    /// Network or HTTP failure that survived the retry budget.
    #[error("request failed: {0}")]
    Request(String),

    /// The service answered with something we could not interpret.
    #[error("unexpected response: {0}")]
    Response(String),
}

/// Why one author's ingestion attempt did not produce an update.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("author {0} is not registered")]
    RegistrationMissing(String),

    #[error("no commit timestamp could be determined")]
    UndatedSource,

    #[error("no result available yet: {0}")]
    NotFound(String),

    #[error("result payload is malformed: {0}")]
    Decode(String),

    #[error("result failed authentication: {0}")]
    Authentication(String),

    #[error(transparent)]
    Transport(TransportError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl IngestError {
    /// Only storage failures are allowed to end the cycle.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, IngestError::Storage(_))
    }

    /// The level this error is reported at.
    #[must_use]
    pub fn log_level(&self) -> Level {
        match self {
            IngestError::RegistrationMissing(_) => Level::Debug,
            IngestError::NotFound(_) => Level::Info,
            IngestError::UndatedSource | IngestError::Transport(_) => Level::Warn,
            IngestError::Decode(_) | IngestError::Authentication(_) | IngestError::Storage(_) => {
                Level::Error
            }
        }
    }
}

impl From<TransportError> for IngestError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::NotFound(what) => IngestError::NotFound(what),
            other => IngestError::Transport(other),
        }
    }
}

/// Failures that end an ingestion cycle early.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("could not enumerate submission sources: {0}")]
    Discovery(#[source] TransportError),

    #[error("could not start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}
