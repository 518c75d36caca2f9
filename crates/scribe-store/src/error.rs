use scribe_core::job::TransitionError;
use scribe_core::JobError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl StoreError {
    pub fn io(context: impl std::fmt::Display, e: std::io::Error) -> Self {
        StoreError::Io(format!("{context}: {e}"))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<StoreError> for JobError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => JobError::not_found(id),
            StoreError::Transition(t) => JobError::InvalidRequest(t.to_string()),
            StoreError::Serialization(msg) | StoreError::Io(msg) => JobError::StorageFailure(msg),
        }
    }
}
