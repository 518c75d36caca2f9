/// Error taxonomy shared by every layer that touches a job.
///
/// Crate-local errors (`StoreError`, `EngineError`, ...) convert into this
/// so the HTTP boundary only has to know one classification.
#[derive(Clone, Debug, thiserror::Error)]
pub enum JobError {
    /// Unknown job id, or an artifact missing for an otherwise valid job.
    #[error("{0}")]
    NotFound(String),
    /// The request cannot be satisfied in the job's current state.
    #[error("{0}")]
    InvalidRequest(String),
    /// The transcription engine raised an error during inference.
    #[error("engine failure: {0}")]
    EngineFailure(String),
    /// Durable read/write error.
    #[error("storage failure: {0}")]
    StorageFailure(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl JobError {
    pub fn not_found(id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("Transcript not found: {id}"))
    }

    /// Short classification string for logging/metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::EngineFailure(_) => "engine_failure",
            Self::StorageFailure(_) => "storage_failure",
            Self::Internal(_) => "internal",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
