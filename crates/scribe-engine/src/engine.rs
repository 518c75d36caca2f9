//! The transcription engine collaborator.
//!
//! The service never performs inference itself. It hands a staged audio file
//! and the client's parameters to a [`TranscriptionEngine`] and gets a
//! [`SegmentedResult`] back.

use std::path::Path;

use async_trait::async_trait;
use scribe_core::{JobError, SegmentedResult, TranscriptionParams, WhisperModel};
use serde_json::{json, Value};

/// Errors an engine may raise. Model loading is kept apart from inference so
/// operators can tell a missing model from bad audio.
#[derive(Clone, Debug, thiserror::Error)]
pub enum EngineError {
    #[error("model load failed: {0}")]
    ModelLoad(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("audio decode failed: {0}")]
    AudioDecode(String),

    /// Engine unreachable or refusing work.
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    /// Engine answered with something that is not a transcript.
    #[error("unexpected engine response: {0}")]
    Protocol(String),

    #[error("io error: {0}")]
    Io(String),
}

impl EngineError {
    /// Short classification string for logging/metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ModelLoad(_) => "model_load",
            Self::Inference(_) => "inference",
            Self::AudioDecode(_) => "audio_decode",
            Self::Unavailable(_) => "unavailable",
            Self::Protocol(_) => "protocol",
            Self::Io(_) => "io",
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(e.to_string())
    }
}

impl From<EngineError> for JobError {
    fn from(e: EngineError) -> Self {
        JobError::EngineFailure(e.to_string())
    }
}

/// One transcription call.
#[derive(Clone, Copy, Debug)]
pub struct EngineRequest<'a> {
    pub audio: &'a Path,
    /// Name the client uploaded the audio under.
    pub filename: &'a str,
    pub params: &'a TranscriptionParams,
}

/// Receives progress from an engine during a long transcription.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn update(&self, segments_processed: u64, total_segments: Option<u64>);
}

/// Discards progress.
pub struct NoProgress;

#[async_trait]
impl ProgressSink for NoProgress {
    async fn update(&self, _segments_processed: u64, _total_segments: Option<u64>) {}
}

#[async_trait]
pub trait TranscriptionEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn transcribe(
        &self,
        request: EngineRequest<'_>,
        progress: &dyn ProgressSink,
    ) -> Result<SegmentedResult, EngineError>;

    /// Model catalogue, passed through to clients as-is.
    async fn models(&self) -> Result<Value, EngineError> {
        Ok(json!({
            "models": WhisperModel::ALL
                .iter()
                .map(|m| json!({"name": m.as_str(), "multilingual": true}))
                .collect::<Vec<_>>()
        }))
    }

    /// Supported languages, passed through to clients as-is.
    async fn languages(&self) -> Result<Value, EngineError> {
        Err(EngineError::Unavailable(format!(
            "{} does not publish a language list",
            self.name()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bare;

    #[async_trait]
    impl TranscriptionEngine for Bare {
        fn name(&self) -> &str {
            "bare"
        }

        async fn transcribe(
            &self,
            _request: EngineRequest<'_>,
            _progress: &dyn ProgressSink,
        ) -> Result<SegmentedResult, EngineError> {
            Ok(SegmentedResult::default())
        }
    }

    #[tokio::test]
    async fn default_models_lists_every_size() {
        let v = Bare.models().await.unwrap();
        let names: Vec<_> = v["models"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["tiny", "base", "small", "medium", "large"]);
    }

    #[tokio::test]
    async fn default_languages_is_unavailable() {
        let err = Bare.languages().await.unwrap_err();
        assert_eq!(err.kind(), "unavailable");
    }

    #[test]
    fn converts_to_engine_failure() {
        let e: JobError = EngineError::ModelLoad("large-v3 missing".into()).into();
        assert!(matches!(e, JobError::EngineFailure(ref m) if m.contains("large-v3 missing")));
    }
}
