//! Engine backed by a whisper sidecar reached over HTTP.
//!
//! Wire contract:
//! - `POST {base}/transcribe`: multipart with an `audio` file part and an
//!   `options` part holding the submission parameters as JSON. Replies with
//!   a whisper-style result (`text`, `segments`, `language`, `duration`).
//!   Failures may carry `{"kind": "model_load" | "audio_decode" | ..., "detail": "..."}`.
//! - `GET {base}/models`, `GET {base}/languages`: passed through untouched.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use scribe_core::SegmentedResult;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::engine::{EngineError, EngineRequest, ProgressSink, TranscriptionEngine};

#[derive(Clone, Debug)]
pub struct SidecarConfig {
    pub base_url: String,
    /// Whole-request timeout; inference on long audio is slow.
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8001".into(),
            timeout: Duration::from_secs(3600),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

pub struct SidecarEngine {
    client: reqwest::Client,
    base_url: String,
}

impl SidecarEngine {
    pub fn new(config: SidecarConfig) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| EngineError::Unavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json(&self, path: &str) -> Result<Value, EngineError> {
        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .send()
            .await
            .map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error(status.as_u16(), &body));
        }
        response
            .json()
            .await
            .map_err(|e| EngineError::Protocol(format!("invalid JSON from {path}: {e}")))
    }
}

fn request_error(e: reqwest::Error) -> EngineError {
    if e.is_connect() || e.is_timeout() {
        EngineError::Unavailable(format!("transcription sidecar request failed: {e}"))
    } else {
        EngineError::Inference(format!("transcription sidecar request failed: {e}"))
    }
}

/// Map a sidecar failure response onto an [`EngineError`].
pub fn classify_error(status: u16, body: &str) -> EngineError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let kind = parsed
        .as_ref()
        .and_then(|v| v.get("kind"))
        .and_then(Value::as_str);
    let detail = parsed
        .as_ref()
        .and_then(|v| v.get("detail").or_else(|| v.get("message")))
        .and_then(Value::as_str)
        .map_or_else(|| body.trim().to_string(), str::to_string);
    let message = format!("sidecar returned {status}: {detail}");

    match (kind, status) {
        (Some("model_load"), _) => EngineError::ModelLoad(message),
        (Some("audio_decode"), _) => EngineError::AudioDecode(message),
        (_, 503) => EngineError::Unavailable(message),
        (_, 415 | 422) => EngineError::AudioDecode(message),
        _ => EngineError::Inference(message),
    }
}

#[async_trait]
impl TranscriptionEngine for SidecarEngine {
    fn name(&self) -> &str {
        "sidecar"
    }

    #[instrument(skip_all, fields(file = request.filename, model = %request.params.model))]
    async fn transcribe(
        &self,
        request: EngineRequest<'_>,
        _progress: &dyn ProgressSink,
    ) -> Result<SegmentedResult, EngineError> {
        let file = tokio::fs::File::open(request.audio).await?;
        let len = file.metadata().await?.len();
        let part = Part::stream_with_length(reqwest::Body::from(file), len)
            .file_name(request.filename.to_string());
        let options = serde_json::to_string(request.params)
            .map_err(|e| EngineError::Protocol(format!("failed to encode options: {e}")))?;
        let form = Form::new().part("audio", part).text("options", options);

        debug!(bytes = len, "sending audio to sidecar");
        let started = std::time::Instant::now();
        let response = self
            .client
            .post(format!("{}/transcribe", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error(status.as_u16(), &body));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| EngineError::Protocol(format!("failed to read sidecar response: {e}")))?;
        let result: SegmentedResult = serde_json::from_slice(&bytes)
            .map_err(|e| EngineError::Protocol(format!("failed to parse transcription response: {e}")))?;

        info!(
            segments = result.segments.len(),
            language = result.language.as_deref().unwrap_or("unknown"),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "sidecar transcription finished"
        );
        Ok(result)
    }

    async fn models(&self) -> Result<Value, EngineError> {
        self.get_json("/models").await
    }

    async fn languages(&self) -> Result<Value, EngineError> {
        self.get_json("/languages").await
    }
}
