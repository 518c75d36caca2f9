//! Job record and submission parameters.
//!
//! A [`Job`] only changes through its transition methods ([`Job::start`],
//! [`Job::complete`], [`Job::fail`]), which refuse any move that would break
//! the lifecycle:
//!
//! ```text
//! Pending ──start──▶ Processing ──complete──▶ Completed
//!    │                    │
//!    └───────fail─────────┴────────fail──────▶ Failed
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::JobId;

// ─────────────────────────────────────────────────────────────────────────────
// Enums
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serialization formats a finished transcript can be written in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Srt,
    Vtt,
    Txt,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 4] = [Self::Json, Self::Srt, Self::Vtt, Self::Txt];

    /// File extension, also the wire name.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Srt => "srt",
            Self::Vtt => "vtt",
            Self::Txt => "txt",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Srt => "application/x-subrip",
            Self::Vtt => "text/vtt; charset=utf-8",
            Self::Txt => "text/plain; charset=utf-8",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.extension().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown output format: {s}"))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhisperModel {
    Tiny,
    #[default]
    Base,
    Small,
    Medium,
    Large,
}

impl WhisperModel {
    pub const ALL: [WhisperModel; 5] = [
        Self::Tiny,
        Self::Base,
        Self::Small,
        Self::Medium,
        Self::Large,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tiny => "tiny",
            Self::Base => "base",
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
        }
    }
}

impl fmt::Display for WhisperModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    #[default]
    Transcribe,
    Translate,
}

// ─────────────────────────────────────────────────────────────────────────────
// Submission parameters
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a client may ask of the engine. Passed through verbatim; only
/// presence, type and basic ranges are checked here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionParams {
    /// Source language code (e.g. "en"); `None` lets the engine detect it.
    pub language: Option<String>,
    pub task: Task,
    pub model: WhisperModel,
    #[serde(alias = "output_formats")]
    pub output_format: Vec<OutputFormat>,

    pub initial_prompt: Option<String>,
    pub temperature: Option<f64>,
    pub beam_size: Option<u32>,
    pub patience: Option<f64>,
    pub suppress_tokens: Option<Vec<i64>>,
    pub condition_on_previous_text: bool,
    pub fp16: bool,

    pub word_timestamps: bool,
    pub vad_filter: bool,
    pub vad_threshold: f64,
}

impl Default for TranscriptionParams {
    fn default() -> Self {
        Self {
            language: None,
            task: Task::Transcribe,
            model: WhisperModel::Base,
            output_format: vec![OutputFormat::Json],
            initial_prompt: None,
            temperature: Some(0.0),
            beam_size: Some(5),
            patience: None,
            suppress_tokens: None,
            condition_on_previous_text: true,
            fp16: true,
            word_timestamps: false,
            vad_filter: true,
            vad_threshold: 0.5,
        }
    }
}

impl TranscriptionParams {
    pub fn validate(&self) -> Result<(), String> {
        if self.output_format.is_empty() {
            return Err("at least one output format is required".into());
        }
        if !(0.0..=1.0).contains(&self.vad_threshold) {
            return Err(format!(
                "vad_threshold must be between 0.0 and 1.0, got {}",
                self.vad_threshold
            ));
        }
        if let Some(t) = self.temperature {
            if t < 0.0 {
                return Err(format!("temperature must be non-negative, got {t}"));
            }
        }
        if self.beam_size == Some(0) {
            return Err("beam_size must be at least 1".into());
        }
        if matches!(self.language.as_deref(), Some(l) if l.trim().is_empty()) {
            return Err("language must not be empty".into());
        }
        Ok(())
    }

    /// Requested formats with duplicates removed, in request order.
    pub fn formats(&self) -> Vec<OutputFormat> {
        let mut out = Vec::with_capacity(self.output_format.len());
        for f in &self.output_format {
            if !out.contains(f) {
                out.push(*f);
            }
        }
        out
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Job record
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressInfo {
    pub segments_processed: u64,
    pub total_segments: Option<u64>,
    /// Always unset: no timing model is defined.
    pub estimated_time_remaining: Option<f64>,
    /// Seconds of audio per wall-clock second. Always unset.
    pub processing_speed: Option<f64>,
}

/// Persisted record of one transcription request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    /// Original upload file name.
    pub filename: String,
    /// Bytes actually received from the upload stream.
    pub filesize: u64,
    /// Audio duration in seconds, known once completed.
    #[serde(default)]
    pub duration: Option<f64>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub progress: Option<ProgressInfo>,
    #[serde(default)]
    pub error: Option<String>,
    pub model: WhisperModel,
    pub output_formats: Vec<OutputFormat>,
    /// Requested language, `None` for auto-detection.
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub task: Task,
    /// Language reported by the engine on completion.
    #[serde(default)]
    pub detected_language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition for job {id}: {from} -> {to}")]
pub struct TransitionError {
    pub id: JobId,
    pub from: JobStatus,
    pub to: JobStatus,
}

impl Job {
    /// A fresh `Pending` record.
    pub fn new(
        id: JobId,
        filename: impl Into<String>,
        filesize: u64,
        params: &TranscriptionParams,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            filename: filename.into(),
            filesize,
            duration: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            progress: None,
            error: None,
            model: params.model,
            output_formats: params.formats(),
            language: params.language.clone(),
            task: params.task,
            detected_language: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn requested(&self, format: OutputFormat) -> bool {
        self.output_formats.contains(&format)
    }

    fn refuse(&self, to: JobStatus) -> TransitionError {
        TransitionError {
            id: self.id.clone(),
            from: self.status,
            to,
        }
    }

    /// Pending → Processing.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status != JobStatus::Pending {
            return Err(self.refuse(JobStatus::Processing));
        }
        self.status = JobStatus::Processing;
        self.started_at = Some(now);
        Ok(())
    }

    /// Processing → Completed.
    pub fn complete(
        &mut self,
        now: DateTime<Utc>,
        duration: Option<f64>,
        detected_language: Option<String>,
    ) -> Result<(), TransitionError> {
        if self.status != JobStatus::Processing {
            return Err(self.refuse(JobStatus::Completed));
        }
        self.status = JobStatus::Completed;
        // wall clock may step backwards between the two transitions
        self.completed_at = Some(self.started_at.map_or(now, |s| s.max(now)));
        self.duration = duration;
        self.detected_language = detected_language;
        Ok(())
    }

    /// Pending | Processing → Failed. A job failed straight from Pending gets
    /// `started_at = now`.
    pub fn fail(&mut self, now: DateTime<Utc>, error: impl Into<String>) -> Result<(), TransitionError> {
        if self.is_terminal() {
            return Err(self.refuse(JobStatus::Failed));
        }
        let mut error = error.into();
        if error.trim().is_empty() {
            error = "unknown error".into();
        }
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.status = JobStatus::Failed;
        self.error = Some(error);
        Ok(())
    }

    /// Record engine-reported progress. Only meaningful while processing.
    pub fn set_progress(&mut self, processed: u64, total: Option<u64>) -> Result<(), TransitionError> {
        if self.status != JobStatus::Processing {
            return Err(self.refuse(JobStatus::Processing));
        }
        self.progress = Some(ProgressInfo {
            segments_processed: processed,
            total_segments: total,
            estimated_time_remaining: None,
            processing_speed: None,
        });
        Ok(())
    }
}
