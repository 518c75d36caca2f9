//! Engine output as it arrives from a whisper-style transcriber.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A timestamped span of recognized text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Seconds from the start of the audio.
    pub start: f64,
    pub end: f64,
    pub text: String,
    /// Engine-specific fields (tokens, avg_logprob, words, ...), kept so the
    /// JSON artifact is a full dump.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Segment {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
            extra: Map::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentedResult {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub segments: Vec<Segment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SegmentedResult {
    pub fn from_segments(segments: Vec<Segment>) -> Self {
        let text = segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("");
        Self {
            text,
            segments,
            ..Default::default()
        }
    }

    /// Reported duration, else the end of the last segment.
    pub fn effective_duration(&self) -> Option<f64> {
        self.duration
            .or_else(|| self.segments.last().map(|s| s.end))
    }
}
