//! HTTP handlers. Thin: parse the request, call the lifecycle manager or the
//! job directory, shape the response.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::TryStreamExt;
use scribe_core::{Job, OutputFormat, TranscriptionParams};
use scribe_store::StagedAudio;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::error::ApiError;
use crate::server::AppState;

// ─────────────────────────────────────────────────────────────────────────────
// POST /transcribe
// ─────────────────────────────────────────────────────────────────────────────

pub async fn create_transcription(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Job>, ApiError> {
    let mut staged = None;
    match read_form(&state, &mut multipart, &mut staged).await {
        Ok(params) => {
            let staged = staged.ok_or_else(|| {
                ApiError::BadRequest("missing audio file: send it as the `file` form part".into())
            })?;
            Ok(Json(state.manager.submit(staged, params).await?))
        }
        Err(e) => {
            if let Some(staged) = staged {
                state.manager.discard(&staged).await;
            }
            Err(e)
        }
    }
}

/// Walk the form in order. The audio part is streamed to staging as soon as it
/// is seen; everything else is collected and parsed once the form ends.
async fn read_form(
    state: &AppState,
    multipart: &mut Multipart,
    staged: &mut Option<StagedAudio>,
) -> Result<TranscriptionParams, ApiError> {
    let mut form = FormFields::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, state.max_upload_bytes))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" | "audio" => {
                if staged.is_some() {
                    return Err(ApiError::BadRequest(
                        "only one audio file may be uploaded per request".into(),
                    ));
                }
                let filename = field
                    .file_name()
                    .filter(|n| !n.is_empty())
                    .unwrap_or("audio")
                    .to_string();
                *staged = Some(stage_field(state, &filename, field).await?);
            }
            _ => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| multipart_error(e, state.max_upload_bytes))?;
                form.push(&name, text)?;
            }
        }
    }
    form.into_params()
}

async fn stage_field(
    state: &AppState,
    filename: &str,
    field: Field<'_>,
) -> Result<StagedAudio, ApiError> {
    let too_large = AtomicBool::new(false);
    let stream = field.map_err(|e| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            too_large.store(true, Ordering::Relaxed);
        }
        io::Error::other(e)
    });
    let mut reader = StreamReader::new(Box::pin(stream));
    match state.manager.stage_audio(filename, &mut reader).await {
        Ok(staged) => Ok(staged),
        Err(_) if too_large.load(Ordering::Relaxed) => Err(ApiError::PayloadTooLarge {
            limit: state.max_upload_bytes,
        }),
        Err(e) => Err(e.into()),
    }
}

fn multipart_error(e: MultipartError, limit: u64) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge { limit }
    } else {
        ApiError::BadRequest(format!("invalid multipart body: {}", e.body_text()))
    }
}

/// Non-file form parts, in the shape [`TranscriptionParams`] deserializes from.
#[derive(Default)]
struct FormFields {
    /// Contents of a JSON `params` part.
    base: Map<String, Value>,
    /// Individual parts; these win over `params`.
    fields: Map<String, Value>,
    formats: Vec<Value>,
}

impl FormFields {
    fn push(&mut self, name: &str, text: String) -> Result<(), ApiError> {
        let value = text.trim();
        match name {
            "params" => match serde_json::from_str(value) {
                Ok(Value::Object(obj)) => self.base.extend(obj),
                Ok(_) => return Err(bad("`params` must be a JSON object")),
                Err(e) => return Err(bad(format!("invalid `params` JSON: {e}"))),
            },
            "output_format" | "output_formats" => self.formats.extend(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| Value::String(s.to_ascii_lowercase())),
            ),
            "language" => {
                if !value.is_empty() {
                    self.set(name, Value::String(value.to_string()));
                }
            }
            "initial_prompt" => {
                if !value.is_empty() {
                    self.set(name, Value::String(text));
                }
            }
            "task" | "model" => self.set(name, Value::String(value.to_ascii_lowercase())),
            "temperature" | "patience" | "vad_threshold" => {
                let n = value
                    .parse::<f64>()
                    .ok()
                    .filter(|n| n.is_finite())
                    .ok_or_else(|| bad(format!("{name} must be a number, got {value:?}")))?;
                self.set(name, json!(n));
            }
            "beam_size" => {
                let n: u32 = value
                    .parse()
                    .map_err(|_| bad(format!("beam_size must be a positive integer, got {value:?}")))?;
                self.set(name, json!(n));
            }
            "suppress_tokens" => {
                let tokens = parse_tokens(value)?;
                self.set(name, json!(tokens));
            }
            "condition_on_previous_text" | "fp16" | "word_timestamps" | "vad_filter" => {
                let b = parse_bool(value)
                    .ok_or_else(|| bad(format!("{name} must be true or false, got {value:?}")))?;
                self.set(name, Value::Bool(b));
            }
            other => debug!(field = other, "ignoring unknown form field"),
        }
        Ok(())
    }

    fn set(&mut self, name: &str, value: Value) {
        let _ = self.fields.insert(name.to_string(), value);
    }

    fn into_params(self) -> Result<TranscriptionParams, ApiError> {
        let mut merged = self.base;
        merged.extend(self.fields);
        if !self.formats.is_empty() {
            let _ = merged.remove("output_formats");
            let _ = merged.insert("output_format".into(), Value::Array(self.formats));
        }
        serde_json::from_value(Value::Object(merged))
            .map_err(|e| bad(format!("invalid transcription parameters: {e}")))
    }
}

fn bad(msg: impl Into<String>) -> ApiError {
    ApiError::BadRequest(msg.into())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// `[-1, 50257]` or `-1,50257`.
fn parse_tokens(value: &str) -> Result<Vec<i64>, ApiError> {
    if value.starts_with('[') {
        return serde_json::from_str(value)
            .map_err(|e| bad(format!("suppress_tokens must be a list of integers: {e}")));
    }
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse()
                .map_err(|_| bad(format!("suppress_tokens must be a list of integers, got {s:?}")))
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Transcripts
// ─────────────────────────────────────────────────────────────────────────────

pub async fn list_transcripts(State(state): State<AppState>) -> Result<Json<Vec<Job>>, ApiError> {
    Ok(Json(state.directory.list().await?))
}

pub async fn get_transcript(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.directory.get(&id).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct DownloadQuery {
    pub format: Option<String>,
}

pub async fn download_transcript(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, ApiError> {
    let format = match query.format.as_deref() {
        None | Some("") => OutputFormat::Json,
        Some(f) => f.parse().map_err(ApiError::BadRequest)?,
    };
    let artifact = state.directory.download(&id, format).await?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        header_safe_filename(&artifact.filename)
    );
    Ok((
        [
            (header::CONTENT_TYPE, artifact.content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        artifact.bytes,
    )
        .into_response())
}

/// Header values must be visible ASCII; quotes would end the parameter.
fn header_safe_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub async fn delete_transcript(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let _ = state.directory.delete(&id).await?;
    Ok(Json(json!({ "message": "Transcription deleted successfully" })))
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine passthrough & health
// ─────────────────────────────────────────────────────────────────────────────

pub async fn list_models(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.manager.engine().models().await?))
}

pub async fn list_languages(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.manager.engine().languages().await?))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "active_jobs": state.manager.active_count(),
    }))
}

/// Prometheus text exposition. 404 when the binary installed no recorder.
pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(ref handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"detail": "metrics are not enabled"})),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_core::{Task, WhisperModel};

    fn form(parts: &[(&str, &str)]) -> Result<TranscriptionParams, ApiError> {
        let mut f = FormFields::default();
        for (name, text) in parts {
            f.push(name, (*text).to_string())?;
        }
        f.into_params()
    }

    #[test]
    fn empty_form_gives_defaults() {
        assert_eq!(form(&[]).unwrap(), TranscriptionParams::default());
    }

    #[test]
    fn individual_fields() {
        let p = form(&[
            ("language", "fr"),
            ("task", "Translate"),
            ("model", "small"),
            ("output_format", "srt, VTT"),
            ("output_format", "txt"),
            ("temperature", "0.2"),
            ("beam_size", "3"),
            ("suppress_tokens", "-1, 50257"),
            ("fp16", "false"),
            ("word_timestamps", "1"),
            ("vad_threshold", "0.35"),
            ("initial_prompt", "  Names: Zoë  "),
        ])
        .unwrap();
        assert_eq!(p.language.as_deref(), Some("fr"));
        assert_eq!(p.task, Task::Translate);
        assert_eq!(p.model, WhisperModel::Small);
        assert_eq!(
            p.output_format,
            vec![OutputFormat::Srt, OutputFormat::Vtt, OutputFormat::Txt]
        );
        assert_eq!(p.temperature, Some(0.2));
        assert_eq!(p.beam_size, Some(3));
        assert_eq!(p.suppress_tokens, Some(vec![-1, 50257]));
        assert!(!p.fp16);
        assert!(p.word_timestamps);
        assert_eq!(p.vad_threshold, 0.35);
        assert_eq!(p.initial_prompt.as_deref(), Some("  Names: Zoë  "));
    }

    #[test]
    fn params_json_part_with_field_override() {
        let p = form(&[
            ("params", r#"{"model": "medium", "output_formats": ["json", "srt"], "language": "de"}"#),
            ("language", "nl"),
        ])
        .unwrap();
        assert_eq!(p.model, WhisperModel::Medium);
        assert_eq!(p.output_format, vec![OutputFormat::Json, OutputFormat::Srt]);
        assert_eq!(p.language.as_deref(), Some("nl"));
    }

    #[test]
    fn form_formats_replace_params_formats() {
        let p = form(&[
            ("params", r#"{"output_formats": ["json"]}"#),
            ("output_format", "vtt"),
        ])
        .unwrap();
        assert_eq!(p.output_format, vec![OutputFormat::Vtt]);
    }

    #[test]
    fn bad_values_are_rejected() {
        for parts in [
            vec![("model", "huge")],
            vec![("output_format", "docx")],
            vec![("temperature", "warm")],
            vec![("beam_size", "-2")],
            vec![("vad_filter", "maybe")],
            vec![("suppress_tokens", "[1, \"x\"]")],
            vec![("params", "[1, 2]")],
            vec![("params", "{nope")],
        ] {
            let err = form(&parts).unwrap_err();
            assert_eq!(err.status(), StatusCode::BAD_REQUEST, "{parts:?}");
        }
    }

    #[test]
    fn blank_language_means_detect() {
        let p = form(&[("language", "  ")]).unwrap();
        assert!(p.language.is_none());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        assert!(form(&[("callback_url", "http://x")]).is_ok());
    }

    #[test]
    fn header_filename_is_sanitized() {
        assert_eq!(
            header_safe_filename("transcript_my \"talk\" é.mp3.srt"),
            "transcript_my _talk_ _.mp3.srt"
        );
    }
}
