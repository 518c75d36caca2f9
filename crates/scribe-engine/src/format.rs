//! Result formatter: segmented transcript → output file bytes. Pure.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use scribe_core::{OutputFormat, SegmentedResult};

#[derive(Debug, thiserror::Error)]
#[error("failed to encode transcript as {format}: {message}")]
pub struct FormatError {
    pub format: OutputFormat,
    pub message: String,
}

/// Render `result` in every format of `formats`.
pub fn format(
    result: &SegmentedResult,
    formats: &[OutputFormat],
) -> Result<BTreeMap<OutputFormat, Vec<u8>>, FormatError> {
    formats
        .iter()
        .map(|&f| render(result, f).map(|bytes| (f, bytes)))
        .collect()
}

pub fn render(result: &SegmentedResult, format: OutputFormat) -> Result<Vec<u8>, FormatError> {
    match format {
        OutputFormat::Json => serde_json::to_vec_pretty(result).map_err(|e| FormatError {
            format,
            message: e.to_string(),
        }),
        OutputFormat::Txt => Ok(to_txt(result).into_bytes()),
        OutputFormat::Srt => Ok(to_srt(result).into_bytes()),
        OutputFormat::Vtt => Ok(to_vtt(result).into_bytes()),
    }
}

/// Raw segment texts, one per line.
pub fn to_txt(result: &SegmentedResult) -> String {
    result
        .segments
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn to_srt(result: &SegmentedResult) -> String {
    let mut out = String::new();
    for (i, seg) in result.segments.iter().enumerate() {
        let _ = write!(
            out,
            "{}\n{} --> {}\n{}\n\n",
            i + 1,
            format_timestamp(seg.start, ','),
            format_timestamp(seg.end, ','),
            seg.text.trim()
        );
    }
    out
}

pub fn to_vtt(result: &SegmentedResult) -> String {
    let mut out = String::from("WEBVTT\n\n");
    for seg in &result.segments {
        let _ = write!(
            out,
            "{} --> {}\n{}\n\n",
            format_timestamp(seg.start, '.'),
            format_timestamp(seg.end, '.'),
            seg.text.trim()
        );
    }
    out
}

/// `HH:MM:SS<sep>mmm`. Hours are not wrapped at 24; negative or non-finite
/// input renders as zero.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn format_timestamp(seconds: f64, decimal_separator: char) -> String {
    let total_ms = if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1000.0).round() as u64
    } else {
        0
    };
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{hours:02}:{minutes:02}:{secs:02}{decimal_separator}{millis:03}")
}
