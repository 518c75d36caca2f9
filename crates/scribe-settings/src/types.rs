//! Settings types. Every struct deserializes with `#[serde(default)]` so a
//! partial settings file only needs the keys it overrides.

use std::collections::BTreeMap;
use std::path::PathBuf;

use scribe_core::retry::RetryConfig;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScribeSettings {
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub engine: EngineSettings,
    pub logging: LoggingSettings,
    /// Backoff for metadata writes.
    pub storage_retry: RetryConfig,
}

impl ScribeSettings {
    pub fn validate(&self) -> Result<()> {
        if self.server.max_upload_bytes == 0 {
            return Err(SettingsError::invalid(
                "server.maxUploadBytes",
                "must be greater than zero",
            ));
        }
        if self.engine.base_url.trim().is_empty() {
            return Err(SettingsError::invalid("engine.baseUrl", "is empty"));
        }
        if self.storage.uploads_dir == self.storage.transcripts_dir {
            return Err(SettingsError::invalid(
                "storage.uploadsDir",
                "must differ from storage.transcriptsDir",
            ));
        }
        Ok(())
    }
}

/// HTTP listener settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Largest accepted upload body.
    pub max_upload_bytes: u64,
    pub request_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_upload_bytes: 512 * 1024 * 1024,
            request_timeout_secs: 600,
        }
    }
}

/// Where uploads, metadata and artifacts live. Relative directories are
/// resolved against `data_dir`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    pub data_dir: PathBuf,
    pub uploads_dir: PathBuf,
    pub transcripts_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            uploads_dir: PathBuf::from("uploads"),
            transcripts_dir: PathBuf::from("transcripts"),
        }
    }
}

impl StorageSettings {
    pub fn uploads_path(&self) -> PathBuf {
        self.data_dir.join(&self.uploads_dir)
    }

    pub fn transcripts_path(&self) -> PathBuf {
        self.data_dir.join(&self.transcripts_dir)
    }
}

/// Transcription sidecar the service delegates inference to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    pub base_url: String,
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8001".to_string(),
            timeout_ms: 3_600_000,
            connect_timeout_ms: 5_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Per-module overrides, e.g. `{"scribe_engine": "debug"}`.
    pub module_levels: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            module_levels: BTreeMap::new(),
        }
    }
}
