//! Artifact files and staged uploads.
//!
//! - artifacts: `<transcripts_dir>/<id>.<ext>`, one per requested format
//! - staged audio: `<uploads_dir>/<id>_<sanitized filename>`

use std::io;
use std::path::{Path, PathBuf};

use scribe_core::{JobId, OutputFormat};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::debug;

use crate::error::StoreError;
use crate::fsutil::{remove_if_exists, write_atomic};

/// Audio written to the staging area, with the byte count actually received.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagedAudio {
    pub id: JobId,
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
}

pub struct ArtifactStore {
    transcripts_dir: PathBuf,
    uploads_dir: PathBuf,
}

impl ArtifactStore {
    pub async fn open(
        transcripts_dir: impl Into<PathBuf>,
        uploads_dir: impl Into<PathBuf>,
    ) -> Result<Self, StoreError> {
        let transcripts_dir = transcripts_dir.into();
        let uploads_dir = uploads_dir.into();
        for dir in [&transcripts_dir, &uploads_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| StoreError::io(format!("create {}", dir.display()), e))?;
        }
        Ok(Self {
            transcripts_dir,
            uploads_dir,
        })
    }

    pub fn artifact_path(&self, id: &JobId, format: OutputFormat) -> PathBuf {
        self.transcripts_dir
            .join(format!("{id}.{}", format.extension()))
    }

    pub async fn write_artifact(
        &self,
        id: &JobId,
        format: OutputFormat,
        bytes: &[u8],
    ) -> Result<PathBuf, StoreError> {
        let path = self.artifact_path(id, format);
        write_atomic(&path, bytes)
            .await
            .map_err(|e| StoreError::io(format!("write {}", path.display()), e))?;
        debug!(job_id = %id, format = %format, bytes = bytes.len(), "artifact written");
        Ok(path)
    }

    /// `Ok(None)` if the artifact does not exist.
    pub async fn read_artifact(
        &self,
        id: &JobId,
        format: OutputFormat,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.artifact_path(id, format);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(format!("read {}", path.display()), e)),
        }
    }

    /// Formats that currently have an artifact on disk for `id`.
    pub async fn existing_artifacts(&self, id: &JobId) -> Vec<OutputFormat> {
        let mut found = Vec::new();
        for format in OutputFormat::ALL {
            if tokio::fs::try_exists(self.artifact_path(id, format))
                .await
                .unwrap_or(false)
            {
                found.push(format);
            }
        }
        found
    }

    /// Remove the artifact of every known format for `id`, requested or not.
    /// Returns the formats that were actually removed.
    pub async fn remove_artifacts(&self, id: &JobId) -> Result<Vec<OutputFormat>, StoreError> {
        let mut removed = Vec::new();
        for format in OutputFormat::ALL {
            let path = self.artifact_path(id, format);
            if remove_if_exists(&path)
                .await
                .map_err(|e| StoreError::io(format!("remove {}", path.display()), e))?
            {
                removed.push(format);
            }
        }
        Ok(removed)
    }

    pub fn staging_path(&self, id: &JobId, filename: &str) -> PathBuf {
        self.uploads_dir
            .join(format!("{id}_{}", sanitize_filename(filename)))
    }

    /// Stream an upload into the staging area. The recorded size is what was
    /// read from `reader`, not anything the client declared.
    pub async fn stage<R>(
        &self,
        id: &JobId,
        filename: &str,
        reader: &mut R,
    ) -> Result<StagedAudio, StoreError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let path = self.staging_path(id, filename);
        let result = async {
            let mut file = tokio::fs::File::create(&path).await?;
            let size = tokio::io::copy(reader, &mut file).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok::<u64, io::Error>(size)
        }
        .await;

        match result {
            Ok(size) => {
                debug!(job_id = %id, bytes = size, path = %path.display(), "upload staged");
                Ok(StagedAudio {
                    id: id.clone(),
                    filename: filename.to_string(),
                    path,
                    size,
                })
            }
            Err(e) => {
                let _ = remove_if_exists(&path).await;
                Err(StoreError::io(format!("stage {}", path.display()), e))
            }
        }
    }

    /// Remove a single staged file.
    pub async fn remove_staged(&self, path: &Path) -> Result<bool, StoreError> {
        remove_if_exists(path)
            .await
            .map_err(|e| StoreError::io(format!("remove {}", path.display()), e))
    }

    /// Remove every staged file belonging to `id`.
    pub async fn remove_staged_for(&self, id: &JobId) -> Result<usize, StoreError> {
        let prefix = format!("{id}_");
        let mut entries = match tokio::fs::read_dir(&self.uploads_dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StoreError::io(format!("list {}", self.uploads_dir.display()), e)),
        };
        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(format!("list {}", self.uploads_dir.display()), e))?
        {
            if entry.file_name().to_string_lossy().starts_with(&prefix)
                && self.remove_staged(&entry.path()).await?
            {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Reduce a client-supplied file name to a safe single path component.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(100)
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "audio".to_string()
    } else {
        trimmed.to_string()
    }
}
