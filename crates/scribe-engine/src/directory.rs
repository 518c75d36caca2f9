//! Read and delete operations over stored jobs.

use std::sync::Arc;

use scribe_core::{Job, JobError, JobId, JobStatus, OutputFormat};
use scribe_store::{ArtifactStore, MetadataStore, StoreError};
use tracing::{info, instrument, warn};

/// A finished transcript ready to hand to a client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    /// Suggested download name: `transcript_<source filename>.<ext>`.
    pub filename: String,
    pub content_type: &'static str,
}

#[derive(Clone)]
pub struct JobDirectory {
    store: Arc<MetadataStore>,
    artifacts: Arc<ArtifactStore>,
}

impl JobDirectory {
    pub fn new(store: Arc<MetadataStore>, artifacts: Arc<ArtifactStore>) -> Self {
        Self { store, artifacts }
    }

    pub async fn list(&self) -> Result<Vec<Job>, JobError> {
        Ok(self.store.list().await?)
    }

    pub async fn get(&self, id: &str) -> Result<Job, JobError> {
        let id = JobId::parse(id).ok_or_else(|| JobError::not_found(id))?;
        Ok(self.store.get(&id).await?)
    }

    #[instrument(skip_all, fields(job_id = id, format = %format))]
    pub async fn download(&self, id: &str, format: OutputFormat) -> Result<Artifact, JobError> {
        let job = self.get(id).await?;
        if job.status != JobStatus::Completed {
            return Err(JobError::InvalidRequest(
                "Transcription is not yet completed".into(),
            ));
        }
        if !job.requested(format) {
            return Err(JobError::InvalidRequest(format!(
                "Transcription not available in {format} format"
            )));
        }
        let bytes = self
            .artifacts
            .read_artifact(&job.id, format)
            .await?
            .ok_or_else(|| {
                warn!("completed job is missing its artifact");
                JobError::NotFound("Transcript file not found".into())
            })?;
        Ok(Artifact {
            bytes,
            filename: format!("transcript_{}.{}", job.filename, format.extension()),
            content_type: format.content_type(),
        })
    }

    /// Remove the record, every artifact the id could have, and any staged
    /// audio. Deleting an unknown id succeeds and returns `false`.
    #[instrument(skip_all, fields(job_id = id))]
    pub async fn delete(&self, id: &str) -> Result<bool, JobError> {
        let Some(id) = JobId::parse(id) else {
            return Ok(false);
        };
        let record = self.store.delete(&id).await.map_err(internal)?;
        let artifacts = self.artifacts.remove_artifacts(&id).await.map_err(internal)?;
        let staged = self.artifacts.remove_staged_for(&id).await.map_err(internal)?;

        let removed = record || !artifacts.is_empty() || staged > 0;
        if removed {
            info!(record, artifacts = ?artifacts, staged, "job deleted");
        }
        Ok(removed)
    }
}

fn internal(e: StoreError) -> JobError {
    JobError::Internal(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TranscriptionEngine;
    use crate::lifecycle::JobManager;
    use crate::mock::{MockEngine, MockResponse};
    use scribe_core::retry::RetryConfig;
    use scribe_core::TranscriptionParams;
    use tokio::sync::Notify;

    struct Harness {
        directory: JobDirectory,
        manager: JobManager,
        store: Arc<MetadataStore>,
        artifacts: Arc<ArtifactStore>,
        _dir: tempfile::TempDir,
    }

    async fn harness(engine: MockEngine) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            MetadataStore::open(dir.path().join("transcripts"), RetryConfig::none())
                .await
                .unwrap(),
        );
        let artifacts = Arc::new(
            ArtifactStore::open(dir.path().join("transcripts"), dir.path().join("uploads"))
                .await
                .unwrap(),
        );
        let engine: Arc<dyn TranscriptionEngine> = Arc::new(engine);
        Harness {
            directory: JobDirectory::new(Arc::clone(&store), Arc::clone(&artifacts)),
            manager: JobManager::new(Arc::clone(&store), Arc::clone(&artifacts), engine),
            store,
            artifacts,
            _dir: dir,
        }
    }

    async fn submit(h: &Harness, formats: Vec<OutputFormat>) -> Job {
        let mut audio: &[u8] = b"fake audio";
        let staged = h.manager.stage_audio("interview.mp3", &mut audio).await.unwrap();
        let params = TranscriptionParams {
            output_format: formats,
            ..Default::default()
        };
        h.manager.submit(staged, params).await.unwrap()
    }

    #[tokio::test]
    async fn json_and_srt_scenario() {
        let h = harness(MockEngine::repeating(MockResponse::text("hello\nworld"))).await;
        let job = submit(&h, vec![OutputFormat::Json, OutputFormat::Srt]).await;
        h.manager.wait(&job.id).await;

        let done = h.directory.get(job.id.as_str()).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);

        let srt = h.directory.download(job.id.as_str(), OutputFormat::Srt).await.unwrap();
        assert_eq!(srt.filename, "transcript_interview.mp3.srt");
        assert_eq!(srt.content_type, "application/x-subrip");
        assert!(String::from_utf8(srt.bytes).unwrap().contains("00:00:01,000 --> 00:00:02,000\nworld"));

        let err = h
            .directory
            .download(job.id.as_str(), OutputFormat::Vtt)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidRequest(ref m) if m == "Transcription not available in vtt format"));
    }

    #[tokio::test]
    async fn download_before_completion_is_rejected() {
        let gate = Arc::new(Notify::new());
        let h = harness(MockEngine::new(vec![MockResponse::gated(
            Arc::clone(&gate),
            MockResponse::text("hi"),
        )]))
        .await;
        let job = submit(&h, vec![OutputFormat::Json]).await;

        let err = h
            .directory
            .download(job.id.as_str(), OutputFormat::Json)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidRequest(ref m) if m == "Transcription is not yet completed"));

        gate.notify_one();
        h.manager.wait(&job.id).await;
        assert!(h.directory.download(job.id.as_str(), OutputFormat::Json).await.is_ok());
    }

    #[tokio::test]
    async fn missing_artifact_is_not_found() {
        let h = harness(MockEngine::repeating(MockResponse::text("hi"))).await;
        let job = submit(&h, vec![OutputFormat::Txt]).await;
        h.manager.wait(&job.id).await;
        std::fs::remove_file(h.artifacts.artifact_path(&job.id, OutputFormat::Txt)).unwrap();

        let err = h
            .directory
            .download(job.id.as_str(), OutputFormat::Txt)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn delete_while_pending() {
        let gate = Arc::new(Notify::new());
        let h = harness(MockEngine::new(vec![MockResponse::gated(
            Arc::clone(&gate),
            MockResponse::text("too late"),
        )]))
        .await;
        let job = submit(&h, vec![OutputFormat::Json, OutputFormat::Txt]).await;

        assert!(h.directory.delete(job.id.as_str()).await.unwrap());
        gate.notify_one();
        h.manager.wait(&job.id).await;

        assert!(h.directory.get(job.id.as_str()).await.unwrap_err().is_not_found());
        assert!(h.artifacts.existing_artifacts(&job.id).await.is_empty());
        assert!(h.directory.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_sweeps_unrequested_formats() {
        let h = harness(MockEngine::repeating(MockResponse::text("hi"))).await;
        let job = submit(&h, vec![OutputFormat::Json]).await;
        h.manager.wait(&job.id).await;
        // stray artifact from some earlier run
        h.artifacts
            .write_artifact(&job.id, OutputFormat::Vtt, b"WEBVTT\n\n")
            .await
            .unwrap();

        assert!(h.directory.delete(job.id.as_str()).await.unwrap());
        assert!(h.artifacts.existing_artifacts(&job.id).await.is_empty());
        assert!(!h.store.record_path(&job.id).exists());
        assert!(!h.directory.delete(job.id.as_str()).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_or_malformed_ids() {
        let h = harness(MockEngine::new(vec![])).await;
        assert!(h.directory.get("job_nope").await.unwrap_err().is_not_found());
        assert!(h.directory.get("../../etc/passwd").await.unwrap_err().is_not_found());
        assert!(h
            .directory
            .download("job_nope", OutputFormat::Json)
            .await
            .unwrap_err()
            .is_not_found());
        assert!(!h.directory.delete("../settings").await.unwrap());
    }

    #[tokio::test]
    async fn list_sees_records_from_previous_process() {
        let h = harness(MockEngine::new(vec![])).await;
        let old = Job::new(
            JobId::new(),
            "old.wav",
            3,
            &TranscriptionParams::default(),
            chrono::Utc::now(),
        );
        std::fs::write(
            h.store.record_path(&old.id),
            serde_json::to_vec(&old).unwrap(),
        )
        .unwrap();

        let listed = h.directory.list().await.unwrap();
        assert_eq!(listed, vec![old.clone()]);
        assert_eq!(h.directory.get(old.id.as_str()).await.unwrap(), old);
    }
}
