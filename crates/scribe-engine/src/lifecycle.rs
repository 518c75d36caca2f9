//! Submission and the background routine that drives each job to a terminal
//! state.
//!
//! Every transition goes through [`MetadataStore::update`], so a job deleted
//! while its routine runs is never written back; the routine notices the
//! `NotFound`, sweeps whatever it produced and stops.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use metrics::{counter, gauge, histogram};
use scribe_telemetry::metrics::{
    JOBS_ACTIVE, JOBS_COMPLETED_TOTAL, JOBS_FAILED_TOTAL, JOBS_SUBMITTED_TOTAL, JOB_DURATION_SECONDS,
};
use scribe_core::{Job, JobError, JobId, SegmentedResult, TranscriptionParams};
use scribe_store::{ArtifactStore, MetadataStore, StagedAudio, StoreError};
use tokio::io::AsyncRead;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::engine::{EngineRequest, ProgressSink, TranscriptionEngine};
use crate::format;

/// Error recorded on jobs found unfinished at startup.
pub const INTERRUPTED_ERROR: &str = "interrupted: service restarted before the job finished";

struct ActiveJob {
    finished: watch::Receiver<bool>,
    started: Instant,
}

#[derive(Clone)]
pub struct JobManager {
    store: Arc<MetadataStore>,
    artifacts: Arc<ArtifactStore>,
    engine: Arc<dyn TranscriptionEngine>,
    active: Arc<DashMap<JobId, ActiveJob>>,
}

impl JobManager {
    pub fn new(
        store: Arc<MetadataStore>,
        artifacts: Arc<ArtifactStore>,
        engine: Arc<dyn TranscriptionEngine>,
    ) -> Self {
        Self {
            store,
            artifacts,
            engine,
            active: Arc::new(DashMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<dyn TranscriptionEngine> {
        &self.engine
    }

    /// Stream an upload into the staging area under a freshly allocated id.
    pub async fn stage_audio<R>(&self, filename: &str, reader: &mut R) -> Result<StagedAudio, JobError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let id = JobId::new();
        Ok(self.artifacts.stage(&id, filename, reader).await?)
    }

    /// Drop a staged upload that will never be submitted.
    pub async fn discard(&self, staged: &StagedAudio) {
        if let Err(e) = self.artifacts.remove_staged(&staged.path).await {
            warn!(job_id = %staged.id, error = %e, "failed to discard staged audio");
        }
    }

    /// Record a Pending job for `staged` and start its routine. Returns once
    /// the Pending record is durable; transcription happens in the background.
    #[instrument(skip_all, fields(job_id = %staged.id, file = %staged.filename))]
    pub async fn submit(
        &self,
        staged: StagedAudio,
        params: TranscriptionParams,
    ) -> Result<Job, JobError> {
        if let Err(msg) = params.validate() {
            self.discard(&staged).await;
            return Err(JobError::InvalidRequest(msg));
        }

        let job = Job::new(
            staged.id.clone(),
            staged.filename.clone(),
            staged.size,
            &params,
            Utc::now(),
        );
        if let Err(e) = self.store.put(&job).await {
            error!(error = %e, "failed to persist pending job");
            self.discard(&staged).await;
            return Err(e.into());
        }
        counter!(JOBS_SUBMITTED_TOTAL).increment(1);
        info!(
            bytes = staged.size,
            model = %job.model,
            formats = ?job.output_formats,
            "job submitted"
        );

        let (done_tx, done_rx) = watch::channel(false);
        let _ = self.active.insert(
            job.id.clone(),
            ActiveJob {
                finished: done_rx,
                started: Instant::now(),
            },
        );
        #[allow(clippy::cast_precision_loss)]
        gauge!(JOBS_ACTIVE).set(self.active.len() as f64);

        let guard = RoutineGuard {
            active: Arc::clone(&self.active),
            id: job.id.clone(),
            done: done_tx,
        };
        let manager = self.clone();
        let _ = tokio::spawn(async move {
            let _guard = guard;
            manager.run(staged, params).await;
        });

        Ok(job)
    }

    /// Record engine-reported progress. Ignored unless the job is Processing.
    pub async fn update_progress(
        &self,
        id: &JobId,
        segments_processed: u64,
        total_segments: Option<u64>,
    ) -> Result<(), JobError> {
        match self
            .store
            .update(id, |job| job.set_progress(segments_processed, total_segments))
            .await
        {
            Ok(_) => Ok(()),
            Err(StoreError::Transition(e)) => {
                debug!(job_id = %id, status = %e.from, "progress ignored");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Mark every unfinished record on disk as failed. Run once at startup,
    /// before any submission, so no routine owns these records.
    pub async fn recover_interrupted(&self) -> Result<usize, JobError> {
        let mut recovered = 0;
        for job in self.store.list().await? {
            if job.is_terminal() || self.is_active(&job.id) {
                continue;
            }
            match self.store.update(&job.id, |j| j.fail(Utc::now(), INTERRUPTED_ERROR)).await {
                Ok(_) => {
                    recovered += 1;
                    warn!(job_id = %job.id, status = %job.status, "marked interrupted job as failed");
                }
                Err(StoreError::NotFound(_) | StoreError::Transition(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        if recovered > 0 {
            info!(recovered, "startup recovery finished");
        }
        Ok(recovered)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_active(&self, id: &JobId) -> bool {
        self.active.contains_key(id)
    }

    /// Resolves once the routine for `id` has finished. Immediate if no
    /// routine is running.
    pub async fn wait(&self, id: &JobId) {
        let Some(mut finished) = self.active.get(id).map(|a| a.finished.clone()) else {
            return;
        };
        let _ = finished.wait_for(|done| *done).await;
    }

    /// Wait for every routine that is running right now.
    pub async fn wait_all(&self) {
        let ids: Vec<JobId> = self.active.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.wait(&id).await;
        }
    }

    // ── routine ──────────────────────────────────────────────────────────

    #[instrument(skip_all, fields(job_id = %staged.id))]
    async fn run(&self, staged: StagedAudio, params: TranscriptionParams) {
        let id = &staged.id;

        match self.store.update(id, |job| job.start(Utc::now())).await {
            Ok(_) => debug!("job processing"),
            Err(StoreError::NotFound(_)) => return self.sweep_deleted(&staged).await,
            Err(e) => {
                error!(error = %e, "failed to mark job processing");
                return self.record_failure(&staged, JobError::from(e).to_string()).await;
            }
        }

        let progress = JobProgress {
            manager: self,
            id,
        };
        let request = EngineRequest {
            audio: &staged.path,
            filename: &staged.filename,
            params: &params,
        };
        let outcome = AssertUnwindSafe(self.engine.transcribe(request, &progress))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(result)) => self.finish(&staged, &params, result).await,
            Ok(Err(e)) => {
                warn!(error = %e, kind = e.kind(), engine = self.engine.name(), "transcription failed");
                self.record_failure(&staged, e.to_string()).await;
            }
            Err(payload) => {
                let message = format!("engine panicked: {}", panic_message(payload.as_ref()));
                error!(engine = self.engine.name(), error = %message, "transcription panicked");
                self.record_failure(&staged, message).await;
            }
        }
    }

    async fn finish(&self, staged: &StagedAudio, params: &TranscriptionParams, result: SegmentedResult) {
        let id = &staged.id;
        let rendered = match format::format(&result, &params.formats()) {
            Ok(r) => r,
            Err(e) => return self.record_failure(staged, e.to_string()).await,
        };
        for (format, bytes) in &rendered {
            if let Err(e) = self.artifacts.write_artifact(id, *format, bytes).await {
                error!(format = %format, error = %e, "failed to write artifact");
                self.remove_artifacts(id).await;
                return self.record_failure(staged, JobError::from(e).to_string()).await;
            }
        }

        let duration = result.effective_duration();
        let detected_language = result.language.clone().or_else(|| params.language.clone());
        match self
            .store
            .update(id, |job| job.complete(Utc::now(), duration, detected_language))
            .await
        {
            Ok(job) => {
                counter!(JOBS_COMPLETED_TOTAL).increment(1);
                info!(
                    segments = result.segments.len(),
                    duration = job.duration.unwrap_or_default(),
                    language = job.detected_language.as_deref().unwrap_or("unknown"),
                    "job completed"
                );
                if let Err(e) = self.artifacts.remove_staged(&staged.path).await {
                    warn!(error = %e, "failed to remove staged audio");
                }
            }
            Err(StoreError::NotFound(_)) => self.sweep_deleted(staged).await,
            Err(e) => {
                error!(error = %e, "failed to mark job completed");
                self.remove_artifacts(id).await;
                self.record_failure(staged, JobError::from(e).to_string()).await;
            }
        }
    }

    /// Move the job to Failed. Staged audio is kept for inspection.
    async fn record_failure(&self, staged: &StagedAudio, message: String) {
        match self.store.update(&staged.id, |job| job.fail(Utc::now(), message.as_str())).await {
            Ok(_) => {
                counter!(JOBS_FAILED_TOTAL).increment(1);
                warn!(error = %message, "job failed");
            }
            Err(StoreError::NotFound(_)) => self.sweep_deleted(staged).await,
            Err(e) => error!(error = %e, original_error = %message, "failed to record job failure"),
        }
    }

    /// The record vanished mid-flight: leave nothing behind.
    async fn sweep_deleted(&self, staged: &StagedAudio) {
        info!("job deleted while running, discarding its output");
        self.remove_artifacts(&staged.id).await;
        if let Err(e) = self.artifacts.remove_staged(&staged.path).await {
            warn!(error = %e, "failed to remove staged audio");
        }
    }

    async fn remove_artifacts(&self, id: &JobId) {
        if let Err(e) = self.artifacts.remove_artifacts(id).await {
            warn!(job_id = %id, error = %e, "failed to remove artifacts");
        }
    }
}

/// Owned by the spawned routine. Dropping it, on return or on unwind,
/// deregisters the job and wakes its waiters.
struct RoutineGuard {
    active: Arc<DashMap<JobId, ActiveJob>>,
    id: JobId,
    done: watch::Sender<bool>,
}

impl Drop for RoutineGuard {
    fn drop(&mut self) {
        if let Some((_, active)) = self.active.remove(&self.id) {
            let elapsed = active.started.elapsed();
            histogram!(JOB_DURATION_SECONDS).record(elapsed.as_secs_f64());
            debug!(job_id = %self.id, elapsed_ms = elapsed.as_millis() as u64, "routine finished");
        }
        #[allow(clippy::cast_precision_loss)]
        gauge!(JOBS_ACTIVE).set(self.active.len() as f64);
        let _ = self.done.send(true);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}

/// Forwards engine progress to the job's record.
struct JobProgress<'a> {
    manager: &'a JobManager,
    id: &'a JobId,
}

#[async_trait]
impl ProgressSink for JobProgress<'_> {
    async fn update(&self, segments_processed: u64, total_segments: Option<u64>) {
        if let Err(e) = self
            .manager
            .update_progress(self.id, segments_processed, total_segments)
            .await
        {
            warn!(job_id = %self.id, error = %e, "failed to record progress");
        }
    }
}
