//! File-backed job metadata with an in-memory mirror.
//!
//! Layout: one JSON document per job at `<dir>/<id>_metadata.json`. The
//! directory is the source of truth for listing; the mirror only ever holds
//! records written by this process.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use scribe_core::job::TransitionError;
use scribe_core::retry::RetryConfig;
use scribe_core::{Job, JobId};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::fsutil::{remove_if_exists, with_retry, write_atomic};

const METADATA_SUFFIX: &str = "_metadata.json";

pub struct MetadataStore {
    dir: PathBuf,
    cache: DashMap<JobId, Job>,
    /// Serializes writers per job id. Readers never take it.
    locks: DashMap<JobId, Arc<Mutex<()>>>,
    retry: RetryConfig,
}

impl MetadataStore {
    /// Open (creating if needed) the metadata directory.
    pub async fn open(dir: impl Into<PathBuf>, retry: RetryConfig) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(format!("create {}", dir.display()), e))?;
        Ok(Self {
            dir,
            cache: DashMap::new(),
            locks: DashMap::new(),
            retry,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, id: &JobId) -> PathBuf {
        self.dir.join(format!("{id}{METADATA_SUFFIX}"))
    }

    fn lock_for(&self, id: &JobId) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(id.clone()).or_default().value())
    }

    /// Overwrite the full record, durable copy first, then the mirror.
    pub async fn put(&self, job: &Job) -> Result<(), StoreError> {
        let lock = self.lock_for(&job.id);
        let _guard = lock.lock().await;
        self.write_locked(job).await
    }

    async fn write_locked(&self, job: &Job) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(job)?;
        let path = self.record_path(&job.id);
        with_retry(&self.retry, "metadata.write", || write_atomic(&path, &bytes))
            .await
            .map_err(|e| StoreError::io(format!("write {}", path.display()), e))?;
        self.cache.insert(job.id.clone(), job.clone());
        debug!(job_id = %job.id, status = %job.status, "metadata persisted");
        Ok(())
    }

    /// Read-modify-write of an existing record. Fails with `NotFound` if the
    /// record was deleted, so a deleted job is never re-created.
    pub async fn update<F>(&self, id: &JobId, mutate: F) -> Result<Job, StoreError>
    where
        F: FnOnce(&mut Job) -> Result<(), TransitionError>,
    {
        let lock = self.lock_for(id);
        let result = {
            let _guard = lock.lock().await;
            match self.load_locked(id).await {
                Ok(mut job) => match mutate(&mut job) {
                    Ok(()) => self.write_locked(&job).await.map(|()| job),
                    Err(e) => Err(e.into()),
                },
                Err(e) => Err(e),
            }
        };
        self.release_if_absent(id, lock, &result);
        result
    }

    /// Mirror first, then disk. Disk hits are mirrored under the id's lock so
    /// a concurrent delete cannot leave a stale entry behind.
    pub async fn get(&self, id: &JobId) -> Result<Job, StoreError> {
        if let Some(job) = self.cache.get(id) {
            return Ok(job.value().clone());
        }
        let lock = self.lock_for(id);
        let result = {
            let _guard = lock.lock().await;
            self.load_locked(id).await
        };
        self.release_if_absent(id, lock, &result);
        result
    }

    /// Lookups of ids with no record must not leave a lock entry behind.
    /// The entry stays if anyone else still holds it.
    fn release_if_absent(&self, id: &JobId, lock: Arc<Mutex<()>>, result: &Result<Job, StoreError>) {
        if !matches!(result, Err(StoreError::NotFound(_))) {
            return;
        }
        drop(lock);
        let _ = self.locks.remove_if(id, |_, l| Arc::strong_count(l) == 1);
    }

    /// Caller holds the id's lock.
    async fn load_locked(&self, id: &JobId) -> Result<Job, StoreError> {
        if let Some(job) = self.cache.get(id) {
            return Ok(job.value().clone());
        }
        let job = self
            .read_from_disk(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        self.cache.insert(id.clone(), job.clone());
        Ok(job)
    }

    async fn read_from_disk(&self, id: &JobId) -> Result<Option<Job>, StoreError> {
        let path = self.record_path(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(format!("read {}", path.display()), e)),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Every record on disk, oldest first. Unreadable records are skipped.
    pub async fn list(&self) -> Result<Vec<Job>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| StoreError::io(format!("list {}", self.dir.display()), e))?;

        let mut jobs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(format!("list {}", self.dir.display()), e))?
        {
            let name = entry.file_name();
            let Some(id) = name
                .to_str()
                .and_then(|n| n.strip_suffix(METADATA_SUFFIX))
                .and_then(JobId::parse)
            else {
                continue;
            };
            match self.read_from_disk(&id).await {
                Ok(Some(job)) => jobs.push(job),
                // deleted between read_dir and read
                Ok(None) => {}
                Err(e) => warn!(job_id = %id, error = %e, "skipping unreadable metadata record"),
            }
        }
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(jobs)
    }

    /// Remove the record from disk and mirror. Returns whether anything was
    /// removed; deleting an absent record is not an error.
    pub async fn delete(&self, id: &JobId) -> Result<bool, StoreError> {
        let lock = self.lock_for(id);
        let removed = {
            let _guard = lock.lock().await;
            let path = self.record_path(id);
            let on_disk = remove_if_exists(&path)
                .await
                .map_err(|e| StoreError::io(format!("remove {}", path.display()), e))?;
            let in_memory = self.cache.remove(id).is_some();
            on_disk || in_memory
        };
        self.locks.remove(id);
        Ok(removed)
    }

    /// Number of records in the mirror.
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Number of per-id write locks currently held in the map.
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }
}
