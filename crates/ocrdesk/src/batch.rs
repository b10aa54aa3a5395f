//! Fan-out of one backend job onto several registry jobs.
//!
//! The service reports a single status for a batch. Every job of the
//! batch receives that status: the same aggregate progress while the
//! batch runs, and the same result or error when it ends.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};

use crate::client::{FileUpload, OcrService, StatusReport};
use crate::error::{BatchError, ServiceError};
use crate::job::{JobPatch, UpdateOutcome};
use crate::poller::{PollGuard, PollHandler, PollOptions, Poller};
use crate::registry::JobRegistry;

/// A backend job and the registry jobs mapped onto it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchHandle {
    pub batch_id: String,
    pub job_ids: Vec<String>,
    pub submitted_at: DateTime<Utc>,
}

/// Job ids shared between a tracked batch and its poll handler.
type JobIds = Arc<Mutex<Vec<String>>>;

struct TrackedBatch {
    handle: BatchHandle,
    job_ids: JobIds,
    guard: PollGuard,
}

type BatchMap = Mutex<HashMap<String, TrackedBatch>>;

fn lock(batches: &BatchMap) -> MutexGuard<'_, HashMap<String, TrackedBatch>> {
    batches.lock().unwrap_or_else(|poisoned| {
        warn!("Batch map lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

fn lock_ids(job_ids: &Mutex<Vec<String>>) -> MutexGuard<'_, Vec<String>> {
    job_ids.lock().unwrap_or_else(|poisoned| {
        warn!("Batch job list lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

/// Removes a batch and stops its poll. With `owner` set, only the entry
/// holding that job list is removed.
///
/// The guard is dropped after the map lock is released, since stopping a
/// poll may wait for its handler, which takes the same lock.
fn forget(batches: &BatchMap, batch_id: &str, owner: Option<&JobIds>) -> Option<BatchHandle> {
    let removed = {
        let mut map = lock(batches);
        let owned = map
            .get(batch_id)
            .is_some_and(|tracked| owner.map_or(true, |ids| Arc::ptr_eq(&tracked.job_ids, ids)));
        if owned {
            map.remove(batch_id)
        } else {
            None
        }
    };
    let TrackedBatch { handle, guard, .. } = removed?;
    drop(guard);
    Some(handle)
}

pub struct BatchCoordinator {
    registry: Arc<JobRegistry>,
    service: Arc<dyn OcrService>,
    poller: Poller,
    options: PollOptions,
    batches: Arc<BatchMap>,
}

impl BatchCoordinator {
    pub fn new(
        registry: Arc<JobRegistry>,
        service: Arc<dyn OcrService>,
        poller: Poller,
        options: PollOptions,
    ) -> Self {
        Self {
            registry,
            service,
            poller,
            options,
            batches: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Submits `files` as one backend job and starts tracking it.
    ///
    /// On submission failure every job created here is already marked
    /// failed when the error is returned.
    pub async fn submit_batch(&self, files: Vec<FileUpload>) -> Result<BatchHandle, BatchError> {
        if files.is_empty() {
            return Err(BatchError::Empty);
        }

        let job_ids: Vec<String> = files
            .iter()
            .map(|file| self.registry.create_job(&file.filename))
            .collect();
        for job_id in &job_ids {
            self.registry.update_job(job_id, JobPatch::processing());
        }

        info!("Submitting batch of {} files", files.len());
        let accepted = match self.service.process_batch(&files).await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Batch submission failed: {}", e);
                let message = e.to_string();
                for job_id in &job_ids {
                    self.registry
                        .update_job(job_id, JobPatch::failed(message.clone()));
                }
                return Err(BatchError::Submission(e));
            }
        };

        for job_id in &job_ids {
            self.registry.update_job(
                job_id,
                JobPatch::default().with_batch_id(accepted.job_id.clone()),
            );
        }

        let handle = BatchHandle {
            batch_id: accepted.job_id,
            job_ids,
            submitted_at: Utc::now(),
        };
        Ok(self.track(handle))
    }

    /// Reconciles an already-created job against a backend job.
    ///
    /// Used when a single file was accepted for asynchronous processing.
    /// If `remote_id` is already being polled, the job joins that poll and
    /// the returned handle lists every job mapped onto it.
    pub fn track_job(&self, job_id: &str, remote_id: &str) -> BatchHandle {
        self.registry
            .update_job(job_id, JobPatch::processing().with_batch_id(remote_id));

        let handle = BatchHandle {
            batch_id: remote_id.to_string(),
            job_ids: vec![job_id.to_string()],
            submitted_at: Utc::now(),
        };
        self.track(handle)
    }

    fn track(&self, handle: BatchHandle) -> BatchHandle {
        if let Some(merged) = self.join_live_batch(&handle) {
            return merged;
        }

        let job_ids: JobIds = Arc::new(Mutex::new(handle.job_ids.clone()));
        let sink = Arc::new(RegistrySink {
            batch_id: handle.batch_id.clone(),
            job_ids: Arc::clone(&job_ids),
            registry: Arc::clone(&self.registry),
            batches: Arc::downgrade(&self.batches),
        });

        let guard = self.poller.start_polling(
            &handle.batch_id,
            self.options,
            Arc::clone(&self.service),
            sink,
        );
        debug!(
            "Tracking batch {} for {} jobs",
            handle.batch_id,
            handle.job_ids.len()
        );

        let batch_id = handle.batch_id.clone();
        let tracked = TrackedBatch {
            handle: handle.clone(),
            job_ids: Arc::clone(&job_ids),
            guard,
        };
        let replaced = lock(&self.batches).insert(batch_id.clone(), tracked);
        // The replaced poll had already ended and was stopped by start_polling.
        drop(replaced);

        // The poll may have ended before its entry was inserted.
        let ended = lock(&self.batches)
            .get(&batch_id)
            .is_some_and(|tracked| !tracked.guard.is_active());
        if ended {
            forget(&self.batches, &batch_id, Some(&job_ids));
        }
        handle
    }

    /// Adds the jobs of `handle` to a batch whose poll is still running.
    ///
    /// The job list lock is held across the liveness check. A poll that
    /// ends concurrently either delivers to the added jobs or reads as
    /// ended here, in which case the caller starts a new one.
    fn join_live_batch(&self, handle: &BatchHandle) -> Option<BatchHandle> {
        let mut batches = lock(&self.batches);
        let tracked = batches.get_mut(&handle.batch_id)?;
        let mut ids = lock_ids(&tracked.job_ids);
        if !tracked.guard.is_active() {
            return None;
        }

        for job_id in &handle.job_ids {
            if !ids.contains(job_id) {
                ids.push(job_id.clone());
                tracked.handle.job_ids.push(job_id.clone());
            }
        }
        debug!(
            "Batch {} is already tracked, now covering {} jobs",
            handle.batch_id,
            ids.len()
        );
        Some(tracked.handle.clone())
    }

    /// Stops tracking a batch. Its jobs keep their last known state.
    pub fn cancel_batch(&self, handle: &BatchHandle) {
        match forget(&self.batches, &handle.batch_id, None) {
            Some(_) => info!("Cancelled batch {}", handle.batch_id),
            None => debug!("Batch {} is not being tracked", handle.batch_id),
        }
    }

    /// Stops tracking every batch.
    pub fn cancel_all(&self) {
        let tracked: Vec<TrackedBatch> = lock(&self.batches).drain().map(|(_, b)| b).collect();
        if !tracked.is_empty() {
            info!("Cancelling {} tracked batches", tracked.len());
        }
        drop(tracked);
    }

    pub fn active_batches(&self) -> Vec<BatchHandle> {
        let mut handles: Vec<BatchHandle> = lock(&self.batches)
            .values()
            .map(|tracked| tracked.handle.clone())
            .collect();
        handles.sort_by_key(|handle| handle.submitted_at);
        handles
    }

    pub fn batch(&self, batch_id: &str) -> Option<BatchHandle> {
        lock(&self.batches)
            .get(batch_id)
            .map(|tracked| tracked.handle.clone())
    }

    pub fn is_tracking(&self, batch_id: &str) -> bool {
        lock(&self.batches).contains_key(batch_id)
    }
}

impl std::fmt::Debug for BatchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchCoordinator")
            .field("tracked", &lock(&self.batches).len())
            .field("options", &self.options)
            .finish()
    }
}

/// Writes a batch's poll results into the registry.
struct RegistrySink {
    batch_id: String,
    job_ids: JobIds,
    registry: Arc<JobRegistry>,
    batches: Weak<BatchMap>,
}

impl RegistrySink {
    fn apply_all(&self, patch: &JobPatch) -> usize {
        let job_ids = lock_ids(&self.job_ids).clone();
        job_ids
            .iter()
            .filter(|job_id| {
                self.registry.update_job(job_id, patch.clone()) == UpdateOutcome::Applied
            })
            .count()
    }

    fn finish(&self) {
        if let Some(batches) = self.batches.upgrade() {
            forget(&batches, &self.batch_id, Some(&self.job_ids));
        }
    }
}

impl PollHandler for RegistrySink {
    fn on_update(&self, _id: &str, report: &StatusReport) {
        if report.is_terminal() {
            return;
        }
        let updated = self.apply_all(&report.to_patch());
        debug!(
            "Batch {} is {} ({:?}%), {} jobs updated",
            self.batch_id, report.status, report.progress, updated
        );
    }

    fn on_terminal(&self, _id: &str, report: &StatusReport) {
        let updated = self.apply_all(&report.to_patch());
        info!(
            "Batch {} finished with status '{}', {} jobs updated",
            self.batch_id, report.status, updated
        );
        self.finish();
    }

    fn on_exhausted(&self, _id: &str, failures: u32, last_error: &ServiceError) {
        let message = format!(
            "Lost connection to the OCR service after {} failed status checks: {}",
            failures, last_error
        );
        let updated = self.apply_all(&JobPatch::failed(message));
        error!(
            "Stopped tracking batch {} after {} failures, {} jobs marked failed",
            self.batch_id, failures, updated
        );
        self.finish();
    }
}
