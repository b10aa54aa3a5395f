//! In-memory job registry.
//!
//! The registry is the single source of truth for job state. Other
//! components hold job ids and route every mutation through
//! [`JobRegistry::update_job`].

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, warn};

use crate::events::{JobEvent, JobEventBroadcaster, JobEventKind};
use crate::job::{Job, JobPatch, JobStatus, JobSummary, UpdateOutcome};

#[derive(Default)]
struct Entries {
    jobs: HashMap<String, Job>,
    /// Insertion order for stable rendering.
    order: Vec<String>,
}

/// Insertion-ordered job collection.
pub struct JobRegistry {
    entries: RwLock<Entries>,
    events: JobEventBroadcaster,
}

impl JobRegistry {
    pub fn new(events: JobEventBroadcaster) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            events,
        }
    }

    pub fn events(&self) -> &JobEventBroadcaster {
        &self.events
    }

    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(|poisoned| {
            warn!("Job registry lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(|poisoned| {
            warn!("Job registry lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Allocates a pending job and returns its id.
    pub fn create_job(&self, filename: &str) -> String {
        let job = Job::new(filename);
        let id = job.id.clone();
        {
            let mut entries = self.write();
            entries.order.push(id.clone());
            entries.jobs.insert(id.clone(), job.clone());
            self.events.send(JobEvent::new(JobEventKind::Created, job));
        }
        debug!("Created job {} for '{}'", id, filename);
        id
    }

    /// Merges `patch` into the job. Unknown ids are a silent no-op.
    ///
    /// Events are published under the write lock, so subscribers see
    /// updates in the order they were applied.
    pub fn update_job(&self, job_id: &str, patch: JobPatch) -> UpdateOutcome {
        let mut entries = self.write();
        let Some(job) = entries.jobs.get_mut(job_id) else {
            debug!("Ignoring update for unknown job {}", job_id);
            return UpdateOutcome::Missing;
        };
        match job.apply(patch) {
            UpdateOutcome::Applied => {}
            UpdateOutcome::Finalized => {
                debug!("Ignoring update for finished job {}", job_id);
                return UpdateOutcome::Finalized;
            }
            other => return other,
        }

        if job.is_finished() {
            debug!("Job {} finished as {}", job_id, job.status);
        }
        self.events
            .send(JobEvent::new(JobEventKind::Updated, job.clone()));
        UpdateOutcome::Applied
    }

    /// Deletes a job. Callers holding an "active" reference to it clear it themselves.
    pub fn remove_job(&self, job_id: &str) -> Option<Job> {
        let mut entries = self.write();
        let removed = entries.jobs.remove(job_id);
        if let Some(job) = &removed {
            entries.order.retain(|id| id != job_id);
            self.events
                .send(JobEvent::new(JobEventKind::Removed, job.clone()));
        }
        removed
    }

    pub fn get_job(&self, job_id: &str) -> Option<Job> {
        self.read().jobs.get(job_id).cloned()
    }

    /// First job (in insertion order) with the given filename.
    pub fn find_by_filename(&self, filename: &str) -> Option<Job> {
        let entries = self.read();
        entries
            .order
            .iter()
            .filter_map(|id| entries.jobs.get(id))
            .find(|job| job.filename == filename)
            .cloned()
    }

    /// All jobs in insertion order.
    pub fn list_jobs(&self) -> Vec<Job> {
        let entries = self.read();
        entries
            .order
            .iter()
            .filter_map(|id| entries.jobs.get(id).cloned())
            .collect()
    }

    /// Removes every completed or failed job and returns how many were removed.
    pub fn clear_finished(&self) -> usize {
        let mut entries = self.write();
        let finished: Vec<String> = entries
            .order
            .iter()
            .filter(|id| entries.jobs.get(*id).is_some_and(Job::is_finished))
            .cloned()
            .collect();
        entries.order.retain(|id| !finished.contains(id));

        let mut count = 0;
        for id in &finished {
            if let Some(job) = entries.jobs.remove(id) {
                self.events.send(JobEvent::new(JobEventKind::Removed, job));
                count += 1;
            }
        }
        count
    }

    pub fn summary(&self) -> JobSummary {
        let entries = self.read();
        let mut summary = JobSummary {
            total: entries.jobs.len(),
            ..JobSummary::default()
        };
        for job in entries.jobs.values() {
            match job.status {
                JobStatus::Pending => summary.pending += 1,
                JobStatus::Processing => summary.processing += 1,
                JobStatus::Completed { .. } => summary.completed += 1,
                JobStatus::Failed { .. } => summary.failed += 1,
            }
        }
        summary
    }

    pub fn len(&self) -> usize {
        self.read().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new(JobEventBroadcaster::default())
    }
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("jobs", &self.len())
            .finish()
    }
}
