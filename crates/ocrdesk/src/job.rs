//! Job entity and its lifecycle rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::OcrResult;

/// Lifecycle state of a job.
///
/// Payloads live inside the variants, so a completed job always carries a
/// result and a failed job always carries an error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed { result: Value },
    Failed { error: String },
}

impl JobStatus {
    /// Position in the pending → processing → terminal progression.
    pub fn rank(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed { .. } | JobStatus::Failed { .. } => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 2
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed { .. } => "completed",
            JobStatus::Failed { .. } => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A locally tracked unit of submitted OCR work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique job identifier.
    pub id: String,
    /// Source file name.
    pub filename: String,
    /// Current lifecycle state.
    #[serde(flatten)]
    pub status: JobStatus,
    /// Progress percentage, kept after failure.
    pub progress: u8,
    /// Backend batch/job id once the service accepted the work.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub(crate) fn new(filename: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            filename: filename.to_string(),
            status: JobStatus::Pending,
            progress: 0,
            batch_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn result(&self) -> Option<&Value> {
        match &self.status {
            JobStatus::Completed { result } => Some(result),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.status {
            JobStatus::Failed { error } => Some(error),
            _ => None,
        }
    }

    /// Decodes the result payload as an OCR result, if it has that shape.
    pub fn ocr_result(&self) -> Option<OcrResult> {
        self.result()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Merges a patch into this job.
    pub(crate) fn apply(&mut self, patch: JobPatch) -> UpdateOutcome {
        if self.is_finished() {
            return UpdateOutcome::Finalized;
        }

        let mut changed = false;

        if let Some(batch_id) = patch.batch_id {
            if self.batch_id.as_deref() != Some(batch_id.as_str()) {
                self.batch_id = Some(batch_id);
                changed = true;
            }
        }

        if let Some(progress) = patch.progress {
            let progress = progress.min(100);
            if progress > self.progress {
                self.progress = progress;
                changed = true;
            }
        }

        if let Some(status) = patch.status {
            if status.rank() > self.status.rank() {
                if matches!(status, JobStatus::Completed { .. }) {
                    self.progress = 100;
                }
                self.status = status;
                changed = true;
            }
        }

        if changed {
            self.updated_at = Utc::now();
            UpdateOutcome::Applied
        } else {
            UpdateOutcome::Unchanged
        }
    }
}

/// Partial update for a job. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub batch_id: Option<String>,
}

impl JobPatch {
    pub fn processing() -> Self {
        Self {
            status: Some(JobStatus::Processing),
            ..Self::default()
        }
    }

    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Self::default()
        }
    }

    pub fn completed(result: Value) -> Self {
        Self {
            status: Some(JobStatus::Completed { result }),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed {
                error: error.into(),
            }),
            ..Self::default()
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_batch_id(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }
}

/// What happened to an `update_job` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// The patch carried nothing new (stale progress, backwards status).
    Unchanged,
    /// The job already reached a terminal state.
    Finalized,
    /// No job with that id; late update after removal.
    Missing,
}

/// Per-status job counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}
