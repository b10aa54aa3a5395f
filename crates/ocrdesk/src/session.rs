//! Wiring of the core components for one control-panel session.

use std::sync::{Arc, RwLock};

use log::{debug, error, info, warn};
use tokio::sync::broadcast;

use crate::batch::{BatchCoordinator, BatchHandle};
use crate::client::{FileUpload, HttpOcrService, OcrService, ProcessOptions};
use crate::config::Config;
use crate::error::{BatchError, Result};
use crate::events::{JobEvent, JobEventBroadcaster};
use crate::job::{Job, JobPatch};
use crate::poller::{PollOptions, Poller};
use crate::registry::JobRegistry;
use crate::scanner::ScannerSessionManager;

/// Owns the registry, the poller, the batch coordinator and the scanner
/// session, all talking to one OCR service.
pub struct Session {
    config: Config,
    registry: Arc<JobRegistry>,
    service: Arc<dyn OcrService>,
    poller: Poller,
    batches: BatchCoordinator,
    scanner: ScannerSessionManager,
    active_job: RwLock<Option<String>>,
}

impl Session {
    pub fn new(config: Config, service: Arc<dyn OcrService>) -> Self {
        let registry = Arc::new(JobRegistry::new(JobEventBroadcaster::default()));
        let poller = Poller::new();
        let batches = BatchCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&service),
            poller.clone(),
            PollOptions::from(&config.polling),
        );
        let scanner = ScannerSessionManager::new(Arc::clone(&service), config.scanner.clone());

        Self {
            config,
            registry,
            service,
            poller,
            batches,
            scanner,
            active_job: RwLock::new(None),
        }
    }

    /// Builds a session backed by the HTTP client described in `config`.
    pub fn connect(config: Config) -> Result<Self> {
        let service = HttpOcrService::new(config.service.clone())?;
        info!("Connecting to OCR service at {}", service.base_url());
        Ok(Self::new(config, Arc::new(service)))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn poller(&self) -> &Poller {
        &self.poller
    }

    pub fn batches(&self) -> &BatchCoordinator {
        &self.batches
    }

    pub fn scanner(&self) -> &ScannerSessionManager {
        &self.scanner
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.registry.events().subscribe()
    }

    /// Options built from the `processing` config section.
    pub fn default_process_options(&self) -> ProcessOptions {
        ProcessOptions {
            mode: self.config.processing.default_mode.clone(),
            backend: self.config.processing.default_backend.clone(),
        }
    }

    /// Processes one file and waits for its result.
    ///
    /// The job is created before the request and becomes the active job.
    /// On failure the job is marked failed and the service error is
    /// returned as well.
    pub async fn process_file(
        &self,
        upload: FileUpload,
        options: Option<ProcessOptions>,
    ) -> Result<String> {
        let options = options.unwrap_or_else(|| self.default_process_options());
        let job_id = self.registry.create_job(&upload.filename);
        self.set_active_job(Some(&job_id));
        self.registry.update_job(&job_id, JobPatch::processing());

        debug!(
            "Processing '{}' ({} bytes, mode {})",
            upload.filename,
            upload.len(),
            options.mode
        );
        let guard = InterruptGuard {
            registry: &self.registry,
            job_id: &job_id,
            armed: true,
        };
        let response = self.service.process_file(&upload, &options).await;
        guard.disarm();

        match response {
            Ok(result) => {
                let patch = match serde_json::to_value(&result) {
                    Ok(value) => JobPatch::completed(value),
                    Err(e) => JobPatch::failed(format!("Unreadable OCR result: {}", e)),
                };
                self.registry.update_job(&job_id, patch);
                info!("Processed '{}' as job {}", upload.filename, job_id);
                Ok(job_id)
            }
            Err(e) => {
                error!("Processing '{}' failed: {}", upload.filename, e);
                self.registry.update_job(&job_id, JobPatch::failed(e.to_string()));
                Err(e.into())
            }
        }
    }

    pub async fn submit_batch(&self, files: Vec<FileUpload>) -> std::result::Result<BatchHandle, BatchError> {
        self.batches.submit_batch(files).await
    }

    /// Follows a job the service accepted for asynchronous processing.
    pub fn track_job(&self, job_id: &str, remote_id: &str) -> BatchHandle {
        self.batches.track_job(job_id, remote_id)
    }

    pub fn cancel_batch(&self, handle: &BatchHandle) {
        self.batches.cancel_batch(handle);
    }

    pub fn job(&self, job_id: &str) -> Option<Job> {
        self.registry.get_job(job_id)
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.registry.list_jobs()
    }

    /// Points the UI at `job_id`, or clears the pointer with `None`.
    pub fn set_active_job(&self, job_id: Option<&str>) {
        let mut active = self.active_job.write().unwrap_or_else(|poisoned| {
            warn!("Active job lock was poisoned, recovering");
            poisoned.into_inner()
        });
        *active = job_id.map(str::to_string);
    }

    /// The active job, if it still exists.
    pub fn active_job(&self) -> Option<Job> {
        let active = self
            .active_job
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        active.and_then(|id| self.registry.get_job(&id))
    }

    /// Removes a job, clearing the active pointer when it referenced it.
    pub fn remove_job(&self, job_id: &str) -> Option<Job> {
        let removed = self.registry.remove_job(job_id)?;
        let mut active = self.active_job.write().unwrap_or_else(|poisoned| {
            warn!("Active job lock was poisoned, recovering");
            poisoned.into_inner()
        });
        if active.as_deref() == Some(job_id) {
            *active = None;
        }
        Some(removed)
    }

    /// Stops all polling and resets the scanner session.
    pub fn shutdown(&self) {
        info!("Shutting down session");
        self.batches.cancel_all();
        self.poller.stop_all();
        self.scanner.cancel();
    }
}

/// Fails the job if a `process_file` future is dropped mid-request.
struct InterruptGuard<'a> {
    registry: &'a JobRegistry,
    job_id: &'a str,
    armed: bool,
}

impl InterruptGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InterruptGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!("Processing of job {} was interrupted", self.job_id);
            self.registry
                .update_job(self.job_id, JobPatch::failed("Processing was interrupted"));
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("registry", &self.registry)
            .field("batches", &self.batches)
            .field("scanner", &self.scanner)
            .finish()
    }
}
