//! Scripted service used by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::client::{
    BatchAccepted, FileUpload, OcrResult, OcrService, ProcessOptions, ScanResponse,
    ScannersResponse, StatusReport,
};
use crate::error::ServiceError;
use crate::scanner::{DeviceStatus, ScanSettings, ScannerDevice};

/// One scripted answer to a status fetch.
pub struct StatusStep {
    pub delay: Duration,
    pub outcome: Result<StatusReport, String>,
}

impl StatusStep {
    pub fn report(status: &str, progress: u8) -> Self {
        Self {
            delay: Duration::ZERO,
            outcome: Ok(StatusReport::new(status, Some(progress))),
        }
    }

    pub fn with_report(report: StatusReport) -> Self {
        Self {
            delay: Duration::ZERO,
            outcome: Ok(report),
        }
    }

    pub fn fail(message: &str) -> Self {
        Self {
            delay: Duration::ZERO,
            outcome: Err(message.to_string()),
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Default)]
pub struct MockService {
    pub status_steps: Mutex<VecDeque<StatusStep>>,
    pub status_calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    /// When set, every status fetch waits for a permit before answering.
    pub status_gate: Option<Arc<Notify>>,
    pub fetch_started: Arc<Notify>,

    pub batch_outcome: Mutex<Option<Result<String, String>>>,
    pub batch_calls: AtomicUsize,
    pub process_outcome: Mutex<Option<Result<OcrResult, String>>>,
    pub process_delay: Mutex<Duration>,

    pub devices: Mutex<Vec<ScannerDevice>>,
    pub scan_outcomes: Mutex<VecDeque<Result<ScanResponse, String>>>,
    pub scan_delay: Mutex<Duration>,
    pub scan_calls: AtomicUsize,
}

impl MockService {
    pub fn with_steps(steps: Vec<StatusStep>) -> Self {
        Self {
            status_steps: Mutex::new(steps.into()),
            ..Self::default()
        }
    }

    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.status_gate = Some(gate);
        self
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

pub fn device(id: &str, status: DeviceStatus) -> ScannerDevice {
    ScannerDevice {
        id: id.to_string(),
        name: format!("Scanner {}", id),
        device_type: "flatbed".to_string(),
        status,
    }
}

pub fn scan_ok(path: &str) -> Result<ScanResponse, String> {
    Ok(ScanResponse {
        success: true,
        image_path: Some(path.to_string()),
        image_info: None,
        message: None,
    })
}

#[async_trait]
impl OcrService for MockService {
    async fn process_file(
        &self,
        _file: &FileUpload,
        _options: &ProcessOptions,
    ) -> Result<OcrResult, ServiceError> {
        let delay = *self.process_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match self.process_outcome.lock().unwrap().clone() {
            Some(Ok(result)) => Ok(result),
            Some(Err(message)) => Err(ServiceError::Other(message)),
            None => Err(ServiceError::Other("process_file not scripted".into())),
        }
    }

    async fn process_batch(&self, _files: &[FileUpload]) -> Result<BatchAccepted, ServiceError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        match self.batch_outcome.lock().unwrap().clone() {
            Some(Ok(job_id)) => Ok(BatchAccepted { job_id }),
            Some(Err(message)) => Err(ServiceError::Other(message)),
            None => Err(ServiceError::Other("process_batch not scripted".into())),
        }
    }

    async fn job_status(&self, _id: &str) -> Result<StatusReport, ServiceError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.fetch_started.notify_one();

        let step = self.status_steps.lock().unwrap().pop_front();
        if let Some(gate) = &self.status_gate {
            gate.notified().await;
        }
        let step = step.unwrap_or_else(|| StatusStep::fail("status script exhausted"));
        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        step.outcome.map_err(ServiceError::Other)
    }

    async fn scanners(&self) -> Result<ScannersResponse, ServiceError> {
        Ok(ScannersResponse {
            scanners: self.devices.lock().unwrap().clone(),
        })
    }

    async fn scan_document(
        &self,
        _scanner_id: &str,
        _settings: &ScanSettings,
        _preview: bool,
    ) -> Result<ScanResponse, ServiceError> {
        self.scan_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.scan_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.scan_outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err("scan not scripted".to_string()))
            .map_err(ServiceError::Other)
    }
}
