//! Scripted stand-in for the OCR service.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use ocrdesk::client::{
    BatchAccepted, FileUpload, OcrResult, OcrService, ProcessOptions, ScanResponse,
    ScannersResponse, StatusReport,
};
use ocrdesk::scanner::{DeviceStatus, ScanSettings, ScannerDevice};
use ocrdesk::ServiceError;

/// Answers every call from queued outcomes. Unscripted calls fail.
#[derive(Default)]
pub struct ScriptedService {
    statuses: Mutex<VecDeque<Result<StatusReport, String>>>,
    batch: Mutex<Option<Result<String, String>>>,
    processed: Mutex<VecDeque<Result<OcrResult, String>>>,
    devices: Mutex<Vec<ScannerDevice>>,
    scans: Mutex<VecDeque<Result<ScanResponse, String>>>,
    scan_delay: Mutex<Duration>,

    pub status_calls: AtomicUsize,
    pub batch_calls: AtomicUsize,
    pub scan_calls: AtomicUsize,
    /// Settings of every scan request, in order.
    pub scan_settings: Mutex<Vec<ScanSettings>>,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(self, status: &str, progress: u8) -> Self {
        self.push_status(Ok(StatusReport::new(status, Some(progress))));
        self
    }

    pub fn status_report(self, report: StatusReport) -> Self {
        self.push_status(Ok(report));
        self
    }

    pub fn status_failure(self, message: &str) -> Self {
        self.push_status(Err(message.to_string()));
        self
    }

    pub fn status_failures(self, count: usize, message: &str) -> Self {
        (0..count).fold(self, |service, _| service.status_failure(message))
    }

    pub fn batch_accepted(self, job_id: &str) -> Self {
        *self.batch.lock().unwrap() = Some(Ok(job_id.to_string()));
        self
    }

    pub fn batch_rejected(self, message: &str) -> Self {
        *self.batch.lock().unwrap() = Some(Err(message.to_string()));
        self
    }

    pub fn processed(self, result: OcrResult) -> Self {
        self.processed.lock().unwrap().push_back(Ok(result));
        self
    }

    pub fn device(self, id: &str, status: DeviceStatus) -> Self {
        self.devices.lock().unwrap().push(ScannerDevice {
            id: id.to_string(),
            name: format!("Scanner {}", id),
            device_type: "flatbed".to_string(),
            status,
        });
        self
    }

    pub fn scan_image(self, path: &str) -> Self {
        self.scans.lock().unwrap().push_back(Ok(ScanResponse {
            success: true,
            image_path: Some(path.to_string()),
            image_info: None,
            message: None,
        }));
        self
    }

    pub fn scan_delay(self, delay: Duration) -> Self {
        *self.scan_delay.lock().unwrap() = delay;
        self
    }

    pub fn push_status(&self, outcome: Result<StatusReport, String>) {
        self.statuses.lock().unwrap().push_back(outcome);
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrService for ScriptedService {
    async fn process_file(
        &self,
        _file: &FileUpload,
        _options: &ProcessOptions,
    ) -> Result<OcrResult, ServiceError> {
        self.processed
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err("process_file not scripted".to_string()))
            .map_err(ServiceError::Other)
    }

    async fn process_batch(&self, _files: &[FileUpload]) -> Result<BatchAccepted, ServiceError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        match self.batch.lock().unwrap().clone() {
            Some(Ok(job_id)) => Ok(BatchAccepted { job_id }),
            Some(Err(message)) => Err(ServiceError::Other(message)),
            None => Err(ServiceError::Other("process_batch not scripted".to_string())),
        }
    }

    async fn job_status(&self, _id: &str) -> Result<StatusReport, ServiceError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err("status script exhausted".to_string()))
            .map_err(ServiceError::Other)
    }

    async fn scanners(&self) -> Result<ScannersResponse, ServiceError> {
        Ok(ScannersResponse {
            scanners: self.devices.lock().unwrap().clone(),
        })
    }

    async fn scan_document(
        &self,
        _scanner_id: &str,
        settings: &ScanSettings,
        _preview: bool,
    ) -> Result<ScanResponse, ServiceError> {
        self.scan_calls.fetch_add(1, Ordering::SeqCst);
        self.scan_settings.lock().unwrap().push(settings.clone());
        let delay = *self.scan_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.scans
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err("scan not scripted".to_string()))
            .map_err(ServiceError::Other)
    }
}
