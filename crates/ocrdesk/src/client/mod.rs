//! Remote OCR service boundary.
//!
//! Everything the core does over the network goes through [`OcrService`].
//! [`HttpOcrService`] is the production implementation; tests substitute
//! scripted implementations.

pub mod http;
pub mod types;

use async_trait::async_trait;

use crate::error::ServiceError;
use crate::scanner::ScanSettings;

pub use http::HttpOcrService;
pub use types::{
    BatchAccepted, FileUpload, OcrResult, ProcessOptions, RemoteStatus, ScanRequest, ScanResponse,
    ScannersResponse, StatusReport,
};

/// Request/response contract of the OCR backend.
#[async_trait]
pub trait OcrService: Send + Sync {
    /// Runs OCR on one file and waits for the result.
    async fn process_file(
        &self,
        file: &FileUpload,
        options: &ProcessOptions,
    ) -> Result<OcrResult, ServiceError>;

    /// Submits several files as one backend job.
    async fn process_batch(&self, files: &[FileUpload]) -> Result<BatchAccepted, ServiceError>;

    /// Fetches the status of a job or batch.
    async fn job_status(&self, id: &str) -> Result<StatusReport, ServiceError>;

    /// Lists attached scanners.
    async fn scanners(&self) -> Result<ScannersResponse, ServiceError>;

    /// Runs a scan (or a low-cost preview) on a device.
    async fn scan_document(
        &self,
        scanner_id: &str,
        settings: &ScanSettings,
        preview: bool,
    ) -> Result<ScanResponse, ServiceError>;
}
