//! Request and response types of the OCR service.

use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::OcrDeskError;
use crate::job::{JobPatch, JobStatus};
use crate::scanner::{ScanSettings, ScannerDevice};

/// A file to send to the service.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
    /// MIME type, e.g. `application/pdf`.
    pub mime_type: Option<String>,
}

impl FileUpload {
    /// Creates an upload from in-memory bytes, guessing the MIME type from the name.
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        let filename = filename.into();
        let mime_type = detect_mime_type(Path::new(&filename));
        Self {
            filename,
            bytes: bytes.into(),
            mime_type,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Reads a file from disk.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, OcrDeskError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| OcrDeskError::ReadUpload {
                path: path.to_path_buf(),
                source: e,
            })?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        Ok(Self {
            filename,
            bytes,
            mime_type: detect_mime_type(path),
        })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

fn detect_mime_type(path: &Path) -> Option<String> {
    mime_guess::from_path(path).first().map(|m| m.to_string())
}

/// Options for single-file processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOptions {
    /// Processing mode, e.g. `text` or `tables`.
    pub mode: String,
    /// Preferred OCR backend, left to the service when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            mode: "auto".to_string(),
            backend: None,
        }
    }
}

/// OCR payload returned for a processed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrResult {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Everything else the service sent.
    #[serde(default, flatten)]
    pub metadata: Map<String, Value>,
}

/// Response of a batch submission.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BatchAccepted {
    pub job_id: String,
}

/// Status report for a job or batch.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusReport {
    pub status: String,
    #[serde(default, deserialize_with = "deserialize_progress")]
    pub progress: Option<u8>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Accepts integers, floats, or null and clamps to 0..=100.
fn deserialize_progress<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value
        .filter(|v| v.is_finite())
        .map(|v| v.round().clamp(0.0, 100.0) as u8))
}

/// Status string as understood by the job state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Unrecognized,
}

impl StatusReport {
    pub fn new(status: &str, progress: Option<u8>) -> Self {
        Self {
            status: status.to_string(),
            progress,
            result: None,
            error: None,
        }
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn remote_status(&self) -> RemoteStatus {
        match self.status.as_str() {
            "pending" => RemoteStatus::Pending,
            "processing" => RemoteStatus::Processing,
            "completed" => RemoteStatus::Completed,
            "failed" => RemoteStatus::Failed,
            _ => RemoteStatus::Unrecognized,
        }
    }

    /// Completed, failed, or unrecognized (which counts as failed).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.remote_status(),
            RemoteStatus::Completed | RemoteStatus::Failed | RemoteStatus::Unrecognized
        )
    }

    /// Translates the report into a registry patch.
    pub fn to_patch(&self) -> JobPatch {
        let patch = match self.remote_status() {
            RemoteStatus::Pending => JobPatch::default(),
            RemoteStatus::Processing => JobPatch::processing(),
            RemoteStatus::Completed => JobPatch {
                status: Some(JobStatus::Completed {
                    result: self.result.clone().unwrap_or(Value::Null),
                }),
                ..JobPatch::default()
            },
            RemoteStatus::Failed => JobPatch::failed(
                self.error
                    .clone()
                    .unwrap_or_else(|| "Processing failed".to_string()),
            ),
            RemoteStatus::Unrecognized => {
                JobPatch::failed(format!("Unrecognized job status '{}'", self.status))
            }
        };

        match self.progress {
            Some(progress) => patch.with_progress(progress),
            None => patch,
        }
    }
}

/// Response of the scanner listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ScannersResponse {
    #[serde(default)]
    pub scanners: Vec<ScannerDevice>,
}

/// Body of a scan request.
#[derive(Debug, Clone, Serialize)]
pub struct ScanRequest {
    pub scanner_id: String,
    pub settings: ScanSettings,
    pub preview: bool,
}

/// Response of a scan or preview.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScanResponse {
    pub success: bool,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub image_info: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
}
