use std::path::PathBuf;
use thiserror::Error;

use crate::scanner::DeviceStatus;

#[derive(Error, Debug)]
pub enum OcrDeskError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    #[error("Scanner error: {0}")]
    Scanner(#[from] ScannerError),

    #[error("Failed to read upload '{path}': {source}")]
    ReadUpload {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

/// Errors raised by the remote OCR service client.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Network-level request failure with context.
    #[error("{context}: {source}")]
    Network {
        context: String,
        #[source]
        source: reqwest::Error,
    },

    /// The service returned a non-success HTTP status.
    #[error("Service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// An endpoint URL could not be built from the configuration.
    #[error("Invalid service URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    /// The response was missing expected fields.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The caller-side deadline expired before the service answered.
    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failure without an underlying transport error (mocks, adapters).
    #[error("{0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Batch contains no files")]
    Empty,

    #[error("Batch submission failed: {0}")]
    Submission(#[source] ServiceError),
}

#[derive(Error, Debug)]
pub enum ScannerError {
    #[error("No scanner selected")]
    NoActiveDevice,

    #[error("Unknown scanner '{0}'")]
    UnknownDevice(String),

    #[error("Scanner '{id}' is not ready (status: {status})")]
    NotReady { id: String, status: DeviceStatus },

    #[error("Scanner '{0}' is busy with another operation")]
    OtherDeviceBusy(String),

    #[error("Invalid scan settings: {0}")]
    InvalidSettings(String),

    #[error("Scanner discovery failed: {0}")]
    Discovery(#[source] ServiceError),

    #[error("Scan failed: {0}")]
    Hardware(String),

    #[error("Scan operation was cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, OcrDeskError>;
