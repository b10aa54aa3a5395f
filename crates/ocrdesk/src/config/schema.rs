use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            service: ServiceConfig::default(),
            polling: PollingConfig::default(),
            scanner: ScannerConfig::default(),
            processing: ProcessingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Upper bound for any single HTTP request, including uploads.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub endpoints: EndpointPaths,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    120_000
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            endpoints: EndpointPaths::default(),
        }
    }
}

/// Service paths relative to `base_url`. `{id}` is replaced in `job_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EndpointPaths {
    pub process: String,
    pub batch: String,
    pub job_status: String,
    pub scanners: String,
    pub scan: String,
}

impl Default for EndpointPaths {
    fn default() -> Self {
        Self {
            process: "/api/process".to_string(),
            batch: "/api/batch".to_string(),
            job_status: "/api/jobs/{id}".to_string(),
            scanners: "/api/scanners".to_string(),
            scan: "/api/scan".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollingConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    /// Consecutive failed fetches tolerated before the poll gives up.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

fn default_interval_ms() -> u64 {
    1_000
}

fn default_fetch_timeout_ms() -> u64 {
    10_000
}

fn default_max_consecutive_failures() -> u32 {
    5
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            max_consecutive_failures: default_max_consecutive_failures(),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

/// Simulated scan progress ramp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScannerConfig {
    #[serde(default = "default_progress_tick_ms")]
    pub progress_tick_ms: u64,
    #[serde(default = "default_progress_step")]
    pub progress_step: u8,
    /// The ramp stops here until the scan actually finishes.
    #[serde(default = "default_progress_ceiling")]
    pub progress_ceiling: u8,
}

fn default_progress_tick_ms() -> u64 {
    500
}

fn default_progress_step() -> u8 {
    10
}

fn default_progress_ceiling() -> u8 {
    90
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            progress_tick_ms: default_progress_tick_ms(),
            progress_step: default_progress_step(),
            progress_ceiling: default_progress_ceiling(),
        }
    }
}

impl ScannerConfig {
    pub fn progress_tick(&self) -> Duration {
        Duration::from_millis(self.progress_tick_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessingConfig {
    #[serde(default = "default_mode")]
    pub default_mode: String,
    #[serde(default)]
    pub default_backend: Option<String>,
}

fn default_mode() -> String {
    "auto".to_string()
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            default_mode: default_mode(),
            default_backend: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}
