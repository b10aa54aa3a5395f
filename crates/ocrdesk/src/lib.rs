pub mod batch;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod job;
pub mod poller;
pub mod registry;
pub mod scanner;
pub mod session;
pub mod telemetry;

#[cfg(test)]
mod testing;

pub use batch::{BatchCoordinator, BatchHandle};
pub use client::{FileUpload, HttpOcrService, OcrResult, OcrService, ProcessOptions, StatusReport};
pub use config::{load_config, Config};
pub use error::{BatchError, ConfigError, OcrDeskError, Result, ScannerError, ServiceError};
pub use events::{JobEvent, JobEventBroadcaster, JobEventKind};
pub use job::{Job, JobPatch, JobStatus, JobSummary, UpdateOutcome};
pub use poller::{PollGuard, PollHandler, PollOptions, Poller};
pub use registry::JobRegistry;
pub use scanner::{
    DeviceStatus, ScanOutcome, ScanSettings, ScannerDevice, ScannerSessionManager,
    ScannerSnapshot, SimulatedProgress,
};
pub use session::Session;
pub use telemetry::init_logging;
