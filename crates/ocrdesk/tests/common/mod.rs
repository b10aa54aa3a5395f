//! Shared utilities for ocrdesk integration tests.
//!
//! - `ScriptedService`: an `OcrService` that answers from a script
//! - Builders for configs and uploads

pub mod builders;
pub mod scripted_service;

pub use builders::*;
pub use scripted_service::ScriptedService;
