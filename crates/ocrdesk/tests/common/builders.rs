//! Builders for test configurations and uploads.

#![allow(dead_code)]

use std::sync::Arc;

use ocrdesk::client::FileUpload;
use ocrdesk::{Config, OcrService, Session};

/// Builder for `Config` with fast timings suited to paused-clock tests.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        let mut config = Config::default();
        config.polling.interval_ms = 100;
        config.polling.fetch_timeout_ms = 1_000;
        Self { config }
    }

    pub fn poll_interval_ms(mut self, interval_ms: u64) -> Self {
        self.config.polling.interval_ms = interval_ms;
        self
    }

    pub fn max_consecutive_failures(mut self, max: u32) -> Self {
        self.config.polling.max_consecutive_failures = max;
        self
    }

    pub fn base_url(mut self, url: &str) -> Self {
        self.config.service.base_url = url.to_string();
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub fn session_with(service: Arc<dyn OcrService>, config: Config) -> Session {
    Session::new(config, service)
}

pub fn pdf(name: &str) -> FileUpload {
    FileUpload::new(name, b"%PDF-1.7\n".to_vec())
}

pub fn pdfs(names: &[&str]) -> Vec<FileUpload> {
    names.iter().map(|name| pdf(name)).collect()
}
