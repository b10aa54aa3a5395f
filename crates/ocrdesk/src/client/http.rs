//! reqwest-backed OCR service client.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;

use super::types::{
    BatchAccepted, FileUpload, OcrResult, ProcessOptions, ScanRequest, ScanResponse,
    ScannersResponse, StatusReport,
};
use super::OcrService;
use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::scanner::ScanSettings;

/// Maximum length of an error body kept in messages and logs.
const MAX_ERROR_BODY_LENGTH: usize = 200;

fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &body[..end])
}

fn normalize(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// HTTP client for the OCR service.
#[derive(Debug, Clone)]
pub struct HttpOcrService {
    http: Client,
    config: ServiceConfig,
    base_url: String,
}

impl HttpOcrService {
    /// Creates a client with the connect and request timeouts from `config`.
    pub fn new(config: ServiceConfig) -> Result<Self, ServiceError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| ServiceError::Network {
                context: "Failed to create HTTP client".to_string(),
                source: e,
            })?;
        Ok(Self::with_http_client(config, http))
    }

    /// Uses a preconfigured `reqwest::Client`.
    pub fn with_http_client(config: ServiceConfig, http: Client) -> Self {
        let base_url = normalize(&config.base_url);
        Self {
            http,
            config,
            base_url,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Status URL for `id`, with the id percent-encoded as one path segment.
    pub(crate) fn job_status_url(&self, id: &str) -> Result<Url, ServiceError> {
        let template = self.url(&self.config.endpoints.job_status);
        let invalid = |message: String| ServiceError::InvalidUrl {
            url: template.clone(),
            message,
        };

        let mut url = Url::parse(&template).map_err(|e| invalid(e.to_string()))?;
        // Url::parse encodes the braces of the placeholder.
        let segments: Vec<String> = url
            .path_segments()
            .map(|segments| segments.map(str::to_string).collect())
            .unwrap_or_default();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| invalid("URL cannot have a path".to_string()))?;
            path.clear();
            for segment in &segments {
                if segment == "%7Bid%7D" || segment == "{id}" {
                    path.push(id);
                } else {
                    path.push(segment);
                }
            }
        }
        Ok(url)
    }

    fn network_error(&self, context: &str) -> impl FnOnce(reqwest::Error) -> ServiceError {
        let context = format!("{} ({})", context, self.base_url);
        move |source| ServiceError::Network { context, source }
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ServiceError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Http {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let bytes = response.bytes().await.map_err(|e| ServiceError::Network {
            context: "Failed to read response body".to_string(),
            source: e,
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn file_part(file: &FileUpload) -> Part {
    let build = || Part::bytes(file.bytes.clone()).file_name(file.filename.clone());
    match &file.mime_type {
        Some(mime) => build().mime_str(mime).unwrap_or_else(|_| {
            debug!("Ignoring unparsable MIME type '{}' for {}", mime, file.filename);
            build()
        }),
        None => build(),
    }
}

#[async_trait]
impl OcrService for HttpOcrService {
    async fn process_file(
        &self,
        file: &FileUpload,
        options: &ProcessOptions,
    ) -> Result<OcrResult, ServiceError> {
        debug!("Uploading '{}' ({} bytes) for OCR", file.filename, file.len());

        let mut form = Form::new()
            .part("file", file_part(file))
            .text("mode", options.mode.clone());
        if let Some(backend) = &options.backend {
            form = form.text("backend", backend.clone());
        }

        let response = self
            .http
            .post(self.url(&self.config.endpoints.process))
            .multipart(form)
            .send()
            .await
            .map_err(self.network_error("Failed to submit file"))?;

        Self::read_json(response).await
    }

    async fn process_batch(&self, files: &[FileUpload]) -> Result<BatchAccepted, ServiceError> {
        let form = files
            .iter()
            .fold(Form::new(), |form, file| form.part("files", file_part(file)));

        let response = self
            .http
            .post(self.url(&self.config.endpoints.batch))
            .multipart(form)
            .send()
            .await
            .map_err(self.network_error("Failed to submit batch"))?;

        let accepted: BatchAccepted = Self::read_json(response).await?;
        if accepted.job_id.trim().is_empty() {
            return Err(ServiceError::InvalidResponse(
                "Batch response has an empty job_id".to_string(),
            ));
        }
        info!(
            "Batch of {} files accepted as {}",
            files.len(),
            accepted.job_id
        );
        Ok(accepted)
    }

    async fn job_status(&self, id: &str) -> Result<StatusReport, ServiceError> {
        let response = self
            .http
            .get(self.job_status_url(id)?)
            .send()
            .await
            .map_err(self.network_error("Failed to fetch job status"))?;

        Self::read_json(response).await
    }

    async fn scanners(&self) -> Result<ScannersResponse, ServiceError> {
        let response = self
            .http
            .get(self.url(&self.config.endpoints.scanners))
            .send()
            .await
            .map_err(self.network_error("Failed to list scanners"))?;

        Self::read_json(response).await
    }

    async fn scan_document(
        &self,
        scanner_id: &str,
        settings: &ScanSettings,
        preview: bool,
    ) -> Result<ScanResponse, ServiceError> {
        let request = ScanRequest {
            scanner_id: scanner_id.to_string(),
            settings: settings.clone(),
            preview,
        };

        let response = self
            .http
            .post(self.url(&self.config.endpoints.scan))
            .json(&request)
            .send()
            .await
            .map_err(self.network_error("Failed to start scan"))?;

        Self::read_json(response).await
    }
}
