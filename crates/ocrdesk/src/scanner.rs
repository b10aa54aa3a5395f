//! Scanner discovery and exclusive scan sessions.
//!
//! Device lifecycle: `ready → busy → ready` on success, `ready → busy →
//! error` on failure. A device in `error` only returns to `ready` through
//! [`ScannerSessionManager::discover`].

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::client::{OcrService, ScanResponse};
use crate::config::ScannerConfig;
use crate::error::{ScannerError, ServiceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Ready,
    Busy,
    /// Also used for status strings this client does not know.
    #[serde(other)]
    Error,
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceStatus::Ready => write!(f, "ready"),
            DeviceStatus::Busy => write!(f, "busy"),
            DeviceStatus::Error => write!(f, "error"),
        }
    }
}

/// A discovered scanner. Identity fields never change after discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannerDevice {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub device_type: String,
    pub status: DeviceStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    Color,
    Grayscale,
    Lineart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaperSize {
    A4,
    A5,
    Letter,
    Legal,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanSource {
    Flatbed,
    Adf,
    AdfDuplex,
}

/// Settings snapshot sent with each scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSettings {
    pub dpi: u32,
    pub color_mode: ColorMode,
    pub paper_size: PaperSize,
    pub source: ScanSource,
    /// -100..=100
    pub brightness: i32,
    /// -100..=100
    pub contrast: i32,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            dpi: 300,
            color_mode: ColorMode::Color,
            paper_size: PaperSize::A4,
            source: ScanSource::Flatbed,
            brightness: 0,
            contrast: 0,
        }
    }
}

impl ScanSettings {
    pub const MIN_DPI: u32 = 50;
    pub const MAX_DPI: u32 = 2400;

    pub fn with_dpi(mut self, dpi: u32) -> Self {
        self.dpi = dpi;
        self
    }

    pub fn with_color_mode(mut self, color_mode: ColorMode) -> Self {
        self.color_mode = color_mode;
        self
    }

    pub fn with_source(mut self, source: ScanSource) -> Self {
        self.source = source;
        self
    }

    pub fn validate(&self) -> Result<(), ScannerError> {
        if !(Self::MIN_DPI..=Self::MAX_DPI).contains(&self.dpi) {
            return Err(ScannerError::InvalidSettings(format!(
                "dpi must be between {} and {}, got {}",
                Self::MIN_DPI,
                Self::MAX_DPI,
                self.dpi
            )));
        }
        for (name, value) in [("brightness", self.brightness), ("contrast", self.contrast)] {
            if !(-100..=100).contains(&value) {
                return Err(ScannerError::InvalidSettings(format!(
                    "{} must be between -100 and 100, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanKind {
    Preview,
    Scan,
}

/// Client-side progress estimate for a scan.
///
/// The service reports no progress for scans, so this ramps on a timer and
/// stays below the configured ceiling until the scan returns. It says
/// nothing about what the hardware is doing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatedProgress {
    pub kind: ScanKind,
    pub percent: u8,
    pub started_at: DateTime<Utc>,
}

impl SimulatedProgress {
    fn started(kind: ScanKind) -> Self {
        Self {
            kind,
            percent: 0,
            started_at: Utc::now(),
        }
    }

    /// Returns false once the ceiling is reached.
    fn advance(&mut self, step: u8, ceiling: u8) -> bool {
        self.percent = self.percent.saturating_add(step).min(ceiling);
        self.percent < ceiling
    }
}

/// A finished scan or preview.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanOutcome {
    pub kind: ScanKind,
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_info: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub settings: ScanSettings,
    pub completed_at: DateTime<Utc>,
}

/// Everything a scanner view renders.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerSnapshot {
    pub devices: Vec<ScannerDevice>,
    pub active_device: Option<String>,
    pub scanning: bool,
    pub progress: Option<SimulatedProgress>,
    pub preview: Option<ScanOutcome>,
    pub last_scan: Option<ScanOutcome>,
    pub last_error: Option<String>,
}

struct Operation {
    generation: u64,
    device_id: String,
    ramp: JoinHandle<()>,
}

#[derive(Default)]
struct SessionState {
    devices: Vec<ScannerDevice>,
    active: Option<String>,
    operation: Option<Operation>,
    generation: u64,
    progress: Option<SimulatedProgress>,
    preview: Option<ScanOutcome>,
    last_scan: Option<ScanOutcome>,
    last_error: Option<String>,
}

impl SessionState {
    fn device_mut(&mut self, id: &str) -> Option<&mut ScannerDevice> {
        self.devices.iter_mut().find(|d| d.id == id)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.operation
            .as_ref()
            .is_some_and(|op| op.generation == generation)
    }
}

fn lock(state: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    state.lock().unwrap_or_else(|poisoned| {
        warn!("Scanner session lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

/// Owns the discovered devices and the single active scan session.
pub struct ScannerSessionManager {
    service: Arc<dyn OcrService>,
    config: ScannerConfig,
    state: Arc<Mutex<SessionState>>,
}

impl ScannerSessionManager {
    pub fn new(service: Arc<dyn OcrService>, config: ScannerConfig) -> Self {
        Self {
            service,
            config,
            state: Arc::new(Mutex::new(SessionState::default())),
        }
    }

    /// Replaces the known device set with what the service reports.
    ///
    /// The device of an in-flight operation stays `busy`. An active
    /// selection that disappeared is cleared.
    pub async fn discover(&self) -> Result<Vec<ScannerDevice>, ScannerError> {
        let response = self
            .service
            .scanners()
            .await
            .map_err(ScannerError::Discovery)?;

        let mut state = lock(&self.state);
        let in_flight = state.operation.as_ref().map(|op| op.device_id.clone());
        let mut devices = response.scanners;

        if let Some(busy_id) = in_flight {
            match devices.iter_mut().find(|d| d.id == busy_id) {
                Some(device) => device.status = DeviceStatus::Busy,
                None => {
                    if let Some(previous) = state.devices.iter().find(|d| d.id == busy_id) {
                        devices.push(previous.clone());
                    }
                }
            }
        }

        if let Some(active) = state.active.clone() {
            if !devices.iter().any(|d| d.id == active) {
                info!("Active scanner {} disappeared, clearing selection", active);
                state.active = None;
            }
        }

        info!("Discovered {} scanners", devices.len());
        state.devices = devices.clone();
        Ok(devices)
    }

    /// Makes `device_id` the active device. It must be `ready`.
    pub fn select(&self, device_id: &str) -> Result<(), ScannerError> {
        let mut state = lock(&self.state);
        let device = state
            .devices
            .iter()
            .find(|d| d.id == device_id)
            .ok_or_else(|| ScannerError::UnknownDevice(device_id.to_string()))?;

        if device.status != DeviceStatus::Ready {
            return Err(ScannerError::NotReady {
                id: device_id.to_string(),
                status: device.status,
            });
        }

        debug!("Selected scanner {}", device_id);
        state.active = Some(device_id.to_string());
        Ok(())
    }

    pub async fn preview(&self, settings: ScanSettings) -> Result<ScanOutcome, ScannerError> {
        self.run(ScanKind::Preview, settings).await
    }

    pub async fn scan(&self, settings: ScanSettings) -> Result<ScanOutcome, ScannerError> {
        self.run(ScanKind::Scan, settings).await
    }

    async fn run(&self, kind: ScanKind, settings: ScanSettings) -> Result<ScanOutcome, ScannerError> {
        settings.validate()?;
        let (generation, device_id) = self.begin(kind)?;
        let guard = OperationGuard {
            state: Arc::clone(&self.state),
            generation,
            armed: true,
        };

        let span = tracing::info_span!("scan", device = %device_id, kind = ?kind);
        let response = self
            .service
            .scan_document(&device_id, &settings, kind == ScanKind::Preview)
            .instrument(span)
            .await;

        guard.disarm();
        self.finish(generation, kind, &device_id, settings, response)
    }

    /// Checks the preconditions and marks the device busy in one critical section.
    fn begin(&self, kind: ScanKind) -> Result<(u64, String), ScannerError> {
        let mut state = lock(&self.state);
        let device_id = state.active.clone().ok_or(ScannerError::NoActiveDevice)?;

        if let Some(op) = &state.operation {
            if op.device_id != device_id {
                return Err(ScannerError::OtherDeviceBusy(op.device_id.clone()));
            }
        }

        let device = state
            .device_mut(&device_id)
            .ok_or_else(|| ScannerError::UnknownDevice(device_id.clone()))?;
        if device.status != DeviceStatus::Ready {
            return Err(ScannerError::NotReady {
                id: device_id,
                status: device.status,
            });
        }
        device.status = DeviceStatus::Busy;

        state.generation += 1;
        let generation = state.generation;
        state.progress = Some(SimulatedProgress::started(kind));
        state.last_error = None;
        let ramp = self.spawn_ramp(generation);
        state.operation = Some(Operation {
            generation,
            device_id: device_id.clone(),
            ramp,
        });

        info!("Starting {:?} on scanner {}", kind, device_id);
        Ok((generation, device_id))
    }

    fn finish(
        &self,
        generation: u64,
        kind: ScanKind,
        device_id: &str,
        settings: ScanSettings,
        response: Result<ScanResponse, ServiceError>,
    ) -> Result<ScanOutcome, ScannerError> {
        let mut state = lock(&self.state);
        if !state.is_current(generation) {
            info!("Discarding {:?} result from scanner {} after cancel", kind, device_id);
            return Err(ScannerError::Cancelled);
        }
        if let Some(op) = state.operation.take() {
            op.ramp.abort();
        }

        let response = match response {
            Ok(response) if response.success => response,
            Ok(response) => {
                let message = response
                    .message
                    .unwrap_or_else(|| "Scanner reported a failure".to_string());
                return Err(fail_operation(&mut state, device_id, message));
            }
            Err(e) => return Err(fail_operation(&mut state, device_id, e.to_string())),
        };

        if let Some(device) = state.device_mut(device_id) {
            device.status = DeviceStatus::Ready;
        }
        if let Some(progress) = state.progress.as_mut() {
            progress.percent = 100;
        }

        let outcome = ScanOutcome {
            kind,
            device_id: device_id.to_string(),
            image_path: response.image_path,
            image_info: response.image_info,
            message: response.message,
            settings,
            completed_at: Utc::now(),
        };
        match kind {
            ScanKind::Preview => state.preview = Some(outcome.clone()),
            ScanKind::Scan => state.last_scan = Some(outcome.clone()),
        }

        info!("{:?} on scanner {} completed", kind, device_id);
        Ok(outcome)
    }

    fn spawn_ramp(&self, generation: u64) -> JoinHandle<()> {
        let state = Arc::clone(&self.state);
        let tick = self.config.progress_tick();
        let step = self.config.progress_step;
        let ceiling = self.config.progress_ceiling;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !advance_ramp(&state, generation, step, ceiling) {
                    break;
                }
            }
        })
    }

    /// Best-effort local reset. The service may still finish the hardware operation.
    pub fn cancel(&self) {
        let mut state = lock(&self.state);
        state.preview = None;
        if let Some(device_id) = release_operation(&mut state) {
            info!("Cancelled scan on scanner {}", device_id);
        }
    }

    pub fn devices(&self) -> Vec<ScannerDevice> {
        lock(&self.state).devices.clone()
    }

    pub fn device(&self, device_id: &str) -> Option<ScannerDevice> {
        lock(&self.state)
            .devices
            .iter()
            .find(|d| d.id == device_id)
            .cloned()
    }

    pub fn active_device(&self) -> Option<ScannerDevice> {
        let state = lock(&self.state);
        let active = state.active.as_deref()?;
        state.devices.iter().find(|d| d.id == active).cloned()
    }

    pub fn progress(&self) -> Option<SimulatedProgress> {
        lock(&self.state).progress.clone()
    }

    pub fn last_scan(&self) -> Option<ScanOutcome> {
        lock(&self.state).last_scan.clone()
    }

    pub fn preview_result(&self) -> Option<ScanOutcome> {
        lock(&self.state).preview.clone()
    }

    pub fn snapshot(&self) -> ScannerSnapshot {
        let state = lock(&self.state);
        ScannerSnapshot {
            devices: state.devices.clone(),
            active_device: state.active.clone(),
            scanning: state.operation.is_some(),
            progress: state.progress.clone(),
            preview: state.preview.clone(),
            last_scan: state.last_scan.clone(),
            last_error: state.last_error.clone(),
        }
    }
}

impl Drop for ScannerSessionManager {
    fn drop(&mut self) {
        if let Some(op) = lock(&self.state).operation.take() {
            op.ramp.abort();
        }
    }
}

impl std::fmt::Debug for ScannerSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("ScannerSessionManager")
            .field("devices", &state.devices.len())
            .field("active", &state.active)
            .field("scanning", &state.operation.is_some())
            .finish()
    }
}

/// Clears the in-flight operation and hands a busy device back as `ready`.
fn release_operation(state: &mut SessionState) -> Option<String> {
    state.progress = None;
    let op = state.operation.take()?;
    op.ramp.abort();
    if let Some(device) = state.device_mut(&op.device_id) {
        if device.status == DeviceStatus::Busy {
            device.status = DeviceStatus::Ready;
        }
    }
    Some(op.device_id)
}

/// Releases the device if a `run` future is dropped before the service answers.
struct OperationGuard {
    state: Arc<Mutex<SessionState>>,
    generation: u64,
    armed: bool,
}

impl OperationGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = lock(&self.state);
        if !state.is_current(self.generation) {
            return;
        }
        if let Some(device_id) = release_operation(&mut state) {
            warn!("Scan on scanner {} was abandoned before it finished", device_id);
        }
    }
}

/// Puts the device into `error`. Progress and earlier results stay visible.
fn fail_operation(state: &mut SessionState, device_id: &str, message: String) -> ScannerError {
    warn!("Scan on scanner {} failed: {}", device_id, message);
    if let Some(device) = state.device_mut(device_id) {
        device.status = DeviceStatus::Error;
    }
    state.last_error = Some(message.clone());
    ScannerError::Hardware(message)
}

fn advance_ramp(state: &Mutex<SessionState>, generation: u64, step: u8, ceiling: u8) -> bool {
    let mut state = lock(state);
    if !state.is_current(generation) {
        return false;
    }
    match state.progress.as_mut() {
        Some(progress) => progress.advance(step, ceiling),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{device, scan_ok, MockService};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn manager_with(devices: Vec<ScannerDevice>) -> (Arc<MockService>, Arc<ScannerSessionManager>) {
        let service = Arc::new(MockService::default());
        *service.devices.lock().unwrap() = devices;
        let manager = Arc::new(ScannerSessionManager::new(
            service.clone(),
            ScannerConfig::default(),
        ));
        (service, manager)
    }

    fn status_of(manager: &ScannerSessionManager, id: &str) -> DeviceStatus {
        manager.device(id).unwrap().status
    }

    #[test]
    fn test_settings_validation() {
        assert!(ScanSettings::default().validate().is_ok());
        assert!(ScanSettings::default().with_dpi(2400).validate().is_ok());
        assert!(ScanSettings::default().with_dpi(10).validate().is_err());

        let settings = ScanSettings {
            brightness: 150,
            ..ScanSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ScannerError::InvalidSettings(_))
        ));
    }

    #[test]
    fn test_unknown_device_status_reads_as_error() {
        let device: ScannerDevice = serde_json::from_str(
            r#"{"id":"s1","name":"Office","type":"adf","status":"offline"}"#,
        )
        .unwrap();
        assert_eq!(device.status, DeviceStatus::Error);
        assert_eq!(device.device_type, "adf");
    }

    #[test]
    fn test_settings_serialize_for_the_service() {
        let settings = ScanSettings::default().with_source(ScanSource::AdfDuplex);
        let json = serde_json::to_value(&settings).unwrap();
        assert_eq!(json["dpi"], 300);
        assert_eq!(json["color_mode"], "color");
        assert_eq!(json["paper_size"], "a4");
        assert_eq!(json["source"], "adf_duplex");
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_requires_active_device() {
        let (_, manager) = manager_with(vec![device("a", DeviceStatus::Ready)]);
        manager.discover().await.unwrap();

        let result = manager.scan(ScanSettings::default()).await;
        assert!(matches!(result, Err(ScannerError::NoActiveDevice)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_rejects_device_that_is_not_ready() {
        let (_, manager) = manager_with(vec![
            device("a", DeviceStatus::Ready),
            device("b", DeviceStatus::Error),
        ]);
        manager.discover().await.unwrap();

        assert!(matches!(
            manager.select("b"),
            Err(ScannerError::NotReady { status: DeviceStatus::Error, .. })
        ));
        assert!(matches!(
            manager.select("zzz"),
            Err(ScannerError::UnknownDevice(_))
        ));
        assert!(manager.select("a").is_ok());
        assert_eq!(manager.active_device().unwrap().id, "a");
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_scan_returns_device_to_ready() {
        let (service, manager) = manager_with(vec![device("a", DeviceStatus::Ready)]);
        service
            .scan_outcomes
            .lock()
            .unwrap()
            .push_back(scan_ok("/tmp/scan-1.png"));
        manager.discover().await.unwrap();
        manager.select("a").unwrap();

        let outcome = manager.scan(ScanSettings::default()).await.unwrap();

        assert_eq!(outcome.kind, ScanKind::Scan);
        assert_eq!(outcome.image_path.as_deref(), Some("/tmp/scan-1.png"));
        assert_eq!(status_of(&manager, "a"), DeviceStatus::Ready);
        assert_eq!(manager.last_scan(), Some(outcome));
        assert_eq!(manager.progress().unwrap().percent, 100);
        assert!(!manager.snapshot().scanning);
    }

    #[tokio::test(start_paused = true)]
    async fn test_preview_is_stored_separately() {
        let (service, manager) = manager_with(vec![device("a", DeviceStatus::Ready)]);
        service
            .scan_outcomes
            .lock()
            .unwrap()
            .push_back(scan_ok("/tmp/preview.png"));
        manager.discover().await.unwrap();
        manager.select("a").unwrap();

        manager.preview(ScanSettings::default()).await.unwrap();

        assert!(manager.preview_result().is_some());
        assert!(manager.last_scan().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_one_device_scans_at_a_time() {
        let (service, manager) = manager_with(vec![
            device("a", DeviceStatus::Ready),
            device("b", DeviceStatus::Ready),
        ]);
        service
            .scan_outcomes
            .lock()
            .unwrap()
            .push_back(scan_ok("/tmp/a.png"));
        *service.scan_delay.lock().unwrap() = Duration::from_secs(2);
        manager.discover().await.unwrap();
        manager.select("a").unwrap();

        let first = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.scan(ScanSettings::default()).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(status_of(&manager, "a"), DeviceStatus::Busy);

        // Same device again.
        assert!(matches!(
            manager.scan(ScanSettings::default()).await,
            Err(ScannerError::NotReady { status: DeviceStatus::Busy, .. })
        ));

        manager.select("b").unwrap();
        let second = manager.scan(ScanSettings::default()).await;
        assert!(matches!(second, Err(ScannerError::OtherDeviceBusy(ref id)) if id == "a"));
        assert_eq!(status_of(&manager, "b"), DeviceStatus::Ready);

        assert!(first.await.unwrap().is_ok());
        assert_eq!(service.scan_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_scan_needs_rediscovery() {
        let (service, manager) = manager_with(vec![device("a", DeviceStatus::Ready)]);
        service
            .scan_outcomes
            .lock()
            .unwrap()
            .push_back(Err("usb disconnected".to_string()));
        manager.discover().await.unwrap();
        manager.select("a").unwrap();

        let result = manager.scan(ScanSettings::default()).await;
        assert!(matches!(result, Err(ScannerError::Hardware(_))));
        assert_eq!(status_of(&manager, "a"), DeviceStatus::Error);
        assert!(manager.snapshot().last_error.unwrap().contains("usb disconnected"));

        assert!(matches!(
            manager.scan(ScanSettings::default()).await,
            Err(ScannerError::NotReady { status: DeviceStatus::Error, .. })
        ));

        manager.discover().await.unwrap();
        assert_eq!(status_of(&manager, "a"), DeviceStatus::Ready);
        service
            .scan_outcomes
            .lock()
            .unwrap()
            .push_back(scan_ok("/tmp/retry.png"));
        assert!(manager.scan(ScanSettings::default()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsuccessful_response_is_a_hardware_failure() {
        let (service, manager) = manager_with(vec![device("a", DeviceStatus::Ready)]);
        service.scan_outcomes.lock().unwrap().push_back(Ok(ScanResponse {
            success: false,
            image_path: None,
            image_info: None,
            message: Some("Paper jam".to_string()),
        }));
        manager.discover().await.unwrap();
        manager.select("a").unwrap();

        let result = manager.scan(ScanSettings::default()).await;
        assert!(matches!(result, Err(ScannerError::Hardware(ref m)) if m == "Paper jam"));
        assert_eq!(status_of(&manager, "a"), DeviceStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_discards_late_result() {
        let (service, manager) = manager_with(vec![device("a", DeviceStatus::Ready)]);
        service
            .scan_outcomes
            .lock()
            .unwrap()
            .push_back(scan_ok("/tmp/late.png"));
        *service.scan_delay.lock().unwrap() = Duration::from_secs(2);
        manager.discover().await.unwrap();
        manager.select("a").unwrap();

        let pending = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.preview(ScanSettings::default()).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        manager.cancel();
        assert_eq!(status_of(&manager, "a"), DeviceStatus::Ready);
        assert!(manager.progress().is_none());

        let late = pending.await.unwrap();
        assert!(matches!(late, Err(ScannerError::Cancelled)));
        assert!(manager.preview_result().is_none());
        assert_eq!(status_of(&manager, "a"), DeviceStatus::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_scan_releases_device() {
        let (service, manager) = manager_with(vec![device("a", DeviceStatus::Ready)]);
        service
            .scan_outcomes
            .lock()
            .unwrap()
            .push_back(scan_ok("/tmp/retry.png"));
        *service.scan_delay.lock().unwrap() = Duration::from_secs(2);
        manager.discover().await.unwrap();
        manager.select("a").unwrap();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(100),
            manager.scan(ScanSettings::default()),
        )
        .await;
        assert!(abandoned.is_err());

        assert_eq!(status_of(&manager, "a"), DeviceStatus::Ready);
        assert!(!manager.snapshot().scanning);
        assert!(manager.progress().is_none());

        let outcome = manager.scan(ScanSettings::default()).await.unwrap();
        assert_eq!(outcome.image_path.as_deref(), Some("/tmp/retry.png"));
        assert_eq!(status_of(&manager, "a"), DeviceStatus::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_progress_stops_at_ceiling() {
        let (service, manager) = manager_with(vec![device("a", DeviceStatus::Ready)]);
        service
            .scan_outcomes
            .lock()
            .unwrap()
            .push_back(scan_ok("/tmp/slow.png"));
        *service.scan_delay.lock().unwrap() = Duration::from_secs(20);
        manager.discover().await.unwrap();
        manager.select("a").unwrap();

        let pending = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.scan(ScanSettings::default()).await })
        };

        tokio::time::sleep(Duration::from_millis(1_250)).await;
        assert_eq!(manager.progress().unwrap().percent, 20);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(manager.progress().unwrap().percent, 90);

        pending.await.unwrap().unwrap();
        assert_eq!(manager.progress().unwrap().percent, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discover_keeps_busy_device_busy() {
        let (service, manager) = manager_with(vec![device("a", DeviceStatus::Ready)]);
        service
            .scan_outcomes
            .lock()
            .unwrap()
            .push_back(scan_ok("/tmp/a.png"));
        *service.scan_delay.lock().unwrap() = Duration::from_secs(2);
        manager.discover().await.unwrap();
        manager.select("a").unwrap();

        let pending = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.scan(ScanSettings::default()).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        *service.devices.lock().unwrap() = vec![
            device("a", DeviceStatus::Ready),
            device("b", DeviceStatus::Ready),
        ];
        let devices = manager.discover().await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(status_of(&manager, "a"), DeviceStatus::Busy);

        pending.await.unwrap().unwrap();
        assert_eq!(status_of(&manager, "a"), DeviceStatus::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discover_clears_vanished_selection() {
        let (service, manager) = manager_with(vec![
            device("a", DeviceStatus::Ready),
            device("b", DeviceStatus::Ready),
        ]);
        manager.discover().await.unwrap();
        manager.select("b").unwrap();

        *service.devices.lock().unwrap() = vec![device("a", DeviceStatus::Ready)];
        manager.discover().await.unwrap();

        assert!(manager.active_device().is_none());
        assert!(manager.snapshot().active_device.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_settings_leave_device_untouched() {
        let (service, manager) = manager_with(vec![device("a", DeviceStatus::Ready)]);
        manager.discover().await.unwrap();
        manager.select("a").unwrap();

        let result = manager.scan(ScanSettings::default().with_dpi(5000)).await;
        assert!(matches!(result, Err(ScannerError::InvalidSettings(_))));
        assert_eq!(status_of(&manager, "a"), DeviceStatus::Ready);
        assert_eq!(service.scan_calls.load(Ordering::SeqCst), 0);
    }
}
