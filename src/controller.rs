use async_trait::async_trait;
use log::{error, info, warn};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{CaptureConfig, SessionResetPolicy};
use crate::error::{CaptureError, CaptureResult, NetworkError};
use crate::filename::photo_filename;
use crate::geo_tracker::GeoTracker;
use crate::live_status::ControllerSnapshot;
use crate::media::{CaptureDevice, FrameEncoder, MediaCapture, ZoomMode, ZoomRange};
use crate::network::NetworkClient;
use crate::orientation_tracker::OrientationTracker;
use crate::readiness::ReadinessMonitor;
use crate::sensors::SensorEvent;
use crate::session::{validate_date, SessionState, SessionStatus};
use crate::types::{NewSession, PhotoRecord, ReadinessState};

/// Asks the operator to confirm starting on a low battery
#[async_trait]
pub trait OperatorPrompt: Send + Sync {
    async fn confirm_low_battery(&self, level: Option<f64>) -> bool;
}

/// Fixed answer, for unattended runs and scripted clients
pub struct AutoConfirm(pub bool);

#[async_trait]
impl OperatorPrompt for AutoConfirm {
    async fn confirm_low_battery(&self, level: Option<f64>) -> bool {
        info!(
            "[controller] low battery ({}), auto-answer {}",
            level
                .map(|l| format!("{:.0}%", l * 100.0))
                .unwrap_or_else(|| "unknown".to_string()),
            self.0
        );
        self.0
    }
}

/// Result of one upload, delivered on the outcome channel
#[derive(Debug, Clone, PartialEq)]
pub struct UploadOutcome {
    pub session_id: String,
    pub sequence_number: u32,
    pub filename: String,
    pub result: Result<(), NetworkError>,
}

/// Handle for an accepted capture; the upload runs detached
pub struct CaptureTicket {
    pub sequence_number: u32,
    pub filename: String,
    pub upload: JoinHandle<Result<(), NetworkError>>,
}

struct ControllerInner {
    session: SessionState,
    geo: GeoTracker,
    orientation: OrientationTracker,
    readiness: ReadinessMonitor,
    zoom_mode: ZoomMode,
    device: Option<Arc<dyn CaptureDevice>>,
}

impl ControllerInner {
    /// Tilt gate: baseline taken, pitch known and finite, deviation within tolerance
    fn check_angle_gate(&self) -> CaptureResult<()> {
        if self.orientation.baseline().is_none() {
            return Err(CaptureError::BaselineUnset);
        }
        let deviation = self
            .orientation
            .deviation()
            .ok_or(CaptureError::PitchUnknown)?;
        if self.orientation.angle_warning() {
            return Err(CaptureError::TiltOutOfTolerance {
                deviation,
                tolerance: self.orientation.tolerance_deg(),
            });
        }
        Ok(())
    }

    fn check_capture_gate(&self) -> CaptureResult<()> {
        if self.session.status != SessionStatus::Active {
            return Err(CaptureError::NotRunning);
        }
        self.check_angle_gate()?;
        if self.geo.current().is_none() {
            return Err(CaptureError::PositionUnavailable);
        }
        Ok(())
    }
}

/// Fuses sensor state, gates start/capture, and drives capture → upload.
///
/// State sits behind one mutex that is never held across an `.await`;
/// sensor events, operator intents and upload completions interleave only at
/// the await points of `start` and `capture`.
pub struct CaptureSessionController {
    config: CaptureConfig,
    inner: Arc<Mutex<ControllerInner>>,
    media: Arc<dyn MediaCapture>,
    encoder: Arc<dyn FrameEncoder>,
    network: Arc<dyn NetworkClient>,
    outcomes_tx: mpsc::UnboundedSender<UploadOutcome>,
    outcomes_rx: Mutex<Option<mpsc::UnboundedReceiver<UploadOutcome>>>,
}

impl CaptureSessionController {
    pub fn new(
        config: CaptureConfig,
        media: Arc<dyn MediaCapture>,
        encoder: Arc<dyn FrameEncoder>,
        network: Arc<dyn NetworkClient>,
    ) -> Self {
        let inner = ControllerInner {
            session: SessionState::new(),
            geo: GeoTracker::new(),
            orientation: OrientationTracker::new(config.tilt_tolerance_deg),
            readiness: ReadinessMonitor::new(config.low_battery_level, config.min_free_storage_bytes),
            zoom_mode: ZoomMode::default(),
            device: None,
        };
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();

        Self {
            config,
            inner: Arc::new(Mutex::new(inner)),
            media,
            encoder,
            network,
            outcomes_tx,
            outcomes_rx: Mutex::new(Some(outcomes_rx)),
        }
    }

    fn lock(&self) -> CaptureResult<MutexGuard<'_, ControllerInner>> {
        self.inner
            .lock()
            .map_err(|_| CaptureError::Internal("Failed to acquire controller lock".to_string()))
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Upload outcomes, one per accepted capture. Can be taken once.
    pub fn take_upload_outcomes(&self) -> Option<mpsc::UnboundedReceiver<UploadOutcome>> {
        self.outcomes_rx.lock().ok().and_then(|mut rx| rx.take())
    }

    /// Apply one sensor reading. Latest value wins.
    pub fn handle_event(&self, event: SensorEvent) -> CaptureResult<()> {
        let mut inner = self.lock()?;
        match event {
            SensorEvent::Position(coordinate) => inner.geo.update(coordinate),
            SensorEvent::PositionUnavailable(reason) => inner.geo.mark_unavailable(reason),
            SensorEvent::Orientation(sample) => inner.orientation.update(sample),
            SensorEvent::Battery(level) => inner.readiness.update_battery(level),
            SensorEvent::BatteryUnsupported => inner.readiness.mark_battery_unsupported(),
            SensorEvent::Storage(estimate) => inner.readiness.update_storage(estimate),
            SensorEvent::StorageUnsupported => inner.readiness.mark_storage_unsupported(),
        }
        Ok(())
    }

    /// Drain sensor events in arrival order until every source has hung up
    pub async fn run_event_pump(&self, mut rx: mpsc::Receiver<SensorEvent>) {
        let mut applied = 0u64;
        while let Some(event) = rx.recv().await {
            if let Err(e) = self.handle_event(event) {
                error!("[controller] dropping sensor event: {}", e);
                continue;
            }
            applied += 1;
        }
        info!("[controller] sensor channel closed after {} events", applied);
    }

    pub fn set_site_name(&self, site_name: &str) -> CaptureResult<()> {
        let mut inner = self.lock()?;
        if inner.session.is_open() {
            return Err(CaptureError::AlreadyRunning);
        }
        inner.session.site_name = site_name.to_string();
        Ok(())
    }

    pub fn set_date(&self, date: &str) -> CaptureResult<()> {
        validate_date(date)?;
        let mut inner = self.lock()?;
        if inner.session.is_open() {
            return Err(CaptureError::AlreadyRunning);
        }
        inner.session.date = date.to_string();
        Ok(())
    }

    /// Store the zoom mode and apply it to the open device, if any.
    /// Returns the zoom factor photos will be tagged with.
    pub async fn set_zoom_mode(&self, mode: ZoomMode) -> CaptureResult<f64> {
        let device = {
            let mut inner = self.lock()?;
            inner.zoom_mode = mode;
            inner.device.clone()
        };
        match device {
            Some(device) => {
                let factor = mode.factor(device.zoom_range());
                if device.zoom_range().and_then(ZoomRange::validated).is_some() {
                    device.set_zoom(factor).await?;
                }
                info!("[controller] zoom {:?} ({:.2}x)", mode, factor);
                Ok(factor)
            }
            None => Ok(mode.factor(None)),
        }
    }

    pub fn readiness(&self) -> CaptureResult<ReadinessState> {
        Ok(self.lock()?.readiness.state())
    }

    pub fn status(&self) -> CaptureResult<SessionStatus> {
        Ok(self.lock()?.session.status)
    }

    pub fn angle_warning(&self) -> CaptureResult<bool> {
        Ok(self.lock()?.orientation.angle_warning())
    }

    pub fn can_capture(&self) -> bool {
        self.lock()
            .map(|inner| inner.check_capture_gate().is_ok())
            .unwrap_or(false)
    }

    pub fn snapshot(&self) -> CaptureResult<ControllerSnapshot> {
        let inner = self.lock()?;
        Ok(ControllerSnapshot {
            timestamp: ControllerSnapshot::stamp(),
            status: inner.session.status,
            site_name: inner.session.site_name.clone(),
            date: inner.session.date.clone(),
            session_id: inner.session.session_id.clone(),
            sequence_number: inner.session.sequence_number,
            captures_in_flight: inner.session.captures_in_flight,
            uploads_completed: inner.session.uploads_completed,
            uploads_failed: inner.session.uploads_failed,
            last_error: inner.session.last_error.clone(),
            position: inner.geo.state(),
            orientation: inner.orientation.state(),
            readiness: inner.readiness.report(),
            zoom_mode: inner.zoom_mode,
            can_capture: inner.check_capture_gate().is_ok(),
        })
    }

    fn fail_start(&self, err: CaptureError) -> CaptureError {
        error!("[controller] start failed: {}", err);
        if let Ok(mut inner) = self.lock() {
            inner.session.abort_start(&err);
        }
        err
    }

    /// Open a session: storage gate, battery confirmation, camera, backend.
    ///
    /// Any failure leaves the controller idle with the error recorded.
    pub async fn start(&self, prompt: &dyn OperatorPrompt) -> CaptureResult<String> {
        let low_battery = {
            let mut inner = self.lock()?;
            if inner.session.is_open() {
                return Err(CaptureError::AlreadyRunning);
            }
            if !inner.readiness.storage_ok() {
                let err = CaptureError::InsufficientStorage;
                warn!("[controller] start refused: {}", err);
                inner.session.last_error = Some(err.to_string());
                return Err(err);
            }
            inner
                .readiness
                .battery_low()
                .then(|| inner.readiness.battery_level())
        };

        if let Some(level) = low_battery {
            if !prompt.confirm_low_battery(level).await {
                let err = CaptureError::LowBatteryDeclined;
                warn!("[controller] start aborted: {}", err);
                self.lock()?.session.last_error = Some(err.to_string());
                return Err(err);
            }
        }

        let (site_name, date, start) = {
            let mut inner = self.lock()?;
            inner.session.begin_start()?;
            (
                inner.session.site_name.clone(),
                inner.session.date.clone(),
                inner.geo.current(),
            )
        };
        info!("[controller] starting session for {:?} on {}", site_name, date);

        let device = match self.media.acquire().await {
            Ok(device) => device,
            Err(e) => return Err(self.fail_start(e.into())),
        };

        let request = NewSession {
            site_name,
            date,
            start_lat: start.map(|c| c.latitude),
            start_lng: start.map(|c| c.longitude),
            device: device.descriptor(),
        };
        let session_id = match self.network.create_session(&request).await {
            Ok(id) => id,
            Err(e) => {
                device.release();
                return Err(self.fail_start(e.into()));
            }
        };

        let policy = self.config.reset_policy;
        let zoom_mode = {
            let mut inner = self.lock()?;
            if let Err(e) = inner.session.activate(session_id.clone(), policy) {
                drop(inner);
                device.release();
                return Err(self.fail_start(e));
            }
            if policy == SessionResetPolicy::Fresh {
                inner.geo.reset_anchor();
            }
            inner.orientation.arm_baseline();
            inner.device = Some(device.clone());
            inner.zoom_mode
        };
        info!("[controller] session {} active", session_id);

        if let Some(range) = device.zoom_range().and_then(ZoomRange::validated) {
            let factor = zoom_mode.factor(Some(range));
            if let Err(e) = device.set_zoom(factor).await {
                warn!("[controller] could not apply zoom {:.2}x: {}", factor, e);
            }
        }

        Ok(session_id)
    }

    /// Take one photo and hand it to a detached upload task.
    ///
    /// The sequence number is reserved before the first await, so rapid
    /// triggers number in trigger order even if their uploads finish out of
    /// order. A failure after reservation leaves a gap in the sequence.
    pub async fn capture(&self) -> CaptureResult<CaptureTicket> {
        let (seq, session_id, site_name, date, coordinate, orientation, zoom_mode, device) = {
            let mut inner = self.lock()?;
            if let Err(e) = inner.check_capture_gate() {
                warn!("[controller] capture refused: {}", e);
                return Err(e);
            }
            let coordinate = inner.geo.current().ok_or(CaptureError::PositionUnavailable)?;
            let device = inner
                .device
                .clone()
                .ok_or_else(|| CaptureError::Internal("active session without device".to_string()))?;
            let session_id = inner
                .session
                .session_id
                .clone()
                .ok_or_else(|| CaptureError::Internal("active session without id".to_string()))?;
            let seq = inner.session.reserve_sequence();
            (
                seq,
                session_id,
                inner.session.site_name.clone(),
                inner.session.date.clone(),
                coordinate,
                inner.orientation.latest(),
                inner.zoom_mode,
                device,
            )
        };
        info!("[controller] capture #{} triggered", seq);

        let image_bytes = match self.grab_and_encode(device.as_ref()).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("[controller] capture #{} abandoned: {}", seq, e);
                if let Ok(mut inner) = self.lock() {
                    inner.session.release_in_flight();
                    inner.session.last_error = Some(e.to_string());
                }
                return Err(e);
            }
        };

        let filename = photo_filename(
            &site_name,
            &date,
            seq,
            coordinate.latitude,
            coordinate.longitude,
        );
        let record = PhotoRecord {
            session_id: session_id.clone(),
            sequence_number: seq,
            coordinate,
            pitch: orientation.pitch,
            heading: orientation.heading,
            zoom_factor: zoom_mode.factor(device.zoom_range()),
            filename: filename.clone(),
            image_bytes,
        };

        let upload = self.spawn_upload(record);
        Ok(CaptureTicket {
            sequence_number: seq,
            filename,
            upload,
        })
    }

    async fn grab_and_encode(&self, device: &dyn CaptureDevice) -> CaptureResult<Vec<u8>> {
        let frame = device.grab_frame().await?;
        Ok(self.encoder.encode(frame).await?)
    }

    fn spawn_upload(&self, record: PhotoRecord) -> JoinHandle<Result<(), NetworkError>> {
        let inner = self.inner.clone();
        let network = self.network.clone();
        let outcomes = self.outcomes_tx.clone();

        tokio::spawn(async move {
            let session_id = record.session_id.clone();
            let seq = record.sequence_number;
            let filename = record.filename.clone();

            let result = network.upload_photo(record).await;
            match &result {
                Ok(()) => info!("[controller] uploaded #{} {}", seq, filename),
                Err(e) => error!("[controller] upload #{} failed, not retried: {}", seq, e),
            }

            if let Ok(mut guard) = inner.lock() {
                if guard.session.session_id.as_deref() == Some(session_id.as_str()) {
                    guard.session.record_upload(result.is_ok());
                    if let Err(e) = &result {
                        guard.session.last_error = Some(format!("upload #{} failed: {}", seq, e));
                    }
                } else {
                    guard.session.release_in_flight();
                }
            }

            // Nobody listening is fine
            let _ = outcomes.send(UploadOutcome {
                session_id,
                sequence_number: seq,
                filename,
                result: result.clone(),
            });
            result
        })
    }

    /// End the session and release the camera. In-flight uploads continue;
    /// the backend is not told.
    pub fn stop(&self) -> CaptureResult<()> {
        let device = {
            let mut inner = self.lock()?;
            inner.session.stop()?;
            inner.orientation.clear_baseline();
            inner.device.take()
        };
        if let Some(device) = device {
            device.release();
        }
        info!("[controller] session stopped");
        Ok(())
    }
}
