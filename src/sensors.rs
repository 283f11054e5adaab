use log::{debug, info, warn};
use std::f64::consts::PI;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};

use crate::config::PositionOptions;
use crate::error::SensorError;
use crate::types::{Coordinate, OrientationSample, StorageEstimate};

/// Discrete sensor readings delivered to the controller's event pump
#[derive(Clone, Debug, PartialEq)]
pub enum SensorEvent {
    Position(Coordinate),
    PositionUnavailable(String),
    Orientation(OrientationSample),
    /// Battery level in 0.0..=1.0
    Battery(f64),
    BatteryUnsupported,
    Storage(StorageEstimate),
    StorageUnsupported,
}

/// A platform sensor stream with an explicit start/stop lifecycle.
///
/// Sources push into a shared channel; a full channel drops the sample,
/// a closed channel ends the source.
pub trait SensorSource: Send {
    fn name(&self) -> &'static str;

    fn start(&mut self, tx: Sender<SensorEvent>) -> Result<(), SensorError>;

    fn stop(&mut self);

    fn is_running(&self) -> bool;

    /// Most recent event this source emitted
    fn latest(&self) -> Option<SensorEvent>;
}

/// Task handle and last emitted value shared by the simulated sources
#[derive(Default)]
struct SourceTask {
    handle: Option<JoinHandle<()>>,
    latest: Arc<Mutex<Option<SensorEvent>>>,
}

impl SourceTask {
    fn spawn<F, Fut>(
        &mut self,
        name: &'static str,
        tx: Sender<SensorEvent>,
        body: F,
    ) -> Result<(), SensorError>
    where
        F: FnOnce(Emitter) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        if self.is_running() {
            return Err(SensorError::AlreadyRunning(name.to_string()));
        }
        let emitter = Emitter {
            name,
            latest: self.latest.clone(),
            count: 0,
            tx,
        };
        self.handle = Some(tokio::spawn(body(emitter)));
        info!("[{}] started", name);
        Ok(())
    }

    fn stop(&mut self, name: &'static str) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            info!("[{}] stopped", name);
        }
    }

    fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    fn latest(&self) -> Option<SensorEvent> {
        self.latest.lock().ok().and_then(|guard| guard.clone())
    }
}

struct Emitter {
    name: &'static str,
    latest: Arc<Mutex<Option<SensorEvent>>>,
    count: u64,
    tx: Sender<SensorEvent>,
}

impl Emitter {
    /// Returns false once the receiving side has gone away
    fn emit(&mut self, event: SensorEvent) -> bool {
        if let Ok(mut latest) = self.latest.lock() {
            *latest = Some(event.clone());
        }
        match self.tx.try_send(event) {
            Ok(_) => {
                self.count += 1;
                if self.count % 100 == 0 {
                    debug!("[{}] {} samples", self.name, self.count);
                }
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!("[{}] channel closed after {} samples", self.name, self.count);
                false
            }
            Err(TrySendError::Full(_)) => {
                // Channel full, drop this sample
                true
            }
        }
    }
}

/// Walks a straight line from `origin` along `bearing_deg`, one step per tick
pub struct SimulatedGps {
    pub origin: Coordinate,
    pub bearing_deg: f64,
    pub step_m: f64,
    pub period: Duration,
    pub options: PositionOptions,
    /// Emit a denial instead of fixes
    pub denied: bool,
    task: SourceTask,
}

impl SimulatedGps {
    pub fn new(origin: Coordinate, bearing_deg: f64, step_m: f64, options: PositionOptions) -> Self {
        Self {
            origin,
            bearing_deg,
            step_m,
            period: options.maximum_age(),
            options,
            denied: false,
            task: SourceTask::default(),
        }
    }

    pub fn denied(mut self) -> Self {
        self.denied = true;
        self
    }
}

/// Offset a coordinate by `distance_m` along `bearing_deg` (flat-earth step)
pub fn offset_coordinate(from: Coordinate, bearing_deg: f64, distance_m: f64) -> Coordinate {
    const METERS_PER_DEG: f64 = 111_195.0;
    let bearing = bearing_deg.to_radians();
    let d_lat = distance_m * bearing.cos() / METERS_PER_DEG;
    let d_lon =
        distance_m * bearing.sin() / (METERS_PER_DEG * from.latitude.to_radians().cos().max(1e-9));
    Coordinate::new(from.latitude + d_lat, from.longitude + d_lon)
}

impl SensorSource for SimulatedGps {
    fn name(&self) -> &'static str {
        "gps"
    }

    fn start(&mut self, tx: Sender<SensorEvent>) -> Result<(), SensorError> {
        let origin = self.origin;
        let bearing = self.bearing_deg;
        let step = self.step_m;
        let period = self.period;
        let denied = self.denied;
        debug!(
            "[gps] high_accuracy={} maximum_age={}ms",
            self.options.high_accuracy, self.options.maximum_age_ms
        );

        self.task.spawn("gps", tx, move |mut emitter| async move {
            if denied {
                warn!("[gps] location permission denied");
                emitter.emit(SensorEvent::PositionUnavailable(
                    "location permission denied".to_string(),
                ));
                return;
            }

            let mut ticker = interval(period);
            let mut position = origin;
            loop {
                ticker.tick().await;
                if !emitter.emit(SensorEvent::Position(position)) {
                    break;
                }
                position = offset_coordinate(position, bearing, step);
            }
        })
    }

    fn stop(&mut self) {
        self.task.stop("gps");
    }

    fn is_running(&self) -> bool {
        self.task.is_running()
    }

    fn latest(&self) -> Option<SensorEvent> {
        self.task.latest()
    }
}

/// Device held near `base_pitch` with a slow sway; every `wobble_every`-th
/// sample is tipped by `wobble_deg`.
pub struct SimulatedOrientation {
    pub heading_deg: f64,
    pub base_pitch: f64,
    pub sway_deg: f64,
    pub wobble_every: Option<u64>,
    pub wobble_deg: f64,
    pub period: Duration,
    pub supported: bool,
    task: SourceTask,
}

impl SimulatedOrientation {
    pub fn new(heading_deg: f64, base_pitch: f64) -> Self {
        Self {
            heading_deg,
            base_pitch,
            sway_deg: 1.5,
            wobble_every: None,
            wobble_deg: 8.0,
            period: Duration::from_millis(100),
            supported: true,
            task: SourceTask::default(),
        }
    }

    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new(0.0, 0.0)
        }
    }
}

impl SensorSource for SimulatedOrientation {
    fn name(&self) -> &'static str {
        "orientation"
    }

    fn start(&mut self, tx: Sender<SensorEvent>) -> Result<(), SensorError> {
        let heading = self.heading_deg;
        let base_pitch = self.base_pitch;
        let sway = self.sway_deg;
        let wobble_every = self.wobble_every;
        let wobble = self.wobble_deg;
        let period = self.period;
        let supported = self.supported;

        self.task.spawn("orientation", tx, move |mut emitter| async move {
            if !supported {
                emitter.emit(SensorEvent::Orientation(OrientationSample::new(None, None)));
                return;
            }

            let mut ticker = interval(period);
            let mut n = 0u64;
            loop {
                ticker.tick().await;
                let t = n as f64 * period.as_secs_f64();
                let mut pitch = base_pitch + (t * 2.0 * PI * 0.2).sin() * sway;
                if let Some(every) = wobble_every {
                    if every > 0 && n > 0 && n % every == 0 {
                        pitch += wobble;
                    }
                }
                let sample = OrientationSample::new(
                    Some(heading + (t * 0.5).sin() * 2.0),
                    Some(pitch),
                );
                if !emitter.emit(SensorEvent::Orientation(sample)) {
                    break;
                }
                n += 1;
            }
        })
    }

    fn stop(&mut self) {
        self.task.stop("orientation");
    }

    fn is_running(&self) -> bool {
        self.task.is_running()
    }

    fn latest(&self) -> Option<SensorEvent> {
        self.task.latest()
    }
}

/// Emits the level once at subscription, then again whenever it changes
pub struct SimulatedBattery {
    pub level: f64,
    pub drain_per_tick: f64,
    pub period: Duration,
    pub supported: bool,
    task: SourceTask,
}

impl SimulatedBattery {
    pub fn new(level: f64, drain_per_tick: f64) -> Self {
        Self {
            level,
            drain_per_tick,
            period: Duration::from_secs(30),
            supported: true,
            task: SourceTask::default(),
        }
    }

    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new(1.0, 0.0)
        }
    }
}

impl SensorSource for SimulatedBattery {
    fn name(&self) -> &'static str {
        "battery"
    }

    fn start(&mut self, tx: Sender<SensorEvent>) -> Result<(), SensorError> {
        let mut level = self.level.clamp(0.0, 1.0);
        let drain = self.drain_per_tick;
        let period = self.period;
        let supported = self.supported;

        self.task.spawn("battery", tx, move |mut emitter| async move {
            if !supported {
                emitter.emit(SensorEvent::BatteryUnsupported);
                return;
            }
            if !emitter.emit(SensorEvent::Battery(level)) || drain <= 0.0 {
                return;
            }

            let mut ticker = interval(period);
            // interval fires immediately; the subscription read already went out
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let next = (level - drain).max(0.0);
                if next == level {
                    break;
                }
                level = next;
                if !emitter.emit(SensorEvent::Battery(level)) {
                    break;
                }
            }
        })
    }

    fn stop(&mut self) {
        self.task.stop("battery");
    }

    fn is_running(&self) -> bool {
        self.task.is_running()
    }

    fn latest(&self) -> Option<SensorEvent> {
        self.task.latest()
    }
}

/// Answers a single storage-estimate query; `None` means unsupported
pub struct SimulatedStorage {
    pub estimate: Option<StorageEstimate>,
    task: SourceTask,
}

impl SimulatedStorage {
    pub fn new(estimate: Option<StorageEstimate>) -> Self {
        Self {
            estimate,
            task: SourceTask::default(),
        }
    }
}

impl SensorSource for SimulatedStorage {
    fn name(&self) -> &'static str {
        "storage"
    }

    fn start(&mut self, tx: Sender<SensorEvent>) -> Result<(), SensorError> {
        let estimate = self.estimate;
        self.task.spawn("storage", tx, move |mut emitter| async move {
            let event = match estimate {
                Some(estimate) => SensorEvent::Storage(estimate),
                None => SensorEvent::StorageUnsupported,
            };
            emitter.emit(event);
        })
    }

    fn stop(&mut self) {
        self.task.stop("storage");
    }

    fn is_running(&self) -> bool {
        self.task.is_running()
    }

    fn latest(&self) -> Option<SensorEvent> {
        self.task.latest()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_tracker::haversine_distance;
    use approx::assert_relative_eq;
    use tokio::sync::mpsc;

    #[test]
    fn test_offset_coordinate_step_length() {
        let start = Coordinate::new(41.0, 29.0);
        let north = offset_coordinate(start, 0.0, 10.0);
        let east = offset_coordinate(start, 90.0, 10.0);
        assert_relative_eq!(haversine_distance(start, north), 10.0, max_relative = 0.01);
        assert_relative_eq!(haversine_distance(start, east), 10.0, max_relative = 0.01);
    }

    #[tokio::test]
    async fn test_gps_walks_away_from_origin() {
        let (tx, mut rx) = mpsc::channel(16);
        let origin = Coordinate::new(41.0, 29.0);
        let mut gps = SimulatedGps::new(origin, 0.0, 5.0, PositionOptions::default());
        gps.period = Duration::from_millis(5);
        gps.start(tx).unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        gps.stop();

        assert_eq!(first, SensorEvent::Position(origin));
        match second {
            SensorEvent::Position(c) => assert!(c.latitude > origin.latitude),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(gps.latest().is_some());
    }

    #[tokio::test]
    async fn test_denied_gps_reports_unavailable() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut gps = SimulatedGps::new(Coordinate::new(0.0, 0.0), 0.0, 1.0, PositionOptions::default())
            .denied();
        gps.start(tx).unwrap();
        match rx.recv().await.unwrap() {
            SensorEvent::PositionUnavailable(reason) => assert!(reason.contains("denied")),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let (tx, _rx) = mpsc::channel(4);
        let mut orientation = SimulatedOrientation::new(90.0, 10.0);
        orientation.start(tx.clone()).unwrap();
        assert!(matches!(
            orientation.start(tx),
            Err(SensorError::AlreadyRunning(_))
        ));
        orientation.stop();
        assert!(!orientation.is_running());
    }

    #[tokio::test]
    async fn test_unsupported_sources_emit_once() {
        let (tx, mut rx) = mpsc::channel(8);
        SimulatedBattery::unsupported().start(tx.clone()).unwrap();
        SimulatedStorage::new(None).start(tx.clone()).unwrap();
        SimulatedOrientation::unsupported().start(tx).unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(events.len(), 3);
        assert!(events.contains(&SensorEvent::BatteryUnsupported));
        assert!(events.contains(&SensorEvent::StorageUnsupported));
        assert!(events.contains(&SensorEvent::Orientation(OrientationSample::new(None, None))));
    }

    #[tokio::test]
    async fn test_battery_reports_at_subscription() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut battery = SimulatedBattery::new(0.42, 0.0);
        battery.start(tx).unwrap();
        assert_eq!(rx.recv().await, Some(SensorEvent::Battery(0.42)));
        assert_eq!(rx.recv().await, None);
    }
}
