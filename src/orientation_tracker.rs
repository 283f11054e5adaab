use log::{debug, info};
use serde::Serialize;

use crate::config::DEFAULT_TILT_TOLERANCE_DEG;
use crate::types::OrientationSample;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OrientationState {
    pub heading: Option<f64>,
    pub pitch: Option<f64>,
    pub baseline: Option<f64>,
    pub deviation: Option<f64>,
    pub angle_warning: bool,
}

/// Latest heading/pitch and the pitch baseline captured at session start.
///
/// The baseline is only taken while `armed`; arming happens when a session
/// becomes active and is consumed by the first known pitch.
#[derive(Debug)]
pub struct OrientationTracker {
    latest: OrientationSample,
    baseline: Option<f64>,
    armed: bool,
    tolerance_deg: f64,
}

impl Default for OrientationTracker {
    fn default() -> Self {
        Self::new(DEFAULT_TILT_TOLERANCE_DEG)
    }
}

impl OrientationTracker {
    pub fn new(tolerance_deg: f64) -> Self {
        Self {
            latest: OrientationSample::default(),
            baseline: None,
            armed: false,
            tolerance_deg,
        }
    }

    /// Overwrite the latest sample; takes the baseline if armed.
    pub fn update(&mut self, sample: OrientationSample) {
        self.latest = sample.sanitized();
        self.try_take_baseline();
        if let Some(deviation) = self.deviation() {
            debug!(
                "[orientation] pitch {:?} deviation {:.2}",
                self.latest.pitch, deviation
            );
        }
    }

    /// Session started: clear any old baseline and take a new one from the
    /// current pitch, or from the next sample that carries one.
    pub fn arm_baseline(&mut self) {
        self.baseline = None;
        self.armed = true;
        self.try_take_baseline();
    }

    /// Session ended: forget the baseline and stop arming.
    pub fn clear_baseline(&mut self) {
        self.baseline = None;
        self.armed = false;
    }

    fn try_take_baseline(&mut self) {
        if !self.armed || self.baseline.is_some() {
            return;
        }
        if let Some(pitch) = self.latest.pitch {
            info!("[orientation] baseline pitch {:.2}°", pitch);
            self.baseline = Some(pitch);
            self.armed = false;
        }
    }

    pub fn latest(&self) -> OrientationSample {
        self.latest
    }

    pub fn baseline(&self) -> Option<f64> {
        self.baseline
    }

    pub fn tolerance_deg(&self) -> f64 {
        self.tolerance_deg
    }

    /// `|pitch - baseline|`, known only when both are known
    pub fn deviation(&self) -> Option<f64> {
        match (self.latest.pitch, self.baseline) {
            (Some(pitch), Some(baseline)) => Some((pitch - baseline).abs()),
            _ => None,
        }
    }

    pub fn angle_warning(&self) -> bool {
        self.deviation()
            .map(|deviation| deviation > self.tolerance_deg)
            .unwrap_or(false)
    }

    pub fn state(&self) -> OrientationState {
        OrientationState {
            heading: self.latest.heading,
            pitch: self.latest.pitch,
            baseline: self.baseline,
            deviation: self.deviation(),
            angle_warning: self.angle_warning(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pitch(p: f64) -> OrientationSample {
        OrientationSample::new(Some(90.0), Some(p))
    }

    #[test]
    fn test_no_baseline_before_start() {
        let mut tracker = OrientationTracker::default();
        tracker.update(pitch(30.0));
        tracker.update(pitch(80.0));
        assert_eq!(tracker.baseline(), None);
        assert!(!tracker.angle_warning());
        assert_eq!(tracker.deviation(), None);
    }

    #[test]
    fn test_arm_with_existing_sample_takes_it_immediately() {
        let mut tracker = OrientationTracker::default();
        tracker.update(pitch(12.0));
        tracker.arm_baseline();
        assert_eq!(tracker.baseline(), Some(12.0));
    }

    #[test]
    fn test_arm_without_sample_waits_for_first_pitch() {
        let mut tracker = OrientationTracker::default();
        tracker.arm_baseline();
        assert_eq!(tracker.baseline(), None);

        tracker.update(OrientationSample::new(Some(10.0), None));
        assert_eq!(tracker.baseline(), None);

        tracker.update(pitch(20.0));
        assert_eq!(tracker.baseline(), Some(20.0));
    }

    #[test]
    fn test_baseline_set_once() {
        let mut tracker = OrientationTracker::default();
        tracker.arm_baseline();
        tracker.update(pitch(20.0));
        tracker.update(pitch(23.0));
        tracker.update(pitch(40.0));
        assert_eq!(tracker.baseline(), Some(20.0));
    }

    #[test]
    fn test_warning_threshold_is_strict() {
        let mut tracker = OrientationTracker::default();
        tracker.update(pitch(10.0));
        tracker.arm_baseline();

        tracker.update(pitch(15.0));
        assert!(!tracker.angle_warning());

        tracker.update(pitch(15.01));
        assert!(tracker.angle_warning());

        tracker.update(pitch(4.0));
        assert!(tracker.angle_warning());

        tracker.update(pitch(6.0));
        assert!(!tracker.angle_warning());
    }

    #[test]
    fn test_unknown_pitch_clears_deviation() {
        let mut tracker = OrientationTracker::default();
        tracker.update(pitch(10.0));
        tracker.arm_baseline();
        tracker.update(pitch(30.0));
        assert!(tracker.angle_warning());

        tracker.update(OrientationSample::new(None, None));
        assert_eq!(tracker.deviation(), None);
        assert!(!tracker.angle_warning());
        assert_eq!(tracker.baseline(), Some(10.0));
    }

    #[test]
    fn test_rearm_replaces_baseline() {
        let mut tracker = OrientationTracker::default();
        tracker.update(pitch(10.0));
        tracker.arm_baseline();
        tracker.clear_baseline();
        assert_eq!(tracker.baseline(), None);

        tracker.update(pitch(50.0));
        assert_eq!(tracker.baseline(), None);

        tracker.arm_baseline();
        assert_eq!(tracker.baseline(), Some(50.0));
    }

    #[test]
    fn test_nan_pitch_never_becomes_baseline_or_deviation() {
        let mut tracker = OrientationTracker::default();
        tracker.arm_baseline();
        tracker.update(OrientationSample {
            heading: None,
            pitch: Some(f64::NAN),
        });
        assert_eq!(tracker.baseline(), None);

        tracker.update(pitch(10.0));
        assert_eq!(tracker.baseline(), Some(10.0));
        tracker.update(OrientationSample {
            heading: None,
            pitch: Some(f64::NAN),
        });
        assert_eq!(tracker.latest().pitch, None);
        assert_eq!(tracker.deviation(), None);
    }
}
