use log::{info, warn};
use serde::Serialize;

use crate::types::Coordinate;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters between two coordinates
pub fn haversine_distance(a: Coordinate, b: Coordinate) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos() * b.latitude.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    // Rounding can push h a hair above 1 for antipodal points
    2.0 * EARTH_RADIUS_M * h.clamp(0.0, 1.0).sqrt().asin()
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GeoState {
    pub current: Option<Coordinate>,
    pub anchor: Option<Coordinate>,
    pub distance_m: f64,
    pub available: bool,
    pub unavailable_reason: Option<String>,
    pub fixes: u64,
}

/// Latest position plus distance travelled from the session anchor
#[derive(Debug, Default)]
pub struct GeoTracker {
    current: Option<Coordinate>,
    anchor: Option<Coordinate>,
    distance_m: f64,
    unavailable_reason: Option<String>,
    fixes: u64,
}

impl GeoTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a position fix. The first fix after subscription (or after an
    /// anchor reset) becomes the anchor.
    pub fn update(&mut self, coordinate: Coordinate) {
        if self.unavailable_reason.take().is_some() {
            info!("[geo] position available again");
        }

        let anchor = *self.anchor.get_or_insert_with(|| {
            info!(
                "[geo] anchor set at {:.6}, {:.6}",
                coordinate.latitude, coordinate.longitude
            );
            coordinate
        });

        self.distance_m = haversine_distance(anchor, coordinate);
        self.current = Some(coordinate);
        self.fixes += 1;
    }

    /// Position stream errored or was denied. Updates stop; the last fix is kept.
    pub fn mark_unavailable(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("[geo] position unavailable: {}", reason);
        self.unavailable_reason = Some(reason);
    }

    /// Drop the anchor so the next fix (or the current one, if known) starts
    /// a new distance baseline.
    pub fn reset_anchor(&mut self) {
        self.anchor = self.current;
        self.distance_m = 0.0;
    }

    pub fn current(&self) -> Option<Coordinate> {
        self.current
    }

    pub fn anchor(&self) -> Option<Coordinate> {
        self.anchor
    }

    pub fn distance_m(&self) -> f64 {
        self.distance_m
    }

    pub fn is_available(&self) -> bool {
        self.unavailable_reason.is_none()
    }

    pub fn state(&self) -> GeoState {
        GeoState {
            current: self.current,
            anchor: self.anchor,
            distance_m: self.distance_m,
            available: self.is_available(),
            unavailable_reason: self.unavailable_reason.clone(),
            fixes: self.fixes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_haversine_zero_and_symmetric() {
        let a = Coordinate::new(41.015137, 28.979530);
        let b = Coordinate::new(41.020000, 28.990000);
        assert_eq!(haversine_distance(a, a), 0.0);
        assert_relative_eq!(haversine_distance(a, b), haversine_distance(b, a), epsilon = 1e-9);
    }

    #[test]
    fn test_thousandth_degree_latitude() {
        let a = Coordinate::new(41.000, 29.0);
        let b = Coordinate::new(41.001, 29.0);
        let d = haversine_distance(a, b);
        assert_relative_eq!(d, 111.2, max_relative = 0.01);
    }

    #[test]
    fn test_antipodal_points() {
        let a = Coordinate::new(0.0, 0.0);
        let b = Coordinate::new(0.0, 180.0);
        assert_relative_eq!(
            haversine_distance(a, b),
            std::f64::consts::PI * EARTH_RADIUS_M,
            max_relative = 1e-9
        );
    }

    #[test]
    fn test_first_fix_becomes_anchor() {
        let mut tracker = GeoTracker::new();
        assert_eq!(tracker.anchor(), None);

        let start = Coordinate::new(41.0, 29.0);
        tracker.update(start);
        assert_eq!(tracker.anchor(), Some(start));
        assert_eq!(tracker.distance_m(), 0.0);

        let next = Coordinate::new(41.001, 29.0);
        tracker.update(next);
        assert_eq!(tracker.anchor(), Some(start));
        assert_eq!(tracker.current(), Some(next));
        assert_relative_eq!(tracker.distance_m(), 111.2, max_relative = 0.01);
    }

    #[test]
    fn test_distance_is_from_anchor_not_cumulative_path() {
        let mut tracker = GeoTracker::new();
        tracker.update(Coordinate::new(41.0, 29.0));
        tracker.update(Coordinate::new(41.001, 29.0));
        tracker.update(Coordinate::new(41.0, 29.0));
        assert_eq!(tracker.distance_m(), 0.0);
    }

    #[test]
    fn test_unavailable_keeps_last_fix() {
        let mut tracker = GeoTracker::new();
        let fix = Coordinate::new(10.0, 20.0);
        tracker.update(fix);
        tracker.mark_unavailable("permission denied");

        let state = tracker.state();
        assert!(!state.available);
        assert_eq!(state.unavailable_reason.as_deref(), Some("permission denied"));
        assert_eq!(state.current, Some(fix));

        tracker.update(Coordinate::new(10.0001, 20.0));
        assert!(tracker.is_available());
    }

    #[test]
    fn test_reset_anchor_uses_current_fix() {
        let mut tracker = GeoTracker::new();
        tracker.update(Coordinate::new(41.0, 29.0));
        tracker.update(Coordinate::new(41.002, 29.0));
        tracker.reset_anchor();
        assert_eq!(tracker.anchor(), Some(Coordinate::new(41.002, 29.0)));
        assert_eq!(tracker.distance_m(), 0.0);

        let mut empty = GeoTracker::new();
        empty.reset_anchor();
        assert_eq!(empty.anchor(), None);
    }
}
