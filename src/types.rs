use serde::{Deserialize, Serialize};

/// A geographic position in decimal degrees (WGS84)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Latest device orientation reading.
///
/// Either angle may be `None` when the platform sensor cannot provide it;
/// `None` means unknown and must never be read as zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OrientationSample {
    /// Compass heading in degrees, [0, 360)
    pub heading: Option<f64>,
    /// Front-to-back tilt in degrees
    pub pitch: Option<f64>,
}

impl OrientationSample {
    /// Non-finite readings are unknown, same as `None`
    pub fn new(heading: Option<f64>, pitch: Option<f64>) -> Self {
        Self {
            heading: heading.filter(|h| h.is_finite()).map(normalize_heading),
            pitch: pitch.filter(|p| p.is_finite()),
        }
    }

    /// Re-apply `new` to a sample whose fields were set directly
    pub fn sanitized(self) -> Self {
        Self::new(self.heading, self.pitch)
    }
}

/// Wrap a heading into [0, 360)
pub fn normalize_heading(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Storage quota/usage estimate in bytes
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StorageEstimate {
    pub quota_bytes: u64,
    pub usage_bytes: u64,
}

impl StorageEstimate {
    pub fn free_bytes(&self) -> u64 {
        self.quota_bytes.saturating_sub(self.usage_bytes)
    }
}

/// Readiness flags used to admit a new session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessState {
    pub battery_low: bool,
    pub storage_ok: bool,
}

/// Session creation request body for `POST /api/sessions`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewSession {
    pub site_name: String,
    pub date: String,
    pub start_lat: Option<f64>,
    pub start_lng: Option<f64>,
    pub device: String,
}

/// One captured photo with its metadata, handed straight to the uploader
#[derive(Clone, Debug, PartialEq)]
pub struct PhotoRecord {
    pub session_id: String,
    pub sequence_number: u32,
    pub coordinate: Coordinate,
    pub pitch: Option<f64>,
    pub heading: Option<f64>,
    pub zoom_factor: f64,
    pub filename: String,
    pub image_bytes: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heading_normalization() {
        assert_eq!(normalize_heading(0.0), 0.0);
        assert_eq!(normalize_heading(360.0), 0.0);
        assert_eq!(normalize_heading(370.0), 10.0);
        assert_eq!(normalize_heading(-90.0), 270.0);
        assert!(normalize_heading(-1e-20) < 360.0);
    }

    #[test]
    fn test_orientation_keeps_unknown_angles() {
        let sample = OrientationSample::new(None, Some(12.5));
        assert_eq!(sample.heading, None);
        assert_eq!(sample.pitch, Some(12.5));

        let sample = OrientationSample::new(Some(-45.0), None);
        assert_eq!(sample.heading, Some(315.0));
        assert_eq!(sample.pitch, None);
    }

    #[test]
    fn test_non_finite_angles_are_unknown() {
        let sample = OrientationSample::new(Some(f64::NAN), Some(f64::INFINITY));
        assert_eq!(sample, OrientationSample::default());

        let raw = OrientationSample {
            heading: Some(400.0),
            pitch: Some(f64::NAN),
        };
        let clean = raw.sanitized();
        assert_eq!(clean.heading, Some(40.0));
        assert_eq!(clean.pitch, None);
    }

    #[test]
    fn test_storage_free_bytes_saturates() {
        let estimate = StorageEstimate {
            quota_bytes: 100,
            usage_bytes: 250,
        };
        assert_eq!(estimate.free_bytes(), 0);
    }
}
