use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Maximum pitch deviation from the baseline before capture is refused (degrees)
pub const DEFAULT_TILT_TOLERANCE_DEG: f64 = 5.0;
/// Battery level at or below which the operator must confirm a start
pub const DEFAULT_LOW_BATTERY_LEVEL: f64 = 0.15;
/// Free storage required to start a session (100 MiB)
pub const DEFAULT_MIN_FREE_STORAGE_BYTES: u64 = 100 * 1024 * 1024;

/// What happens to the anchor and photo counter when a new session starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionResetPolicy {
    /// Anchor, sequence number and angle baseline all start over
    Fresh,
    /// Anchor and sequence number survive a restart; only the baseline is re-armed
    CarryOver,
}

impl Default for SessionResetPolicy {
    fn default() -> Self {
        SessionResetPolicy::Fresh
    }
}

/// Options requested from the position stream
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionOptions {
    pub high_accuracy: bool,
    pub maximum_age_ms: u64,
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            maximum_age_ms: 1000,
        }
    }
}

impl PositionOptions {
    pub fn maximum_age(&self) -> Duration {
        Duration::from_millis(self.maximum_age_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub backend_url: String,
    /// Unset means requests may hang indefinitely
    pub request_timeout_secs: Option<u64>,
    pub tilt_tolerance_deg: f64,
    pub low_battery_level: f64,
    pub min_free_storage_bytes: u64,
    pub position: PositionOptions,
    pub jpeg_quality: u8,
    pub reset_policy: SessionResetPolicy,
    pub sensor_channel_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:8000".to_string(),
            request_timeout_secs: None,
            tilt_tolerance_deg: DEFAULT_TILT_TOLERANCE_DEG,
            low_battery_level: DEFAULT_LOW_BATTERY_LEVEL,
            min_free_storage_bytes: DEFAULT_MIN_FREE_STORAGE_BYTES,
            position: PositionOptions::default(),
            jpeg_quality: 92,
            reset_policy: SessionResetPolicy::default(),
            sensor_channel_capacity: 256,
        }
    }
}

impl CaptureConfig {
    /// Load a JSON config file; missing keys fall back to defaults
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: CaptureConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.tilt_tolerance_deg > 0.0) {
            anyhow::bail!("tilt_tolerance_deg must be positive");
        }
        if !(0.0..=1.0).contains(&self.low_battery_level) {
            anyhow::bail!("low_battery_level must be within 0.0..=1.0");
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            anyhow::bail!("jpeg_quality must be within 1..=100");
        }
        if self.sensor_channel_capacity == 0 {
            anyhow::bail!("sensor_channel_capacity must be non-zero");
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_field_thresholds() {
        let config = CaptureConfig::default();
        assert_eq!(config.tilt_tolerance_deg, 5.0);
        assert_eq!(config.low_battery_level, 0.15);
        assert_eq!(config.min_free_storage_bytes, 104_857_600);
        assert!(config.position.high_accuracy);
        assert_eq!(config.position.maximum_age(), Duration::from_millis(1000));
        assert_eq!(config.request_timeout(), None);
        assert_eq!(config.reset_policy, SessionResetPolicy::Fresh);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: CaptureConfig = serde_json::from_str(
            r#"{"backend_url": "https://field.example.org", "reset_policy": "carry_over"}"#,
        )
        .unwrap();
        assert_eq!(config.backend_url, "https://field.example.org");
        assert_eq!(config.reset_policy, SessionResetPolicy::CarryOver);
        assert_eq!(config.tilt_tolerance_deg, 5.0);
        assert_eq!(config.jpeg_quality, 92);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = CaptureConfig::default();
        config.jpeg_quality = 0;
        assert!(config.validate().is_err());

        let mut config = CaptureConfig::default();
        config.low_battery_level = 1.5;
        assert!(config.validate().is_err());

        let mut config = CaptureConfig::default();
        config.tilt_tolerance_deg = f64::NAN;
        assert!(config.validate().is_err());
    }
}
