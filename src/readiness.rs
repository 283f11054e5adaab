use log::{info, warn};
use serde::Serialize;

use crate::config::{DEFAULT_LOW_BATTERY_LEVEL, DEFAULT_MIN_FREE_STORAGE_BYTES};
use crate::types::{ReadinessState, StorageEstimate};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReadinessReport {
    pub battery_low: bool,
    pub storage_ok: bool,
    pub battery_level: Option<f64>,
    pub battery_supported: bool,
    pub free_storage_bytes: Option<u64>,
    pub storage_supported: bool,
}

/// Battery and storage gates checked when a session starts.
///
/// Both capabilities fail open: an unsupported battery reads as not low and an
/// unsupported storage estimate reads as ok.
#[derive(Debug)]
pub struct ReadinessMonitor {
    low_battery_level: f64,
    min_free_storage_bytes: u64,
    battery_level: Option<f64>,
    battery_supported: bool,
    storage: Option<StorageEstimate>,
    storage_supported: bool,
}

impl Default for ReadinessMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_LOW_BATTERY_LEVEL, DEFAULT_MIN_FREE_STORAGE_BYTES)
    }
}

impl ReadinessMonitor {
    pub fn new(low_battery_level: f64, min_free_storage_bytes: u64) -> Self {
        Self {
            low_battery_level,
            min_free_storage_bytes,
            battery_level: None,
            battery_supported: true,
            storage: None,
            storage_supported: true,
        }
    }

    /// Battery level in 0.0..=1.0, from the subscription read or a change event
    pub fn update_battery(&mut self, level: f64) {
        let level = level.clamp(0.0, 1.0);
        let was_low = self.battery_low();
        self.battery_supported = true;
        self.battery_level = Some(level);
        if self.battery_low() && !was_low {
            warn!("[readiness] battery low ({:.0}%)", level * 100.0);
        }
    }

    pub fn mark_battery_unsupported(&mut self) {
        info!("[readiness] battery status unsupported, assuming ready");
        self.battery_supported = false;
        self.battery_level = None;
    }

    /// Result of one storage-estimate query
    pub fn update_storage(&mut self, estimate: StorageEstimate) {
        self.storage_supported = true;
        self.storage = Some(estimate);
        if !self.storage_ok() {
            warn!(
                "[readiness] only {} MiB free",
                estimate.free_bytes() / (1024 * 1024)
            );
        }
    }

    pub fn mark_storage_unsupported(&mut self) {
        info!("[readiness] storage estimate unsupported, assuming ready");
        self.storage_supported = false;
        self.storage = None;
    }

    pub fn battery_low(&self) -> bool {
        self.battery_level
            .map(|level| level <= self.low_battery_level)
            .unwrap_or(false)
    }

    pub fn storage_ok(&self) -> bool {
        self.storage
            .map(|estimate| estimate.free_bytes() > self.min_free_storage_bytes)
            .unwrap_or(true)
    }

    pub fn battery_level(&self) -> Option<f64> {
        self.battery_level
    }

    pub fn state(&self) -> ReadinessState {
        ReadinessState {
            battery_low: self.battery_low(),
            storage_ok: self.storage_ok(),
        }
    }

    pub fn report(&self) -> ReadinessReport {
        ReadinessReport {
            battery_low: self.battery_low(),
            storage_ok: self.storage_ok(),
            battery_level: self.battery_level,
            battery_supported: self.battery_supported,
            free_storage_bytes: self.storage.map(|s| s.free_bytes()),
            storage_supported: self.storage_supported,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_ready_before_any_reading() {
        let monitor = ReadinessMonitor::default();
        assert_eq!(
            monitor.state(),
            ReadinessState {
                battery_low: false,
                storage_ok: true
            }
        );
    }

    #[test]
    fn test_battery_threshold_inclusive() {
        let mut monitor = ReadinessMonitor::default();
        monitor.update_battery(0.16);
        assert!(!monitor.battery_low());
        monitor.update_battery(0.15);
        assert!(monitor.battery_low());
        monitor.update_battery(0.05);
        assert!(monitor.battery_low());
        monitor.update_battery(0.80);
        assert!(!monitor.battery_low());
    }

    #[test]
    fn test_battery_unsupported_fails_open() {
        let mut monitor = ReadinessMonitor::default();
        monitor.update_battery(0.05);
        monitor.mark_battery_unsupported();
        assert!(!monitor.battery_low());
        assert!(!monitor.report().battery_supported);
    }

    #[test]
    fn test_storage_threshold_exclusive() {
        let mut monitor = ReadinessMonitor::default();
        monitor.update_storage(StorageEstimate {
            quota_bytes: 1000 * MIB,
            usage_bytes: 900 * MIB,
        });
        assert!(!monitor.storage_ok());

        monitor.update_storage(StorageEstimate {
            quota_bytes: 1000 * MIB,
            usage_bytes: 900 * MIB - 1,
        });
        assert!(monitor.storage_ok());
    }

    #[test]
    fn test_storage_unsupported_fails_open() {
        let mut monitor = ReadinessMonitor::default();
        monitor.update_storage(StorageEstimate {
            quota_bytes: 10 * MIB,
            usage_bytes: 10 * MIB,
        });
        assert!(!monitor.storage_ok());

        monitor.mark_storage_unsupported();
        assert!(monitor.storage_ok());
        assert_eq!(monitor.report().free_storage_bytes, None);
    }
}
