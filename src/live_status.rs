use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::geo_tracker::GeoState;
use crate::media::ZoomMode;
use crate::orientation_tracker::OrientationState;
use crate::readiness::ReadinessReport;
use crate::session::SessionStatus;

/// Read-only view of the controller for whatever renders it
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ControllerSnapshot {
    pub timestamp: String,
    pub status: SessionStatus,
    pub site_name: String,
    pub date: String,
    pub session_id: Option<String>,
    pub sequence_number: u32,
    pub captures_in_flight: u32,
    pub uploads_completed: u32,
    pub uploads_failed: u32,
    pub last_error: Option<String>,
    pub position: GeoState,
    pub orientation: OrientationState,
    pub readiness: ReadinessReport,
    pub zoom_mode: ZoomMode,
    /// Gate result for a capture triggered right now
    pub can_capture: bool,
}

impl ControllerSnapshot {
    pub fn stamp() -> String {
        Utc::now().to_rfc3339()
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// One-line console summary
    pub fn summary(&self) -> String {
        let position = match (self.position.current, self.position.available) {
            (Some(c), true) => format!("{:.6},{:.6}", c.latitude, c.longitude),
            (_, false) => "unavailable".to_string(),
            (None, true) => "waiting".to_string(),
        };
        let pitch = self
            .orientation
            .pitch
            .map(|p| format!("{:.1}°", p))
            .unwrap_or_else(|| "?".to_string());
        format!(
            "{:?} | seq {} | pos {} | {:.1} m | pitch {}{} | up {}/{} fail {}",
            self.status,
            self.sequence_number,
            position,
            self.position.distance_m,
            pitch,
            if self.orientation.angle_warning { " TILT" } else { "" },
            self.uploads_completed,
            self.sequence_number,
            self.uploads_failed
        )
    }
}
