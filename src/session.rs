use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::config::SessionResetPolicy;
use crate::error::{CaptureError, CaptureResult};

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No session yet, or the last start attempt failed
    Idle,
    /// Start accepted; waiting on the camera and the backend
    Starting,
    /// Session open, captures allowed when the gate passes
    Active,
    /// Operator ended the session; a new one may be started
    Stopped,
}

impl Default for SessionStatus {
    fn default() -> Self {
        SessionStatus::Idle
    }
}

/// Everything scoped to one capture session.
///
/// Operator-editable fields (site, date) persist across sessions. The
/// anchor and angle baseline live in the trackers; the controller resets
/// them together with `activate` according to the reset policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub status: SessionStatus,
    pub site_name: String,
    pub date: String,
    pub session_id: Option<String>,
    pub sequence_number: u32,
    pub captures_in_flight: u32,
    pub uploads_completed: u32,
    pub uploads_failed: u32,
    pub last_error: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            status: SessionStatus::Idle,
            site_name: String::new(),
            date: today(),
            session_id: None,
            sequence_number: 0,
            captures_in_flight: 0,
            uploads_completed: 0,
            uploads_failed: 0,
            last_error: None,
        }
    }
}

/// Local calendar date as `YYYY-MM-DD`
pub fn today() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

/// Accepts ISO calendar dates only (`YYYY-MM-DD`)
pub fn validate_date(date: &str) -> CaptureResult<()> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| CaptureError::InvalidParameters(format!("not an ISO date: {:?}", date)))
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        matches!(self.status, SessionStatus::Starting | SessionStatus::Active)
    }

    /// Idle/Stopped → Starting
    pub fn begin_start(&mut self) -> CaptureResult<()> {
        match self.status {
            SessionStatus::Idle | SessionStatus::Stopped => {
                self.status = SessionStatus::Starting;
                self.last_error = None;
                Ok(())
            }
            SessionStatus::Starting | SessionStatus::Active => Err(CaptureError::AlreadyRunning),
        }
    }

    /// Starting → Active with the backend-issued id
    pub fn activate(&mut self, session_id: String, policy: SessionResetPolicy) -> CaptureResult<()> {
        if self.status != SessionStatus::Starting {
            return Err(CaptureError::Internal(format!(
                "cannot activate from {:?}",
                self.status
            )));
        }
        if policy == SessionResetPolicy::Fresh {
            self.sequence_number = 0;
            self.uploads_completed = 0;
            self.uploads_failed = 0;
        }
        self.session_id = Some(session_id);
        self.status = SessionStatus::Active;
        Ok(())
    }

    /// Starting → Idle after a failed start
    pub fn abort_start(&mut self, error: &CaptureError) {
        self.status = SessionStatus::Idle;
        self.last_error = Some(error.to_string());
    }

    /// Active → Stopped
    pub fn stop(&mut self) -> CaptureResult<()> {
        match self.status {
            SessionStatus::Active => {
                self.status = SessionStatus::Stopped;
                Ok(())
            }
            _ => Err(CaptureError::NotRunning),
        }
    }

    /// Reserve the next sequence number for a capture being triggered now
    pub fn reserve_sequence(&mut self) -> u32 {
        self.sequence_number += 1;
        self.captures_in_flight += 1;
        self.sequence_number
    }

    pub fn record_upload(&mut self, succeeded: bool) {
        self.release_in_flight();
        if succeeded {
            self.uploads_completed += 1;
        } else {
            self.uploads_failed += 1;
        }
    }

    /// Capture finished without counting toward this session's upload
    /// totals: abandoned before upload, or an upload from an earlier session.
    pub fn release_in_flight(&mut self) {
        self.captures_in_flight = self.captures_in_flight.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let mut state = SessionState::new();
        assert_eq!(state.status, SessionStatus::Idle);

        state.begin_start().unwrap();
        assert_eq!(state.status, SessionStatus::Starting);
        assert!(matches!(state.begin_start(), Err(CaptureError::AlreadyRunning)));

        state
            .activate("s-1".to_string(), SessionResetPolicy::Fresh)
            .unwrap();
        assert_eq!(state.status, SessionStatus::Active);
        assert_eq!(state.session_id.as_deref(), Some("s-1"));
        assert!(matches!(state.begin_start(), Err(CaptureError::AlreadyRunning)));

        state.stop().unwrap();
        assert_eq!(state.status, SessionStatus::Stopped);
        assert!(matches!(state.stop(), Err(CaptureError::NotRunning)));

        // Stopped sessions may start again
        state.begin_start().unwrap();
        assert_eq!(state.status, SessionStatus::Starting);
    }

    #[test]
    fn test_abort_start_returns_to_idle() {
        let mut state = SessionState::new();
        state.begin_start().unwrap();
        state.abort_start(&CaptureError::InsufficientStorage);
        assert_eq!(state.status, SessionStatus::Idle);
        assert!(state.last_error.as_deref().unwrap().contains("storage"));
    }

    #[test]
    fn test_activate_requires_starting() {
        let mut state = SessionState::new();
        assert!(state
            .activate("x".to_string(), SessionResetPolicy::Fresh)
            .is_err());
    }

    #[test]
    fn test_sequence_reserved_per_trigger() {
        let mut state = SessionState::new();
        assert_eq!(state.reserve_sequence(), 1);
        assert_eq!(state.reserve_sequence(), 2);
        assert_eq!(state.captures_in_flight, 2);

        state.record_upload(false);
        state.record_upload(true);
        assert_eq!(state.sequence_number, 2);
        assert_eq!(state.captures_in_flight, 0);
        assert_eq!(state.uploads_failed, 1);
        assert_eq!(state.uploads_completed, 1);
    }

    #[test]
    fn test_reset_policy_on_activate() {
        let mut state = SessionState::new();
        state.begin_start().unwrap();
        state.activate("a".to_string(), SessionResetPolicy::Fresh).unwrap();
        state.reserve_sequence();
        state.reserve_sequence();
        state.stop().unwrap();

        let mut carried = state.clone();
        carried.begin_start().unwrap();
        carried
            .activate("b".to_string(), SessionResetPolicy::CarryOver)
            .unwrap();
        assert_eq!(carried.sequence_number, 2);

        state.begin_start().unwrap();
        state.activate("c".to_string(), SessionResetPolicy::Fresh).unwrap();
        assert_eq!(state.sequence_number, 0);
    }

    #[test]
    fn test_validate_date() {
        assert!(validate_date("2024-05-01").is_ok());
        assert!(validate_date("2024-02-30").is_err());
        assert!(validate_date("01/05/2024").is_err());
        assert!(validate_date(&today()).is_ok());
    }
}
