//! Field capture controller for trench photography: fuses position,
//! orientation and device-readiness readings, gates captures on camera tilt,
//! and uploads geotagged photos to the site backend.

pub mod config;
pub mod controller;
pub mod dashboard;
pub mod error;
pub mod filename;
pub mod geo_tracker;
pub mod live_status;
pub mod media;
pub mod network;
pub mod orientation_tracker;
pub mod readiness;
pub mod sensors;
pub mod session;
pub mod types;

pub use config::{CaptureConfig, SessionResetPolicy};
pub use controller::{AutoConfirm, CaptureSessionController, CaptureTicket, OperatorPrompt, UploadOutcome};
pub use error::{CaptureError, CaptureResult, MediaError, NetworkError, SensorError};
pub use live_status::ControllerSnapshot;
pub use session::SessionStatus;
pub use types::{Coordinate, OrientationSample, PhotoRecord, StorageEstimate};
