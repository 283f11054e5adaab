use thiserror::Error;

/// Errors raised by sensor sources
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SensorError {
    #[error("Sensor unsupported: {0}")]
    Unsupported(String),

    #[error("Sensor permission denied: {0}")]
    PermissionDenied(String),

    #[error("Sensor already running: {0}")]
    AlreadyRunning(String),
}

/// Errors raised by the camera and the frame encoder
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MediaError {
    #[error("Camera unavailable: {0}")]
    Unavailable(String),

    #[error("Camera permission denied")]
    PermissionDenied,

    #[error("Frame grab failed: {0}")]
    FrameGrab(String),

    #[error("Zoom not supported by device")]
    ZoomUnsupported,

    #[error("Encoding failed: {0}")]
    Encoding(String),
}

/// Errors raised by the backend client
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NetworkError {
    #[error("Network timeout")]
    Timeout,

    #[error("HTTP error: {0}")]
    Http(u16),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Request failed: {0}")]
    Request(String),
}

/// Capture controller error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    #[error("Session already running")]
    AlreadyRunning,

    #[error("Session not running")]
    NotRunning,

    #[error("Insufficient free storage to start a session")]
    InsufficientStorage,

    #[error("Battery low and operator declined to continue")]
    LowBatteryDeclined,

    #[error("Device tilted {deviation:.1}° from baseline (tolerance {tolerance:.1}°)")]
    TiltOutOfTolerance { deviation: f64, tolerance: f64 },

    #[error("Angle baseline not established yet")]
    BaselineUnset,

    #[error("Device pitch unknown")]
    PitchUnknown,

    #[error("Position unavailable")]
    PositionUnavailable,

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error(transparent)]
    Sensor(#[from] SensorError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for controller operations
pub type CaptureResult<T> = Result<T, CaptureError>;

impl CaptureError {
    /// Whether the error came from a gate the operator can satisfy by waiting
    /// (steadying the device, waiting for a fix) rather than a hard failure.
    pub fn is_gate_refusal(&self) -> bool {
        matches!(
            self,
            CaptureError::TiltOutOfTolerance { .. }
                | CaptureError::BaselineUnset
                | CaptureError::PitchUnknown
                | CaptureError::PositionUnavailable
        )
    }
}
