use chrono::{DateTime, Local};
use serde::Serialize;

/// Most-recent outcome per background loop. No history is retained
/// beyond "last"; the engine's log ring narrates older events.
#[derive(Debug, Clone, Default)]
pub struct CaptureStatus {
    pub last_capture_timestamp: Option<DateTime<Local>>,
    pub last_capture_error: Option<String>,
    pub last_live_view_error: Option<String>,
    pub last_encode_error: Option<String>,
}

/// Point-in-time snapshot handed to the reporting surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub last_capture_timestamp: Option<DateTime<Local>>,
    pub last_capture_error: Option<String>,
    pub last_live_view_error: Option<String>,
    pub last_encode_error: Option<String>,
    pub collected_images: usize,
    pub session_image_count: usize,
    pub capture_interval_seconds: u64,
    pub capture_interval_minutes: u64,
    pub rotation_degrees: u32,
    pub black_detection_percentage: f64,
}

/// Outcome of a synchronous operator action. Trigger operations report
/// through this value instead of an error so the exposing layer can
/// render a notice without special-casing failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpOutcome {
    pub success: bool,
    pub message: String,
}

impl OpOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}
