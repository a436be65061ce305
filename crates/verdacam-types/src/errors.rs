use thiserror::Error;

pub type Result<T, E = VerdacamError> = std::result::Result<T, E>;

/// Unified error type covering common failure scenarios across subsystems.
#[derive(Debug, Error)]
pub enum VerdacamError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("camera error: {0}")]
    Camera(String),
    #[error("media tool error: {0}")]
    Media(String),
    #[error("storage error: {0}")]
    Store(String),
    #[error("engine error: {0}")]
    Engine(String),
    #[error("updater error: {0}")]
    Updater(String),
    #[error("invalid filename: {0}")]
    InvalidName(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
