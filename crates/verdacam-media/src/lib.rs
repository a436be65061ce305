//! External-tool layer: camera and media-encoder collaborators.
//!
//! The engine depends only on the two traits below; real processes
//! (`termux-camera-photo`, `ffmpeg`, `ffprobe`) and the in-process
//! simulator are interchangeable behind them.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use verdacam_types::{Result, VerdacamError};

mod camera;
mod ffmpeg;
mod simulator;

pub use camera::TermuxCamera;
pub use ffmpeg::FfmpegToolkit;
pub use simulator::CameraSimulator;

/// Exclusive driver of the single physical camera.
#[async_trait]
pub trait CameraController: Send + Sync {
    /// Writes one image to `output`. The caller provides exclusion;
    /// implementations never serialize concurrent captures themselves.
    async fn capture_photo(&self, output: &Path) -> Result<()>;
}

/// Frame post-processing and video encoding collaborator.
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    /// Rotates the image 90° counter-clockwise in place.
    async fn rotate_left(&self, image: &Path) -> Result<()>;

    /// Rescales and letterboxes the image to 1920x1080 in place.
    async fn normalize_full_hd(&self, image: &Path) -> Result<()>;

    /// Fraction of the frame classified as near-black. `Ok(None)` means
    /// analysis failed and the frame must be treated as not discardable.
    async fn estimate_black_ratio(&self, image: &Path) -> Result<Option<f64>>;

    /// Video encoder identifiers the toolchain reports as usable.
    async fn list_encoders(&self) -> Result<HashSet<String>>;

    /// Encodes every frame matching `frame_glob` into `output`. Must
    /// fail when the produced artifact is implausibly small, even if
    /// the underlying tool exited successfully.
    async fn encode_timelapse(
        &self,
        frame_glob: &Path,
        output: &Path,
        fps: u32,
        codec: &str,
    ) -> Result<()>;

    /// Losslessly concatenates `videos` (already in chronological
    /// order) into `output`.
    async fn merge_videos(&self, videos: &[PathBuf], output: &Path) -> Result<()>;
}

/// Generate an error aligned with camera semantics.
pub fn camera_error(message: impl Into<String>) -> VerdacamError {
    VerdacamError::Camera(message.into())
}

/// Generate an error aligned with media-tool semantics.
pub fn media_error(message: impl Into<String>) -> VerdacamError {
    VerdacamError::Media(message.into())
}
