use std::{
    collections::{HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;
use image::{imageops, GrayImage, Luma};
use tracing::info;
use verdacam_types::Result;

use crate::{camera_error, media_error, CameraController, MediaToolkit};

const SIM_FRAME_EDGE: u32 = 64;

/// In-process stand-in for both the camera and the media toolchain,
/// used by tests and `--simulate` runs on hosts without a camera.
///
/// Captured frames are real JPEGs whose top rows are painted black in
/// proportion to the configured ratio; the black-ratio estimate itself
/// is answered from a per-file record so tests get exact values back.
pub struct CameraSimulator {
    state: Mutex<SimulatorState>,
}

#[derive(Debug, Default)]
struct SimulatorState {
    black_ratio: f64,
    fail_next_capture: bool,
    ratios_by_file: HashMap<PathBuf, f64>,
}

impl CameraSimulator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimulatorState::default()),
        }
    }

    /// Adjusts simulated behavior; `None` leaves a knob untouched.
    pub fn configure(&self, black_ratio: Option<f64>, fail_next_capture: Option<bool>) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(ratio) = black_ratio {
                state.black_ratio = ratio.clamp(0.0, 1.0);
            }
            if let Some(fail) = fail_next_capture {
                state.fail_next_capture = fail;
            }
        }
    }

    pub fn black_ratio(&self) -> f64 {
        self.state.lock().map(|state| state.black_ratio).unwrap_or(0.0)
    }
}

impl Default for CameraSimulator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CameraController for CameraSimulator {
    async fn capture_photo(&self, output: &Path) -> Result<()> {
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| camera_error(format!("failed to create {:?}: {err}", parent)))?;
        }
        let ratio = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| camera_error("simulator state poisoned"))?;
            if state.fail_next_capture {
                state.fail_next_capture = false;
                return Err(camera_error("simulated capture failure"));
            }
            state.black_ratio
        };

        let dark_rows = (ratio * f64::from(SIM_FRAME_EDGE)).round() as u32;
        let frame = GrayImage::from_fn(SIM_FRAME_EDGE, SIM_FRAME_EDGE, |_, y| {
            if y < dark_rows {
                Luma([10u8])
            } else {
                Luma([235u8])
            }
        });
        frame
            .save(output)
            .map_err(|err| camera_error(format!("failed to write simulated frame: {err}")))?;

        if let Ok(mut state) = self.state.lock() {
            state.ratios_by_file.insert(output.to_path_buf(), ratio);
        }
        info!("simulated capture to {:?} (black ratio {ratio:.2})", output);
        Ok(())
    }
}

#[async_trait]
impl MediaToolkit for CameraSimulator {
    async fn rotate_left(&self, image: &Path) -> Result<()> {
        let decoded = image::open(image)
            .map_err(|err| media_error(format!("failed to decode {:?}: {err}", image)))?;
        imageops::rotate270(&decoded.to_luma8())
            .save(image)
            .map_err(|err| media_error(format!("failed to rotate {:?}: {err}", image)))
    }

    async fn normalize_full_hd(&self, image: &Path) -> Result<()> {
        // Scaled-down stand-in for the 1920x1080 letterbox.
        let decoded = image::open(image)
            .map_err(|err| media_error(format!("failed to decode {:?}: {err}", image)))?;
        imageops::resize(
            &decoded.to_luma8(),
            192,
            108,
            imageops::FilterType::Triangle,
        )
        .save(image)
        .map_err(|err| media_error(format!("failed to normalize {:?}: {err}", image)))
    }

    async fn estimate_black_ratio(&self, image: &Path) -> Result<Option<f64>> {
        let state = self
            .state
            .lock()
            .map_err(|_| media_error("simulator state poisoned"))?;
        Ok(state.ratios_by_file.get(image).copied())
    }

    async fn list_encoders(&self) -> Result<HashSet<String>> {
        Ok(["libx264", "mpeg4"].map(String::from).into())
    }

    async fn encode_timelapse(
        &self,
        frame_glob: &Path,
        output: &Path,
        fps: u32,
        codec: &str,
    ) -> Result<()> {
        let frames = matching_frames(frame_glob)?;
        if frames.is_empty() {
            return Err(media_error("no frames matched the input pattern"));
        }
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| media_error(format!("failed to create {:?}: {err}", parent)))?;
        }
        let mut payload = format!("SIMMP4 fps={fps} codec={codec} frames={}\n", frames.len())
            .into_bytes();
        for frame in &frames {
            let bytes = fs::read(frame)
                .map_err(|err| media_error(format!("failed to read {:?}: {err}", frame)))?;
            payload.extend_from_slice(&bytes);
        }
        fs::write(output, payload)
            .map_err(|err| media_error(format!("failed to write {:?}: {err}", output)))
    }

    async fn merge_videos(&self, videos: &[PathBuf], output: &Path) -> Result<()> {
        if videos.is_empty() {
            return Err(media_error("no videos provided for merge"));
        }
        let mut payload = Vec::new();
        for video in videos {
            let bytes = fs::read(video)
                .map_err(|err| media_error(format!("failed to read {:?}: {err}", video)))?;
            payload.extend_from_slice(&bytes);
        }
        fs::write(output, payload)
            .map_err(|err| media_error(format!("failed to write {:?}: {err}", output)))
    }
}

fn matching_frames(frame_glob: &Path) -> Result<Vec<PathBuf>> {
    let parent = frame_glob
        .parent()
        .ok_or_else(|| media_error("frame pattern has no parent directory"))?;
    let pattern = frame_glob
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| media_error("frame pattern has no file name"))?;
    let (prefix, suffix) = pattern.split_once('*').unwrap_or((pattern, ""));

    let mut frames = Vec::new();
    let entries = fs::read_dir(parent)
        .map_err(|err| media_error(format!("failed to read {:?}: {err}", parent)))?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with(prefix) && name.ends_with(suffix) {
            frames.push(entry.path());
        }
    }
    frames.sort();
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn capture_writes_a_decodable_jpeg_and_records_its_ratio() {
        let dir = tempfile::tempdir().expect("tempdir");
        let frame = dir.path().join("image_000.jpg");
        let simulator = CameraSimulator::new();
        simulator.configure(Some(0.75), None);
        simulator.capture_photo(&frame).await.expect("capture");

        let decoded = image::open(&frame).expect("decode simulated frame");
        assert_eq!(decoded.to_luma8().dimensions(), (SIM_FRAME_EDGE, SIM_FRAME_EDGE));
        let ratio = simulator
            .estimate_black_ratio(&frame)
            .await
            .expect("estimate")
            .expect("known file");
        assert!((ratio - 0.75).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn unknown_files_report_an_unknown_ratio() {
        let simulator = CameraSimulator::new();
        let unknown = simulator
            .estimate_black_ratio(Path::new("/nowhere/frame.jpg"))
            .await
            .expect("estimate");
        assert!(unknown.is_none());
    }

    #[tokio::test]
    async fn fail_next_capture_fails_exactly_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let frame = dir.path().join("image_000.jpg");
        let simulator = CameraSimulator::new();
        simulator.configure(None, Some(true));
        let first = simulator.capture_photo(&frame).await;
        assert!(first.is_err());
        simulator.capture_photo(&frame).await.expect("second capture");
    }

    #[tokio::test]
    async fn post_processing_keeps_the_frame_decodable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let frame = dir.path().join("image_000.jpg");
        let simulator = CameraSimulator::new();
        simulator.capture_photo(&frame).await.expect("capture");
        simulator.rotate_left(&frame).await.expect("rotate");
        simulator.normalize_full_hd(&frame).await.expect("normalize");
        let decoded = image::open(&frame).expect("decode");
        assert_eq!(decoded.to_luma8().dimensions(), (192, 108));
    }

    #[tokio::test]
    async fn encode_refuses_an_empty_frame_set() {
        let dir = tempfile::tempdir().expect("tempdir");
        let simulator = CameraSimulator::new();
        let outcome = simulator
            .encode_timelapse(
                &dir.path().join("image_*.jpg"),
                &dir.path().join("out.mp4"),
                24,
                "libx264",
            )
            .await;
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn merge_concatenates_inputs_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = dir.path().join("a.mp4");
        let b = dir.path().join("b.mp4");
        fs::write(&a, b"first").expect("write fixture");
        fs::write(&b, b"second").expect("write fixture");
        let output = dir.path().join("merged.mp4");
        let simulator = CameraSimulator::new();
        simulator
            .merge_videos(&[a, b], &output)
            .await
            .expect("merge");
        assert_eq!(fs::read(&output).expect("read merged"), b"firstsecond");
    }
}
