use std::{fs, io, path::Path, path::PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use verdacam_types::Result;

use crate::{camera_error, CameraController};

const DEFAULT_CAMERA_BINARY: &str = "termux-camera-photo";

/// Camera driven through the Termux camera utility.
pub struct TermuxCamera {
    binary: PathBuf,
}

impl TermuxCamera {
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_CAMERA_BINARY),
        }
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for TermuxCamera {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CameraController for TermuxCamera {
    async fn capture_photo(&self, output: &Path) -> Result<()> {
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| camera_error(format!("failed to create {:?}: {err}", parent)))?;
        }

        let result = Command::new(&self.binary).arg(output).output().await;
        let tool_output = match result {
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(camera_error(format!(
                    "{} not found",
                    self.binary.display()
                )));
            }
            Err(err) => {
                return Err(camera_error(format!(
                    "failed to run {}: {err}",
                    self.binary.display()
                )));
            }
            Ok(tool_output) => tool_output,
        };

        if tool_output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&tool_output.stderr)
                .trim()
                .to_string();
            Err(camera_error(if stderr.is_empty() {
                "capture failed".to_string()
            } else {
                stderr
            }))
        }
    }
}
