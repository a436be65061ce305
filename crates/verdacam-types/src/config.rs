use std::{fs, path::Path, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Result, VerdacamError};

/// Startup configuration loaded from a TOML file (or internal defaults).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub media: MediaConfig,
    pub capture: CaptureConfig,
    pub update: UpdateConfig,
    pub ops: OpsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub interval_seconds: u64,
    pub live_view_interval_seconds: u64,
    pub session_image_count: usize,
    pub fps: u32,
    pub codec: String,
    pub rotation_degrees: u32,
    pub black_detection_percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    pub remote: String,
    pub branch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpsConfig {
    pub log_level: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("/sdcard/DCIM/Verdacam"),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 15 * 60,
            live_view_interval_seconds: 5,
            session_image_count: 48,
            fps: 24,
            codec: "libx264".into(),
            rotation_degrees: 90,
            black_detection_percentage: 90.0,
        }
    }
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            remote: "origin".into(),
            branch: "main".into(),
        }
    }
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            media: MediaConfig::default(),
            capture: CaptureConfig::default(),
            update: UpdateConfig::default(),
            ops: OpsConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref).map_err(|err| {
            VerdacamError::Configuration(format!(
                "unable to read config file {}: {err}",
                path_ref.display()
            ))
        })?;
        toml::from_str(&contents).map_err(|err| {
            VerdacamError::Configuration(format!(
                "failed to parse config file {}: {err}",
                path_ref.display()
            ))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.capture.fps == 0 {
            return Err(VerdacamError::Configuration(
                "capture.fps must be greater than zero".into(),
            ));
        }
        if self.capture.codec.is_empty() {
            return Err(VerdacamError::Configuration(
                "capture.codec must not be empty".into(),
            ));
        }
        if self.capture.live_view_interval_seconds == 0 {
            return Err(VerdacamError::Configuration(
                "capture.live_view_interval_seconds must be greater than zero".into(),
            ));
        }
        self.runtime_defaults().normalized()?;
        Ok(())
    }

    /// The live-mutable subset seeded from the startup configuration.
    pub fn runtime_defaults(&self) -> RuntimeConfig {
        RuntimeConfig {
            capture_interval_seconds: self.capture.interval_seconds,
            rotation_degrees: self.capture.rotation_degrees,
            session_image_count: self.capture.session_image_count,
            black_detection_percentage: self.capture.black_detection_percentage,
        }
    }
}

/// Live-mutable settings, persisted in full as a flat JSON record on
/// every successful update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub capture_interval_seconds: u64,
    pub rotation_degrees: u32,
    pub session_image_count: usize,
    pub black_detection_percentage: f64,
}

impl RuntimeConfig {
    /// Range-checks every field; updates are rejected wholesale so a
    /// bad value never partially applies. Interval and session count
    /// are coerced up to 1 rather than rejected.
    pub fn normalized(self) -> Result<Self> {
        if !matches!(self.rotation_degrees, 0 | 90 | 180 | 270) {
            return Err(VerdacamError::Configuration(
                "Rotation must be one of: 0, 90, 180, 270.".into(),
            ));
        }
        if !(0.0..=100.0).contains(&self.black_detection_percentage) {
            return Err(VerdacamError::Configuration(
                "Black detection percentage must be between 0 and 100.".into(),
            ));
        }
        Ok(Self {
            capture_interval_seconds: self.capture_interval_seconds.max(1),
            session_image_count: self.session_image_count.max(1),
            ..self
        })
    }

    pub fn capture_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.capture_interval_seconds as i64)
    }

    /// Discard threshold as a ratio in `[0, 1]`.
    pub fn black_detection_threshold(&self) -> f64 {
        self.black_detection_percentage / 100.0
    }

    /// Rotation expressed as 90°-left applications.
    pub fn quarter_turns(&self) -> u32 {
        self.rotation_degrees / 90
    }

    /// Overlays a persisted record field-by-field; fields absent from
    /// the record keep their current value.
    pub fn merged(self, patch: RuntimeConfigPatch) -> Self {
        Self {
            capture_interval_seconds: patch
                .capture_interval_seconds
                .unwrap_or(self.capture_interval_seconds),
            rotation_degrees: patch.rotation_degrees.unwrap_or(self.rotation_degrees),
            session_image_count: patch
                .session_image_count
                .unwrap_or(self.session_image_count),
            black_detection_percentage: patch
                .black_detection_percentage
                .unwrap_or(self.black_detection_percentage),
        }
    }
}

/// Partial persisted record; older config files may lack fields.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct RuntimeConfigPatch {
    pub capture_interval_seconds: Option<u64>,
    pub rotation_degrees: Option<u32>,
    pub session_image_count: Option<usize>,
    pub black_detection_percentage: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> RuntimeConfig {
        RuntimeConfig {
            capture_interval_seconds: 900,
            rotation_degrees: 90,
            session_image_count: 48,
            black_detection_percentage: 90.0,
        }
    }

    #[test]
    fn normalization_accepts_every_quarter_turn_rotation() {
        for degrees in [0, 90, 180, 270] {
            let config = RuntimeConfig {
                rotation_degrees: degrees,
                ..runtime()
            };
            assert!(config.normalized().is_ok(), "rotation {degrees} rejected");
        }
    }

    #[test]
    fn normalization_rejects_other_rotations_and_bad_percentages() {
        for degrees in [1, 45, 91, 360] {
            let config = RuntimeConfig {
                rotation_degrees: degrees,
                ..runtime()
            };
            assert!(config.normalized().is_err(), "rotation {degrees} accepted");
        }
        for pct in [-0.1, 100.1, f64::NAN] {
            let config = RuntimeConfig {
                black_detection_percentage: pct,
                ..runtime()
            };
            assert!(config.normalized().is_err(), "percentage {pct} accepted");
        }
    }

    #[test]
    fn normalization_coerces_interval_and_count_to_at_least_one() {
        let config = RuntimeConfig {
            capture_interval_seconds: 0,
            session_image_count: 0,
            ..runtime()
        }
        .normalized()
        .expect("coercible config");
        assert_eq!(config.capture_interval_seconds, 1);
        assert_eq!(config.session_image_count, 1);
    }

    #[test]
    fn patch_merge_keeps_current_values_for_missing_fields() {
        let patch: RuntimeConfigPatch =
            serde_json::from_str(r#"{"rotation_degrees": 180}"#).expect("parse patch");
        let merged = runtime().merged(patch);
        assert_eq!(merged.rotation_degrees, 180);
        assert_eq!(merged.capture_interval_seconds, 900);
        assert_eq!(merged.session_image_count, 48);
    }

    #[test]
    fn runtime_config_round_trips_through_json() {
        let original = runtime();
        let encoded = serde_json::to_string_pretty(&original).expect("serialize");
        let decoded: RuntimeConfig = serde_json::from_str(&encoded).expect("deserialize");
        assert_eq!(decoded, original);
    }

    #[test]
    fn app_config_loads_from_partial_toml() {
        let doc = r#"
            [capture]
            interval_seconds = 60
            session_image_count = 3
        "#;
        let config: AppConfig = toml::from_str(doc).expect("parse config");
        assert_eq!(config.capture.interval_seconds, 60);
        assert_eq!(config.capture.session_image_count, 3);
        assert_eq!(config.capture.codec, "libx264");
        assert_eq!(config.update.remote, "origin");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn app_config_validation_rules() {
        let mut config = AppConfig::default();
        assert!(config.validate().is_ok());
        config.capture.fps = 0;
        assert!(config.validate().is_err());
        config.capture.fps = 24;
        config.capture.rotation_degrees = 45;
        assert!(config.validate().is_err());
        config.capture.rotation_degrees = 0;
        config.capture.black_detection_percentage = 101.0;
        assert!(config.validate().is_err());
    }
}
