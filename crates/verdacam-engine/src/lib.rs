//! Capture/session scheduling engine.
//!
//! Owns the three background loops (timelapse capture, live-view
//! refresh, session encoding), the camera and encode exclusion locks,
//! frame quality filtering, and the live-mutable runtime configuration.
//! Everything the dashboard layer sees goes through this engine; it
//! never touches the stores' directories directly.

use std::{
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use chrono::{DateTime, Local};
use tokio::{
    sync::{watch, Mutex as AsyncMutex},
    task::JoinHandle,
    time::{sleep, timeout},
};
use tracing::{info, warn};
use verdacam_media::{CameraController, MediaToolkit};
use verdacam_store::{ArtifactStore, FrameStore};
use verdacam_types::{
    config::{RuntimeConfig, RuntimeConfigPatch},
    status::{CaptureStatus, EngineStatus, OpOutcome},
    Result, VerdacamError,
};

const LOG_RING_CAPACITY: usize = 100;
const FALLBACK_CODEC: &str = "mpeg4";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);
const NO_IMAGES_MESSAGE: &str = "No collected images available for conversion.";

/// Generate an error aligned with engine semantics.
pub fn engine_error(message: impl Into<String>) -> VerdacamError {
    VerdacamError::Engine(message.into())
}

/// Encoder settings fixed at startup (not live-mutable).
#[derive(Debug, Clone)]
pub struct EncoderSettings {
    pub fps: u32,
    pub codec: String,
}

/// Poll cadences for the background loops. Firing precision is bounded
/// by these ticks; tests shrink them to keep scenarios fast.
#[derive(Debug, Clone)]
pub struct EngineTiming {
    pub capture_poll: Duration,
    pub session_poll: Duration,
    pub live_view_interval: Duration,
}

impl Default for EngineTiming {
    fn default() -> Self {
        Self {
            capture_poll: Duration::from_secs(1),
            session_poll: Duration::from_secs(5),
            live_view_interval: Duration::from_secs(5),
        }
    }
}

/// Everything mutated by more than one loop, behind one lock that is
/// never held across an await point.
struct EngineState {
    runtime: RuntimeConfig,
    status: CaptureStatus,
    logs: VecDeque<String>,
    next_capture_due: DateTime<Local>,
    session_start: DateTime<Local>,
}

pub struct TimelapseEngine {
    camera: Arc<dyn CameraController>,
    media: Arc<dyn MediaToolkit>,
    frames: FrameStore,
    artifacts: ArtifactStore,
    live_view_path: PathBuf,
    config_path: PathBuf,
    encoder: EncoderSettings,
    timing: EngineTiming,
    state: Mutex<EngineState>,
    /// Serializes the physical camera between the capture and
    /// live-view loops; intentionally held across the external call.
    camera_lock: AsyncMutex<()>,
    /// Serializes session encoding and artifact merging.
    encode_lock: AsyncMutex<()>,
    stop: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TimelapseEngine {
    pub fn new(
        base_media_dir: impl Into<PathBuf>,
        camera: Arc<dyn CameraController>,
        media: Arc<dyn MediaToolkit>,
        defaults: RuntimeConfig,
        encoder: EncoderSettings,
        timing: EngineTiming,
    ) -> Result<Self> {
        let base = base_media_dir.into();
        fs::create_dir_all(&base)
            .map_err(|err| engine_error(format!("failed to create {:?}: {err}", base)))?;
        let frames = FrameStore::new(base.join("images"))?;
        let artifacts = ArtifactStore::new(base.join("videos"))?;
        let runtime = defaults.normalized()?;
        let (stop, _) = watch::channel(false);
        let now = Local::now();

        let engine = Self {
            camera,
            media,
            frames,
            artifacts,
            live_view_path: base.join("live_view.jpg"),
            config_path: base.join("config.json"),
            encoder,
            timing,
            state: Mutex::new(EngineState {
                runtime,
                status: CaptureStatus::default(),
                logs: VecDeque::with_capacity(LOG_RING_CAPACITY),
                next_capture_due: now + runtime.capture_interval(),
                session_start: now,
            }),
            camera_lock: AsyncMutex::new(()),
            encode_lock: AsyncMutex::new(()),
            stop,
            tasks: Mutex::new(Vec::new()),
        };
        engine.load_runtime_config();
        Ok(engine)
    }

    /// Spawns the capture, live-view, and session loops. Idempotent
    /// while the loops are running.
    pub fn start(self: &Arc<Self>) {
        {
            let mut tasks = lock_or_recover(&self.tasks);
            if !tasks.is_empty() {
                return;
            }
            let capture = Arc::clone(self);
            tasks.push(tokio::spawn(async move { capture.capture_loop().await }));
            let live = Arc::clone(self);
            tasks.push(tokio::spawn(async move { live.live_view_loop().await }));
            let session = Arc::clone(self);
            tasks.push(tokio::spawn(async move { session.session_loop().await }));
        }
        self.log("Timelapse service started");
    }

    /// Cooperative shutdown: loops observe the stop signal on their
    /// next tick; in-flight external calls are allowed to finish.
    pub async fn stop(&self) {
        let _ = self.stop.send(true);
        let handles: Vec<JoinHandle<()>> = lock_or_recover(&self.tasks).drain(..).collect();
        for handle in handles {
            if timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                warn!("engine loop did not stop within the grace period");
            }
        }
    }

    // ---- background loops -------------------------------------------------

    async fn capture_loop(&self) {
        let mut stop = self.stop.subscribe();
        loop {
            if *stop.borrow_and_update() {
                break;
            }
            let due = self.state().next_capture_due;
            let now = Local::now();
            if now >= due {
                self.capture_frame(now).await;
                let mut state = self.state();
                state.next_capture_due = now + state.runtime.capture_interval();
            }
            if wait_or_stop(&mut stop, self.timing.capture_poll).await {
                break;
            }
        }
    }

    async fn live_view_loop(&self) {
        let mut stop = self.stop.subscribe();
        loop {
            if *stop.borrow_and_update() {
                break;
            }
            let error = self
                .take_photo(&self.live_view_path)
                .await
                .err()
                .map(|err| err.to_string());
            if let Some(message) = &error {
                warn!("live view refresh failed: {message}");
            }
            self.state().status.last_live_view_error = error;
            if wait_or_stop(&mut stop, self.timing.live_view_interval).await {
                break;
            }
        }
    }

    async fn session_loop(&self) {
        let mut stop = self.stop.subscribe();
        loop {
            if *stop.borrow_and_update() {
                break;
            }
            let threshold = self.state().runtime.session_image_count;
            if self.frames.count().unwrap_or(0) >= threshold {
                let outcome = self.encode_session().await;
                if !outcome.success {
                    self.log(format!("Session encode error: {}", outcome.message));
                }
            }
            if wait_or_stop(&mut stop, self.timing.session_poll).await {
                break;
            }
        }
    }

    // ---- capture ----------------------------------------------------------

    /// One physical capture, serialized against the other camera user.
    async fn take_photo(&self, output: &Path) -> Result<()> {
        let _camera = self.camera_lock.lock().await;
        self.camera.capture_photo(output).await
    }

    /// One full timelapse capture attempt: photo, post-processing,
    /// quality filter, status update. Never propagates; failures land
    /// in the status record so the loop keeps running.
    async fn capture_frame(&self, timestamp: DateTime<Local>) {
        let frame = self.frames.frame_path(timestamp);
        let mut error = self
            .take_photo(&frame)
            .await
            .err()
            .map(|err| err.to_string());
        let mut discarded = false;
        if error.is_none() {
            match self.post_process(&frame).await {
                Ok(kept) => discarded = !kept,
                // The raw frame stays on disk; a physically captured
                // image is not silently lost over a filter failure.
                Err(err) => error = Some(format!("post-processing failed: {err}")),
            }
        }
        {
            let mut state = self.state();
            match &error {
                Some(message) => state.status.last_capture_error = Some(message.clone()),
                None => {
                    state.status.last_capture_error = None;
                    state.status.last_capture_timestamp = Some(timestamp);
                }
            }
        }
        if let Some(message) = error {
            self.log(format!("Timelapse capture error: {message}"));
        } else if !discarded {
            self.log(format!("Captured timelapse image {}", display_name(&frame)));
        }
    }

    /// Rotation, normalization, and the black-frame filter. Returns
    /// whether the frame was kept; a discard is a filter outcome, not
    /// an error.
    async fn post_process(&self, frame: &Path) -> Result<bool> {
        let (quarter_turns, threshold) = {
            let state = self.state();
            (
                state.runtime.quarter_turns(),
                state.runtime.black_detection_threshold(),
            )
        };
        for _ in 0..quarter_turns {
            self.media.rotate_left(frame).await?;
        }
        self.media.normalize_full_hd(frame).await?;
        if let Some(black_ratio) = self.media.estimate_black_ratio(frame).await? {
            if black_ratio > threshold {
                let _ = fs::remove_file(frame);
                self.log(format!(
                    "Discarded image {} because black ratio is {:.0}% (threshold: {:.0}%)",
                    display_name(frame),
                    black_ratio * 100.0,
                    threshold * 100.0
                ));
                return Ok(false);
            }
        }
        Ok(true)
    }

    // ---- session encoding and merging -------------------------------------

    /// Falls back to a universally available codec when the configured
    /// one is missing from the encoder's list.
    async fn resolve_codec(&self) -> String {
        let configured = self.encoder.codec.clone();
        let encoders = self.media.list_encoders().await.unwrap_or_default();
        if encoders.contains(&configured) {
            return configured;
        }
        if encoders.contains(FALLBACK_CODEC) {
            warn!("codec {configured} unavailable; falling back to {FALLBACK_CODEC}");
            return FALLBACK_CODEC.to_string();
        }
        configured
    }

    /// Rolls every pending frame into one artifact and clears the frame
    /// store. Exclusive with merging and with itself; captures continue
    /// concurrently and frames that land during the encode are excluded
    /// by the snapshot taken up front, surviving into the next session.
    async fn encode_session(&self) -> OpOutcome {
        let _encode = self.encode_lock.lock().await;
        let images = match self.frames.collected() {
            Ok(images) => images,
            Err(err) => {
                let message = err.to_string();
                self.record_encode_error(Some(message.clone()));
                return OpOutcome::failed(message);
            }
        };
        if images.is_empty() {
            return OpOutcome::failed(NO_IMAGES_MESSAGE);
        }

        let session_end = Local::now();
        let session_start = self.state().session_start;
        let output = self.artifacts.video_path(session_start, session_end);
        let codec = self.resolve_codec().await;
        if let Err(err) = self
            .media
            .encode_timelapse(
                &self.frames.glob_pattern(),
                &output,
                self.encoder.fps,
                &codec,
            )
            .await
        {
            let message = err.to_string();
            self.record_encode_error(Some(message.clone()));
            self.log(format!("Encode failed: {message}"));
            return OpOutcome::failed(message);
        }

        for image in &images {
            let _ = fs::remove_file(image);
        }
        {
            let mut state = self.state();
            state.session_start = session_end;
            state.status.last_encode_error = None;
        }
        let message = format!(
            "Converted {} images into {}.",
            images.len(),
            display_name(&output)
        );
        self.log(message.clone());
        OpOutcome::ok(message)
    }

    // ---- operator actions -------------------------------------------------

    /// Captures immediately regardless of the due-time, then pushes the
    /// next scheduled capture out by one full interval.
    pub async fn trigger_capture_now(&self) -> OpOutcome {
        let now = Local::now();
        self.capture_frame(now).await;
        let error = {
            let mut state = self.state();
            state.next_capture_due = now + state.runtime.capture_interval();
            state.status.last_capture_error.clone()
        };
        match error {
            Some(message) => OpOutcome::failed(message),
            None => OpOutcome::ok("Manual timelapse capture completed."),
        }
    }

    /// Encodes the pending session immediately. On success the capture
    /// due-time is reset so a capture does not fire right after the
    /// conversion.
    pub async fn trigger_convert_now(&self) -> OpOutcome {
        let outcome = self.encode_session().await;
        if outcome.success {
            let mut state = self.state();
            state.next_capture_due = Local::now() + state.runtime.capture_interval();
        }
        outcome
    }

    /// Concatenates every existing artifact, oldest first, into one
    /// merged artifact and deletes the sources on success.
    pub async fn trigger_merge_videos(&self) -> OpOutcome {
        let _encode = self.encode_lock.lock().await;
        let videos = match self.artifacts.chronological() {
            Ok(videos) => videos,
            Err(err) => return OpOutcome::failed(err.to_string()),
        };
        if videos.len() < 2 {
            return OpOutcome::failed("Need at least 2 videos to merge.");
        }

        let output = match self
            .artifacts
            .merged_path(&videos[0], &videos[videos.len() - 1])
        {
            Ok(output) => output,
            Err(err) => return OpOutcome::failed(err.to_string()),
        };
        if let Err(err) = self.media.merge_videos(&videos, &output).await {
            let message = err.to_string();
            self.record_encode_error(Some(message.clone()));
            self.log(format!("Merge failed: {message}"));
            return OpOutcome::failed(message);
        }

        for video in &videos {
            let _ = fs::remove_file(video);
        }
        self.record_encode_error(None);
        let message = format!(
            "Merged {} videos into {}.",
            videos.len(),
            display_name(&output)
        );
        self.log(message.clone());
        OpOutcome::ok(message)
    }

    /// Validates and applies a full runtime configuration. A failing
    /// field rejects the whole update; nothing is mutated or persisted.
    pub fn update_runtime_config(&self, update: RuntimeConfig) -> OpOutcome {
        let normalized = match update.normalized() {
            Ok(normalized) => normalized,
            Err(err) => return OpOutcome::failed(plain_message(err)),
        };
        {
            let mut state = self.state();
            state.runtime = normalized;
            state.next_capture_due = Local::now() + normalized.capture_interval();
        }
        if let Err(err) = self.save_runtime_config(&normalized) {
            return OpOutcome::failed(format!("Failed to save config: {err}"));
        }
        self.log("Runtime configuration updated");
        OpOutcome::ok("Configuration saved.")
    }

    // ---- reporting surface ------------------------------------------------

    pub fn get_status(&self) -> EngineStatus {
        let collected_images = self.frames.count().unwrap_or(0);
        let state = self.state();
        EngineStatus {
            last_capture_timestamp: state.status.last_capture_timestamp,
            last_capture_error: state.status.last_capture_error.clone(),
            last_live_view_error: state.status.last_live_view_error.clone(),
            last_encode_error: state.status.last_encode_error.clone(),
            collected_images,
            session_image_count: state.runtime.session_image_count,
            capture_interval_seconds: state.runtime.capture_interval_seconds,
            capture_interval_minutes: state.runtime.capture_interval_seconds / 60,
            rotation_degrees: state.runtime.rotation_degrees,
            black_detection_percentage: state.runtime.black_detection_percentage,
        }
    }

    pub fn get_logs(&self) -> Vec<String> {
        self.state().logs.iter().cloned().collect()
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        self.state().runtime
    }

    pub fn live_view_path(&self) -> &Path {
        &self.live_view_path
    }

    pub fn list_frames(&self) -> Result<Vec<String>> {
        self.frames.list()
    }

    pub fn list_artifacts(&self) -> Result<Vec<String>> {
        self.artifacts.list()
    }

    pub fn get_frame_path(&self, name: &str) -> Result<PathBuf> {
        self.frames.resolve(name)
    }

    pub fn get_artifact_path(&self, name: &str) -> Result<PathBuf> {
        self.artifacts.resolve(name)
    }

    pub fn delete_frame(&self, name: &str) -> Result<()> {
        self.frames.delete(name)?;
        self.log(format!("Deleted image {name}"));
        Ok(())
    }

    pub fn delete_artifact(&self, name: &str) -> Result<()> {
        self.artifacts.delete(name)?;
        self.log(format!("Deleted video {name}"));
        Ok(())
    }

    pub fn delete_all_frames(&self) -> Result<usize> {
        let deleted = self.frames.delete_all()?;
        self.log(format!("Deleted {deleted} collected timelapse images"));
        Ok(deleted)
    }

    // ---- internals --------------------------------------------------------

    fn state(&self) -> MutexGuard<'_, EngineState> {
        lock_or_recover(&self.state)
    }

    fn record_encode_error(&self, error: Option<String>) {
        self.state().status.last_encode_error = error;
    }

    /// Appends to the bounded log ring and mirrors to the tracing
    /// subscriber. Callers must not hold the state lock.
    fn log(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{message}");
        let entry = format!("{} {message}", Local::now().format("%Y-%m-%d %H:%M:%S"));
        let mut state = self.state();
        if state.logs.len() == LOG_RING_CAPACITY {
            state.logs.pop_front();
        }
        state.logs.push_back(entry);
    }

    fn load_runtime_config(&self) {
        if !self.config_path.exists() {
            return;
        }
        let patch = fs::read_to_string(&self.config_path)
            .map_err(|err| err.to_string())
            .and_then(|raw| {
                serde_json::from_str::<RuntimeConfigPatch>(&raw).map_err(|err| err.to_string())
            });
        let applied = patch.and_then(|patch| {
            let mut state = self.state();
            match state.runtime.merged(patch).normalized() {
                Ok(runtime) => {
                    state.runtime = runtime;
                    state.next_capture_due = Local::now() + runtime.capture_interval();
                    Ok(())
                }
                Err(err) => Err(err.to_string()),
            }
        });
        // A malformed persisted record is never fatal; defaults stand.
        match applied {
            Ok(()) => self.log(format!(
                "Loaded runtime configuration from {}",
                self.config_path.display()
            )),
            Err(err) => self.log(format!("Failed to load runtime configuration: {err}")),
        }
    }

    fn save_runtime_config(&self, runtime: &RuntimeConfig) -> Result<()> {
        let doc = serde_json::to_string_pretty(runtime)
            .map_err(|err| engine_error(format!("failed to serialize config: {err}")))?;
        fs::write(&self.config_path, doc).map_err(|err| {
            engine_error(format!(
                "failed to write {}: {err}",
                self.config_path.display()
            ))
        })
    }
}

/// Sleeps one tick, returning true when the stop signal fires first.
async fn wait_or_stop(stop: &mut watch::Receiver<bool>, tick: Duration) -> bool {
    tokio::select! {
        _ = stop.changed() => true,
        _ = sleep(tick) => false,
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Bare validation message, without the error-category prefix the
/// enum's `Display` adds.
fn plain_message(err: VerdacamError) -> String {
    match err {
        VerdacamError::Configuration(message) => message,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verdacam_media::CameraSimulator;
    use verdacam_types::naming::SessionRange;

    fn defaults() -> RuntimeConfig {
        RuntimeConfig {
            capture_interval_seconds: 900,
            rotation_degrees: 0,
            session_image_count: 3,
            black_detection_percentage: 90.0,
        }
    }

    fn timing() -> EngineTiming {
        EngineTiming {
            capture_poll: Duration::from_millis(20),
            session_poll: Duration::from_millis(20),
            live_view_interval: Duration::from_millis(20),
        }
    }

    fn build_engine(
        dir: &Path,
        runtime: RuntimeConfig,
    ) -> (Arc<TimelapseEngine>, Arc<CameraSimulator>) {
        let simulator = Arc::new(CameraSimulator::new());
        let engine = TimelapseEngine::new(
            dir,
            simulator.clone(),
            simulator.clone(),
            runtime,
            EncoderSettings {
                fps: 24,
                codec: "libx264".into(),
            },
            timing(),
        )
        .expect("engine");
        (Arc::new(engine), simulator)
    }

    /// Captures one frame with an explicit timestamp so rapid test
    /// captures do not collide on second-granularity names.
    async fn capture_at(engine: &TimelapseEngine, offset_seconds: i64) {
        let timestamp = Local::now() + chrono::Duration::seconds(offset_seconds);
        engine.capture_frame(timestamp).await;
    }

    #[tokio::test]
    async fn convert_with_no_frames_is_a_reported_noop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (engine, _simulator) = build_engine(dir.path(), defaults());
        let outcome = engine.trigger_convert_now().await;
        assert!(!outcome.success);
        assert_eq!(outcome.message, "No collected images available for conversion.");
        assert!(engine.list_artifacts().expect("list").is_empty());
    }

    #[tokio::test]
    async fn session_loop_fires_once_at_threshold_and_never_below_it() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (engine, _simulator) = build_engine(dir.path(), defaults());
        engine.start();

        capture_at(&engine, 0).await;
        capture_at(&engine, 1).await;
        sleep(Duration::from_millis(250)).await;
        assert!(
            engine.list_artifacts().expect("list").is_empty(),
            "encode fired below the session threshold"
        );

        capture_at(&engine, 2).await;
        sleep(Duration::from_millis(250)).await;
        let artifacts = engine.list_artifacts().expect("list");
        assert_eq!(artifacts.len(), 1);
        assert!(SessionRange::parse(&artifacts[0]).is_some());
        assert_eq!(engine.list_frames().expect("frames").len(), 0);

        // Live view ran alongside without touching the frame store.
        assert!(engine.live_view_path().exists());
        engine.stop().await;
    }

    #[tokio::test]
    async fn black_frames_above_threshold_are_discarded_without_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (engine, simulator) = build_engine(dir.path(), defaults());
        simulator.configure(Some(0.95), None);

        let outcome = engine.trigger_capture_now().await;
        assert!(outcome.success, "discard must not surface as an error");
        assert_eq!(engine.list_frames().expect("frames").len(), 0);
        assert!(engine
            .get_logs()
            .iter()
            .any(|line| line.contains("Discarded image")));
        assert!(engine.get_status().last_capture_error.is_none());
    }

    #[tokio::test]
    async fn black_ratio_exactly_at_threshold_keeps_the_frame() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (engine, simulator) = build_engine(dir.path(), defaults());
        simulator.configure(Some(0.90), None);
        capture_at(&engine, 0).await;
        assert_eq!(engine.list_frames().expect("frames").len(), 1);

        simulator.configure(Some(0.91), None);
        capture_at(&engine, 5).await;
        assert_eq!(engine.list_frames().expect("frames").len(), 1);
    }

    #[tokio::test]
    async fn capture_failure_is_reported_and_recorded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (engine, simulator) = build_engine(dir.path(), defaults());
        simulator.configure(None, Some(true));

        let outcome = engine.trigger_capture_now().await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("simulated capture failure"));
        assert!(engine.get_status().last_capture_error.is_some());
        assert_eq!(engine.list_frames().expect("frames").len(), 0);

        // The next manual capture recovers and clears the error.
        let outcome = engine.trigger_capture_now().await;
        assert!(outcome.success);
        assert!(engine.get_status().last_capture_error.is_none());
    }

    #[tokio::test]
    async fn invalid_rotation_rejects_the_whole_update() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (engine, _simulator) = build_engine(dir.path(), defaults());
        let before = engine.runtime_config();

        let outcome = engine.update_runtime_config(RuntimeConfig {
            rotation_degrees: 45,
            ..before
        });
        assert!(!outcome.success);
        assert_eq!(engine.runtime_config(), before);
        assert!(!dir.path().join("config.json").exists());
    }

    #[tokio::test]
    async fn updated_config_round_trips_into_a_fresh_engine() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (engine, _simulator) = build_engine(dir.path(), defaults());
        let updated = RuntimeConfig {
            capture_interval_seconds: 120,
            rotation_degrees: 270,
            session_image_count: 7,
            black_detection_percentage: 42.5,
        };
        let outcome = engine.update_runtime_config(updated);
        assert!(outcome.success);
        assert_eq!(outcome.message, "Configuration saved.");

        let (rebuilt, _simulator) = build_engine(dir.path(), defaults());
        assert_eq!(rebuilt.runtime_config(), updated);
        assert!(rebuilt
            .get_logs()
            .iter()
            .any(|line| line.contains("Loaded runtime configuration")));
    }

    #[tokio::test]
    async fn merge_needs_at_least_two_artifacts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (engine, _simulator) = build_engine(dir.path(), defaults());
        capture_at(&engine, 0).await;
        assert!(engine.trigger_convert_now().await.success);
        assert_eq!(engine.list_artifacts().expect("list").len(), 1);

        let outcome = engine.trigger_merge_videos().await;
        assert!(!outcome.success);
        assert_eq!(outcome.message, "Need at least 2 videos to merge.");
        assert_eq!(engine.list_artifacts().expect("list").len(), 1);
    }

    #[tokio::test]
    async fn merge_replaces_all_artifacts_with_one_merged_video() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (engine, _simulator) = build_engine(dir.path(), defaults());
        capture_at(&engine, 0).await;
        assert!(engine.trigger_convert_now().await.success);
        // Session names carry second granularity; let the clock move so
        // the second artifact gets a distinct name.
        sleep(Duration::from_millis(1100)).await;
        capture_at(&engine, 1).await;
        assert!(engine.trigger_convert_now().await.success);

        let outcome = engine.trigger_merge_videos().await;
        assert!(outcome.success, "merge failed: {}", outcome.message);
        let artifacts = engine.list_artifacts().expect("list");
        assert_eq!(artifacts.len(), 1);
        assert!(artifacts[0].starts_with("merged_"));
        assert!(engine.get_status().last_encode_error.is_none());
    }

    #[tokio::test]
    async fn status_reads_are_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (engine, _simulator) = build_engine(dir.path(), defaults());
        capture_at(&engine, 0).await;
        assert_eq!(engine.get_status(), engine.get_status());
    }

    #[tokio::test]
    async fn frame_accessors_validate_names_and_log_deletions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (engine, _simulator) = build_engine(dir.path(), defaults());
        capture_at(&engine, 0).await;
        capture_at(&engine, 1).await;

        assert!(matches!(
            engine.get_frame_path("../etc/passwd.jpg"),
            Err(VerdacamError::InvalidName(_))
        ));
        assert!(matches!(
            engine.get_frame_path("image_990101_000000.jpg"),
            Err(VerdacamError::NotFound(_))
        ));

        let names = engine.list_frames().expect("frames");
        assert_eq!(names.len(), 2);
        engine.delete_frame(&names[0]).expect("delete frame");
        assert_eq!(engine.delete_all_frames().expect("delete all"), 1);
        assert!(engine
            .get_logs()
            .iter()
            .any(|line| line.contains("Deleted 1 collected timelapse images")));
    }

    #[tokio::test]
    async fn stop_terminates_the_loops() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (engine, _simulator) = build_engine(dir.path(), defaults());
        engine.start();
        sleep(Duration::from_millis(60)).await;
        engine.stop().await;
        // A second stop is harmless once the loops are gone.
        engine.stop().await;
    }
}
