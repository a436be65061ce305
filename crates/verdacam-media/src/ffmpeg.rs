use std::{
    collections::HashSet,
    fs, io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;
use verdacam_types::Result;

use crate::{media_error, MediaToolkit};

/// Artifacts smaller than this are treated as failed conversions even
/// when the encoder exited successfully.
const MIN_PLAUSIBLE_VIDEO_BYTES: u64 = 256;

/// libx264 refuses frames whose macroblock count exceeds the H.264
/// level limit; stay well below the observed failure point.
const MAX_H264_MACROBLOCKS: u32 = 120_000;

const FULL_HD_FILTER: &str =
    "scale=1920:1080:force_original_aspect_ratio=decrease,pad=1920:1080:(ow-iw)/2:(oh-ih)/2:black";

/// Media toolchain backed by the `ffmpeg` and `ffprobe` binaries.
pub struct FfmpegToolkit {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    /// Downscale target for oversized stills; `None` disables scaling.
    max_long_edge: Option<u32>,
    jpeg_quality: u32,
}

impl FfmpegToolkit {
    pub fn new() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            max_long_edge: Some(2160),
            jpeg_quality: 6,
        }
    }

    pub fn with_binaries(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            ..Self::new()
        }
    }

    async fn run_tool(&self, binary: &Path, args: &[String]) -> Result<String> {
        let output = Command::new(binary)
            .args(args)
            .output()
            .await
            .map_err(|err| {
                if err.kind() == io::ErrorKind::NotFound {
                    media_error(format!("{} not found", binary.display()))
                } else {
                    media_error(format!("failed to run {}: {err}", binary.display()))
                }
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(media_error(if stderr.is_empty() {
                format!("{} exited with {}", binary.display(), output.status)
            } else {
                stderr
            }))
        }
    }

    async fn run_ffmpeg(&self, args: Vec<String>) -> Result<String> {
        debug!("running ffmpeg {}", args.join(" "));
        self.run_tool(&self.ffmpeg, &args).await
    }

    async fn run_ffprobe(&self, args: Vec<String>) -> Result<String> {
        self.run_tool(&self.ffprobe, &args).await
    }

    /// Resolution of the first frame matched by the glob, or `None`
    /// when there is nothing to probe or probing fails.
    async fn probe_first_frame(&self, frame_glob: &Path) -> Option<(u32, u32)> {
        let first = first_glob_match(frame_glob)?;
        let stdout = self
            .run_ffprobe(vec![
                "-v".into(),
                "error".into(),
                "-select_streams".into(),
                "v:0".into(),
                "-show_entries".into(),
                "stream=width,height".into(),
                "-of".into(),
                "csv=p=0:s=x".into(),
                first.to_string_lossy().into_owned(),
            ])
            .await
            .ok()?;
        let (width_raw, height_raw) = stdout.trim().split_once('x')?;
        Some((width_raw.parse().ok()?, height_raw.parse().ok()?))
    }

    /// Rewrites `image` in place through a temporary sibling file.
    async fn filter_in_place(&self, image: &Path, suffix: &str, extra: Vec<String>) -> Result<()> {
        let temporary = image.with_extension(suffix);
        let _ = fs::remove_file(&temporary);
        let mut args = vec![
            "-hide_banner".into(),
            "-y".into(),
            "-i".into(),
            image.to_string_lossy().into_owned(),
        ];
        args.extend(extra);
        args.push(temporary.to_string_lossy().into_owned());
        if let Err(err) = self.run_ffmpeg(args).await {
            let _ = fs::remove_file(&temporary);
            return Err(err);
        }
        fs::rename(&temporary, image)
            .map_err(|err| media_error(format!("failed to replace {:?}: {err}", image)))
    }
}

impl Default for FfmpegToolkit {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
    async fn rotate_left(&self, image: &Path) -> Result<()> {
        self.filter_in_place(image, "rotated.jpg", vec!["-vf".into(), "transpose=2".into()])
            .await
    }

    async fn normalize_full_hd(&self, image: &Path) -> Result<()> {
        self.filter_in_place(
            image,
            "fhd.jpg",
            vec![
                "-vf".into(),
                FULL_HD_FILTER.into(),
                "-q:v".into(),
                self.jpeg_quality.to_string(),
            ],
        )
        .await
    }

    async fn estimate_black_ratio(&self, image: &Path) -> Result<Option<f64>> {
        let filtergraph = format!(
            "movie={},blackframe=amount=90:threshold=32",
            image.to_string_lossy()
        );
        let probe = self
            .run_ffprobe(vec![
                "-v".into(),
                "error".into(),
                "-f".into(),
                "lavfi".into(),
                "-i".into(),
                filtergraph,
                "-show_entries".into(),
                "frame_tags=lavfi.blackframe.pblack".into(),
                "-of".into(),
                "default=nw=1:nk=1".into(),
            ])
            .await;
        let stdout = match probe {
            Ok(stdout) => stdout,
            Err(_) => return Ok(None),
        };
        Ok(parse_black_ratio(&stdout))
    }

    async fn list_encoders(&self) -> Result<HashSet<String>> {
        let stdout = self
            .run_ffmpeg(vec!["-hide_banner".into(), "-encoders".into()])
            .await?;
        Ok(parse_encoder_list(&stdout))
    }

    async fn encode_timelapse(
        &self,
        frame_glob: &Path,
        output: &Path,
        fps: u32,
        codec: &str,
    ) -> Result<()> {
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| media_error(format!("failed to create {:?}: {err}", parent)))?;
        }
        let temporary = output.with_extension("tmp.mp4");
        let _ = fs::remove_file(&temporary);

        let mut filters: Vec<String> = Vec::new();
        if let Some(max_long_edge) = self.max_long_edge {
            if is_h264_family(codec) {
                if let Some((width, height)) = self.probe_first_frame(frame_glob).await {
                    if needs_downscale_for_h264(width, height) {
                        filters.push(scale_filter(width, height, max_long_edge));
                    }
                }
            }
        }
        filters.push("format=yuv420p".into());
        let vf = filters.join(",");

        let mut attempt = self
            .run_ffmpeg(encode_args(frame_glob, &temporary, fps, codec, &vf))
            .await;

        if let Err(err) = &attempt {
            // The probe can miss oversized stills; retry once with a
            // forced downscale when the encoder reports a level limit.
            let retryable = err.to_string().to_lowercase().contains("level limit");
            if let Some(max_long_edge) = self.max_long_edge {
                if retryable && !vf.contains("scale=") {
                    let retry_vf = format!("scale={max_long_edge}:-2,format=yuv420p");
                    let _ = fs::remove_file(&temporary);
                    attempt = self
                        .run_ffmpeg(encode_args(frame_glob, &temporary, fps, codec, &retry_vf))
                        .await;
                }
            }
        }

        if let Err(err) = attempt {
            let _ = fs::remove_file(&temporary);
            return Err(err);
        }
        finalize_video(&temporary, output)
    }

    async fn merge_videos(&self, videos: &[PathBuf], output: &Path) -> Result<()> {
        if videos.is_empty() {
            return Err(media_error("no videos provided for merge"));
        }
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| media_error(format!("failed to create {:?}: {err}", parent)))?;
        }
        let temporary = output.with_extension("tmp.mp4");
        let _ = fs::remove_file(&temporary);

        let list_path = output.with_extension("concat.txt");
        let mut listing = String::new();
        for video in videos {
            listing.push_str(&format!("file '{}'\n", video.display()));
        }
        fs::write(&list_path, listing)
            .map_err(|err| media_error(format!("failed to write concat list: {err}")))?;

        let result = self
            .run_ffmpeg(vec![
                "-hide_banner".into(),
                "-y".into(),
                "-f".into(),
                "concat".into(),
                "-safe".into(),
                "0".into(),
                "-i".into(),
                list_path.to_string_lossy().into_owned(),
                "-c".into(),
                "copy".into(),
                temporary.to_string_lossy().into_owned(),
            ])
            .await;
        let _ = fs::remove_file(&list_path);

        if let Err(err) = result {
            let _ = fs::remove_file(&temporary);
            return Err(media_error(format!("video merge failed: {err}")));
        }
        finalize_video(&temporary, output)
    }
}

fn encode_args(
    frame_glob: &Path,
    temporary: &Path,
    fps: u32,
    codec: &str,
    vf: &str,
) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-y".into(),
        "-framerate".into(),
        fps.to_string(),
        "-pattern_type".into(),
        "glob".into(),
        "-i".into(),
        frame_glob.to_string_lossy().into_owned(),
        "-vf".into(),
        vf.into(),
        "-c:v".into(),
        codec.into(),
        "-preset".into(),
        "veryfast".into(),
        temporary.to_string_lossy().into_owned(),
    ]
}

/// Sanity-checks the finished temporary and moves it into place.
fn finalize_video(temporary: &Path, output: &Path) -> Result<()> {
    let size = fs::metadata(temporary).map(|meta| meta.len()).unwrap_or(0);
    if size < MIN_PLAUSIBLE_VIDEO_BYTES {
        let _ = fs::remove_file(temporary);
        return Err(media_error(format!(
            "generated video file is too small ({size} bytes); conversion likely failed"
        )));
    }
    fs::rename(temporary, output)
        .map_err(|err| media_error(format!("failed to move video into place: {err}")))
}

fn parse_black_ratio(stdout: &str) -> Option<f64> {
    let last = stdout.lines().map(str::trim).filter(|l| !l.is_empty()).last();
    match last {
        None => Some(0.0),
        Some(raw) => raw.parse::<f64>().ok().map(|pblack| pblack / 100.0),
    }
}

fn parse_encoder_list(stdout: &str) -> HashSet<String> {
    let mut encoders = HashSet::new();
    for line in stdout.lines() {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some(flags), Some(name)) if flags.starts_with('V') => {
                encoders.insert(name.to_string());
            }
            _ => {}
        }
    }
    encoders
}

fn is_h264_family(codec: &str) -> bool {
    matches!(codec, "libx264" | "h264" | "h264_mediacodec") || codec.contains("264")
}

fn needs_downscale_for_h264(width: u32, height: u32) -> bool {
    let mb_width = (width + 15) / 16;
    let mb_height = (height + 15) / 16;
    mb_width * mb_height > MAX_H264_MACROBLOCKS
}

/// Scale the long edge down to `max_long_edge`, keeping dimensions
/// divisible by 2 as yuv420p requires.
fn scale_filter(width: u32, height: u32, max_long_edge: u32) -> String {
    if width >= height {
        format!("scale={max_long_edge}:-2")
    } else {
        format!("scale=-2:{max_long_edge}")
    }
}

/// Resolves the first file matching a single-`*` glob pattern, in name
/// order. ffmpeg expands the glob itself; this is only for probing.
fn first_glob_match(frame_glob: &Path) -> Option<PathBuf> {
    let parent = frame_glob.parent()?;
    let pattern = frame_glob.file_name()?.to_str()?;
    let mut matches: Vec<PathBuf> = fs::read_dir(parent)
        .ok()?
        .flatten()
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| matches_single_star(name, pattern))
        })
        .map(|entry| entry.path())
        .collect();
    matches.sort();
    matches.into_iter().next()
}

fn matches_single_star(name: &str, pattern: &str) -> bool {
    match pattern.split_once('*') {
        Some((prefix, suffix)) => {
            name.len() >= prefix.len() + suffix.len()
                && name.starts_with(prefix)
                && name.ends_with(suffix)
        }
        None => name == pattern,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_list_parsing_keeps_video_encoders_only() {
        let stdout = "Encoders:\n V..... libx264  H.264 encoder\n V..... mpeg4  MPEG-4 part 2\n A..... aac  AAC encoder\n";
        let encoders = parse_encoder_list(stdout);
        assert!(encoders.contains("libx264"));
        assert!(encoders.contains("mpeg4"));
        assert!(!encoders.contains("aac"));
    }

    #[test]
    fn black_ratio_parsing_uses_last_reported_value() {
        assert_eq!(parse_black_ratio("12\n98.5\n"), Some(0.985));
        assert_eq!(parse_black_ratio("\n"), Some(0.0));
        assert_eq!(parse_black_ratio("garbage\n"), None);
    }

    #[test]
    fn downscale_heuristic_trips_on_huge_frames() {
        assert!(!needs_downscale_for_h264(1920, 1080));
        assert!(!needs_downscale_for_h264(4096, 2160));
        assert!(needs_downscale_for_h264(16000, 12000));
    }

    #[test]
    fn scale_filter_targets_the_long_edge() {
        assert_eq!(scale_filter(4000, 3000, 2160), "scale=2160:-2");
        assert_eq!(scale_filter(3000, 4000, 2160), "scale=-2:2160");
    }

    #[test]
    fn glob_matching_is_prefix_and_suffix_based() {
        assert!(matches_single_star("image_240101_000000.jpg", "image_*.jpg"));
        assert!(!matches_single_star("video_240101.mp4", "image_*.jpg"));
        assert!(!matches_single_star("image_.jp", "image_*.jpg"));
        assert!(matches_single_star("exact.jpg", "exact.jpg"));
    }

    #[test]
    fn first_glob_match_picks_earliest_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["image_b.jpg", "image_a.jpg", "other.txt"] {
            fs::write(dir.path().join(name), b"x").expect("write fixture");
        }
        let found = first_glob_match(&dir.path().join("image_*.jpg")).expect("match");
        assert_eq!(found.file_name().and_then(|n| n.to_str()), Some("image_a.jpg"));
    }

    #[test]
    fn finalize_rejects_implausibly_small_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let temporary = dir.path().join("clip.tmp.mp4");
        let output = dir.path().join("clip.mp4");
        fs::write(&temporary, b"tiny").expect("write fixture");
        assert!(finalize_video(&temporary, &output).is_err());
        assert!(!temporary.exists());
        assert!(!output.exists());

        fs::write(&temporary, vec![0u8; 512]).expect("write fixture");
        finalize_video(&temporary, &output).expect("plausible video");
        assert!(output.exists());
    }
}
