//! Filesystem-backed stores for pending frames and encoded artifacts.
//!
//! Both stores own their directory exclusively; every externally
//! supplied name passes the strict allow-list before a path is formed.

use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};
use verdacam_types::{
    naming::{
        image_file_name, merged_file_name, validate_media_name, video_file_name, SessionRange,
        IMAGE_EXTENSION, IMAGE_PREFIX, VIDEO_EXTENSION,
    },
    Result, VerdacamError,
};

/// Generate an error aligned with storage semantics.
pub fn store_error(message: impl Into<String>) -> VerdacamError {
    VerdacamError::Store(message.into())
}

/// Ordered collection of captured frames pending encoding, keyed by the
/// capture timestamp embedded in each file name.
pub struct FrameStore {
    dir: PathBuf,
}

impl FrameStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|err| store_error(format!("failed to create {:?}: {err}", dir)))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn frame_path(&self, timestamp: DateTime<Local>) -> PathBuf {
        self.dir.join(image_file_name(timestamp))
    }

    /// Pattern handed to the encoder; it expands the glob itself.
    pub fn glob_pattern(&self) -> PathBuf {
        self.dir.join(format!("{IMAGE_PREFIX}*.{IMAGE_EXTENSION}"))
    }

    /// All pending frames, oldest first.
    pub fn collected(&self) -> Result<Vec<PathBuf>> {
        let mut frames = read_matching(&self.dir, IMAGE_PREFIX, IMAGE_EXTENSION)?;
        frames.sort();
        Ok(frames)
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.collected()?.len())
    }

    /// Frame names, newest first (dashboard order).
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = file_names(self.collected()?);
        names.sort_by(|a, b| b.cmp(a));
        Ok(names)
    }

    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        validate_media_name(name, IMAGE_EXTENSION)?;
        let path = self.dir.join(name);
        if !path.is_file() {
            return Err(VerdacamError::NotFound(name.to_string()));
        }
        Ok(path)
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        let path = self.resolve(name)?;
        fs::remove_file(&path)
            .map_err(|err| store_error(format!("failed to delete {:?}: {err}", path)))
    }

    /// Removes every pending frame, returning how many were deleted.
    pub fn delete_all(&self) -> Result<usize> {
        let frames = self.collected()?;
        let mut deleted = 0;
        for frame in frames {
            if fs::remove_file(&frame).is_ok() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

/// Collection of encoded timelapse videos, named by the session time
/// range they summarize.
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|err| store_error(format!("failed to create {:?}: {err}", dir)))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn video_path(&self, session_start: DateTime<Local>, session_end: DateTime<Local>) -> PathBuf {
        self.dir.join(video_file_name(session_start, session_end))
    }

    pub fn merged_path(&self, first: &Path, last: &Path) -> Result<PathBuf> {
        let first_stem = stem_of(first)?;
        let last_stem = stem_of(last)?;
        Ok(self.dir.join(merged_file_name(&first_stem, &last_stem)))
    }

    /// All artifacts in chronological order: by parsed session start
    /// where the name carries one, by name otherwise.
    pub fn chronological(&self) -> Result<Vec<PathBuf>> {
        let mut videos = read_matching(&self.dir, "", VIDEO_EXTENSION)?;
        videos.sort_by_key(|path| {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            (SessionRange::parse(&name).map(|range| range.start), name)
        });
        Ok(videos)
    }

    /// Artifact names, newest first (dashboard order).
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = file_names(read_matching(&self.dir, "", VIDEO_EXTENSION)?);
        names.sort_by(|a, b| b.cmp(a));
        Ok(names)
    }

    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        validate_media_name(name, VIDEO_EXTENSION)?;
        let path = self.dir.join(name);
        if !path.is_file() {
            return Err(VerdacamError::NotFound(name.to_string()));
        }
        Ok(path)
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        let path = self.resolve(name)?;
        fs::remove_file(&path)
            .map_err(|err| store_error(format!("failed to delete {:?}: {err}", path)))
    }
}

fn stem_of(path: &Path) -> Result<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
        .ok_or_else(|| store_error(format!("artifact has no usable stem: {:?}", path)))
}

fn read_matching(dir: &Path, prefix: &str, extension: &str) -> Result<Vec<PathBuf>> {
    let suffix = format!(".{extension}");
    let entries = fs::read_dir(dir)
        .map_err(|err| store_error(format!("failed to read {:?}: {err}", dir)))?;
    let mut paths = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with(prefix) && name.ends_with(&suffix) && entry.path().is_file() {
            paths.push(entry.path());
        }
    }
    Ok(paths)
}

fn file_names(paths: Vec<PathBuf>) -> Vec<String> {
    paths
        .iter()
        .filter_map(|path| path.file_name().and_then(|n| n.to_str()))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"x").expect("write fixture");
    }

    #[test]
    fn frame_listing_is_newest_first_and_collection_oldest_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FrameStore::new(dir.path()).expect("store");
        touch(dir.path(), "image_240101_000002.jpg");
        touch(dir.path(), "image_240101_000001.jpg");
        touch(dir.path(), "notes.txt");

        assert_eq!(
            store.list().expect("list"),
            vec!["image_240101_000002.jpg", "image_240101_000001.jpg"]
        );
        let collected = file_names(store.collected().expect("collected"));
        assert_eq!(
            collected,
            vec!["image_240101_000001.jpg", "image_240101_000002.jpg"]
        );
        assert_eq!(store.count().expect("count"), 2);
    }

    #[test]
    fn resolve_distinguishes_invalid_names_from_missing_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FrameStore::new(dir.path()).expect("store");
        assert!(matches!(
            store.resolve("../escape.jpg"),
            Err(VerdacamError::InvalidName(_))
        ));
        assert!(matches!(
            store.resolve("image_240101_000001.jpg"),
            Err(VerdacamError::NotFound(_))
        ));
        touch(dir.path(), "image_240101_000001.jpg");
        assert!(store.resolve("image_240101_000001.jpg").is_ok());
    }

    #[test]
    fn delete_all_reports_how_many_frames_went_away() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FrameStore::new(dir.path()).expect("store");
        touch(dir.path(), "image_240101_000001.jpg");
        touch(dir.path(), "image_240101_000002.jpg");
        assert_eq!(store.delete_all().expect("delete all"), 2);
        assert_eq!(store.count().expect("count"), 0);
    }

    #[test]
    fn artifacts_order_chronologically_with_merged_names_mixed_in() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path()).expect("store");
        touch(dir.path(), "video_240102_000000_240102_010000.mp4");
        touch(dir.path(), "video_240101_000000_240101_010000.mp4");
        touch(dir.path(), "merged_a_b.mp4");

        let ordered = file_names(store.chronological().expect("chronological"));
        // Names without a parsable range sort first by the None key.
        assert_eq!(
            ordered,
            vec![
                "merged_a_b.mp4",
                "video_240101_000000_240101_010000.mp4",
                "video_240102_000000_240102_010000.mp4"
            ]
        );
        assert_eq!(
            store.list().expect("list"),
            vec![
                "video_240102_000000_240102_010000.mp4",
                "video_240101_000000_240101_010000.mp4",
                "merged_a_b.mp4"
            ]
        );
    }

    #[test]
    fn merged_path_combines_first_and_last_stems() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path()).expect("store");
        let merged = store
            .merged_path(
                &dir.path().join("video_a.mp4"),
                &dir.path().join("video_b.mp4"),
            )
            .expect("merged path");
        assert_eq!(
            merged.file_name().and_then(|n| n.to_str()),
            Some("merged_video_a_video_b.mp4")
        );
    }
}
