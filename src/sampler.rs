//! Temporal sampling of a source video into timestamp-labeled frames.
//!
//! The sampler derives an extraction rate from the source frame rate and the
//! sampling interval, has a [`FrameExtractor`] decode the frames, labels them
//! with evenly spaced timestamps and records the result in a [`FrameManifest`].
//! Downstream stages read timestamps from the manifest rather than from file
//! names.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::common::{EmotionTrackError, Result};
use crate::media::{FrameExtractor, ProbeReport, VideoProbe};
use crate::timestamp::Timestamp;

/// Name of the manifest written next to the extracted frames
pub const MANIFEST_FILE: &str = "manifest.json";

const STAGING_PATTERN: &str = "extract_%06d.jpg";
const STAGING_PREFIX: &str = "extract_";
const FRAME_PREFIX: &str = "frame_";

/// Sampling parameters derived from the source metadata
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingPlan {
    pub source_fps: f64,
    pub duration_seconds: f64,
    pub interval: u32,
    pub extraction_rate: f64,
}

/// Derive the extraction rate `source_fps / interval`
///
/// # Errors
/// * `UnknownMetadata` - if the probe could not determine frame rate or duration
/// * `InvalidConfig` - if `interval` is zero
pub fn plan(report: &ProbeReport, interval: u32, video: &Path) -> Result<SamplingPlan> {
    if interval == 0 {
        return Err(EmotionTrackError::config_error("Sampling interval must be positive"));
    }

    let source_fps = report
        .frame_rate
        .map(|rate| rate.as_f64())
        .ok_or_else(|| EmotionTrackError::unknown_metadata(video.display().to_string(), "frame rate"))?;
    let duration_seconds = report
        .duration_seconds
        .ok_or_else(|| EmotionTrackError::unknown_metadata(video.display().to_string(), "duration"))?;

    Ok(SamplingPlan {
        source_fps,
        duration_seconds,
        interval,
        extraction_rate: source_fps / interval as f64,
    })
}

/// Evenly spaced labels for `frame_count` extracted frames spanning `duration_seconds`
///
/// Spacing follows the number of frames actually extracted, not the nominal
/// rate, so extractor rounding at the end of the video does not skew labels.
pub fn label_frames(frame_count: usize, duration_seconds: f64) -> Vec<Timestamp> {
    if frame_count == 0 {
        return Vec::new();
    }

    let spacing = duration_seconds / frame_count as f64;
    (0..frame_count)
        .map(|i| Timestamp::from_seconds(i as f64 * spacing))
        .collect()
}

/// File name for a sampled frame: `frame_<4-digit index>_<label>.jpg`
pub fn frame_file_name(index: u32, timestamp: Timestamp) -> String {
    format!("{}{:04}_{}.jpg", FRAME_PREFIX, index, timestamp)
}

/// One sampled frame as listed in the manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub index: u32,
    pub timestamp: Timestamp,
    pub file: String,
}

/// Side-table mapping frame index to timestamp and file for one video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameManifest {
    pub video: PathBuf,
    pub plan: SamplingPlan,
    pub frames: Vec<ManifestEntry>,
}

impl FrameManifest {
    pub fn save(&self, frames_dir: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(frames_dir.join(MANIFEST_FILE), json)?;
        Ok(())
    }

    pub fn load(frames_dir: &Path) -> Result<Self> {
        let content = fs::read_to_string(frames_dir.join(MANIFEST_FILE))?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// A decoded sampled frame handed to the detection stage
#[derive(Debug)]
pub struct SampledFrame {
    pub index: u32,
    pub timestamp: Timestamp,
    pub image: opencv::core::Mat,
}

/// Turns a source video into a labeled set of frame files
pub struct FrameSampler<'a> {
    probe: &'a dyn VideoProbe,
    extractor: &'a dyn FrameExtractor,
    interval: u32,
}

impl<'a> FrameSampler<'a> {
    pub fn new(probe: &'a dyn VideoProbe, extractor: &'a dyn FrameExtractor, interval: u32) -> Self {
        Self { probe, extractor, interval }
    }

    /// Extract, label and rename frames of `video` into `frames_dir`
    ///
    /// Frames left over from a previous run are removed first, so re-running
    /// yields the same labels and file set.
    #[instrument(skip(self))]
    pub fn sample(&self, video: &Path, frames_dir: &Path) -> Result<FrameManifest> {
        let report = self.probe.probe(video)?;
        let plan = plan(&report, self.interval, video)?;

        info!(
            "Sampling {} ({:.3} fps, {:.3}s) every {} frames -> {:.4} fps",
            video.display(), plan.source_fps, plan.duration_seconds, plan.interval, plan.extraction_rate
        );

        fs::create_dir_all(frames_dir)?;
        clear_frames_dir(frames_dir)?;

        let extracted = self
            .extractor
            .extract(video, plan.extraction_rate, frames_dir, STAGING_PATTERN)?;
        if extracted.is_empty() {
            return Err(EmotionTrackError::EmptyVideo);
        }

        let nominal = (plan.duration_seconds * plan.extraction_rate).round() as usize;
        if nominal != extracted.len() {
            debug!("Extractor produced {} frames, nominal count {}", extracted.len(), nominal);
        }

        let labels = label_frames(extracted.len(), plan.duration_seconds);
        let mut frames = Vec::with_capacity(extracted.len());
        for (index, (path, timestamp)) in extracted.iter().zip(labels).enumerate() {
            let index = index as u32;
            let file = frame_file_name(index, timestamp);
            fs::rename(path, frames_dir.join(&file))?;
            frames.push(ManifestEntry { index, timestamp, file });
        }

        let manifest = FrameManifest {
            video: video.to_path_buf(),
            plan,
            frames,
        };
        manifest.save(frames_dir)?;

        info!("Sampled {} frames into {}", manifest.len(), frames_dir.display());
        Ok(manifest)
    }
}

/// Remove frame files and the manifest left by an earlier run
fn clear_frames_dir(frames_dir: &Path) -> Result<()> {
    let mut removed = 0usize;
    for entry in fs::read_dir(frames_dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        let stale_frame = (name.starts_with(FRAME_PREFIX) || name.starts_with(STAGING_PREFIX))
            && name.ends_with(".jpg");
        if stale_frame || name == MANIFEST_FILE {
            fs::remove_file(&path)?;
            removed += 1;
        }
    }

    if removed > 0 {
        warn!("Removed {} stale files from {}", removed, frames_dir.display());
    }
    Ok(())
}
