//! External media tools: probing, frame extraction and video acquisition.
//!
//! The pipeline core only sees the [`VideoProbe`], [`FrameExtractor`] and
//! [`VideoDownloader`] traits. The implementations here shell out to
//! `ffprobe`, `ffmpeg` and `yt-dlp`, which must be installed and on `PATH`.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::common::{EmotionTrackError, Result};

/// Rational frame rate as reported by the container (`30000/1001`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRate {
    pub numerator: u32,
    pub denominator: u32,
}

impl FrameRate {
    pub fn as_f64(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }
}

/// Parse `num/den` (or a bare number) into a frame rate
///
/// Returns `None` for a zero numerator or denominator, which ffprobe reports as
/// `0/0` when the rate is unknown.
pub fn parse_frame_rate(text: &str) -> Option<FrameRate> {
    let text = text.trim();
    let (numerator, denominator) = match text.split_once('/') {
        Some((num, den)) => (num.trim().parse().ok()?, den.trim().parse().ok()?),
        None => (text.parse().ok()?, 1),
    };

    if numerator == 0 || denominator == 0 {
        return None;
    }
    Some(FrameRate { numerator, denominator })
}

/// Metadata a probe could recover; either field may be unknown
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProbeReport {
    pub frame_rate: Option<FrameRate>,
    pub duration_seconds: Option<f64>,
}

/// Reads frame rate and duration from a video source
pub trait VideoProbe {
    fn probe(&self, video: &Path) -> Result<ProbeReport>;
}

/// Decodes a video into still images at a fixed rate
pub trait FrameExtractor {
    /// Extract frames at `rate` frames per second into `output_dir`
    ///
    /// `pattern` is a printf-style file name such as `extract_%06d.jpg`. Returns
    /// the files produced, sorted by name (which is also extraction order).
    fn extract(&self, video: &Path, rate: f64, output_dir: &Path, pattern: &str) -> Result<Vec<PathBuf>>;
}

/// Resolves a remote video locator to a local file
pub trait VideoDownloader {
    fn download(&self, url: &str) -> Result<PathBuf>;
}

/// `ffprobe`/`ffmpeg` subprocess implementation of the probe and extractor
#[derive(Debug, Clone)]
pub struct FfmpegTools {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for FfmpegTools {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl FfmpegTools {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }
}

impl VideoProbe for FfmpegTools {
    #[instrument(skip(self))]
    fn probe(&self, video: &Path) -> Result<ProbeReport> {
        if !video.exists() {
            return Err(EmotionTrackError::VideoNotFound {
                path: video.display().to_string(),
            });
        }

        let output = Command::new(&self.ffprobe)
            .args([
                "-v", "error",
                "-select_streams", "v:0",
                "-show_entries", "stream=r_frame_rate:format=duration",
                "-of", "json",
            ])
            .arg(video)
            .output()
            .map_err(|e| EmotionTrackError::tool_error("ffprobe", format!("failed to execute: {}", e)))?;

        if !output.status.success() {
            return Err(EmotionTrackError::tool_error(
                "ffprobe",
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let json: Value = serde_json::from_slice(&output.stdout)?;
        let report = parse_probe_json(&json);

        debug!("Probe report for {}: {:?}", video.display(), report);
        Ok(report)
    }
}

/// Pull the frame rate and duration out of ffprobe's JSON output
fn parse_probe_json(json: &Value) -> ProbeReport {
    let frame_rate = json["streams"][0]["r_frame_rate"]
        .as_str()
        .and_then(parse_frame_rate);

    // ffprobe prints the duration as a string; accept a number as well
    let duration_seconds = match &json["format"]["duration"] {
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
    .filter(|d| d.is_finite() && *d > 0.0);

    ProbeReport { frame_rate, duration_seconds }
}

impl FrameExtractor for FfmpegTools {
    #[instrument(skip(self))]
    fn extract(&self, video: &Path, rate: f64, output_dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(output_dir)?;

        let output_pattern = output_dir.join(pattern);
        let filter = format!("fps={}", rate);

        info!("Extracting frames from {} at {:.4} fps", video.display(), rate);

        let output = Command::new(&self.ffmpeg)
            .args(["-loglevel", "error", "-y", "-i"])
            .arg(video)
            .args(["-vf", &filter])
            .arg(&output_pattern)
            .output()
            .map_err(|e| EmotionTrackError::tool_error("ffmpeg", format!("failed to execute: {}", e)))?;

        if !output.status.success() {
            return Err(EmotionTrackError::tool_error(
                "ffmpeg",
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let prefix = pattern.split('%').next().unwrap_or_default();
        let extension = Path::new(pattern).extension().map(|e| e.to_owned());
        let mut files: Vec<PathBuf> = fs::read_dir(output_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                let name_matches = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map_or(false, |n| n.starts_with(prefix));
                name_matches && path.extension().map(|e| e.to_owned()) == extension
            })
            .collect();
        files.sort();

        debug!("ffmpeg produced {} frames", files.len());
        Ok(files)
    }
}

/// `yt-dlp` subprocess downloader
///
/// Downloads an mp4 at or below `max_height` into `download_dir`, named
/// `[<id>] <title>.<ext>` so repeated runs resolve to the same file.
#[derive(Debug, Clone)]
pub struct YtDlpDownloader {
    program: PathBuf,
    download_dir: PathBuf,
    max_height: u32,
}

impl YtDlpDownloader {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: PathBuf::from("yt-dlp"),
            download_dir: download_dir.into(),
            max_height: 360,
        }
    }

    pub fn with_max_height(mut self, max_height: u32) -> Self {
        self.max_height = max_height;
        self
    }

    fn format_selector(&self) -> String {
        format!(
            "bestvideo[ext=mp4][height<={h}]+bestaudio[ext=m4a]/best[ext=mp4][height<={h}]",
            h = self.max_height
        )
    }

    fn output_template(&self) -> PathBuf {
        self.download_dir.join("[%(id)s] %(title)s.%(ext)s")
    }

    fn run(&self, url: &str, extra: &[&str]) -> Result<String> {
        let output = Command::new(&self.program)
            .args(["--no-playlist", "--merge-output-format", "mp4", "-f"])
            .arg(self.format_selector())
            .arg("-o")
            .arg(self.output_template())
            .args(extra)
            .arg(url)
            .output()
            .map_err(|e| EmotionTrackError::tool_error("yt-dlp", format!("failed to execute: {}", e)))?;

        if !output.status.success() {
            return Err(EmotionTrackError::tool_error(
                "yt-dlp",
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl VideoDownloader for YtDlpDownloader {
    #[instrument(skip(self))]
    fn download(&self, url: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.download_dir)?;

        let printed = self.run(url, &["--no-simulate", "--print", "after_move:filepath"])?;
        let path = printed
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .map(PathBuf::from)
            .ok_or_else(|| EmotionTrackError::tool_error("yt-dlp", "did not report an output file"))?;

        if !path.exists() {
            warn!("yt-dlp reported {} but the file is missing", path.display());
            return Err(EmotionTrackError::VideoNotFound {
                path: path.display().to_string(),
            });
        }

        info!("Downloaded {} to {}", url, path.display());
        Ok(path)
    }
}

/// Where the input video comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoSource {
    Url(String),
    File(PathBuf),
}

impl VideoSource {
    /// Interpret a command-line locator: `http(s)://` is a URL, anything else a path
    pub fn from_locator(locator: &str) -> Self {
        if locator.starts_with("http://") || locator.starts_with("https://") {
            VideoSource::Url(locator.to_string())
        } else {
            VideoSource::File(PathBuf::from(locator))
        }
    }

    /// Resolve to a local file, downloading when needed
    pub fn resolve(&self, downloader: &dyn VideoDownloader) -> Result<PathBuf> {
        match self {
            VideoSource::Url(url) => downloader.download(url),
            VideoSource::File(path) if path.is_file() => Ok(path.clone()),
            VideoSource::File(path) => Err(EmotionTrackError::VideoNotFound {
                path: path.display().to_string(),
            }),
        }
    }
}
