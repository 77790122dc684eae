//! Two-pass orchestration: analyze a video into a record table, then render
//! the table back onto the video.
//!
//! The passes only share files on disk. `analyze` closes the record table
//! before returning, and `render` reloads it in full, so they can run in
//! separate invocations.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, instrument};

use crate::common::{EmotionTrackError, Result};
use crate::config::PipelineConfig;
use crate::detection::{AnalysisSummary, DetectionAggregator, EmotionClassifier, PersonDetector};
use crate::media::{FfmpegTools, FrameExtractor, VideoProbe, VideoSource, YtDlpDownloader};
use crate::models::{FerEmotionClassifier, YoloPersonDetector};
use crate::overlay::{OverlayRenderer, RenderSummary};
use crate::record_store::{load_all, RecordWriter};
use crate::sampler::FrameSampler;

/// Files and counters produced by the analysis pass
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub video: PathBuf,
    pub frames_dir: PathBuf,
    pub records_path: PathBuf,
    pub frames_sampled: usize,
    pub sampling_rate: f64,
    #[serde(flatten)]
    pub summary: AnalysisSummary,
}

/// Files and counters produced by the render pass
#[derive(Debug, Clone, Serialize)]
pub struct RenderReport {
    pub video: PathBuf,
    pub output: PathBuf,
    pub records_loaded: usize,
    #[serde(flatten)]
    pub summary: RenderSummary,
}

/// Turn a command-line locator into a local video file
///
/// URLs are downloaded into the configured videos directory.
#[instrument(skip(config))]
pub fn resolve_source(config: &PipelineConfig, locator: &str) -> Result<PathBuf> {
    let downloader = YtDlpDownloader::new(config.videos_dir());
    VideoSource::from_locator(locator).resolve(&downloader)
}

/// Name used for the frames directory and the record table of `video`
pub fn video_stem(video: &Path) -> Result<String> {
    video
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .ok_or_else(|| EmotionTrackError::config_error(format!("no file name in {}", video.display())))
}

fn video_file_name(video: &Path) -> Result<String> {
    video
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| EmotionTrackError::config_error(format!("no file name in {}", video.display())))
}

/// Analysis pass with ffmpeg/ffprobe and the configured ONNX models
pub fn analyze(config: &PipelineConfig, video: &Path) -> Result<AnalysisReport> {
    config.validate()?;

    let tools = FfmpegTools::default();
    let detector = YoloPersonDetector::new(&config.person_model)?
        .with_thresholds(config.person_score_threshold, config.nms_threshold);
    let classifier = FerEmotionClassifier::new(&config.emotion_model, config.emotion_model_layout)?;

    analyze_with(config, video, &tools, &tools, detector, classifier)
}

/// Analysis pass over explicit collaborators
///
/// Samples `video` into `<output_root>/saves/<stem>`, then writes one record
/// per detected person to `<output_root>/output/<stem>.csv`. The table is
/// recreated on every run.
#[instrument(skip(config, probe, extractor, detector, classifier))]
pub fn analyze_with<D, C>(
    config: &PipelineConfig,
    video: &Path,
    probe: &dyn VideoProbe,
    extractor: &dyn FrameExtractor,
    detector: D,
    classifier: C,
) -> Result<AnalysisReport>
where
    D: PersonDetector,
    C: EmotionClassifier,
{
    let stem = video_stem(video)?;
    let frames_dir = config.frames_dir(&stem);
    let records_path = config.records_path(&stem);

    let manifest = FrameSampler::new(probe, extractor, config.interval).sample(video, &frames_dir)?;

    let mut store = RecordWriter::create(&records_path)?;
    let mut aggregator = DetectionAggregator::new(detector, classifier)
        .with_policy(config.failure_policy)
        .with_progress_every(config.progress_every);

    let summary = aggregator.analyze_manifest(&manifest, &frames_dir, &mut store)?;
    let written = store.finish()?;
    info!("Record table {} closed with {} records", records_path.display(), written);

    Ok(AnalysisReport {
        video: video.to_path_buf(),
        frames_dir,
        records_path,
        frames_sampled: manifest.len(),
        sampling_rate: manifest.plan.extraction_rate,
        summary,
    })
}

/// Render pass: reload the record table of `video` and write the annotated
/// replay to `<output_root>/demos/<file name>`
#[instrument(skip(config))]
pub fn render(config: &PipelineConfig, video: &Path) -> Result<RenderReport> {
    config.validate()?;

    let stem = video_stem(video)?;
    let records_path = config.records_path(&stem);
    let output = config.demo_path(&video_file_name(video)?);

    let table = load_all(&records_path)?;
    info!("Loaded {} records from {}", table.len(), records_path.display());

    let summary = OverlayRenderer::new(config.margin)
        .with_max_gap(config.max_match_gap_seconds)
        .render(video, &table, &output)?;

    Ok(RenderReport {
        video: video.to_path_buf(),
        output,
        records_loaded: table.len(),
        summary,
    })
}
