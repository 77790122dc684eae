//! Emotion tracking over video
//!
//! This crate samples a video at a fixed frame interval, detects people in each
//! sampled frame, classifies the facial expression of every person and stores
//! the results as a time-keyed CSV table. A second pass replays the original
//! video with the confidences of the nearest record drawn beside each frame.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use rust_emotiontrack::{pipeline, PipelineConfig};
//!
//! let config = PipelineConfig::default();
//! let video = pipeline::resolve_source(&config, "videos/interview.mp4")?;
//!
//! let analysis = pipeline::analyze(&config, &video)?;
//! println!("{} records in {}", analysis.summary.records_written, analysis.records_path.display());
//!
//! let replay = pipeline::render(&config, &video)?;
//! println!("Annotated video at {}", replay.output.display());
//! # Ok::<(), rust_emotiontrack::EmotionTrackError>(())
//! ```
//!
//! The two passes only share the record table, so a table produced earlier can
//! be re-rendered without repeating inference:
//!
//! ```rust,no_run
//! use std::path::Path;
//! use rust_emotiontrack::{load_all, OverlayRenderer, TemporalMatcher};
//!
//! let table = load_all(Path::new("output/interview.csv"))?;
//! let matcher = TemporalMatcher::new(&table);
//! if let Some(record) = matcher.nearest(12.5) {
//!     println!("{} at {}", record.dominant(), record.timestamp());
//! }
//!
//! OverlayRenderer::new(200).render(
//!     Path::new("videos/interview.mp4"),
//!     &table,
//!     Path::new("demos/interview.mp4"),
//! )?;
//! # Ok::<(), rust_emotiontrack::EmotionTrackError>(())
//! ```

mod common;
mod video_stream;

pub mod config;
pub mod detection;
pub mod emotion;
pub mod matcher;
pub mod media;
pub mod models;
pub mod overlay;
pub mod pipeline;
pub mod record_store;
pub mod sampler;
pub mod timestamp;

// Re-export main types for public API
pub use common::{EmotionTrackError, Result};
pub use config::PipelineConfig;
pub use detection::{
    AnalysisSummary, BoundingBox, Detection, DetectionAggregator, EmotionClassifier, FailurePolicy,
    PersonDetector,
};
pub use emotion::{Emotion, EmotionScores};
pub use matcher::TemporalMatcher;
pub use media::{FfmpegTools, FrameExtractor, VideoDownloader, VideoProbe, VideoSource, YtDlpDownloader};
pub use models::{EmotionModelLayout, FerEmotionClassifier, YoloPersonDetector};
pub use overlay::{preview, OverlayRenderer, RenderSummary};
pub use record_store::{load_all, DetectionRecord, RecordTable, RecordWriter};
pub use sampler::{FrameManifest, FrameSampler};
pub use timestamp::Timestamp;
pub use video_stream::VideoStream;

use tracing::info;

/// Initialize tracing for the library
///
/// Call this once at the start of your application to enable log output.
/// `RUST_LOG` takes precedence over `level` when set.
///
/// # Arguments
/// * `level` - Tracing level filter (e.g., "debug", "info", "warn", "error")
pub fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("Emotion tracking initialized with tracing level: {}", level);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_api_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output").join("clip.csv");

        let scores = EmotionScores::from_pairs(
            Emotion::ALL.iter().map(|e| (*e, if *e == Emotion::Neutral { 55.0 } else { 7.5 })),
        )
        .unwrap();

        let mut writer = RecordWriter::create(&path).unwrap();
        writer.append(&DetectionRecord::new(Timestamp::from_seconds(2.25), scores)).unwrap();
        assert_eq!(writer.finish().unwrap(), 1);

        let table = load_all(&path).unwrap();
        let matcher = TemporalMatcher::new(&table);
        let record = matcher.nearest(0.0).unwrap();
        assert_eq!(record.dominant(), Emotion::Neutral);
        assert_eq!(record.timestamp().to_string(), "00-00-02.250");
    }
}
