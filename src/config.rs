//! Pipeline configuration
//!
//! Every location the pipeline reads or writes is derived here from
//! `output_root` and the video name, so no component consults a global
//! working directory.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::common::{EmotionTrackError, Result};
use crate::detection::FailurePolicy;
use crate::models::EmotionModelLayout;
use crate::overlay::DEFAULT_MARGIN;

/// Settings shared by the analysis and render passes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding `videos/`, `saves/`, `output/` and `demos/`
    pub output_root: PathBuf,

    /// Sample one frame out of every `interval` source frames
    pub interval: u32,

    /// Width in pixels of the confidence panel added to rendered frames
    pub margin: i32,

    /// YOLO ONNX export used for person detection
    pub person_model: PathBuf,

    /// Facial expression ONNX model
    pub emotion_model: PathBuf,
    pub emotion_model_layout: EmotionModelLayout,

    pub person_score_threshold: f32,
    pub nms_threshold: f32,

    pub failure_policy: FailurePolicy,

    /// Leave the panel blank when no record lies within this many seconds
    pub max_match_gap_seconds: Option<f64>,

    /// Log inference progress every N frames
    pub progress_every: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("."),
            interval: 15,
            margin: DEFAULT_MARGIN,
            person_model: PathBuf::from("models/yolo11s.onnx"),
            emotion_model: PathBuf::from("models/emotion-ferplus.onnx"),
            emotion_model_layout: EmotionModelLayout::default(),
            person_score_threshold: 0.25,
            nms_threshold: 0.45,
            failure_policy: FailurePolicy::Abort,
            max_match_gap_seconds: None,
            progress_every: 100,
        }
    }
}

impl PipelineConfig {
    /// Read a JSON config file; absent fields keep their defaults
    #[instrument]
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        debug!("Loaded config from {}: {:?}", path.display(), config);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval == 0 {
            return Err(EmotionTrackError::config_error("interval must be at least 1"));
        }
        if self.margin < 1 {
            return Err(EmotionTrackError::config_error(format!(
                "margin must be at least 1 pixel, got {}",
                self.margin
            )));
        }
        for (name, value) in [
            ("person_score_threshold", self.person_score_threshold),
            ("nms_threshold", self.nms_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(EmotionTrackError::config_error(format!(
                    "{} must be within (0, 1], got {}",
                    name, value
                )));
            }
        }
        if let Some(gap) = self.max_match_gap_seconds {
            if !gap.is_finite() || gap < 0.0 {
                return Err(EmotionTrackError::config_error(format!(
                    "max_match_gap_seconds must be a non-negative number, got {}",
                    gap
                )));
            }
        }
        if self.progress_every == 0 {
            return Err(EmotionTrackError::config_error("progress_every must be at least 1"));
        }
        Ok(())
    }

    /// Download directory for URL sources
    pub fn videos_dir(&self) -> PathBuf {
        self.output_root.join("videos")
    }

    /// Sampled frames of the video named `stem`
    pub fn frames_dir(&self, stem: &str) -> PathBuf {
        self.output_root.join("saves").join(stem)
    }

    /// Record table of the video named `stem`
    pub fn records_path(&self, stem: &str) -> PathBuf {
        self.output_root.join("output").join(format!("{}.csv", stem))
    }

    /// Annotated replay of the video file `file_name`
    pub fn demo_path(&self, file_name: &str) -> PathBuf {
        self.output_root.join("demos").join(file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.interval, 15);
        assert_eq!(config.margin, 200);
        assert_eq!(config.failure_policy, FailurePolicy::Abort);
        assert_eq!(config.max_match_gap_seconds, None);
        assert_eq!(config.emotion_model_layout, EmotionModelLayout::FerPlus);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_path_derivation() {
        let config = PipelineConfig {
            output_root: PathBuf::from("/data/run"),
            ..PipelineConfig::default()
        };

        assert_eq!(config.videos_dir(), PathBuf::from("/data/run/videos"));
        assert_eq!(config.frames_dir("[abc] Talk"), PathBuf::from("/data/run/saves/[abc] Talk"));
        assert_eq!(config.records_path("[abc] Talk"), PathBuf::from("/data/run/output/[abc] Talk.csv"));
        assert_eq!(config.demo_path("[abc] Talk.mp4"), PathBuf::from("/data/run/demos/[abc] Talk.mp4"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            PipelineConfig { interval: 0, ..PipelineConfig::default() },
            PipelineConfig { margin: 0, ..PipelineConfig::default() },
            PipelineConfig { person_score_threshold: 0.0, ..PipelineConfig::default() },
            PipelineConfig { nms_threshold: 1.5, ..PipelineConfig::default() },
            PipelineConfig { max_match_gap_seconds: Some(-1.0), ..PipelineConfig::default() },
            PipelineConfig { progress_every: 0, ..PipelineConfig::default() },
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(EmotionTrackError::InvalidConfig { .. })),
                "accepted {:?}",
                config
            );
        }
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"interval": 30, "failure_policy": "skip_frame", "max_match_gap_seconds": 2.5}"#,
        )
        .unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.interval, 30);
        assert_eq!(config.failure_policy, FailurePolicy::SkipFrame);
        assert_eq!(config.max_match_gap_seconds, Some(2.5));
        assert_eq!(config.margin, 200);
        assert_eq!(config.person_model, PathBuf::from("models/yolo11s.onnx"));
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"interval": 0}"#).unwrap();

        assert!(matches!(
            PipelineConfig::load(&path).unwrap_err(),
            EmotionTrackError::InvalidConfig { .. }
        ));
    }

    #[test]
    fn test_load_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ interval: ").unwrap();

        assert!(matches!(PipelineConfig::load(&path).unwrap_err(), EmotionTrackError::Json(_)));
    }
}
