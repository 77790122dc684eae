//! Error handling shared by every stage of the emotion tracking pipeline.
//!
//! Each variant names one failure mode of the two-pass pipeline, from probing
//! the source video to reloading the record table before rendering.

/// All possible errors from the emotion tracking pipeline
///
/// Every error is fatal for the current run. The only exception is a frame
/// skipped under [`FailurePolicy::SkipFrame`](crate::FailurePolicy::SkipFrame).
#[derive(Debug, thiserror::Error)]
pub enum EmotionTrackError {
    #[error("Video file not found: {path}")]
    VideoNotFound { path: String },

    #[error("Failed to open video file: {path}")]
    VideoOpenFailed { path: String },

    #[error("Invalid video format or corrupted file: {path}")]
    InvalidVideoFormat { path: String },

    #[error("No frames found in video")]
    EmptyVideo,

    #[error("Unable to determine {field} for video: {path}")]
    UnknownMetadata { path: String, field: &'static str },

    #[error("Malformed timestamp label '{label}': {reason}")]
    InvalidTimestamp { label: String, reason: String },

    #[error("Corrupt record table row at line {line}: {reason}")]
    CorruptRecord { line: u64, reason: String },

    #[error("{tool} failed: {reason}")]
    ExternalTool { tool: &'static str, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("OpenCV error: {0}")]
    OpenCvError(#[from] opencv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Frame processing failed at frame {frame}: {reason}")]
    FrameProcessingFailed { frame: u32, reason: String },
}

impl EmotionTrackError {
    /// Create a configuration error with a descriptive message
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::InvalidConfig { message: message.into() }
    }

    /// Create a frame processing error
    pub fn frame_error(frame: u32, reason: impl Into<String>) -> Self {
        Self::FrameProcessingFailed {
            frame,
            reason: reason.into()
        }
    }

    /// Create a timestamp format error
    pub fn timestamp_error(label: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTimestamp {
            label: label.into(),
            reason: reason.into(),
        }
    }

    /// Create a record table error for the given 1-based line
    pub fn record_error(line: u64, reason: impl Into<String>) -> Self {
        Self::CorruptRecord {
            line,
            reason: reason.into(),
        }
    }

    /// Create an external tool failure (ffmpeg, ffprobe, yt-dlp)
    pub fn tool_error(tool: &'static str, reason: impl Into<String>) -> Self {
        Self::ExternalTool {
            tool,
            reason: reason.into(),
        }
    }

    /// Create a missing metadata error for `path`
    pub fn unknown_metadata(path: impl Into<String>, field: &'static str) -> Self {
        Self::UnknownMetadata {
            path: path.into(),
            field,
        }
    }
}

/// Convenient Result type for pipeline operations
pub type Result<T> = std::result::Result<T, EmotionTrackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_constructors() {
        let error = EmotionTrackError::config_error("Interval must be positive");
        assert!(matches!(error, EmotionTrackError::InvalidConfig { .. }));

        let error = EmotionTrackError::frame_error(42, "Classifier failed");
        assert!(matches!(error, EmotionTrackError::FrameProcessingFailed { frame: 42, .. }));

        let error = EmotionTrackError::record_error(7, "bad mapping");
        assert!(matches!(error, EmotionTrackError::CorruptRecord { line: 7, .. }));

        let error = EmotionTrackError::unknown_metadata("clip.mp4", "frame rate");
        assert!(matches!(error, EmotionTrackError::UnknownMetadata { field: "frame rate", .. }));
    }

    #[test]
    fn test_error_display() {
        let error = EmotionTrackError::VideoNotFound {
            path: "test.mp4".to_string()
        };
        assert_eq!(error.to_string(), "Video file not found: test.mp4");

        let error = EmotionTrackError::unknown_metadata("test.mp4", "duration");
        assert_eq!(error.to_string(), "Unable to determine duration for video: test.mp4");

        let error = EmotionTrackError::timestamp_error("00-01", "expected 3 fields, got 2");
        assert_eq!(
            error.to_string(),
            "Malformed timestamp label '00-01': expected 3 fields, got 2"
        );

        let error = EmotionTrackError::tool_error("ffmpeg", "exit status 1");
        assert_eq!(error.to_string(), "ffmpeg failed: exit status 1");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let error: EmotionTrackError = io.into();
        assert!(matches!(error, EmotionTrackError::Io(_)));
    }
}
