//! Video stream handling using OpenCV backend
//!
//! This module wraps OpenCV's VideoCapture for sequential frame reading. The
//! renderer walks every frame of the original video through it, and the
//! preview window uses it to play back the annotated result.

use std::path::Path;

use opencv::{core::Mat, prelude::*, videoio};
use tracing::{debug, info, instrument, warn};

use crate::common::{EmotionTrackError, Result};

/// Wrapper around OpenCV VideoCapture for consistent video reading
pub struct VideoStream {
    cap: videoio::VideoCapture,
    fps: f64,
    frame_count: i32,
    current_frame: i32,
    width: i32,
    height: i32,
    path: String,
}

impl VideoStream {
    /// Open a video file for reading
    ///
    /// # Errors
    /// * `VideoNotFound` - If the file doesn't exist
    /// * `VideoOpenFailed` - If OpenCV can't open the file
    /// * `InvalidVideoFormat` - If frame rate or dimensions are unusable
    #[instrument]
    pub fn open(path: &Path) -> Result<Self> {
        let path_str = path.to_string_lossy().into_owned();
        info!("Opening video stream: {}", path_str);

        if !path.is_file() {
            return Err(EmotionTrackError::VideoNotFound { path: path_str });
        }

        let cap = videoio::VideoCapture::from_file(&path_str, videoio::CAP_ANY).map_err(|e| {
            warn!("Failed to create VideoCapture: {}", e);
            EmotionTrackError::VideoOpenFailed { path: path_str.clone() }
        })?;

        if !cap.is_opened()? {
            return Err(EmotionTrackError::VideoOpenFailed { path: path_str });
        }

        let property = |prop: i32| {
            cap.get(prop).map_err(|e| {
                warn!("Failed to read capture property {}: {}", prop, e);
                EmotionTrackError::InvalidVideoFormat { path: path_str.clone() }
            })
        };

        let fps = property(videoio::CAP_PROP_FPS)?;
        let frame_count = property(videoio::CAP_PROP_FRAME_COUNT)? as i32;
        let width = property(videoio::CAP_PROP_FRAME_WIDTH)? as i32;
        let height = property(videoio::CAP_PROP_FRAME_HEIGHT)? as i32;

        if fps <= 0.0 || width <= 0 || height <= 0 {
            return Err(EmotionTrackError::InvalidVideoFormat { path: path_str });
        }

        if frame_count <= 0 {
            warn!("Container does not report a frame count for {}", path_str);
        }

        info!(
            "Video opened successfully - FPS: {}, Frames: {}, Size: {}x{}",
            fps, frame_count, width, height
        );

        Ok(Self {
            cap,
            fps,
            frame_count: frame_count.max(0),
            current_frame: 0,
            width,
            height,
            path: path_str,
        })
    }

    /// Read the next frame, or `None` at the end of the video
    pub fn read_frame(&mut self) -> Result<Option<Mat>> {
        let mut frame = Mat::default();

        let success = self.cap.read(&mut frame).map_err(|e| {
            EmotionTrackError::frame_error(
                self.current_frame as u32,
                format!("OpenCV read failed: {}", e)
            )
        })?;

        if !success || frame.empty() {
            debug!("Reached end of video at frame {}", self.current_frame);
            return Ok(None);
        }

        if frame.rows() != self.height || frame.cols() != self.width {
            return Err(EmotionTrackError::frame_error(
                self.current_frame as u32,
                format!(
                    "frame size {}x{} differs from stream size {}x{}",
                    frame.cols(), frame.rows(), self.width, self.height
                ),
            ));
        }

        self.current_frame += 1;
        Ok(Some(frame))
    }

    /// Get the video framerate
    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    /// Get the progress as a percentage (0.0 to 100.0)
    pub fn progress_percent(&self) -> f64 {
        if self.frame_count == 0 {
            100.0
        } else {
            (self.current_frame as f64 / self.frame_count as f64 * 100.0).min(100.0)
        }
    }
}

// Implement Debug manually to avoid showing internal OpenCV state
impl std::fmt::Debug for VideoStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoStream")
            .field("path", &self.path)
            .field("fps", &self.fps)
            .field("frame_count", &self.frame_count)
            .field("current_frame", &self.current_frame)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}
