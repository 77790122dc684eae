//! Annotated replay of the original video
//!
//! Every source frame is padded with a black panel on its right edge, and the
//! panel lists the confidences of the record nearest to the frame's playback
//! time. The dominant emotion is drawn in green and the rest in white.

use std::fs;
use std::path::Path;

use opencv::{
    core::{self, Mat, Point, Scalar, Size},
    highgui, imgproc,
    prelude::*,
    videoio::VideoWriter,
};
use serde::Serialize;
use tracing::{debug, info, instrument, trace};

use crate::common::{EmotionTrackError, Result};
use crate::matcher::TemporalMatcher;
use crate::record_store::{DetectionRecord, RecordTable};
use crate::video_stream::VideoStream;

pub const DEFAULT_MARGIN: i32 = 200;

const TEXT_OFFSET_X: i32 = 10;
const LINE_HEIGHT: i32 = 30;
const FONT_SCALE: f64 = 0.6;
const THICKNESS: i32 = 2;
const PREVIEW_WINDOW: &str = "Emotion Tracking";

/// Outcome of a render pass
#[derive(Debug, Clone, Serialize)]
pub struct RenderSummary {
    pub frames_written: usize,
    /// Frames that received a confidence panel
    pub frames_annotated: usize,
    pub fps: f64,
    pub width: i32,
    pub height: i32,
}

/// Writes the original video with a confidence panel on every frame
#[derive(Debug, Clone)]
pub struct OverlayRenderer {
    margin: i32,
    max_gap: Option<f64>,
}

impl Default for OverlayRenderer {
    fn default() -> Self {
        Self::new(DEFAULT_MARGIN)
    }
}

impl OverlayRenderer {
    pub fn new(margin: i32) -> Self {
        assert!(margin > 0, "margin must be positive, got {}", margin);
        Self { margin, max_gap: None }
    }

    /// Leave the panel blank when the nearest record is more than `seconds` away
    pub fn with_max_gap(mut self, seconds: Option<f64>) -> Self {
        self.max_gap = seconds;
        self
    }

    pub fn margin(&self) -> i32 {
        self.margin
    }

    /// Render `source` with annotations from `table` into `out`
    ///
    /// The output has the same frame count and fps as the source, and every
    /// frame is `margin` pixels wider.
    #[instrument(skip(self, table), fields(records = table.len(), margin = self.margin))]
    pub fn render(&self, source: &Path, table: &RecordTable, out: &Path) -> Result<RenderSummary> {
        let mut stream = VideoStream::open(source)?;
        let fps = stream.fps();
        let size = Size::new(stream.width() + self.margin, stream.height());

        // Nothing is created on disk for a source without frames
        let Some(first) = stream.read_frame()? else {
            return Err(EmotionTrackError::EmptyVideo);
        };

        if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let out_str = out.to_string_lossy();
        let mut writer = VideoWriter::new(&out_str, fourcc_for(out)?, fps, size, true)?;
        if !writer.is_opened()? {
            return Err(EmotionTrackError::VideoOpenFailed { path: out_str.into_owned() });
        }

        info!(
            "Rendering {} -> {} at {:.3} fps, {}x{}",
            source.display(), out.display(), fps, size.width, size.height
        );

        let matcher = TemporalMatcher::new(table);
        let mut padded = Mat::default();
        let mut frames_written = 0usize;
        let mut frames_annotated = 0usize;

        let mut next = Some(first);
        while let Some(frame) = next {
            let t = frames_written as f64 / fps;
            let record = match self.max_gap {
                Some(gap) => matcher.nearest_within(t, gap),
                None => matcher.nearest(t),
            };

            core::copy_make_border(
                &frame,
                &mut padded,
                0,
                0,
                0,
                self.margin,
                core::BORDER_CONSTANT,
                Scalar::all(0.0),
            )?;

            if let Some(record) = record {
                trace!("Frame {} at {:.3}s -> record at {}", frames_written, t, record.timestamp());
                draw_panel(&mut padded, record, stream.width())?;
                frames_annotated += 1;
            }

            writer.write(&padded)?;
            frames_written += 1;

            if frames_written % 500 == 0 {
                debug!("Rendered {} frames ({:.1}%)", frames_written, stream.progress_percent());
            }
            next = stream.read_frame()?;
        }

        writer.release()?;

        info!("Rendered {} frames, {} annotated", frames_written, frames_annotated);
        Ok(RenderSummary {
            frames_written,
            frames_annotated,
            fps,
            width: size.width,
            height: size.height,
        })
    }
}

/// Confidence lines in label order, as drawn on the panel
pub fn panel_lines(record: &DetectionRecord) -> Vec<(String, bool)> {
    record
        .confidence()
        .iter()
        .map(|(emotion, value)| (format!("{}: {:.2}%", emotion, value), emotion == record.dominant()))
        .collect()
}

fn draw_panel(canvas: &mut Mat, record: &DetectionRecord, source_width: i32) -> Result<()> {
    let green = Scalar::new(0.0, 255.0, 0.0, 0.0);
    let white = Scalar::new(255.0, 255.0, 255.0, 0.0);

    for (i, (text, dominant)) in panel_lines(record).iter().enumerate() {
        imgproc::put_text(
            canvas,
            text,
            Point::new(source_width + TEXT_OFFSET_X, LINE_HEIGHT * (i as i32 + 1)),
            imgproc::FONT_HERSHEY_SIMPLEX,
            FONT_SCALE,
            if *dominant { green } else { white },
            THICKNESS,
            imgproc::LINE_AA,
            false,
        )?;
    }
    Ok(())
}

fn fourcc_for(out: &Path) -> Result<i32> {
    let is_avi = out
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("avi"));

    let fourcc = if is_avi {
        VideoWriter::fourcc('M', 'J', 'P', 'G')?
    } else {
        VideoWriter::fourcc('m', 'p', '4', 'v')?
    };
    Ok(fourcc)
}

/// Play a video in a window at its native rate; `q` stops playback
///
/// Returns the number of frames shown.
#[instrument]
pub fn preview(path: &Path) -> Result<usize> {
    let mut stream = VideoStream::open(path)?;
    let delay = ((1000.0 / stream.fps()) as i32).max(1);

    highgui::named_window(PREVIEW_WINDOW, highgui::WINDOW_AUTOSIZE)?;

    let mut shown = 0usize;
    while let Some(frame) = stream.read_frame()? {
        highgui::imshow(PREVIEW_WINDOW, &frame)?;
        shown += 1;

        if highgui::wait_key(delay)? == i32::from(b'q') {
            info!("Preview stopped after {} frames", shown);
            break;
        }
    }

    highgui::destroy_window(PREVIEW_WINDOW)?;
    Ok(shown)
}
