//! Per-frame person detection and emotion classification.
//!
//! Each sampled frame moves through
//! `LOADED -> PERSON_DETECTED{0..n} -> EMOTION_CLASSIFIED -> RECORDED`:
//! the detector finds people, every person box is cropped and classified, and
//! one [`DetectionRecord`] per person is appended to the record table.

use std::path::Path;

use opencv::{core::{Mat, Rect}, imgcodecs, prelude::*};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, trace, warn};

use crate::common::{EmotionTrackError, Result};
use crate::emotion::{Emotion, EmotionScores};
use crate::record_store::{DetectionRecord, RecordWriter};
use crate::sampler::{FrameManifest, SampledFrame};
use crate::timestamp::Timestamp;

/// Class label the aggregator keeps from the detector output
pub const PERSON_LABEL: &str = "person";

/// Axis-aligned box in pixel coordinates, corners `(x1, y1)` and `(x2, y2)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Integer crop rectangle clamped to a `width` x `height` image
    ///
    /// Returns `None` when nothing of the box remains inside the image.
    pub fn to_rect(&self, width: i32, height: i32) -> Option<Rect> {
        let x1 = (self.x1.floor() as i32).clamp(0, width);
        let y1 = (self.y1.floor() as i32).clamp(0, height);
        let x2 = (self.x2.ceil() as i32).clamp(0, width);
        let y2 = (self.y2.ceil() as i32).clamp(0, height);

        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(Rect::new(x1, y1, x2 - x1, y2 - y1))
    }
}

/// One object reported by a detector
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub label: String,
    pub score: f32,
}

/// Locates objects in an image
pub trait PersonDetector {
    /// Boxes and class labels found in `image` (BGR)
    fn detect(&mut self, image: &Mat) -> Result<Vec<Detection>>;
}

/// Classifies the facial emotion of a cropped person
///
/// Implementations never try to find a face inside the crop; when no face is
/// visible they still return their best-effort distribution.
pub trait EmotionClassifier {
    fn classify(&mut self, crop: &Mat) -> Result<EmotionScores>;
}

/// What to do when detection or classification fails on a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the run on the first failing frame
    #[default]
    Abort,
    /// Log the frame and continue with the next one
    SkipFrame,
}

/// Counters reported at the end of an analysis pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisSummary {
    pub frames_processed: usize,
    pub frames_skipped: usize,
    pub frames_without_people: usize,
    pub records_written: usize,
}

/// Runs detection and classification over sampled frames
pub struct DetectionAggregator<D, C> {
    detector: D,
    classifier: C,
    policy: FailurePolicy,
    progress_every: usize,
}

impl<D: PersonDetector, C: EmotionClassifier> DetectionAggregator<D, C> {
    pub fn new(detector: D, classifier: C) -> Self {
        Self {
            detector,
            classifier,
            policy: FailurePolicy::default(),
            progress_every: 100,
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_progress_every(mut self, frames: usize) -> Self {
        self.progress_every = frames.max(1);
        self
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Person boxes in `image`, clamped to the image; other classes are dropped
    pub fn detect_people(&mut self, image: &Mat) -> Result<Vec<Rect>> {
        let (width, height) = (image.cols(), image.rows());
        let detections = self.detector.detect(image)?;
        let total = detections.len();

        let people: Vec<Rect> = detections
            .into_iter()
            .filter(|d| d.label == PERSON_LABEL)
            .filter_map(|d| d.bbox.to_rect(width, height))
            .collect();

        trace!("{} detections, {} usable person boxes", total, people.len());
        Ok(people)
    }

    /// Dominant emotion and full distribution for one cropped person
    pub fn classify_emotion(&mut self, crop: &Mat) -> Result<(Emotion, EmotionScores)> {
        let scores = self.classifier.classify(crop)?;
        Ok((scores.dominant(), scores))
    }

    /// Detect, classify and record every person in `frame`
    ///
    /// Every person is classified before anything is appended, so a frame that
    /// fails leaves no rows behind. The frame's records reach `store` as soon
    /// as the whole frame succeeds.
    #[instrument(skip(self, frame, store), fields(index = frame.index, timestamp = %frame.timestamp))]
    pub fn process_frame(&mut self, frame: &SampledFrame, store: &mut RecordWriter) -> Result<Vec<DetectionRecord>> {
        let people = self
            .detect_people(&frame.image)
            .map_err(|e| EmotionTrackError::frame_error(frame.index, format!("person detection failed: {}", e)))?;

        let mut records = Vec::with_capacity(people.len());
        for rect in people {
            let crop = Mat::roi(&frame.image, rect)?.try_clone()?;
            let (dominant, scores) = self
                .classify_emotion(&crop)
                .map_err(|e| EmotionTrackError::frame_error(frame.index, format!("emotion classification failed: {}", e)))?;

            let record = DetectionRecord::new(frame.timestamp, scores);
            debug_assert_eq!(record.dominant(), dominant);
            records.push(record);
        }

        for record in &records {
            store.append(record)?;
        }

        debug!("Frame {} at {}: {} people", frame.index, frame.timestamp, records.len());
        Ok(records)
    }

    /// Process every frame listed in `manifest`, in order
    ///
    /// # Errors
    /// With [`FailurePolicy::Abort`] the first failing frame ends the pass. With
    /// [`FailurePolicy::SkipFrame`] failing frames are logged and counted, but
    /// record table I/O errors still end the pass.
    #[instrument(skip(self, manifest, store), fields(frames = manifest.len()))]
    pub fn analyze_manifest(
        &mut self,
        manifest: &FrameManifest,
        frames_dir: &Path,
        store: &mut RecordWriter,
    ) -> Result<AnalysisSummary> {
        let mut summary = AnalysisSummary::default();
        let total = manifest.len();

        info!("Running inference on {} sampled frames", total);

        for entry in &manifest.frames {
            let result = load_frame(frames_dir, entry.index, entry.timestamp, &entry.file)
                .and_then(|frame| self.process_frame(&frame, store));

            match result {
                Ok(records) => {
                    summary.frames_processed += 1;
                    summary.records_written += records.len();
                    if records.is_empty() {
                        summary.frames_without_people += 1;
                    }
                }
                Err(e @ EmotionTrackError::Io(_)) => return Err(e),
                Err(e) if self.policy == FailurePolicy::SkipFrame => {
                    warn!("Skipping frame {} ({}): {}", entry.index, entry.file, e);
                    summary.frames_skipped += 1;
                }
                Err(e) => return Err(e),
            }

            let done = summary.frames_processed + summary.frames_skipped;
            if done % self.progress_every == 0 || done == total {
                info!(
                    "Inference progress: {}/{} frames ({:.1}%), {} records",
                    done, total, done as f64 * 100.0 / total.max(1) as f64, summary.records_written
                );
            }
        }

        info!(
            "Analysis complete: {} frames processed, {} skipped, {} records",
            summary.frames_processed, summary.frames_skipped, summary.records_written
        );
        Ok(summary)
    }
}

/// Decode one sampled frame image from disk
fn load_frame(frames_dir: &Path, index: u32, timestamp: Timestamp, file: &str) -> Result<SampledFrame> {
    let path = frames_dir.join(file);
    let path_str = path.to_str().ok_or_else(|| {
        EmotionTrackError::frame_error(index, format!("non UTF-8 frame path: {}", path.display()))
    })?;

    let image = imgcodecs::imread(path_str, imgcodecs::IMREAD_COLOR)?;
    if image.empty() {
        return Err(EmotionTrackError::frame_error(index, format!("could not decode {}", path.display())));
    }

    Ok(SampledFrame { index, timestamp, image })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record_store::load_all;
    use crate::sampler::{frame_file_name, label_frames, ManifestEntry, SamplingPlan};
    use opencv::core::{Scalar, Vector, CV_8UC3};

    /// Reports a fixed set of detections for every frame
    struct ScriptedDetector {
        detections: Vec<Detection>,
        fail_on_call: Option<usize>,
        calls: usize,
    }

    impl ScriptedDetector {
        fn new(detections: Vec<Detection>) -> Self {
            Self { detections, fail_on_call: None, calls: 0 }
        }
    }

    impl PersonDetector for ScriptedDetector {
        fn detect(&mut self, _image: &Mat) -> Result<Vec<Detection>> {
            self.calls += 1;
            if self.fail_on_call == Some(self.calls) {
                return Err(EmotionTrackError::config_error("detector exploded"));
            }
            Ok(self.detections.clone())
        }
    }

    /// Classifies by crop width: wide crops are happy, narrow ones sad
    struct WidthClassifier;

    impl EmotionClassifier for WidthClassifier {
        fn classify(&mut self, crop: &Mat) -> Result<EmotionScores> {
            let target = if crop.cols() > 20 { Emotion::Happy } else { Emotion::Sad };
            let pairs = Emotion::ALL
                .iter()
                .map(|e| (*e, if *e == target { 64.0 } else { 6.0 }));
            Ok(EmotionScores::from_pairs(pairs).expect("valid scores"))
        }
    }

    /// Wraps [`WidthClassifier`] and fails on one call
    struct FlakyClassifier {
        fail_on_call: usize,
        calls: usize,
    }

    impl EmotionClassifier for FlakyClassifier {
        fn classify(&mut self, crop: &Mat) -> Result<EmotionScores> {
            self.calls += 1;
            if self.calls == self.fail_on_call {
                return Err(EmotionTrackError::config_error("classifier exploded"));
            }
            WidthClassifier.classify(crop)
        }
    }

    fn detection(label: &str, x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
        Detection {
            bbox: BoundingBox::new(x1, y1, x2, y2),
            label: label.to_string(),
            score: 0.9,
        }
    }

    fn frame(index: u32, millis: u64) -> SampledFrame {
        let image = Mat::new_rows_cols_with_default(48, 64, CV_8UC3, Scalar::all(128.0)).unwrap();
        SampledFrame { index, timestamp: Timestamp::from_millis(millis), image }
    }

    fn write_frames(dir: &Path, count: usize, duration: f64) -> FrameManifest {
        let image = Mat::new_rows_cols_with_default(48, 64, CV_8UC3, Scalar::all(90.0)).unwrap();
        let frames = label_frames(count, duration)
            .into_iter()
            .enumerate()
            .map(|(i, timestamp)| {
                let file = frame_file_name(i as u32, timestamp);
                let path = dir.join(&file);
                imgcodecs::imwrite(path.to_str().unwrap(), &image, &Vector::new()).unwrap();
                ManifestEntry { index: i as u32, timestamp, file }
            })
            .collect();

        FrameManifest {
            video: "clip.mp4".into(),
            plan: SamplingPlan {
                source_fps: 30.0,
                duration_seconds: duration,
                interval: 15,
                extraction_rate: 2.0,
            },
            frames,
        }
    }

    #[test]
    fn test_bounding_box_clamping() {
        let rect = BoundingBox::new(-5.0, 10.2, 30.5, 100.0).to_rect(64, 48).unwrap();
        assert_eq!(rect, Rect::new(0, 10, 31, 38));

        assert!(BoundingBox::new(70.0, 0.0, 90.0, 10.0).to_rect(64, 48).is_none());
        assert!(BoundingBox::new(10.0, 10.0, 10.0, 20.0).to_rect(64, 48).is_none());
    }

    #[test]
    fn test_detect_people_filters_other_classes() {
        let detector = ScriptedDetector::new(vec![
            detection("person", 0.0, 0.0, 30.0, 40.0),
            detection("dog", 0.0, 0.0, 10.0, 10.0),
            detection("person", 200.0, 200.0, 300.0, 300.0),
        ]);
        let mut aggregator = DetectionAggregator::new(detector, WidthClassifier);
        let image = frame(0, 0).image;

        let people = aggregator.detect_people(&image).unwrap();
        assert_eq!(people, vec![Rect::new(0, 0, 30, 40)]);
    }

    #[test]
    fn test_process_frame_emits_one_record_per_person() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = RecordWriter::create(&dir.path().join("records.csv")).unwrap();
        let detector = ScriptedDetector::new(vec![
            detection("person", 0.0, 0.0, 40.0, 40.0),
            detection("person", 40.0, 0.0, 50.0, 40.0),
        ]);
        let mut aggregator = DetectionAggregator::new(detector, WidthClassifier);

        let records = aggregator.process_frame(&frame(3, 1500), &mut store).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].dominant(), Emotion::Happy);
        assert_eq!(records[1].dominant(), Emotion::Sad);
        assert!(records.iter().all(|r| r.timestamp().millis() == 1500));

        // Appended before process_frame returned
        let table = load_all(store.path()).unwrap();
        assert_eq!(table.records(), records.as_slice());
    }

    #[test]
    fn test_process_frame_without_people_records_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = RecordWriter::create(&dir.path().join("records.csv")).unwrap();
        let mut aggregator = DetectionAggregator::new(ScriptedDetector::new(vec![]), WidthClassifier);

        let records = aggregator.process_frame(&frame(0, 0), &mut store).unwrap();
        assert!(records.is_empty());
        assert_eq!(store.records_written(), 0);
    }

    #[test]
    fn test_analyze_manifest_records_all_frames() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_frames(dir.path(), 20, 10.0);
        let mut store = RecordWriter::create(&dir.path().join("records.csv")).unwrap();
        let detector = ScriptedDetector::new(vec![detection("person", 0.0, 0.0, 32.0, 48.0)]);
        let mut aggregator = DetectionAggregator::new(detector, WidthClassifier).with_progress_every(5);

        let summary = aggregator.analyze_manifest(&manifest, dir.path(), &mut store).unwrap();
        assert_eq!(summary.frames_processed, 20);
        assert_eq!(summary.records_written, 20);
        assert_eq!(summary.frames_skipped, 0);

        let table = load_all(store.path()).unwrap();
        let stamps: Vec<u64> = table.iter().map(|r| r.timestamp().millis()).collect();
        assert_eq!(stamps[..3], [0, 500, 1000]);
    }

    #[test]
    fn test_abort_policy_stops_on_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_frames(dir.path(), 4, 2.0);
        let mut store = RecordWriter::create(&dir.path().join("records.csv")).unwrap();
        let mut detector = ScriptedDetector::new(vec![detection("person", 0.0, 0.0, 32.0, 48.0)]);
        detector.fail_on_call = Some(2);
        let mut aggregator = DetectionAggregator::new(detector, WidthClassifier);

        let err = aggregator.analyze_manifest(&manifest, dir.path(), &mut store).unwrap_err();
        assert!(matches!(err, EmotionTrackError::FrameProcessingFailed { frame: 1, .. }));

        // The frame before the failure is already on disk
        assert_eq!(load_all(store.path()).unwrap().len(), 1);
    }

    #[test]
    fn test_skip_policy_continues_past_failures() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_frames(dir.path(), 4, 2.0);
        let mut store = RecordWriter::create(&dir.path().join("records.csv")).unwrap();
        let mut detector = ScriptedDetector::new(vec![detection("person", 0.0, 0.0, 32.0, 48.0)]);
        detector.fail_on_call = Some(2);
        let mut aggregator = DetectionAggregator::new(detector, WidthClassifier)
            .with_policy(FailurePolicy::SkipFrame);

        let summary = aggregator.analyze_manifest(&manifest, dir.path(), &mut store).unwrap();
        assert_eq!(summary.frames_processed, 3);
        assert_eq!(summary.frames_skipped, 1);
        assert_eq!(load_all(store.path()).unwrap().len(), 3);
    }

    #[test]
    fn test_failed_classification_leaves_no_partial_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = RecordWriter::create(&dir.path().join("records.csv")).unwrap();
        let detector = ScriptedDetector::new(vec![
            detection("person", 0.0, 0.0, 40.0, 40.0),
            detection("person", 40.0, 0.0, 50.0, 40.0),
        ]);
        let mut aggregator = DetectionAggregator::new(detector, FlakyClassifier { fail_on_call: 2, calls: 0 });

        let err = aggregator.process_frame(&frame(0, 0), &mut store).unwrap_err();
        assert!(matches!(err, EmotionTrackError::FrameProcessingFailed { frame: 0, .. }));
        assert_eq!(store.records_written(), 0);
        assert!(load_all(store.path()).unwrap().is_empty());
    }

    #[test]
    fn test_skipped_frame_rows_match_summary() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_frames(dir.path(), 3, 1.5);
        let mut store = RecordWriter::create(&dir.path().join("records.csv")).unwrap();
        let detector = ScriptedDetector::new(vec![
            detection("person", 0.0, 0.0, 32.0, 48.0),
            detection("person", 32.0, 0.0, 64.0, 48.0),
        ]);
        // Second person of the first frame fails
        let classifier = FlakyClassifier { fail_on_call: 2, calls: 0 };
        let mut aggregator = DetectionAggregator::new(detector, classifier).with_policy(FailurePolicy::SkipFrame);

        let summary = aggregator.analyze_manifest(&manifest, dir.path(), &mut store).unwrap();
        assert_eq!(summary.frames_skipped, 1);
        assert_eq!(summary.frames_processed, 2);
        assert_eq!(summary.records_written, 4);

        let table = load_all(store.path()).unwrap();
        assert_eq!(table.len(), summary.records_written);
        assert!(table.iter().all(|r| r.timestamp().millis() != 0));
    }

    #[test]
    fn test_missing_frame_file_is_frame_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = write_frames(dir.path(), 2, 1.0);
        manifest.frames[1].file = "frame_0001_missing.jpg".to_string();
        let mut store = RecordWriter::create(&dir.path().join("records.csv")).unwrap();
        let mut aggregator = DetectionAggregator::new(ScriptedDetector::new(vec![]), WidthClassifier);

        let err = aggregator.analyze_manifest(&manifest, dir.path(), &mut store).unwrap_err();
        assert!(matches!(err, EmotionTrackError::FrameProcessingFailed { frame: 1, .. }));
    }
}
