//! OpenCV DNN backed implementations of the detector and classifier traits.
//!
//! Both models are loaded from ONNX files:
//! * person detection: an Ultralytics YOLO export (`yolo11s.onnx`, output
//!   `[1, 4 + classes, anchors]`, COCO class 0 is `person`)
//! * emotion classification: a FER2013 style 48x48 grayscale classifier
//!   (softmax over angry, disgust, fear, happy, sad, surprise, neutral) or the
//!   64x64 FER+ model with its 8-class logits.

use std::path::Path;

use opencv::{
    core::{Mat, Rect, Scalar, Size, Vector, CV_32F},
    dnn, imgproc,
    prelude::*,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, trace};

use crate::common::{EmotionTrackError, Result};
use crate::detection::{BoundingBox, Detection, EmotionClassifier, PersonDetector};
use crate::emotion::EmotionScores;

const YOLO_INPUT_SIZE: i32 = 640;

/// COCO class names in YOLO output order
const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

fn load_onnx(path: &Path) -> Result<dnn::Net> {
    if !path.is_file() {
        return Err(EmotionTrackError::config_error(format!("model file not found: {}", path.display())));
    }
    let path_str = path
        .to_str()
        .ok_or_else(|| EmotionTrackError::config_error(format!("non UTF-8 model path: {}", path.display())))?;

    let mut net = dnn::read_net_from_onnx(path_str)?;
    net.set_preferable_backend(dnn::DNN_BACKEND_OPENCV)?;
    net.set_preferable_target(dnn::DNN_TARGET_CPU)?;
    Ok(net)
}

/// YOLO object detector running on OpenCV DNN
pub struct YoloPersonDetector {
    net: dnn::Net,
    score_threshold: f32,
    nms_threshold: f32,
}

impl YoloPersonDetector {
    /// Load the ONNX model at `path` with default thresholds (0.25 score, 0.45 IoU)
    #[instrument]
    pub fn new(path: &Path) -> Result<Self> {
        let net = load_onnx(path)?;
        info!("Loaded person detector from {}", path.display());
        Ok(Self {
            net,
            score_threshold: 0.25,
            nms_threshold: 0.45,
        })
    }

    pub fn with_thresholds(mut self, score_threshold: f32, nms_threshold: f32) -> Self {
        self.score_threshold = score_threshold;
        self.nms_threshold = nms_threshold;
        self
    }
}

impl PersonDetector for YoloPersonDetector {
    fn detect(&mut self, image: &Mat) -> Result<Vec<Detection>> {
        if image.empty() {
            return Ok(Vec::new());
        }

        let blob = dnn::blob_from_image(
            image,
            1.0 / 255.0,
            Size::new(YOLO_INPUT_SIZE, YOLO_INPUT_SIZE),
            Scalar::default(),
            true,
            false,
            CV_32F,
        )?;
        self.net.set_input_def(&blob)?;
        let output = self.net.forward_single_def()?;

        let data = output.data_typed::<f32>()?;
        let stride = 4 + COCO_CLASSES.len();
        if data.len() % stride != 0 {
            return Err(EmotionTrackError::config_error(format!(
                "unexpected YOLO output of {} values, expected a multiple of {}",
                data.len(),
                stride
            )));
        }

        let scale = (
            image.cols() as f32 / YOLO_INPUT_SIZE as f32,
            image.rows() as f32 / YOLO_INPUT_SIZE as f32,
        );
        let candidates = decode_yolo_output(data, COCO_CLASSES.len(), scale, self.score_threshold);

        let boxes: Vector<Rect> = candidates
            .iter()
            .map(|d| {
                Rect::new(
                    d.bbox.x1 as i32,
                    d.bbox.y1 as i32,
                    (d.bbox.x2 - d.bbox.x1) as i32,
                    (d.bbox.y2 - d.bbox.y1) as i32,
                )
            })
            .collect();
        let scores: Vector<f32> = candidates.iter().map(|d| d.score).collect();
        let mut keep = Vector::<i32>::new();
        dnn::nms_boxes(&boxes, &scores, self.score_threshold, self.nms_threshold, &mut keep, 1.0, 0)?;

        let detections: Vec<Detection> = keep
            .iter()
            .filter_map(|i| candidates.get(i as usize).cloned())
            .collect();

        trace!("YOLO kept {} of {} candidates", detections.len(), candidates.len());
        Ok(detections)
    }
}

/// Decode a channel-major `[4 + classes, anchors]` YOLO output
///
/// Each anchor is `cx, cy, w, h` in network input pixels followed by one score
/// per class. `scale` maps input pixels back to the source image.
fn decode_yolo_output(data: &[f32], num_classes: usize, scale: (f32, f32), score_threshold: f32) -> Vec<Detection> {
    let stride = 4 + num_classes;
    let anchors = data.len() / stride;
    let at = |channel: usize, anchor: usize| data[channel * anchors + anchor];

    let mut detections = Vec::new();
    for anchor in 0..anchors {
        let (class_id, score) = (0..num_classes)
            .map(|c| (c, at(4 + c, anchor)))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

        if score < score_threshold {
            continue;
        }

        let (cx, cy, w, h) = (at(0, anchor), at(1, anchor), at(2, anchor), at(3, anchor));
        let bbox = BoundingBox::new(
            (cx - w / 2.0) * scale.0,
            (cy - h / 2.0) * scale.1,
            (cx + w / 2.0) * scale.0,
            (cy + h / 2.0) * scale.1,
        );
        let label = COCO_CLASSES
            .get(class_id)
            .map_or_else(|| format!("class_{}", class_id), |name| name.to_string());

        detections.push(Detection { bbox, label, score });
    }
    detections
}

/// Input/output convention of the emotion model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmotionModelLayout {
    /// 48x48 grayscale in `[0, 1]`, softmax over the seven labels in canonical order
    Fer2013,
    /// 64x64 grayscale in `[0, 255]`, logits over
    /// neutral, happiness, surprise, sadness, anger, disgust, fear, contempt
    #[default]
    FerPlus,
}

impl EmotionModelLayout {
    fn input_size(&self) -> i32 {
        match self {
            EmotionModelLayout::Fer2013 => 48,
            EmotionModelLayout::FerPlus => 64,
        }
    }

    fn input_scale(&self) -> f64 {
        match self {
            EmotionModelLayout::Fer2013 => 1.0 / 255.0,
            EmotionModelLayout::FerPlus => 1.0,
        }
    }

    /// Turn raw model output into canonical-order probabilities
    fn probabilities(&self, raw: &[f32]) -> Vec<f32> {
        match self {
            EmotionModelLayout::Fer2013 => raw.to_vec(),
            EmotionModelLayout::FerPlus => {
                if raw.len() != 8 {
                    return raw.to_vec();
                }
                let p = softmax(raw);
                // contempt (index 7) has no counterpart and is dropped
                let mapped = [p[4], p[5], p[6], p[1], p[3], p[2], p[0]];
                let total: f32 = mapped.iter().sum();
                mapped.iter().map(|v| if total > 0.0 { v / total } else { 0.0 }).collect()
            }
        }
    }
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::MIN, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.iter().map(|v| v / sum).collect()
}

/// Facial expression classifier running on OpenCV DNN
///
/// The whole crop is classified; no face localisation is attempted, so a crop
/// without a visible face still yields a distribution.
pub struct FerEmotionClassifier {
    net: dnn::Net,
    layout: EmotionModelLayout,
}

impl FerEmotionClassifier {
    #[instrument]
    pub fn new(path: &Path, layout: EmotionModelLayout) -> Result<Self> {
        let net = load_onnx(path)?;
        info!("Loaded emotion classifier ({:?}) from {}", layout, path.display());
        Ok(Self { net, layout })
    }
}

impl EmotionClassifier for FerEmotionClassifier {
    fn classify(&mut self, crop: &Mat) -> Result<EmotionScores> {
        let mut gray = Mat::default();
        if crop.channels() == 1 {
            crop.copy_to(&mut gray)?;
        } else {
            imgproc::cvt_color_def(crop, &mut gray, imgproc::COLOR_BGR2GRAY)?;
        }

        let side = self.layout.input_size();
        let blob = dnn::blob_from_image(
            &gray,
            self.layout.input_scale(),
            Size::new(side, side),
            Scalar::default(),
            false,
            false,
            CV_32F,
        )?;
        self.net.set_input_def(&blob)?;
        let output = self.net.forward_single_def()?;

        let raw = output.data_typed::<f32>()?;
        let probabilities = self.layout.probabilities(raw);

        let scores = EmotionScores::from_probabilities(&probabilities)
            .map_err(|e| EmotionTrackError::config_error(format!("emotion model output rejected: {}", e)))?;

        debug!("Classified crop {}x{} as {}", crop.cols(), crop.rows(), scores.dominant());
        Ok(scores)
    }
}
