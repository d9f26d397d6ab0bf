//! Cell-phone detection via a YOLOv8 ONNX model.
//!
//! Runs on the full-resolution frame, keeps only the COCO "cell phone"
//! class, and is stateless across frames (no tracking).

use crate::types::Rect;
use image::{imageops, imageops::FilterType, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- YOLOv8 ---
const YOLO_INPUT_SIZE: u32 = 640;
const YOLO_NUM_CLASSES: usize = 80;
/// COCO class index for "cell phone".
const CELL_PHONE_CLASS: usize = 67;
/// Detections at or above this confidence are kept.
const PHONE_CONFIDENCE_THRESHOLD: f32 = 0.4;
const PHONE_NMS_THRESHOLD: f32 = 0.45;
/// Gray padding value used by ultralytics letterboxing.
const LETTERBOX_FILL: f32 = 114.0;

#[derive(Error, Debug)]
pub enum PhoneError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Produces full-frame cell-phone boxes from a frame.
pub trait PhoneDetector: Send {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Rect>, PhoneError>;
}

/// Metadata for coordinate de-mapping after letterbox resize.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// YOLOv8-based phone detector.
pub struct YoloPhoneDetector {
    session: Session,
}

impl YoloPhoneDetector {
    /// Load the YOLOv8 ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, PhoneError> {
        if !Path::new(model_path).exists() {
            return Err(PhoneError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;
        tracing::info!(path = model_path, "loaded phone detection model");

        Ok(Self { session })
    }

    /// Letterbox the frame into a normalized NCHW tensor.
    fn preprocess(&self, image: &RgbImage) -> (Array4<f32>, Letterbox) {
        let input = YOLO_INPUT_SIZE as f32;
        let scale = (input / image.width() as f32).min(input / image.height() as f32);
        let new_w = (image.width() as f32 * scale).round() as u32;
        let new_h = (image.height() as f32 * scale).round() as u32;
        let pad_x = (input - new_w as f32) / 2.0;
        let pad_y = (input - new_h as f32) / 2.0;

        let resized = imageops::resize(image, new_w.max(1), new_h.max(1), FilterType::Triangle);

        let size = YOLO_INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::from_elem((1, 3, size, size), LETTERBOX_FILL / 255.0);

        let x_off = pad_x.floor() as usize;
        let y_off = pad_y.floor() as usize;
        for (x, y, pixel) in resized.enumerate_pixels() {
            let tx = x as usize + x_off;
            let ty = y as usize + y_off;
            if tx < size && ty < size {
                for c in 0..3 {
                    tensor[[0, c, ty, tx]] = pixel[c] as f32 / 255.0;
                }
            }
        }

        (tensor, Letterbox { scale, pad_x, pad_y })
    }
}

impl PhoneDetector for YoloPhoneDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Rect>, PhoneError> {
        let (input, letterbox) = self.preprocess(image);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, predictions) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| PhoneError::InferenceFailed(format!("phone predictions: {e}")))?;

        let candidates = decode_phones(
            predictions,
            &letterbox,
            image.width() as f32,
            image.height() as f32,
            PHONE_CONFIDENCE_THRESHOLD,
        );

        Ok(nms_rects(candidates, PHONE_NMS_THRESHOLD))
    }
}

/// Decode the YOLOv8 `[1, 4 + classes, anchors]` output, keeping only
/// "cell phone" detections at or above the confidence threshold.
///
/// Boxes are center-form in letterbox space; returned corners are mapped
/// back into full-frame pixels and clamped to the frame.
fn decode_phones(
    predictions: &[f32],
    letterbox: &Letterbox,
    frame_width: f32,
    frame_height: f32,
    threshold: f32,
) -> Vec<(Rect, f32)> {
    let rows = 4 + YOLO_NUM_CLASSES;
    let anchors = predictions.len() / rows;
    let mut detections = Vec::new();

    for a in 0..anchors {
        let score = predictions[(4 + CELL_PHONE_CLASS) * anchors + a];
        if score < threshold {
            continue;
        }

        let cx = predictions[a];
        let cy = predictions[anchors + a];
        let w = predictions[2 * anchors + a];
        let h = predictions[3 * anchors + a];

        let x1 = ((cx - w / 2.0) - letterbox.pad_x) / letterbox.scale;
        let y1 = ((cy - h / 2.0) - letterbox.pad_y) / letterbox.scale;
        let x2 = ((cx + w / 2.0) - letterbox.pad_x) / letterbox.scale;
        let y2 = ((cy + h / 2.0) - letterbox.pad_y) / letterbox.scale;

        detections.push((
            Rect::new(
                x1.clamp(0.0, frame_width),
                y1.clamp(0.0, frame_height),
                x2.clamp(0.0, frame_width),
                y2.clamp(0.0, frame_height),
            ),
            score,
        ));
    }

    detections
}

/// Non-Maximum Suppression over scored boxes.
fn nms_rects(mut detections: Vec<(Rect, f32)>, iou_threshold: f32) -> Vec<Rect> {
    detections.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(detections[i].0);

        for j in (i + 1)..detections.len() {
            if !suppressed[j] && iou(&detections[i].0, &detections[j].0) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Intersection-over-Union between two boxes.
fn iou(a: &Rect, b: &Rect) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width() * a.height() + b.width() * b.height() - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a flat `[4 + classes, anchors]` prediction tensor from
    /// (cx, cy, w, h, class, score) entries.
    fn predictions(anchors: usize, entries: &[(usize, f32, f32, f32, f32, usize, f32)]) -> Vec<f32> {
        let rows = 4 + YOLO_NUM_CLASSES;
        let mut data = vec![0.0f32; rows * anchors];
        for &(a, cx, cy, w, h, class, score) in entries {
            data[a] = cx;
            data[anchors + a] = cy;
            data[2 * anchors + a] = w;
            data[3 * anchors + a] = h;
            data[(4 + class) * anchors + a] = score;
        }
        data
    }

    fn identity_letterbox() -> Letterbox {
        Letterbox {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
        }
    }

    #[test]
    fn test_decode_keeps_cell_phone_class_only() {
        // Anchor 0: a person (class 0) at high confidence, anchor 1: a phone.
        let data = predictions(
            2,
            &[
                (0, 100.0, 100.0, 50.0, 50.0, 0, 0.95),
                (1, 300.0, 200.0, 40.0, 80.0, CELL_PHONE_CLASS, 0.8),
            ],
        );
        let dets = decode_phones(&data, &identity_letterbox(), 640.0, 640.0, 0.4);

        assert_eq!(dets.len(), 1);
        let (rect, score) = dets[0];
        assert!((score - 0.8).abs() < 1e-6);
        assert_eq!(rect, Rect::new(280.0, 160.0, 320.0, 240.0));
    }

    #[test]
    fn test_decode_confidence_is_inclusive() {
        // Exactly at the threshold is kept; just below is dropped.
        let data = predictions(
            2,
            &[
                (0, 100.0, 100.0, 10.0, 10.0, CELL_PHONE_CLASS, 0.4),
                (1, 200.0, 200.0, 10.0, 10.0, CELL_PHONE_CLASS, 0.39),
            ],
        );
        let dets = decode_phones(&data, &identity_letterbox(), 640.0, 640.0, 0.4);
        assert_eq!(dets.len(), 1);
        assert!((dets[0].0.x1 - 95.0).abs() < 1e-3);
    }

    #[test]
    fn test_decode_unletterboxes_coordinates() {
        // 1280x720 frame letterboxed into 640x640: scale 0.5, pad_y 40.
        let lb = Letterbox {
            scale: 0.5,
            pad_x: 0.0,
            pad_y: 40.0,
        };
        let data = predictions(1, &[(0, 320.0, 200.0, 100.0, 40.0, CELL_PHONE_CLASS, 0.9)]);
        let dets = decode_phones(&data, &lb, 1280.0, 720.0, 0.4);

        assert_eq!(dets.len(), 1);
        let rect = dets[0].0;
        assert!((rect.x1 - 540.0).abs() < 1e-3);
        assert!((rect.y1 - 280.0).abs() < 1e-3);
        assert!((rect.x2 - 740.0).abs() < 1e-3);
        assert!((rect.y2 - 360.0).abs() < 1e-3);
    }

    #[test]
    fn test_decode_clamps_to_frame() {
        let data = predictions(1, &[(0, 5.0, 5.0, 40.0, 40.0, CELL_PHONE_CLASS, 0.9)]);
        let dets = decode_phones(&data, &identity_letterbox(), 640.0, 640.0, 0.4);
        let rect = dets[0].0;
        assert_eq!(rect.x1, 0.0);
        assert_eq!(rect.y1, 0.0);
    }

    #[test]
    fn test_iou_partial_overlap() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(5.0, 0.0, 15.0, 10.0);
        // Overlap 50, union 150.
        assert!((iou(&a, &b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_duplicates() {
        let dets = vec![
            (Rect::new(0.0, 0.0, 100.0, 100.0), 0.9),
            (Rect::new(2.0, 2.0, 102.0, 102.0), 0.6),
            (Rect::new(300.0, 300.0, 350.0, 350.0), 0.5),
        ];
        let kept = nms_rects(dets, 0.45);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0], Rect::new(0.0, 0.0, 100.0, 100.0));
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms_rects(vec![], 0.45).is_empty());
    }

    #[test]
    fn test_letterbox_roundtrip() {
        // A point mapped into letterbox space and decoded back lands where
        // it started.
        let lb = Letterbox {
            scale: 0.5,
            pad_x: 0.0,
            pad_y: 140.0,
        };
        let (orig_x, orig_y) = (800.0f32, 300.0f32);
        let boxed_x = orig_x * lb.scale + lb.pad_x;
        let boxed_y = orig_y * lb.scale + lb.pad_y;
        assert!(((boxed_x - lb.pad_x) / lb.scale - orig_x).abs() < 1e-3);
        assert!(((boxed_y - lb.pad_y) / lb.scale - orig_y).abs() < 1e-3);
    }
}
