//! Face extraction via ONNX Runtime.
//!
//! Detection uses an UltraFace model (version-RFB-320) with two-tensor
//! score/box outputs; embeddings come from a MobileFaceNet model producing
//! 128-dimensional L2-normalized vectors. Both are pretrained external
//! models, consumed as-is.

use crate::types::{Embedding, FaceBox};
use image::{imageops, imageops::FilterType, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- UltraFace (version-RFB-320) ---
const DETECT_INPUT_WIDTH: u32 = 320;
const DETECT_INPUT_HEIGHT: u32 = 240;
const DETECT_MEAN: f32 = 127.0;
const DETECT_STD: f32 = 128.0;
const DETECT_CONFIDENCE_THRESHOLD: f32 = 0.7;
const DETECT_NMS_THRESHOLD: f32 = 0.3;

// --- MobileFaceNet ---
const EMBED_INPUT_SIZE: u32 = 112;
const EMBED_MEAN: f32 = 127.5;
const EMBED_STD: f32 = 127.5;
const EMBEDDING_DIM: usize = 128;

#[derive(Error, Debug)]
pub enum FaceError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// One detected face: bounding box in the coordinate space of the input
/// image, plus its embedding.
#[derive(Debug, Clone)]
pub struct FaceObservation {
    pub bbox: FaceBox,
    pub embedding: Embedding,
}

/// Produces face observations from a frame.
///
/// The detection and embedding models behind this seam are external
/// capabilities; the pipeline only consumes `(box, embedding)` pairs.
pub trait FaceExtractor: Send {
    fn extract(&mut self, image: &RgbImage) -> Result<Vec<FaceObservation>, FaceError>;
}

/// UltraFace + MobileFaceNet extractor.
pub struct OnnxFaceExtractor {
    detector: Session,
    embedder: Session,
}

impl OnnxFaceExtractor {
    /// Load both ONNX models from the given paths.
    pub fn load(detector_path: &str, embedder_path: &str) -> Result<Self, FaceError> {
        for path in [detector_path, embedder_path] {
            if !Path::new(path).exists() {
                return Err(FaceError::ModelNotFound(path.to_string()));
            }
        }

        let detector = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(detector_path)?;
        tracing::info!(path = detector_path, "loaded face detection model");

        let embedder = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(embedder_path)?;
        tracing::info!(path = embedder_path, "loaded face embedding model");

        Ok(Self { detector, embedder })
    }

    /// Detect faces, returning boxes in the input image's pixel space.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceBox>, FaceError> {
        let input = preprocess_rgb(
            image,
            DETECT_INPUT_WIDTH,
            DETECT_INPUT_HEIGHT,
            DETECT_MEAN,
            DETECT_STD,
        );

        let outputs = self
            .detector
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        // UltraFace exports two outputs: scores [1, N, 2] then boxes [1, N, 4].
        let (_, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| FaceError::InferenceFailed(format!("face scores: {e}")))?;
        let (_, boxes) = outputs[1]
            .try_extract_tensor::<f32>()
            .map_err(|e| FaceError::InferenceFailed(format!("face boxes: {e}")))?;

        let candidates = decode_faces(
            scores,
            boxes,
            image.width() as f32,
            image.height() as f32,
            DETECT_CONFIDENCE_THRESHOLD,
        );

        Ok(nms_faces(candidates, DETECT_NMS_THRESHOLD))
    }

    /// Extract an embedding for one detected face.
    fn embed(&mut self, image: &RgbImage, bbox: &FaceBox) -> Result<Embedding, FaceError> {
        let crop = crop_face(image, bbox);
        let input = preprocess_rgb(&crop, EMBED_INPUT_SIZE, EMBED_INPUT_SIZE, EMBED_MEAN, EMBED_STD);

        let outputs = self
            .embedder
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| FaceError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(FaceError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        // L2-normalize
        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw.to_vec()
        };

        Ok(Embedding::new(values))
    }
}

impl FaceExtractor for OnnxFaceExtractor {
    fn extract(&mut self, image: &RgbImage) -> Result<Vec<FaceObservation>, FaceError> {
        let boxes = self.detect(image)?;
        let mut observations = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            let embedding = self.embed(image, &bbox)?;
            observations.push(FaceObservation { bbox, embedding });
        }
        Ok(observations)
    }
}

/// Resize an RGB image and pack it into a normalized NCHW float tensor.
fn preprocess_rgb(image: &RgbImage, width: u32, height: u32, mean: f32, std: f32) -> Array4<f32> {
    let resized = if image.width() == width && image.height() == height {
        image.clone()
    } else {
        imageops::resize(image, width, height, FilterType::Triangle)
    };

    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - mean) / std;
        }
    }
    tensor
}

/// Decode UltraFace outputs into scored boxes in frame pixel space.
///
/// `scores` is `[N, 2]` flattened (background, face); `boxes` is `[N, 4]`
/// flattened corner coordinates normalized to `[0, 1]`.
fn decode_faces(
    scores: &[f32],
    boxes: &[f32],
    frame_width: f32,
    frame_height: f32,
    threshold: f32,
) -> Vec<(FaceBox, f32)> {
    let count = scores.len() / 2;
    let mut detections = Vec::new();

    for i in 0..count {
        let score = scores[i * 2 + 1];
        if score <= threshold {
            continue;
        }

        let off = i * 4;
        if off + 3 >= boxes.len() {
            continue;
        }
        let x1 = boxes[off].clamp(0.0, 1.0) * frame_width;
        let y1 = boxes[off + 1].clamp(0.0, 1.0) * frame_height;
        let x2 = boxes[off + 2].clamp(0.0, 1.0) * frame_width;
        let y2 = boxes[off + 3].clamp(0.0, 1.0) * frame_height;

        detections.push((
            FaceBox {
                top: y1,
                right: x2,
                bottom: y2,
                left: x1,
            },
            score,
        ));
    }

    detections
}

/// Non-Maximum Suppression over scored face boxes.
fn nms_faces(mut detections: Vec<(FaceBox, f32)>, iou_threshold: f32) -> Vec<FaceBox> {
    detections.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(detections[i].0);

        for j in (i + 1)..detections.len() {
            if !suppressed[j] && face_iou(&detections[i].0, &detections[j].0) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Intersection-over-Union between two face boxes.
fn face_iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let x1 = a.left.max(b.left);
    let y1 = a.top.max(b.top);
    let x2 = a.right.min(b.right);
    let y2 = a.bottom.min(b.bottom);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area_a = (a.right - a.left) * (a.bottom - a.top);
    let area_b = (b.right - b.left) * (b.bottom - b.top);
    let union = area_a + area_b - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

/// Crop a face region, clamped to image bounds, for embedding extraction.
fn crop_face(image: &RgbImage, bbox: &FaceBox) -> RgbImage {
    let x = (bbox.left.max(0.0) as u32).min(image.width().saturating_sub(1));
    let y = (bbox.top.max(0.0) as u32).min(image.height().saturating_sub(1));
    let w = ((bbox.right.min(image.width() as f32) as u32).saturating_sub(x)).max(1);
    let h = ((bbox.bottom.min(image.height() as f32) as u32).saturating_sub(y)).max(1);
    imageops::crop_imm(image, x, y, w, h).to_image()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(top: f32, right: f32, bottom: f32, left: f32) -> FaceBox {
        FaceBox {
            top,
            right,
            bottom,
            left,
        }
    }

    #[test]
    fn test_decode_faces_threshold() {
        // Two candidates: one above threshold, one below.
        let scores = vec![0.1, 0.9, 0.6, 0.4];
        let boxes = vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.5, 0.6, 0.6];
        let dets = decode_faces(&scores, &boxes, 320.0, 240.0, 0.7);

        assert_eq!(dets.len(), 1);
        let (b, score) = dets[0];
        assert!((score - 0.9).abs() < 1e-6);
        assert!((b.left - 32.0).abs() < 1e-3);
        assert!((b.top - 48.0).abs() < 1e-3);
        assert!((b.right - 96.0).abs() < 1e-3);
        assert!((b.bottom - 96.0).abs() < 1e-3);
    }

    #[test]
    fn test_decode_faces_clamps_coordinates() {
        // Box coordinates outside [0, 1] are clamped to the frame.
        let scores = vec![0.0, 0.99];
        let boxes = vec![-0.5, -0.2, 1.4, 1.1];
        let dets = decode_faces(&scores, &boxes, 100.0, 100.0, 0.7);

        assert_eq!(dets.len(), 1);
        let (b, _) = dets[0];
        assert_eq!(b.left, 0.0);
        assert_eq!(b.top, 0.0);
        assert_eq!(b.right, 100.0);
        assert_eq!(b.bottom, 100.0);
    }

    #[test]
    fn test_decode_faces_empty() {
        assert!(decode_faces(&[], &[], 320.0, 240.0, 0.7).is_empty());
    }

    #[test]
    fn test_face_iou_identical() {
        let a = face(0.0, 100.0, 100.0, 0.0);
        assert!((face_iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_face_iou_disjoint() {
        let a = face(0.0, 10.0, 10.0, 0.0);
        let b = face(50.0, 70.0, 70.0, 50.0);
        assert_eq!(face_iou(&a, &b), 0.0);
    }

    #[test]
    fn test_nms_suppresses_overlap() {
        let dets = vec![
            (face(0.0, 100.0, 100.0, 0.0), 0.9),
            (face(5.0, 105.0, 105.0, 5.0), 0.8),
            (face(200.0, 250.0, 250.0, 200.0), 0.75),
        ];
        let kept = nms_faces(dets, 0.3);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].left, 0.0);
        assert_eq!(kept[1].left, 200.0);
    }

    #[test]
    fn test_nms_keeps_highest_score_first() {
        let dets = vec![
            (face(0.0, 10.0, 10.0, 0.0), 0.71),
            (face(50.0, 60.0, 60.0, 50.0), 0.95),
        ];
        let kept = nms_faces(dets, 0.3);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].left, 50.0);
    }

    #[test]
    fn test_preprocess_shape_and_normalization() {
        let mut img = RgbImage::new(DETECT_INPUT_WIDTH, DETECT_INPUT_HEIGHT);
        for p in img.pixels_mut() {
            *p = image::Rgb([127, 127, 127]);
        }
        let tensor = preprocess_rgb(
            &img,
            DETECT_INPUT_WIDTH,
            DETECT_INPUT_HEIGHT,
            DETECT_MEAN,
            DETECT_STD,
        );
        assert_eq!(
            tensor.shape(),
            &[1, 3, DETECT_INPUT_HEIGHT as usize, DETECT_INPUT_WIDTH as usize]
        );
        // Pixel value equal to the mean normalizes to 0.
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        assert_eq!(tensor[[0, 2, 100, 200]], 0.0);
    }

    #[test]
    fn test_preprocess_resizes() {
        let img = RgbImage::new(64, 48);
        let tensor = preprocess_rgb(&img, EMBED_INPUT_SIZE, EMBED_INPUT_SIZE, EMBED_MEAN, EMBED_STD);
        assert_eq!(
            tensor.shape(),
            &[1, 3, EMBED_INPUT_SIZE as usize, EMBED_INPUT_SIZE as usize]
        );
    }

    #[test]
    fn test_crop_face_clamps_to_image() {
        let img = RgbImage::new(100, 80);
        let crop = crop_face(&img, &face(-10.0, 150.0, 120.0, -5.0));
        assert_eq!(crop.width(), 100);
        assert_eq!(crop.height(), 80);
    }

    #[test]
    fn test_crop_face_degenerate_box() {
        // A zero-area box still yields a non-empty crop.
        let img = RgbImage::new(100, 80);
        let crop = crop_face(&img, &face(10.0, 20.0, 10.0, 20.0));
        assert!(crop.width() >= 1);
        assert!(crop.height() >= 1);
    }
}
