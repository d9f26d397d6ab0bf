use serde::{Deserialize, Serialize};

/// Axis-aligned box in full-frame pixel space, `(x1, y1)` top-left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Rect {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Geometric center, `((x1+x2)/2, (y1+y2)/2)`.
    pub fn centroid(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Euclidean distance between the centroids of two boxes.
    pub fn centroid_distance(&self, other: &Rect) -> f32 {
        let (ax, ay) = self.centroid();
        let (bx, by) = other.centroid();
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }

    /// Corner coordinates in `[x1, y1, x2, y2]` wire order.
    pub fn as_array(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

/// Face box in the coordinate space of the downsampled detection frame,
/// `(top, right, bottom, left)` ordering as produced by the face pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    pub left: f32,
}

impl FaceBox {
    /// Rescale into full-frame space, reordering to `(x1, y1, x2, y2)`.
    pub fn to_full_frame(&self, factor: f32) -> Rect {
        Rect {
            x1: self.left * factor,
            y1: self.top * factor,
            x2: self.right * factor,
            y2: self.bottom * factor,
        }
    }
}

/// Face embedding vector (128-dimensional, L2-normalized).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Euclidean distance to another embedding. Lower = more similar.
    pub fn distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Alert severity: `High` when the face is a recognized student,
/// `Medium` for an unidentified face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
}

/// A phone-use alert for one (face, phone) pair. Transient, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub student: String,
    pub severity: Severity,
}

/// Per-face result in full-frame coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMatch {
    pub name: String,
    #[serde(rename = "box")]
    pub bounds: [f32; 4],
    pub is_using_phone: bool,
}

/// Complete analysis of one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameAnalysis {
    pub faces: Vec<FaceMatch>,
    pub phone_detected: bool,
    pub alerts: Vec<Alert>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centroid() {
        let r = Rect::new(0.0, 0.0, 100.0, 50.0);
        assert_eq!(r.centroid(), (50.0, 25.0));
    }

    #[test]
    fn test_centroid_distance() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0); // centroid (5, 5)
        let b = Rect::new(3.0, 9.0, 13.0, 9.0); // centroid (8, 9)
        assert!((a.centroid_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_centroid_distance_symmetric() {
        let a = Rect::new(0.0, 0.0, 4.0, 4.0);
        let b = Rect::new(100.0, 20.0, 140.0, 60.0);
        assert_eq!(a.centroid_distance(&b), b.centroid_distance(&a));
    }

    #[test]
    fn test_face_box_rescale_reorders_corners() {
        // (top, right, bottom, left) at quarter scale maps to
        // (left*4, top*4, right*4, bottom*4) in (x1, y1, x2, y2) order.
        let face = FaceBox {
            top: 10.0,
            right: 40.0,
            bottom: 30.0,
            left: 20.0,
        };
        let full = face.to_full_frame(4.0);
        assert_eq!(full.as_array(), [80.0, 40.0, 160.0, 120.0]);
    }

    #[test]
    fn test_embedding_distance_zero_for_identical() {
        let a = Embedding::new(vec![0.5, -0.25, 1.0]);
        assert_eq!(a.distance(&a), 0.0);
    }

    #[test]
    fn test_embedding_distance() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_severity_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Severity::High).unwrap(), "\"high\"");
        assert_eq!(serde_json::to_string(&Severity::Medium).unwrap(), "\"medium\"");
    }

    #[test]
    fn test_alert_wire_shape() {
        let alert = Alert {
            kind: "phone_detected".into(),
            message: "msg".into(),
            student: "Aman Singh".into(),
            severity: Severity::High,
        };
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["type"], "phone_detected");
        assert_eq!(json["student"], "Aman Singh");
        assert_eq!(json["severity"], "high");
    }

    #[test]
    fn test_face_match_wire_shape() {
        let m = FaceMatch {
            name: "Unknown".into(),
            bounds: [1.0, 2.0, 3.0, 4.0],
            is_using_phone: false,
        };
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["box"], serde_json::json!([1.0, 2.0, 3.0, 4.0]));
        assert_eq!(json["is_using_phone"], false);
    }
}
