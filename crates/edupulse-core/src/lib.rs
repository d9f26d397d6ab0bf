//! edupulse-core — Classroom frame analysis engine.
//!
//! Runs face recognition (UltraFace detection + MobileFaceNet embeddings)
//! and cell-phone detection (YOLOv8), both via ONNX Runtime, and correlates
//! the two into per-student phone-use alerts.

pub mod face;
pub mod phone;
pub mod pipeline;
pub mod roster;
pub mod types;

pub use pipeline::FrameAnalyzer;
pub use roster::{Identity, Roster};
pub use types::{Alert, Embedding, FrameAnalysis, Rect, Severity};

/// Default location for bundled ONNX model files.
pub fn default_model_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("/usr/share/edupulse/models")
}
