use edupulse_core::pipeline::{DEFAULT_MATCH_THRESHOLD, DEFAULT_PHONE_RADIUS};
use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// WebSocket listen address.
    pub listen_addr: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Directory of labeled student reference images.
    pub students_dir: PathBuf,
    /// Path to the binary encoding cache.
    pub encodings_path: PathBuf,
    /// Strict upper bound on embedding distance for a positive
    /// identification.
    pub match_threshold: f32,
    /// Strict upper bound on face/phone centroid distance, in pixels.
    pub phone_radius: f32,
}

impl Config {
    /// Load configuration from `EDUPULSE_*` environment variables with
    /// defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("EDUPULSE_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| edupulse_core::default_model_dir());

        let data_dir = std::env::var("EDUPULSE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("XDG_DATA_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| {
                        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                        PathBuf::from(home).join(".local/share")
                    })
                    .join("edupulse")
            });

        let students_dir = std::env::var("EDUPULSE_STUDENTS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("students"));

        let encodings_path = std::env::var("EDUPULSE_ENCODINGS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("encodings.bin"));

        Self {
            listen_addr: std::env::var("EDUPULSE_LISTEN_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:5000".to_string()),
            model_dir,
            students_dir,
            encodings_path,
            match_threshold: env_f32("EDUPULSE_MATCH_THRESHOLD", DEFAULT_MATCH_THRESHOLD),
            phone_radius: env_f32("EDUPULSE_PHONE_RADIUS", DEFAULT_PHONE_RADIUS),
        }
    }

    /// Path to the UltraFace face-detection model.
    pub fn face_detector_path(&self) -> String {
        self.model_dir
            .join("version-RFB-320.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the MobileFaceNet embedding model.
    pub fn face_embedder_path(&self) -> String {
        self.model_dir
            .join("mobilefacenet.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the YOLOv8 phone-detection model.
    pub fn phone_model_path(&self) -> String {
        self.model_dir
            .join("yolov8n.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
