//! Frame pipeline.
//!
//! Decodes an incoming encoded frame, runs face extraction on a
//! quarter-scale copy and phone detection on the full frame, rescales face
//! boxes into full-frame space, correlates each face with each phone by
//! centroid distance, and assembles the analysis payload.

use crate::face::{FaceError, FaceExtractor};
use crate::phone::{PhoneDetector, PhoneError};
use crate::roster::Roster;
use crate::types::{Alert, FaceMatch, FrameAnalysis, Severity};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{imageops, imageops::FilterType, RgbImage};
use std::sync::Arc;
use thiserror::Error;

/// Linear downsample divisor applied before face extraction. Face boxes
/// come back at 1/4 scale and are multiplied back up before correlation.
const FACE_DOWNSCALE: u32 = 4;

/// Default strict upper bound on embedding distance for a positive
/// identification.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.5;

/// Default strict upper bound on face/phone centroid distance, in
/// full-frame pixels.
pub const DEFAULT_PHONE_RADIUS: f32 = 400.0;

/// Name reported for faces matching no known identity.
pub const UNKNOWN_NAME: &str = "Unknown";

const ALERT_KIND_PHONE: &str = "phone_detected";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("undecodable frame: {0}")]
    Image(#[from] image::ImageError),
    #[error("face extraction: {0}")]
    Face(#[from] FaceError),
    #[error("phone detection: {0}")]
    Phone(#[from] PhoneError),
}

/// The frame-to-alert correlator. Stateless across frames; the roster
/// snapshot is read-only.
pub struct FrameAnalyzer {
    faces: Box<dyn FaceExtractor>,
    phones: Box<dyn PhoneDetector>,
    roster: Arc<Roster>,
    match_threshold: f32,
    phone_radius: f32,
}

impl FrameAnalyzer {
    pub fn new(
        faces: Box<dyn FaceExtractor>,
        phones: Box<dyn PhoneDetector>,
        roster: Arc<Roster>,
        match_threshold: f32,
        phone_radius: f32,
    ) -> Self {
        Self {
            faces,
            phones,
            roster,
            match_threshold,
            phone_radius,
        }
    }

    /// Analyze one base64-encoded frame (optionally data-URI-prefixed).
    pub fn analyze_encoded(&mut self, payload: &str) -> Result<FrameAnalysis, PipelineError> {
        let frame = decode_frame(payload)?;
        self.analyze(&frame)
    }

    /// Analyze one decoded frame.
    pub fn analyze(&mut self, frame: &RgbImage) -> Result<FrameAnalysis, PipelineError> {
        let small = imageops::resize(
            frame,
            (frame.width() / FACE_DOWNSCALE).max(1),
            (frame.height() / FACE_DOWNSCALE).max(1),
            FilterType::Triangle,
        );

        // The two detectors are independent: faces on the downsampled copy,
        // phones on the full-resolution frame.
        let observations = self.faces.extract(&small)?;
        let phone_boxes = self.phones.detect(frame)?;
        let phone_detected = !phone_boxes.is_empty();

        let mut faces = Vec::with_capacity(observations.len());
        let mut alerts = Vec::new();

        for obs in &observations {
            let name = self
                .roster
                .identify(&obs.embedding, self.match_threshold)
                .map(|identity| identity.name.clone())
                .unwrap_or_else(|| UNKNOWN_NAME.to_string());

            let bounds = obs.bbox.to_full_frame(FACE_DOWNSCALE as f32);

            let mut is_using_phone = false;
            if phone_detected {
                // One alert per (face, phone) pair inside the radius; pairs
                // are intentionally not deduplicated.
                for phone in &phone_boxes {
                    if bounds.centroid_distance(phone) < self.phone_radius {
                        is_using_phone = true;
                        alerts.push(phone_alert(&name));
                    }
                }
            }

            faces.push(FaceMatch {
                name,
                bounds: bounds.as_array(),
                is_using_phone,
            });
        }

        Ok(FrameAnalysis {
            faces,
            phone_detected,
            alerts,
        })
    }
}

/// Decode a base64 frame payload into an RGB image, stripping an optional
/// `data:image/...;base64,` prefix.
pub fn decode_frame(payload: &str) -> Result<RgbImage, PipelineError> {
    let raw = match payload.split_once("base64,") {
        Some((_, rest)) => rest,
        None => payload,
    };
    let bytes = BASE64.decode(raw)?;
    Ok(image::load_from_memory(&bytes)?.to_rgb8())
}

fn phone_alert(name: &str) -> Alert {
    if name == UNKNOWN_NAME {
        Alert {
            kind: ALERT_KIND_PHONE.into(),
            message: "📱 Unknown person using phone!".into(),
            student: UNKNOWN_NAME.into(),
            severity: Severity::Medium,
        }
    } else {
        Alert {
            kind: ALERT_KIND_PHONE.into(),
            message: format!("📱 {name} is using a phone!"),
            student: name.to_string(),
            severity: Severity::High,
        }
    }
}
