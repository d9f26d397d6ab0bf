//! Wire protocol — JSON event envelopes exchanged over the WebSocket.

use edupulse_core::FrameAnalysis;
use serde::{Deserialize, Serialize};

/// Inbound client event.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// One encoded video frame. `image` may carry a data-URI prefix; a
    /// message without it is ignored entirely.
    ProcessFrame { image: Option<String> },
}

/// Outbound server event.
#[derive(Debug, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    AnalysisResult(FrameAnalysis),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_process_frame() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"event":"process_frame","data":{"image":"abc"}}"#).unwrap();
        let ClientEvent::ProcessFrame { image } = event;
        assert_eq!(image.as_deref(), Some("abc"));
    }

    #[test]
    fn test_parse_process_frame_without_image() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"event":"process_frame","data":{}}"#).unwrap();
        let ClientEvent::ProcessFrame { image } = event;
        assert!(image.is_none());
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let result = serde_json::from_str::<ClientEvent>(r#"{"event":"bogus","data":{}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_analysis_result_envelope_shape() {
        let event = ServerEvent::AnalysisResult(FrameAnalysis::default());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "analysis_result");
        assert_eq!(json["data"]["phone_detected"], false);
        assert!(json["data"]["faces"].as_array().unwrap().is_empty());
        assert!(json["data"]["alerts"].as_array().unwrap().is_empty());
    }
}
