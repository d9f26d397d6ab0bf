use edupulse_core::face::OnnxFaceExtractor;
use edupulse_core::phone::YoloPhoneDetector;
use edupulse_core::pipeline::PipelineError;
use edupulse_core::{FrameAnalysis, FrameAnalyzer, Roster};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::config::Config;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("face models: {0}")]
    Face(#[from] edupulse_core::face::FaceError),
    #[error("phone model: {0}")]
    Phone(#[from] edupulse_core::phone::PhoneError),
    #[error("roster: {0}")]
    Roster(#[from] edupulse_core::roster::RosterError),
    #[error("pipeline: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from connection handlers to the engine thread.
enum EngineRequest {
    ProcessFrame {
        payload: String,
        reply: oneshot::Sender<Result<FrameAnalysis, PipelineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Analyze one encoded frame. Requests are served to completion in
    /// arrival order.
    pub async fn process_frame(&self, payload: String) -> Result<FrameAnalysis, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::ProcessFrame {
                payload,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }
}

/// Spawn the analysis engine on a dedicated OS thread.
///
/// Loads the ONNX model sessions and the student roster synchronously
/// (fail-fast), then enters a request loop. The roster snapshot is built
/// once here and never mutated while serving.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let mut extractor =
        OnnxFaceExtractor::load(&config.face_detector_path(), &config.face_embedder_path())?;
    let phones = YoloPhoneDetector::load(&config.phone_model_path())?;

    let roster = Roster::load(&config.encodings_path, &config.students_dir, &mut extractor)?;
    tracing::info!(students = roster.len(), "roster ready");

    let mut analyzer = FrameAnalyzer::new(
        Box::new(extractor),
        Box::new(phones),
        Arc::new(roster),
        config.match_threshold,
        config.phone_radius,
    );

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("edupulse-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::ProcessFrame { payload, reply } => {
                        let _ = reply.send(analyzer.analyze_encoded(&payload));
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    Ok(EngineHandle { tx })
}
