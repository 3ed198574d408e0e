use std::path::{Path, PathBuf};

use async_trait::async_trait;
use facecheck_core::{AnalyzerError, Comparison, FaceAnalyzer, FaceRepresentation};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::face::FaceService;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Compare {
        known: PathBuf,
        new: PathBuf,
        threshold: f32,
        reply: oneshot::Sender<Result<Comparison, EngineError>>,
    },
    Represent {
        image: PathBuf,
        reply: oneshot::Sender<Result<Vec<FaceRepresentation>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    threshold: f32,
}

/// Spawn the engine on a dedicated OS thread.
///
/// Both ONNX models are loaded before the thread starts, so a missing or
/// broken model is reported here rather than on the first request.
pub fn spawn_engine(model_dir: &Path, threshold: f32) -> Result<EngineHandle, EngineError> {
    let mut analyzer = FaceAnalyzer::load(model_dir)?;
    tracing::info!(model_dir = %model_dir.display(), threshold, "face models loaded");

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("facecheck-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Compare {
                        known,
                        new,
                        threshold,
                        reply,
                    } => {
                        let result = analyzer
                            .compare(&known, &new, threshold)
                            .map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Represent { image, reply } => {
                        let result = analyzer.represent(&image).map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx, threshold })
}

#[async_trait]
impl FaceService for EngineHandle {
    async fn compare(&self, known: &Path, new: &Path) -> Result<Comparison, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Compare {
                known: known.to_path_buf(),
                new: new.to_path_buf(),
                threshold: self.threshold,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    async fn represent(&self, image: &Path) -> Result<Vec<FaceRepresentation>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Represent {
                image: image.to_path_buf(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}
