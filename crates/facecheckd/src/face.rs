//! Face verification capability, decided once at startup and carried in the
//! router state.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use facecheck_core::{Comparison, FaceRepresentation};

use crate::config::Config;
use crate::engine::{self, EngineError};

/// Face comparison and embedding backend.
#[async_trait]
pub trait FaceService: Send + Sync {
    /// Compare the face in `known` with the face in `new`.
    async fn compare(&self, known: &Path, new: &Path) -> Result<Comparison, EngineError>;

    /// Embed every face found in `image`; empty when there is none.
    async fn represent(&self, image: &Path) -> Result<Vec<FaceRepresentation>, EngineError>;
}

#[derive(Clone)]
pub enum FaceCapability {
    Enabled(Arc<dyn FaceService>),
    Disabled { reason: String },
}

impl FaceCapability {
    /// Build the capability from configuration. Model load failures disable
    /// verification instead of stopping the service.
    pub fn from_config(config: &Config) -> Self {
        if !config.face_enabled {
            tracing::info!("face verification disabled via FACECHECK_FACE_ENABLED=0");
            return Self::Disabled {
                reason: "face verification is disabled by configuration".into(),
            };
        }

        match engine::spawn_engine(&config.model_dir, config.similarity_threshold) {
            Ok(handle) => Self::Enabled(Arc::new(handle)),
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    model_dir = %config.model_dir.display(),
                    "face engine unavailable; verification disabled"
                );
                Self::Disabled {
                    reason: format!("face verification unavailable: {err}"),
                }
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled(_))
    }
}
