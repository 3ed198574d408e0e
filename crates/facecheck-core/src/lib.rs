//! facecheck-core: face comparison and embedding for the facecheck service.
//!
//! Images are decoded to grayscale, faces are found with SCRFD, aligned to
//! the ArcFace template and embedded with ArcFace. Both models run on the
//! CPU through ONNX Runtime.

pub mod analyzer;
pub mod detector;
pub mod frame;
pub mod recognizer;
pub mod types;

use std::path::{Path, PathBuf};

use ort::session::Session;

pub use analyzer::{AnalyzerError, FaceAnalyzer};
pub use detector::FaceDetector;
pub use frame::Frame;
pub use recognizer::FaceRecognizer;
pub use types::{BoundingBox, Comparison, Embedding, FaceRepresentation, FacialArea};

/// File name of the SCRFD detection model inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// File name of the ArcFace recognition model inside the model directory.
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

/// Default model directory: `$XDG_DATA_HOME/facecheck/models`, falling back
/// to `$HOME/.local/share/facecheck/models`.
pub fn default_model_dir() -> PathBuf {
    data_home().join("facecheck").join("models")
}

/// `$XDG_DATA_HOME`, or `$HOME/.local/share`, or `/tmp` as a last resort.
pub fn data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
}

/// Open an ONNX model for CPU inference on two intra-op threads.
pub(crate) fn open_session(model_path: &Path) -> Result<Session, ort::Error> {
    let session = Session::builder()?
        .with_intra_threads(2)?
        .commit_from_file(model_path)?;
    tracing::info!(
        path = %model_path.display(),
        outputs = session.outputs().len(),
        "onnx model loaded"
    );
    Ok(session)
}
