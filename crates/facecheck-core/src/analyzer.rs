//! One-to-one face comparison and per-face representation of image files.

use crate::detector::{DetectorError, FaceDetector};
use crate::frame::{Frame, FrameError};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Comparison, FaceRepresentation};
use crate::{DETECTOR_MODEL_FILE, RECOGNIZER_MODEL_FILE};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("image error: {0}")]
    Frame(#[from] FrameError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Detector and recognizer loaded together.
///
/// ONNX sessions need exclusive access, so every call takes `&mut self`;
/// callers that share an analyzer serialize access to it.
pub struct FaceAnalyzer {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl FaceAnalyzer {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, AnalyzerError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE))?;
        Ok(Self { detector, recognizer })
    }

    /// Compare the most confident face of `known` with that of `new`.
    ///
    /// An image without a usable face yields a non-match rather than an
    /// error; unreadable images and inference failures are errors.
    pub fn compare(&mut self, known: &Path, new: &Path, threshold: f32) -> Result<Comparison, AnalyzerError> {
        let known_frame = Frame::load(known)?;
        let new_frame = Frame::load(new)?;

        let Some(known_face) = self.best_face(&known_frame)? else {
            tracing::debug!(image = %known.display(), "compare: no face in known image");
            return Ok(Comparison::no_face(threshold));
        };
        let Some(new_face) = self.best_face(&new_frame)? else {
            tracing::debug!(image = %new.display(), "compare: no face in new image");
            return Ok(Comparison::no_face(threshold));
        };

        let known_emb = self.recognizer.extract(&known_frame, &known_face)?;
        let new_emb = self.recognizer.extract(&new_frame, &new_face)?;
        let comparison = Comparison::from_embeddings(&known_emb, &new_emb, threshold);

        tracing::info!(
            similarity = comparison.similarity,
            threshold,
            verified = comparison.verified,
            known_confidence = known_face.confidence,
            new_confidence = new_face.confidence,
            "compare: done"
        );
        Ok(comparison)
    }

    /// Embed every detected face of the image, most confident first.
    ///
    /// An empty result means the image had no usable face.
    pub fn represent(&mut self, image: &Path) -> Result<Vec<FaceRepresentation>, AnalyzerError> {
        let frame = Frame::load(image)?;
        let faces = self.detector.detect(&frame)?;

        let mut out = Vec::with_capacity(faces.len());
        for face in faces.iter().filter(|f| f.landmarks.is_some()) {
            let embedding = self.recognizer.extract(&frame, face)?;
            out.push(FaceRepresentation {
                embedding: embedding.values,
                facial_area: face.facial_area(frame.width(), frame.height()),
                face_confidence: face.confidence,
            });
        }

        tracing::debug!(image = %image.display(), faces = out.len(), "represent: done");
        Ok(out)
    }

    fn best_face(&mut self, frame: &Frame) -> Result<Option<BoundingBox>, AnalyzerError> {
        let faces = self.detector.detect(frame)?;
        Ok(pick_best_face(faces))
    }
}

/// Highest-confidence face that carries landmarks.
fn pick_best_face(faces: Vec<BoundingBox>) -> Option<BoundingBox> {
    faces
        .into_iter()
        .filter(|f| f.landmarks.is_some())
        .max_by(|a, b| {
            a.confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}
