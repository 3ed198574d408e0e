//! ArcFace recognizer (w600k_r50, 512-d embeddings) via ONNX Runtime.
//!
//! Each face is warped onto the 112x112 ArcFace template using its five
//! landmarks before inference.

use std::path::Path;

use image::imageops;
use image::{GrayImage, Luma};
use ort::session::Session;
use ort::value::TensorRef;
use thiserror::Error;

use crate::frame::{self, Frame};
use crate::types::{BoundingBox, Embedding};

const ALIGNED_SIZE: u32 = 112;
const INPUT_MEAN: f32 = 127.5;
const INPUT_STD: f32 = 127.5;
const EMBEDDING_DIM: usize = 512;

/// Landmark positions of the ArcFace template: eyes, nose tip, mouth corners.
const TEMPLATE: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("recognition model not found: {0}")]
    ModelNotFound(String),
    #[error("face has no landmarks to align with")]
    NoLandmarks,
    #[error("model returned {0} values, expected {EMBEDDING_DIM}")]
    EmbeddingSize(usize),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }
        Ok(Self {
            session: crate::open_session(model_path)?,
        })
    }

    /// Unit-length embedding of `face`, which must carry landmarks.
    pub fn extract(&mut self, frame: &Frame, face: &BoundingBox) -> Result<Embedding, RecognizerError> {
        let landmarks = face.landmarks.as_ref().ok_or(RecognizerError::NoLandmarks)?;
        let aligned = align(frame.image(), landmarks);
        let input = frame::to_tensor(&aligned, INPUT_MEAN, INPUT_STD);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0].try_extract_tensor::<f32>()?;
        if raw.len() != EMBEDDING_DIM {
            return Err(RecognizerError::EmbeddingSize(raw.len()));
        }
        Ok(Embedding::normalized(raw.to_vec()))
    }
}

/// Rotation, uniform scale and translation: `p' = [[a, -b], [b, a]] p + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Least-squares fit mapping `src` points onto `dst` points. `None` when
    /// the source points all coincide.
    fn fit(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Option<Self> {
        let n = src.len() as f32;
        let mean = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / n, sy / n)
        };
        let (smx, smy) = mean(src);
        let (dmx, dmy) = mean(dst);

        let (mut dot, mut cross, mut var) = (0.0f32, 0.0f32, 0.0f32);
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst) {
            let (sx, sy, dx, dy) = (sx - smx, sy - smy, dx - dmx, dy - dmy);
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
            var += sx * sx + sy * sy;
        }
        if var <= f32::EPSILON {
            return None;
        }

        let (a, b) = (dot / var, cross / var);
        Some(Self {
            a,
            b,
            tx: dmx - (a * smx - b * smy),
            ty: dmy - (b * smx + a * smy),
        })
    }

    fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (self.a * x - self.b * y + self.tx, self.b * x + self.a * y + self.ty)
    }

    fn inverse(&self) -> Option<Self> {
        let det = self.a * self.a + self.b * self.b;
        if det <= f32::EPSILON {
            return None;
        }
        let (a, b) = (self.a / det, -self.b / det);
        Some(Self {
            a,
            b,
            tx: -(a * self.tx - b * self.ty),
            ty: -(b * self.tx + a * self.ty),
        })
    }
}

/// Warp the face onto the template. Pixels that fall outside the source are black.
fn align(image: &GrayImage, landmarks: &[(f32, f32); 5]) -> GrayImage {
    let Some(to_source) = Similarity::fit(landmarks, &TEMPLATE).and_then(|t| t.inverse()) else {
        return GrayImage::new(ALIGNED_SIZE, ALIGNED_SIZE);
    };
    GrayImage::from_fn(ALIGNED_SIZE, ALIGNED_SIZE, |x, y| {
        let (sx, sy) = to_source.apply((x as f32, y as f32));
        imageops::interpolate_bilinear(image, sx, sy).unwrap_or(Luma([0]))
    })
}
