use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Integer pixel rectangle of this box, clamped to the frame.
    pub fn facial_area(&self, frame_width: u32, frame_height: u32) -> FacialArea {
        let x0 = self.x.max(0.0).round() as u32;
        let y0 = self.y.max(0.0).round() as u32;
        let x1 = ((self.x + self.width).round().max(0.0) as u32).min(frame_width);
        let y1 = ((self.y + self.height).round().max(0.0) as u32).min(frame_height);
        let x = x0.min(frame_width);
        let y = y0.min(frame_height);
        FacialArea {
            x,
            y,
            w: x1.saturating_sub(x),
            h: y1.saturating_sub(y),
        }
    }

    /// Intersection over union with `other`.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix = ((self.x + self.width).min(other.x + other.width) - self.x.max(other.x)).max(0.0);
        let iy = ((self.y + self.height).min(other.y + other.height) - self.y.max(other.y)).max(0.0);
        let inter = ix * iy;
        let union = self.width * self.height + other.width * other.height - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// L2-normalized face embedding (512 values for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    /// Scale `raw` to unit length. An all-zero vector is kept as is.
    pub fn normalized(raw: Vec<f32>) -> Self {
        let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.into_iter().map(|v| v / norm).collect()
        } else {
            raw
        };
        Self { values }
    }

    /// Cosine similarity in [-1, 1]; 0 when either vector is zero.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let (dot, aa, bb) = self
            .values
            .iter()
            .zip(&other.values)
            .fold((0.0f32, 0.0f32, 0.0f32), |(dot, aa, bb), (a, b)| {
                (dot + a * b, aa + a * a, bb + b * b)
            });
        let denom = (aa * bb).sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }
}

/// Pixel rectangle of a face inside the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacialArea {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// One detected face with its embedding. A list of these is the payload
/// persisted as a face embedding row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceRepresentation {
    pub embedding: Vec<f32>,
    pub facial_area: FacialArea,
    pub face_confidence: f32,
}

/// Outcome of comparing a known image against a new one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub verified: bool,
    /// Cosine similarity of the two faces, 0.0 when either image had no face.
    pub similarity: f32,
    pub distance: f32,
    pub threshold: f32,
    /// False when at least one image had no detectable face.
    pub faces_detected: bool,
}

impl Comparison {
    /// A non-match for images where detection found nothing to compare.
    pub fn no_face(threshold: f32) -> Self {
        Self {
            verified: false,
            similarity: 0.0,
            distance: 1.0,
            threshold,
            faces_detected: false,
        }
    }

    pub fn from_embeddings(known: &Embedding, new: &Embedding, threshold: f32) -> Self {
        let similarity = known.similarity(new);
        Self {
            verified: similarity >= threshold,
            similarity,
            distance: 1.0 - similarity,
            threshold,
            faces_detected: true,
        }
    }
}
