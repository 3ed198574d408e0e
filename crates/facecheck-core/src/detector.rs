//! SCRFD face detector via ONNX Runtime.
//!
//! The frame is letterboxed onto a 640x640 canvas, each of the three stride
//! levels is decoded into boxes with five landmarks, and overlapping boxes
//! are suppressed.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use ort::session::Session;
use ort::value::TensorRef;
use thiserror::Error;

use crate::frame::{self, Frame};
use crate::types::BoundingBox;

const INPUT_SIZE: u32 = 640;
const INPUT_MEAN: f32 = 127.5;
const INPUT_STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU_THRESHOLD: f32 = 0.4;
const STRIDES: [u32; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;
/// Mid-gray canvas; normalizes to roughly zero.
const PAD_VALUE: u8 = 128;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detection model not found: {0}")]
    ModelNotFound(String),
    #[error("detection model has {0} outputs, expected 9 (score/bbox/kps per stride)")]
    UnexpectedOutputs(usize),
    #[error("cannot read {kind} output for stride {stride}: {source}")]
    Output {
        stride: u32,
        kind: &'static str,
        #[source]
        source: ort::Error,
    },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Output tensor positions for one stride level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LevelOutputs {
    score: usize,
    bbox: usize,
    kps: usize,
}

pub struct FaceDetector {
    session: Session,
    layout: [LevelOutputs; 3],
}

impl FaceDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = crate::open_session(model_path)?;
        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 9 {
            return Err(DetectorError::UnexpectedOutputs(names.len()));
        }

        let layout = output_layout(&names);
        tracing::debug!(?layout, "SCRFD output layout");
        Ok(Self { session, layout })
    }

    /// Faces in the frame, most confident first. Coordinates are in frame pixels.
    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, DetectorError> {
        let letterbox = Letterbox::fit(frame.width(), frame.height(), INPUT_SIZE);
        let canvas = letterbox.apply(frame.image());
        let input = frame::to_tensor(&canvas, INPUT_MEAN, INPUT_STD);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (&stride, level) in STRIDES.iter().zip(&self.layout) {
            let tensor = |idx: usize, kind: &'static str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|source| DetectorError::Output { stride, kind, source })
            };
            let tensors = LevelTensors {
                scores: tensor(level.score, "score")?,
                boxes: tensor(level.bbox, "bbox")?,
                landmarks: tensor(level.kps, "kps")?,
            };
            candidates.extend(decode_level(&tensors, stride, &letterbox, SCORE_THRESHOLD));
        }

        let faces = suppress_overlaps(candidates, NMS_IOU_THRESHOLD);
        tracing::debug!(faces = faces.len(), "detect: done");
        Ok(faces)
    }
}

/// Aspect-preserving fit of a frame into a square network input.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    width: u32,
    height: u32,
    pad_x: u32,
    pad_y: u32,
    side: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, side: u32) -> Self {
        let scale = (side as f32 / width as f32).min(side as f32 / height as f32);
        let fit = |len: u32| ((len as f32 * scale).round() as u32).clamp(1, side);
        let (w, h) = (fit(width), fit(height));
        Self {
            scale,
            width: w,
            height: h,
            pad_x: (side - w) / 2,
            pad_y: (side - h) / 2,
            side,
        }
    }

    /// Resize `image` and center it on a padded square canvas.
    fn apply(&self, image: &GrayImage) -> GrayImage {
        let resized = imageops::resize(image, self.width, self.height, FilterType::Triangle);
        let mut canvas = GrayImage::from_pixel(self.side, self.side, Luma([PAD_VALUE]));
        imageops::replace(&mut canvas, &resized, self.pad_x as i64, self.pad_y as i64);
        canvas
    }

    /// Map a canvas point back into source frame coordinates.
    fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// Name-based layout ("score_8", "bbox_16", "kps_32", ...) when every
/// tensor is found, otherwise the standard export order: scores, then
/// boxes, then landmarks, each for strides 8/16/32.
fn output_layout(names: &[String]) -> [LevelOutputs; 3] {
    let index_of = |kind: &str, stride: u32| {
        let wanted = format!("{kind}_{stride}");
        names.iter().position(|n| *n == wanted)
    };
    let by_name = STRIDES.map(|stride| {
        Some(LevelOutputs {
            score: index_of("score", stride)?,
            bbox: index_of("bbox", stride)?,
            kps: index_of("kps", stride)?,
        })
    });

    match by_name {
        [Some(s8), Some(s16), Some(s32)] => [s8, s16, s32],
        _ => {
            tracing::info!(?names, "SCRFD output names not recognized, using export order");
            [0, 1, 2].map(|i| LevelOutputs {
                score: i,
                bbox: i + 3,
                kps: i + 6,
            })
        }
    }
}

/// Raw outputs of one stride level: one score, four edge distances and ten
/// landmark offsets per anchor, all in stride units.
struct LevelTensors<'a> {
    scores: &'a [f32],
    boxes: &'a [f32],
    landmarks: &'a [f32],
}

fn decode_level(level: &LevelTensors<'_>, stride: u32, letterbox: &Letterbox, threshold: f32) -> Vec<BoundingBox> {
    let columns = (letterbox.side / stride) as usize;
    let step = stride as f32;

    level
        .scores
        .iter()
        .zip(level.boxes.chunks_exact(4))
        .enumerate()
        .filter(|&(_, (&score, _))| score > threshold)
        .map(|(anchor, (&score, edges))| {
            let cell = anchor / ANCHORS_PER_CELL;
            let cx = (cell % columns) as f32 * step;
            let cy = (cell / columns) as f32 * step;

            let (x1, y1) = letterbox.to_source(cx - edges[0] * step, cy - edges[1] * step);
            let (x2, y2) = letterbox.to_source(cx + edges[2] * step, cy + edges[3] * step);

            let landmarks = level.landmarks.get(anchor * 10..anchor * 10 + 10).map(|kp| {
                std::array::from_fn(|k| letterbox.to_source(cx + kp[2 * k] * step, cy + kp[2 * k + 1] * step))
            });

            BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
                landmarks,
            }
        })
        .collect()
}

/// Greedy NMS: walk candidates by falling confidence and keep each one that
/// does not overlap an already kept box by more than `iou_threshold`.
fn suppress_overlaps(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<BoundingBox> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if kept.iter().all(|k| k.iou(&candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}
