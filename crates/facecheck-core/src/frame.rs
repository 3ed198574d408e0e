//! Grayscale frames decoded from image files, and their conversion into
//! network input tensors.

use std::path::Path;

use image::GrayImage;
use ndarray::Array4;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("cannot read image {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("image has zero size")]
    Empty,
}

/// A non-empty 8-bit grayscale image.
#[derive(Debug, Clone)]
pub struct Frame {
    image: GrayImage,
}

impl Frame {
    /// Decode an image file (png, jpeg, gif, ...) into a grayscale frame.
    pub fn load(path: &Path) -> Result<Self, FrameError> {
        let img = image::open(path).map_err(|source| FrameError::Decode {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_image(img.to_luma8())
    }

    /// Decode an in-memory encoded image into a grayscale frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let img = image::load_from_memory(bytes).map_err(|source| FrameError::Decode {
            path: "<memory>".to_string(),
            source,
        })?;
        Self::from_image(img.to_luma8())
    }

    pub fn from_image(image: GrayImage) -> Result<Self, FrameError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(FrameError::Empty);
        }
        Ok(Self { image })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }
}

/// `(pixel - mean) / std` for every pixel, repeated over three channels in
/// NCHW layout. Both networks take RGB input; grayscale is fed as R = G = B.
pub(crate) fn to_tensor(image: &GrayImage, mean: f32, std: f32) -> Array4<f32> {
    let (w, h) = image.dimensions();
    Array4::from_shape_fn((1, 3, h as usize, w as usize), |(_, _, y, x)| {
        (image.get_pixel(x as u32, y as u32).0[0] as f32 - mean) / std
    })
}
