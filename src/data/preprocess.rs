//! Input transform shared by training and serving.
//!
//! A model only sees vectors produced by one `Preprocessing`, and the value
//! is saved in the model manifest, so the predictor applies exactly what the
//! orchestrator trained under.

use image::imageops::FilterType;
use image::DynamicImage;
use serde::{Serialize, Deserialize};

use crate::error::{Error, Result};

/// Per-channel mean of the ImageNet training set, in RGB order.
pub const IMAGENET_MEAN: [f64; 3] = [0.485, 0.456, 0.406];
/// Per-channel standard deviation of the ImageNet training set, in RGB order.
pub const IMAGENET_STD: [f64; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preprocessing {
    pub width: u32,
    pub height: u32,
    pub mean: [f64; 3],
    pub std: [f64; 3],
}

impl Default for Preprocessing {
    fn default() -> Self {
        Preprocessing {
            width: 32,
            height: 32,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }
}

impl Preprocessing {
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidInput(format!(
                "preprocessing size {}x{} must be positive",
                self.width, self.height
            )));
        }
        if self.std.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(Error::InvalidInput(format!(
                "preprocessing std {:?} must be positive",
                self.std
            )));
        }
        if self.mean.iter().any(|m| !m.is_finite()) {
            return Err(Error::InvalidInput(format!("preprocessing mean {:?} is not finite", self.mean)));
        }
        Ok(())
    }

    /// Length of the vector `apply` produces.
    pub fn input_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    /// Resizes to `width × height`, converts to RGB, normalizes each channel
    /// as `(x / 255 - mean) / std`, and flattens as R, G, B, R, G, B, ...
    pub fn apply(&self, img: &DynamicImage) -> Vec<f64> {
        let resized = img.resize_exact(self.width, self.height, FilterType::Lanczos3);
        let rgb = resized.to_rgb8();
        rgb.pixels()
            .flat_map(|p| {
                p.0.into_iter().enumerate().map(|(c, v)| {
                    (v as f64 / 255.0 - self.mean[c]) / self.std[c]
                })
            })
            .collect()
    }

    /// Decodes PNG/JPEG/BMP/GIF bytes and applies the transform.
    pub fn from_bytes(&self, bytes: &[u8]) -> Result<Vec<f64>> {
        let img = image::load_from_memory(bytes)?;
        Ok(self.apply(&img))
    }
}
