//! Image bytes to normalized input tensor.

use crate::config::PreprocessConfig;
use crate::error::Result;
use crate::metadata::InputTensorSpec;
use image::{DynamicImage, RgbImage, imageops::FilterType};
use ndarray::Array4;

/// Batched image tensor handed to the model collaborator.
pub type InputTensor = Array4<f32>;

/// Memory layout the model expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
    /// `[1, 3, H, W]`
    Nchw,
    /// `[1, H, W, 3]`
    Nhwc,
}

impl TensorLayout {
    fn from_spec(spec: Option<&InputTensorSpec>) -> Self {
        match spec.map(|s| s.shape.as_slice()) {
            Some([_, c, _, 3]) if *c != 3 => TensorLayout::Nhwc,
            _ => TensorLayout::Nchw,
        }
    }
}

/// Decodes `bytes`, resizes to the model input size and normalizes each
/// channel with the configured mean and std.
///
/// The declared input tensor, when present, decides size and layout;
/// otherwise a square `cfg.input_size` NCHW tensor is produced.
pub fn prepare_input(
    bytes: &[u8],
    cfg: &PreprocessConfig,
    spec: Option<&InputTensorSpec>,
) -> Result<InputTensor> {
    let img = image::load_from_memory(bytes)?;
    let (height, width) = spec
        .and_then(InputTensorSpec::spatial_size)
        .unwrap_or((cfg.input_size, cfg.input_size));
    let resized = resize_exact(img, width, height);
    Ok(to_tensor(&resized, cfg, TensorLayout::from_spec(spec)))
}

fn resize_exact(img: DynamicImage, width: u32, height: u32) -> RgbImage {
    img.resize_exact(width, height, FilterType::Triangle).to_rgb8()
}

fn normalize_channel(value: u8, mean: f32, std: f32) -> f32 {
    let v = value as f32 / 255.0;
    (v - mean) / std
}

fn to_tensor(img: &RgbImage, cfg: &PreprocessConfig, layout: TensorLayout) -> InputTensor {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let mut array = match layout {
        TensorLayout::Nchw => Array4::<f32>::zeros((1, 3, h, w)),
        TensorLayout::Nhwc => Array4::<f32>::zeros((1, h, w, 3)),
    };
    for (x, y, pixel) in img.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            let v = normalize_channel(pixel.0[c], cfg.mean[c], cfg.std[c]);
            match layout {
                TensorLayout::Nchw => array[[0, c, y, x]] = v,
                TensorLayout::Nhwc => array[[0, y, x, c]] = v,
            }
        }
    }
    array
}
