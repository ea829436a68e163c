//! Preprocessing utilities for preparing images for BlazeFace inference.
//!
//! The helpers in this module decode image buffers, force them into 3-channel RGB,
//! resize them to the network's fixed input resolution, and convert them into the
//! expected tensor layout while recording the original dimensions needed to map
//! detections back to the source image.

use std::borrow::Cow;

use anyhow::Result;
use image::{DynamicImage, GenericImageView, RgbImage, imageops::FilterType};
use tract_onnx::prelude::Tensor;

use blazeface_utils::config::ResizeQuality;
use blazeface_utils::{decode_image, resize_image, rgb_to_chw_normalized};

/// Fixed input resolution of the BlazeFace network, in pixels per side.
///
/// The model was trained on square 128x128 frames; inputs of any other size are
/// stretched to this resolution without preserving aspect ratio.
pub const INPUT_SIZE: u32 = 128;

/// Configuration for preprocessing an image before inference.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreprocessConfig {
    /// Resize filter preference controlling the quality vs speed trade-off.
    pub resize_quality: ResizeQuality,
}

impl PreprocessConfig {
    fn resize_filter(&self) -> FilterType {
        match self.resize_quality {
            ResizeQuality::Quality => FilterType::Triangle,
            ResizeQuality::Speed => FilterType::Nearest,
        }
    }
}

/// Output of preprocessing: tensor plus the metadata needed to denormalize detections.
#[derive(Debug)]
pub struct PreprocessOutput {
    /// The preprocessed image tensor of shape `[1, 3, 128, 128]`, RGB in `[0, 1]`.
    pub tensor: Tensor,
    /// The original dimensions of the input image, before resizing.
    pub original_size: (u32, u32),
}

/// Preprocess an encoded image buffer into a BlazeFace-ready tensor.
///
/// # Arguments
///
/// * `bytes` - The raw encoded image bytes (any codec the `image` crate decodes).
/// * `config` - The configuration for preprocessing.
pub fn preprocess_image_bytes(bytes: &[u8], config: &PreprocessConfig) -> Result<PreprocessOutput> {
    let image = decode_image(bytes)?;
    preprocess_dynamic_image(&image, config)
}

/// Preprocess an already-decoded image.
///
/// # Arguments
///
/// * `image` - The dynamic image to process.
/// * `config` - The configuration for preprocessing.
pub fn preprocess_dynamic_image(
    image: &DynamicImage,
    config: &PreprocessConfig,
) -> Result<PreprocessOutput> {
    let (orig_w, orig_h) = image.dimensions();
    anyhow::ensure!(
        orig_w > 0 && orig_h > 0,
        "source image dimensions must be greater than zero"
    );

    let resized_rgb: Cow<'_, RgbImage> = if orig_w == INPUT_SIZE && orig_h == INPUT_SIZE {
        match image.as_rgb8() {
            Some(rgb) => Cow::Borrowed(rgb),
            None => Cow::Owned(image.to_rgb8()),
        }
    } else {
        Cow::Owned(resize_image(
            image,
            INPUT_SIZE,
            INPUT_SIZE,
            config.resize_filter(),
        ))
    };
    let chw = rgb_to_chw_normalized(&resized_rgb);

    let shape = [1usize, 3, INPUT_SIZE as usize, INPUT_SIZE as usize];
    let (data, offset) = chw.into_raw_vec_and_offset();
    debug_assert_eq!(offset, Some(0), "expected contiguous array");
    let tensor = Tensor::from_shape(&shape, &data)
        .map_err(|e| anyhow::anyhow!("failed to build tensor: {e}"))?;

    Ok(PreprocessOutput {
        tensor,
        original_size: (orig_w, orig_h),
    })
}
