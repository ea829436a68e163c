use anyhow::{Context, Result};
use image::{DynamicImage, RgbImage, imageops::FilterType};
use ndarray::Array3;

/// Decode an in-memory image buffer of any supported codec.
///
/// # Arguments
///
/// * `bytes` - The raw encoded image bytes (JPEG, PNG, WebP, ...).
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(bytes).context("failed to decode image bytes")
}

/// Resize an image to the requested resolution using the provided filter.
///
/// The aspect ratio is not preserved; the output is exactly `width` x `height`.
///
/// # Arguments
///
/// * `image` - The image to resize.
/// * `width` - The target width.
/// * `height` - The target height.
/// * `filter` - The sampling filter to use for resizing.
pub fn resize_image(image: &DynamicImage, width: u32, height: u32, filter: FilterType) -> RgbImage {
    image.resize_exact(width, height, filter).to_rgb8()
}

/// Convert an RGB image into a CHW array with values scaled to `[0, 1]`.
///
/// This function rearranges the memory layout from HWC (height, width, channels) to
/// CHW (channels, height, width) and divides every sample by 255.
///
/// # Arguments
///
/// * `image` - The RGB image to convert.
pub fn rgb_to_chw_normalized(image: &RgbImage) -> Array3<f32> {
    let (width, height) = image.dimensions();
    let mut array = Array3::<f32>::zeros((3, height as usize, width as usize));
    for (x, y, pixel) in image.enumerate_pixels() {
        let (xi, yi) = (x as usize, y as usize);
        array[(0, yi, xi)] = pixel[0] as f32 / 255.0;
        array[(1, yi, xi)] = pixel[1] as f32 / 255.0;
        array[(2, yi, xi)] = pixel[2] as f32 / 255.0;
    }
    array
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn rgb_to_chw_normalized_converts_correctly() {
        let mut image = RgbImage::new(2, 2);
        image.put_pixel(0, 0, image::Rgb([0, 128, 255]));
        image.put_pixel(1, 0, image::Rgb([255, 128, 0]));
        image.put_pixel(0, 1, image::Rgb([51, 51, 51]));
        image.put_pixel(1, 1, image::Rgb([255, 255, 255]));

        let array = rgb_to_chw_normalized(&image);
        assert_eq!(array.shape(), &[3, 2, 2]);

        assert_eq!(array[(0, 0, 0)], 0.0);
        assert_eq!(array[(2, 0, 0)], 1.0);
        assert_eq!(array[(1, 0, 1)], 128.0 / 255.0);
        assert_eq!(array[(0, 1, 0)], 0.2);
    }

    #[test]
    fn decode_image_round_trips_png_bytes() {
        let image = RgbImage::from_pixel(5, 3, image::Rgb([10, 20, 30]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .expect("encode png");

        let decoded = decode_image(&bytes).expect("decode");
        assert_eq!(decoded.width(), 5);
        assert_eq!(decoded.height(), 3);
    }

    #[test]
    fn decode_image_rejects_garbage() {
        let err = decode_image(b"definitely not an image").expect_err("should fail");
        assert!(err.to_string().contains("failed to decode image bytes"));
    }
}
