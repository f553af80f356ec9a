use crate::error::ApiError;
use image::ImageReader;
use image::imageops::FilterType;
use std::io::Cursor;
use tch::Tensor;

pub const IMAGE_SIZE: i64 = 224;
pub const CHANNELS: i64 = 3;

/// Decodes uploaded bytes into the waste model's input tensor: shape
/// `[1, 224, 224, 3]`, f32, channel values scaled to [0, 1].
pub fn decode_image(bytes: &[u8]) -> Result<Tensor, ApiError> {
    let image = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ApiError::Decode(format!("unable to read image data: {e}")))?
        .decode()
        .map_err(|e| {
            ApiError::Decode(format!(
                "unable to decode the image, ensure the file is a valid image: {e}"
            ))
        })?;

    let resized = image
        .resize_exact(IMAGE_SIZE as u32, IMAGE_SIZE as u32, FilterType::Triangle)
        .to_rgb8();
    let pixels: Vec<f32> = resized
        .into_raw()
        .into_iter()
        .map(|v| f32::from(v) / 255.0)
        .collect();

    let (min, max) = pixels
        .iter()
        .fold((f32::MAX, f32::MIN), |(min, max), &v| {
            (min.min(v), max.max(v))
        });
    log::debug!(
        "input image shape: [1, {IMAGE_SIZE}, {IMAGE_SIZE}, {CHANNELS}], value range: ({min}, {max})"
    );

    Ok(Tensor::from_slice(&pixels).view([1, IMAGE_SIZE, IMAGE_SIZE, CHANNELS]))
}
