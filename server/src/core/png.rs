use std::io::Cursor;

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{ImageFormat, RgbImage};

use crate::core::tensor::ImageTensor;

const DATA_URI_PREFIX: &str = "data:image/png;base64,";

/// Quantize one frame to 8-bit RGB. Samples are scaled by 255 and truncated.
pub fn frame_to_rgb(image: &ImageTensor, frame: usize) -> Result<RgbImage> {
    let samples = image
        .frame(frame)
        .ok_or_else(|| anyhow!("frame {} out of range (batch size {})", frame, image.batch_size()))?;
    let bytes = samples
        .iter()
        .map(|&v| (v.clamp(0.0, 1.0) * 255.0) as u8)
        .collect();
    RgbImage::from_raw(image.width() as u32, image.height() as u32, bytes)
        .ok_or_else(|| anyhow!("failed to build {}x{} RGB image", image.width(), image.height()))
}

pub fn encode_png(img: &RgbImage) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)
        .context("PNG encode failed")?;
    Ok(buf.into_inner())
}

/// PNG-encode the first frame of `image` as a `data:image/png;base64,` URI.
pub fn encode_data_uri(image: &ImageTensor) -> Result<String> {
    let rgb = frame_to_rgb(image, 0)?;
    let png = encode_png(&rgb)?;
    Ok(format!("{}{}", DATA_URI_PREFIX, STANDARD.encode(png)))
}

/// Inverse of [`encode_data_uri`].
pub fn decode_data_uri(uri: &str) -> Result<RgbImage> {
    let payload = uri
        .strip_prefix(DATA_URI_PREFIX)
        .ok_or_else(|| anyhow!("not a PNG data URI"))?;
    let png = STANDARD.decode(payload).context("invalid base64 payload")?;
    let img = image::load_from_memory_with_format(&png, ImageFormat::Png)
        .context("PNG decode failed")?;
    Ok(img.to_rgb8())
}
