use anyhow::{anyhow, Result};
use image::RgbImage;

/// Samples per pixel. Channel order is fixed as R, G, B.
pub const CHANNELS: usize = 3;

/// Interleaved f32 RGB image data, shaped `(height, width, 3)` or
/// `(batch, height, width, 3)`.
///
/// Samples are nominally in `[0, 1]`. The rank the tensor was built with is
/// remembered so operations can hand back the same shape they were given.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageTensor {
    batch: usize,
    height: usize,
    width: usize,
    batched: bool,
    data: Vec<f32>,
}

impl ImageTensor {
    /// Build a tensor from an explicit shape. Rank must be 3 or 4 and the last
    /// dimension must be 3.
    pub fn from_shape_vec(shape: &[usize], data: Vec<f32>) -> Result<Self> {
        let (batch, height, width, channels, batched) = match *shape {
            [h, w, c] => (1, h, w, c, false),
            [b, h, w, c] => (b, h, w, c, true),
            _ => {
                return Err(anyhow!(
                    "shape mismatch: expected a 3-D or 4-D image tensor, got {} dimensions {:?}",
                    shape.len(),
                    shape
                ))
            }
        };
        if channels != CHANNELS {
            return Err(anyhow!(
                "shape mismatch: expected {} channels, got {} (shape {:?})",
                CHANNELS,
                channels,
                shape
            ));
        }
        let expected = batch * height * width * CHANNELS;
        if data.len() != expected {
            return Err(anyhow!(
                "shape mismatch: shape {:?} needs {} samples, buffer has {}",
                shape,
                expected,
                data.len()
            ));
        }
        Ok(Self {
            batch,
            height,
            width,
            batched,
            data,
        })
    }

    /// Single `(height, width, 3)` image.
    pub fn single(height: usize, width: usize, data: Vec<f32>) -> Result<Self> {
        Self::from_shape_vec(&[height, width, CHANNELS], data)
    }

    /// Batched `(batch, height, width, 3)` images.
    pub fn batch(batch: usize, height: usize, width: usize, data: Vec<f32>) -> Result<Self> {
        Self::from_shape_vec(&[batch, height, width, CHANNELS], data)
    }

    /// Single image where every pixel is `rgb`.
    pub fn filled(height: usize, width: usize, rgb: [f32; 3]) -> Self {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take(height * width * CHANNELS)
            .collect();
        Self {
            batch: 1,
            height,
            width,
            batched: false,
            data,
        }
    }

    /// Convert an 8-bit RGB image into a single `(h, w, 3)` tensor.
    pub fn from_rgb_image(img: &RgbImage) -> Self {
        let data = img.as_raw().iter().map(|&v| v as f32 / 255.0).collect();
        Self {
            batch: 1,
            height: img.height() as usize,
            width: img.width() as usize,
            batched: false,
            data,
        }
    }

    /// Same rank and batch size as `self`, new spatial size and samples.
    pub(crate) fn with_frames(&self, height: usize, width: usize, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), self.batch * height * width * CHANNELS);
        Self {
            batch: self.batch,
            height,
            width,
            batched: self.batched,
            data,
        }
    }

    pub fn shape(&self) -> Vec<usize> {
        if self.batched {
            vec![self.batch, self.height, self.width, CHANNELS]
        } else {
            vec![self.height, self.width, CHANNELS]
        }
    }

    pub fn is_batched(&self) -> bool {
        self.batched
    }

    pub fn batch_size(&self) -> usize {
        self.batch
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Samples of one frame, row-major interleaved RGB.
    pub fn frame(&self, index: usize) -> Option<&[f32]> {
        if index >= self.batch {
            return None;
        }
        let len = self.height * self.width * CHANNELS;
        Some(&self.data[index * len..(index + 1) * len])
    }

    /// One RGB pixel, or `None` when any coordinate is out of range.
    pub fn pixel(&self, frame: usize, y: usize, x: usize) -> Option<[f32; 3]> {
        if frame >= self.batch || y >= self.height || x >= self.width {
            return None;
        }
        let idx = ((frame * self.height + y) * self.width + x) * CHANNELS;
        Some([self.data[idx], self.data[idx + 1], self.data[idx + 2]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_shape_vec_ranks() {
        let single = ImageTensor::from_shape_vec(&[2, 3, 3], vec![0.0; 18]).unwrap();
        assert!(!single.is_batched());
        assert_eq!(single.shape(), vec![2, 3, 3]);
        assert_eq!(single.batch_size(), 1);

        let batched = ImageTensor::from_shape_vec(&[2, 2, 3, 3], vec![0.0; 36]).unwrap();
        assert!(batched.is_batched());
        assert_eq!(batched.shape(), vec![2, 2, 3, 3]);
    }

    #[test]
    fn test_from_shape_vec_rejects_bad_shapes() {
        assert!(ImageTensor::from_shape_vec(&[4, 4], vec![0.0; 16]).is_err());
        assert!(ImageTensor::from_shape_vec(&[2, 2, 4], vec![0.0; 16]).is_err());
        let err = ImageTensor::from_shape_vec(&[2, 2, 3], vec![0.0; 11]).unwrap_err();
        assert!(err.to_string().contains("shape mismatch"));
    }

    #[test]
    fn test_frame_and_pixel() {
        let mut data = vec![0.0; 2 * 1 * 2 * 3];
        data[6..9].copy_from_slice(&[0.1, 0.2, 0.3]);
        let t = ImageTensor::batch(2, 1, 2, data).unwrap();
        assert_eq!(t.pixel(1, 0, 0).unwrap(), [0.1, 0.2, 0.3]);
        assert_eq!(t.frame(1).unwrap().len(), 6);
        assert!(t.frame(2).is_none());
        assert!(t.pixel(2, 0, 0).is_none());
        assert!(t.pixel(0, 1, 0).is_none());
        assert!(t.pixel(0, 0, 2).is_none());
    }

    #[test]
    fn test_from_rgb_image() {
        let img = RgbImage::from_raw(1, 1, vec![255, 0, 51]).unwrap();
        let t = ImageTensor::from_rgb_image(&img);
        assert_eq!(t.shape(), vec![1, 1, 3]);
        assert_eq!(t.pixel(0, 0, 0).unwrap(), [1.0, 0.0, 0.2]);
    }
}
