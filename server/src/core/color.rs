use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use rayon::prelude::*;

use crate::core::tensor::{ImageTensor, CHANNELS};

/// 3x3 channel mixing matrix.
///
/// Row `i`, column `j` is the weight of input channel `j` in output channel
/// `i`, so each output pixel is `M · [r, g, b]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixMatrix(pub [[f32; 3]; 3]);

impl MixMatrix {
    pub const IDENTITY: MixMatrix = MixMatrix([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);

    /// Build from nested rows, as they arrive in a JSON request body.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self> {
        if rows.len() != 3 {
            return Err(anyhow!(
                "shape mismatch: mix matrix needs 3 rows, got {}",
                rows.len()
            ));
        }
        let mut m = [[0.0f32; 3]; 3];
        for (i, row) in rows.iter().enumerate() {
            if row.len() != 3 {
                return Err(anyhow!(
                    "shape mismatch: mix matrix row {} needs 3 values, got {}",
                    i,
                    row.len()
                ));
            }
            if let Some(j) = row.iter().position(|v| !v.is_finite()) {
                return Err(anyhow!(
                    "mix matrix value at row {} column {} is not finite: {}",
                    i,
                    j,
                    row[j]
                ));
            }
            m[i].copy_from_slice(row);
        }
        Ok(MixMatrix(m))
    }

    #[inline]
    pub fn apply(&self, rgb: [f32; 3]) -> [f32; 3] {
        let m = &self.0;
        [
            m[0][0] * rgb[0] + m[0][1] * rgb[1] + m[0][2] * rgb[2],
            m[1][0] * rgb[0] + m[1][1] * rgb[1] + m[1][2] * rgb[2],
            m[2][0] * rgb[0] + m[2][1] * rgb[1] + m[2][2] * rgb[2],
        ]
    }
}

impl Default for MixMatrix {
    fn default() -> Self {
        MixMatrix::IDENTITY
    }
}

impl fmt::Display for MixMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "[[{}, {}, {}], [{}, {}, {}], [{}, {}, {}]]",
            m[0][0], m[0][1], m[0][2], m[1][0], m[1][1], m[1][2], m[2][0], m[2][1], m[2][2]
        )
    }
}

/// Parse nine comma-separated values, row-major by output channel.
impl FromStr for MixMatrix {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values = s
            .split(',')
            .map(|v| v.trim().parse::<f32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("invalid mix matrix '{}': {}", s, e))?;
        if values.len() != 9 {
            return Err(format!(
                "invalid mix matrix '{}': expected 9 values, got {}",
                s,
                values.len()
            ));
        }
        let rows: Vec<Vec<f32>> = values.chunks(3).map(|c| c.to_vec()).collect();
        MixMatrix::from_rows(&rows).map_err(|e| e.to_string())
    }
}

/// Mix every pixel of `image` through `matrix`, clamping to `[0, 1]`.
///
/// The result has the same shape as the input (a single image stays single).
pub fn apply_mix(image: &ImageTensor, matrix: &MixMatrix) -> ImageTensor {
    let row_len = (image.width() * CHANNELS).max(CHANNELS);
    let mut out = vec![0.0f32; image.data().len()];

    out.par_chunks_mut(row_len)
        .zip(image.data().par_chunks(row_len))
        .for_each(|(dst_row, src_row)| {
            for (dst, src) in dst_row
                .chunks_exact_mut(CHANNELS)
                .zip(src_row.chunks_exact(CHANNELS))
            {
                let mixed = matrix.apply([src[0], src[1], src[2]]);
                dst[0] = clamp_unit(mixed[0]);
                dst[1] = clamp_unit(mixed[1]);
                dst[2] = clamp_unit(mixed[2]);
            }
        });

    image.with_frames(image.height(), image.width(), out)
}

/// NaN maps to 0; infinities clamp to the nearest bound.
#[inline]
fn clamp_unit(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(batch: usize, h: usize, w: usize) -> ImageTensor {
        let n = batch * h * w * CHANNELS;
        let data = (0..n).map(|i| (i % 101) as f32 / 100.0).collect();
        ImageTensor::batch(batch, h, w, data).unwrap()
    }

    #[test]
    fn test_identity_leaves_image_unchanged() {
        let img = gradient(2, 5, 7);
        let out = apply_mix(&img, &MixMatrix::IDENTITY);
        assert_eq!(out.shape(), img.shape());
        for (a, b) in img.data().iter().zip(out.data()) {
            assert!((a - b).abs() < 1e-6, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_output_always_clamped() {
        let img = gradient(1, 8, 8);
        let matrices = [
            MixMatrix([[2.0, 2.0, 2.0], [-2.0, -2.0, -2.0], [1.5, -0.7, 0.3]]),
            MixMatrix([[-1.0, 0.0, 2.0], [0.5, 2.0, -1.5], [2.0, 2.0, -2.0]]),
        ];
        for m in &matrices {
            let out = apply_mix(&img, m);
            assert!(out.data().iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn test_swap_red_green() {
        let img = ImageTensor::single(1, 2, vec![1.0, 0.0, 0.0, 0.2, 0.4, 0.6]).unwrap();
        let swap = MixMatrix([[0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]]);
        let out = apply_mix(&img, &swap);
        assert_eq!(out.shape(), vec![1, 2, 3]);
        assert_eq!(out.pixel(0, 0, 0).unwrap(), [0.0, 1.0, 0.0]);
        assert_eq!(out.pixel(0, 0, 1).unwrap(), [0.4, 0.2, 0.6]);
    }

    #[test]
    fn test_rows_are_output_channels() {
        // Output red takes half of input green; output blue is the input sum.
        let img = ImageTensor::filled(1, 1, [0.2, 0.4, 0.1]);
        let m = MixMatrix([[0.0, 0.5, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0, 1.0]]);
        let px = apply_mix(&img, &m).pixel(0, 0, 0).unwrap();
        assert!((px[0] - 0.2).abs() < 1e-6);
        assert!((px[1] - 0.4).abs() < 1e-6);
        assert!((px[2] - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_from_rows_shape_mismatch() {
        assert!(MixMatrix::from_rows(&[vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]).is_err());
        let err = MixMatrix::from_rows(&[vec![1.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0]])
            .unwrap_err();
        assert!(err.to_string().contains("row 0"));
    }

    #[test]
    fn test_from_rows_rejects_non_finite() {
        let err = MixMatrix::from_rows(&[
            vec![1.0, 0.0, 0.0],
            vec![0.0, f32::INFINITY, 0.0],
            vec![0.0, 0.0, 1.0],
        ])
        .unwrap_err();
        assert!(err.to_string().contains("row 1 column 1 is not finite"));
        assert!(MixMatrix::from_rows(&[vec![f32::NAN, 0.0, 0.0], vec![0.0; 3], vec![0.0; 3]]).is_err());
        assert!("1e39,0,0, 0,1,0, 0,0,1".parse::<MixMatrix>().is_err());
    }

    #[test]
    fn test_nan_output_maps_to_zero() {
        // inf * 0 is NaN; a directly built matrix skips the finite check.
        let img = ImageTensor::filled(1, 2, [0.0, 0.5, 1.0]);
        let m = MixMatrix([[f32::INFINITY, 0.0, 0.0], [0.0, 1.0, 0.0], [f32::NEG_INFINITY, 0.0, 0.0]]);
        let out = apply_mix(&img, &m);
        assert_eq!(out.pixel(0, 0, 0).unwrap(), [0.0, 0.5, 0.0]);
        assert!(out.data().iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_from_str() {
        let m: MixMatrix = "0,1,0, 1,0,0, 0,0,1".parse().unwrap();
        assert_eq!(m.0[0], [0.0, 1.0, 0.0]);
        assert_eq!(m.0[1], [1.0, 0.0, 0.0]);
        assert!("1,2,3".parse::<MixMatrix>().is_err());
        assert!("a,0,0,0,1,0,0,0,1".parse::<MixMatrix>().is_err());
    }

    #[test]
    fn test_empty_image() {
        let img = ImageTensor::single(0, 0, Vec::new()).unwrap();
        let out = apply_mix(&img, &MixMatrix::IDENTITY);
        assert_eq!(out.shape(), vec![0, 0, 3]);
    }
}
