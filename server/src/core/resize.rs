use rayon::prelude::*;

use crate::core::tensor::{ImageTensor, CHANNELS};

/// Longest edge of a live preview, in pixels.
pub const PREVIEW_RESOLUTION: usize = 512;

/// Target size for fitting `width x height` inside `max_w x max_h` with the
/// aspect ratio preserved. The axis with the larger overshoot ratio binds;
/// the other is scaled proportionally and rounded to the nearest pixel,
/// halves to even.
pub fn fit_dimensions(width: usize, height: usize, max_w: usize, max_h: usize) -> (usize, usize) {
    let aspect = width as f64 / height as f64;
    let (w, h) = if width as f64 / max_w as f64 > height as f64 / max_h as f64 {
        (max_w as f64, (max_w as f64 / aspect).round_ties_even())
    } else {
        ((max_h as f64 * aspect).round_ties_even(), max_h as f64)
    };
    ((w as usize).max(1), (h as usize).max(1))
}

/// Shrink `image` to fit within `max_size` (width, height).
///
/// Images that already fit are returned as-is; previews are never upscaled.
/// Every frame of a batch is resized, and the input rank is kept.
pub fn downscale(image: &ImageTensor, max_size: (usize, usize)) -> ImageTensor {
    let (max_w, max_h) = max_size;
    let (src_w, src_h) = (image.width(), image.height());
    if src_w == 0 || src_h == 0 || (src_w <= max_w && src_h <= max_h) {
        return image.clone();
    }
    let (dst_w, dst_h) = fit_dimensions(src_w, src_h, max_w.max(1), max_h.max(1));

    let mut data = Vec::with_capacity(image.batch_size() * dst_w * dst_h * CHANNELS);
    for frame in 0..image.batch_size() {
        if let Some(src) = image.frame(frame) {
            data.extend(resize_bilinear(src, src_w, src_h, dst_w, dst_h));
        }
    }
    image.with_frames(dst_h, dst_w, data)
}

/// Source taps for one output coordinate along an axis.
#[derive(Clone, Copy, Debug)]
struct Tap {
    i0: usize,
    i1: usize,
    frac: f32,
}

/// Half-pixel-centre sampling positions (corners not aligned), clamped at
/// the edges.
fn axis_taps(src_len: usize, dst_len: usize) -> Vec<Tap> {
    let scale = src_len as f64 / dst_len as f64;
    (0..dst_len)
        .map(|d| {
            let pos = ((d as f64 + 0.5) * scale - 0.5).max(0.0);
            let i0 = (pos.floor() as usize).min(src_len - 1);
            let i1 = if i0 + 1 < src_len { i0 + 1 } else { i0 };
            Tap {
                i0,
                i1,
                frac: (pos - i0 as f64) as f32,
            }
        })
        .collect()
}

/// Bilinear resize of one interleaved RGB f32 frame.
pub fn resize_bilinear(
    src: &[f32],
    src_w: usize,
    src_h: usize,
    dst_w: usize,
    dst_h: usize,
) -> Vec<f32> {
    debug_assert_eq!(src.len(), src_w * src_h * CHANNELS);
    let xs = axis_taps(src_w, dst_w);
    let ys = axis_taps(src_h, dst_h);
    let src_stride = src_w * CHANNELS;
    let mut dst = vec![0.0f32; dst_w * dst_h * CHANNELS];

    dst.par_chunks_mut(dst_w * CHANNELS)
        .zip(ys.par_iter())
        .for_each(|(dst_row, ty)| {
            let row0 = &src[ty.i0 * src_stride..(ty.i0 + 1) * src_stride];
            let row1 = &src[ty.i1 * src_stride..(ty.i1 + 1) * src_stride];
            for (x, tx) in xs.iter().enumerate() {
                let a = tx.i0 * CHANNELS;
                let b = tx.i1 * CHANNELS;
                for c in 0..CHANNELS {
                    let top = row0[a + c] + (row0[b + c] - row0[a + c]) * tx.frac;
                    let bottom = row1[a + c] + (row1[b + c] - row1[a + c]) * tx.frac;
                    dst_row[x * CHANNELS + c] = top + (bottom - top) * ty.frac;
                }
            }
        });

    dst
}
