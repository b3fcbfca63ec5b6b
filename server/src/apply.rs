use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::Args;
use tracing::info;

use crate::core::color::{apply_mix, MixMatrix};
use crate::core::png::{encode_png, frame_to_rgb};
use crate::core::resize::{downscale, PREVIEW_RESOLUTION};
use crate::core::tensor::ImageTensor;

#[derive(Args, Debug)]
pub struct MixArgs {
    /// Source image (any format the image crate can read)
    #[arg(long)]
    input: PathBuf,

    /// Output PNG path
    #[arg(long)]
    output: PathBuf,

    /// Nine comma-separated weights, one row per output channel (R, G, B)
    #[arg(long, default_value = "1,0,0,0,1,0,0,0,1", allow_hyphen_values = true)]
    matrix: String,

    /// Shrink to preview size before mixing
    #[arg(long, default_value_t = false)]
    preview: bool,

    /// Longest edge used with --preview
    #[arg(long, default_value_t = PREVIEW_RESOLUTION)]
    preview_size: usize,
}

pub fn run(args: MixArgs) -> Result<()> {
    let start = Instant::now();
    let matrix: MixMatrix = args.matrix.parse().map_err(|e: String| anyhow!(e))?;

    let img = image::open(&args.input)
        .with_context(|| format!("failed to open {}", args.input.display()))?
        .to_rgb8();
    let mut tensor = ImageTensor::from_rgb_image(&img);
    if args.preview {
        tensor = downscale(&tensor, (args.preview_size, args.preview_size));
    }

    let mixed = apply_mix(&tensor, &matrix);
    let png = encode_png(&frame_to_rgb(&mixed, 0)?)?;
    if let Some(parent) = args.output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    fs::write(&args.output, &png)
        .with_context(|| format!("failed to write {}", args.output.display()))?;

    info!(
        "mixed {} -> {} {}x{} matrix={} ms={}",
        args.input.display(),
        args.output.display(),
        mixed.width(),
        mixed.height(),
        matrix,
        start.elapsed().as_millis()
    );
    Ok(())
}
