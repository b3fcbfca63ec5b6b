pub mod color;
pub mod png;
pub mod resize;
pub mod tensor;

pub use color::{apply_mix, MixMatrix};
pub use resize::{downscale, fit_dimensions, PREVIEW_RESOLUTION};
pub use tensor::ImageTensor;
