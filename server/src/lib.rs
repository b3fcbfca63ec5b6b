pub mod apply;
pub mod cache;
pub mod core;
pub mod node;
pub mod registry;
pub mod serve;

pub use cache::PreviewCache;
pub use crate::core::{apply_mix, downscale, ImageTensor, MixMatrix};
pub use node::{ChannelMixerNode, MixParams, NodeInputs, NodeOutput};
pub use registry::{NodeDefinition, NodeRegistry};
