pub mod context;
pub mod depth;
pub mod expand;
pub mod offscreen;
pub mod rasterizer;
pub mod shader_loader;
pub mod sort;
pub mod types;

pub use context::GpuContext;
pub use offscreen::OffscreenTarget;
pub use rasterizer::{RenderTarget, SplatRasterizer};
pub use shader_loader::ShaderCache;
