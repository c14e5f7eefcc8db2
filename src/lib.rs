pub mod camera;
pub mod config;
pub mod error;
pub mod gpu;
pub mod png_writer;
pub mod scene;
pub mod sort_network;
pub mod splat_math;
pub mod viewer;

pub use error::{Result, SplatError};
