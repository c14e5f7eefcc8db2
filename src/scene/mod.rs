pub mod gaussian;
pub mod packed;
pub mod ply;

pub use gaussian::{GaussianPoint, GaussianScene, ShDegree};
pub use packed::PackedScene;
