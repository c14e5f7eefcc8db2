use crate::error::Result;
use crate::gpu::types::{PointHeaderGpu, PositionGpu, ShCoeffGpu, point_stride};
use crate::scene::gaussian::{GaussianScene, ShDegree};
use crate::scene::ply::read_ply;
use bytemuck::bytes_of;
use glam::Vec3;
use std::path::Path;

/// Device-ready copy of a scene: the full attribute block and the position-only block.
#[derive(Debug, Clone)]
pub struct PackedScene {
    pub num_points: u32,
    pub sh_degree: ShDegree,
    /// `num_points` records of [`point_stride`] bytes in `splat.wgsl` layout.
    pub points: Vec<u8>,
    pub positions: Vec<PositionGpu>,
    pub bounds: Option<(Vec3, Vec3)>,
}

impl PackedScene {
    pub fn from_scene(scene: &GaussianScene) -> Self {
        let stride = point_stride(scene.sh_degree.coeff_count());
        let mut points = Vec::with_capacity(stride * scene.len());
        let mut positions = Vec::with_capacity(scene.len());
        for point in &scene.points {
            let header = PointHeaderGpu {
                position: point.position,
                _pad0: 0.0,
                log_scale: point.log_scale,
                _pad1: 0.0,
                rotation: point.rotation,
                opacity_logit: point.opacity_logit,
                _pad2: [0.0; 3],
            };
            points.extend_from_slice(bytes_of(&header));
            for rgb in &point.sh {
                points.extend_from_slice(bytes_of(&ShCoeffGpu { rgb: *rgb, _pad: 0.0 }));
            }
            positions.push(PositionGpu::new(point.position));
        }
        Self {
            num_points: scene.len() as u32,
            sh_degree: scene.sh_degree,
            points,
            positions,
            bounds: scene.bounds(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let scene = read_ply(&bytes)?;
        tracing::info!(
            path = %path.display(),
            points = scene.len(),
            sh_degree = scene.sh_degree.get(),
            "decoded scene"
        );
        Ok(Self::from_scene(&scene))
    }

    pub fn point_stride(&self) -> usize {
        point_stride(self.sh_degree.coeff_count())
    }
}
