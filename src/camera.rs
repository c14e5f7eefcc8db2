use crate::config::RenderConfig;
use crate::error::Result;
use crate::gpu::types::CameraUniform;
use glam::{Mat3, Mat4, Vec3};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One entry of a `cameras.json` file written next to a reconstructed scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraPreset {
    pub id: u32,
    pub img_name: String,
    pub width: u32,
    pub height: u32,
    pub position: [f32; 3],
    /// Camera-to-world rotation, row major.
    pub rotation: [[f32; 3]; 3],
    pub fx: f32,
    pub fy: f32,
}

pub fn parse_presets(json: &str) -> Result<Vec<CameraPreset>> {
    Ok(serde_json::from_str(json)?)
}

pub fn load_presets(path: &Path) -> Result<Vec<CameraPreset>> {
    let presets = parse_presets(&std::fs::read_to_string(path)?)?;
    tracing::info!(path = %path.display(), count = presets.len(), "loaded camera presets");
    Ok(presets)
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    /// Camera-to-world rotation. Columns are the right, down and forward axes.
    pub rotation: Mat3,
    pub fov_y: f32,
    /// Full horizontal field of view. `None` follows the target aspect ratio.
    pub fov_x: Option<f32>,
}

impl Camera {
    pub fn from_preset(preset: &CameraPreset) -> Self {
        Self {
            position: Vec3::from(preset.position),
            rotation: Mat3::from_cols_array_2d(&preset.rotation).transpose(),
            fov_y: 2.0 * (preset.height as f32 / (2.0 * preset.fy)).atan(),
            fov_x: Some(2.0 * (preset.width as f32 / (2.0 * preset.fx)).atan()),
        }
    }

    /// Camera at `eye` facing `target`, with world +y as "down".
    pub fn looking_at(eye: Vec3, target: Vec3, fov_y: f32) -> Self {
        let forward = (target - eye).normalize();
        let right = Vec3::Y.cross(forward).try_normalize().unwrap_or(Vec3::X);
        let down = forward.cross(right);
        Self {
            position: eye,
            rotation: Mat3::from_cols(right, down, forward),
            fov_y,
            fov_x: None,
        }
    }

    pub fn framing(bounds: Option<(Vec3, Vec3)>) -> Self {
        let fov_y = 60f32.to_radians();
        let (lo, hi) = bounds.unwrap_or((Vec3::splat(-1.0), Vec3::splat(1.0)));
        let center = (lo + hi) * 0.5;
        let radius = ((hi - lo).length() * 0.5).max(1e-3);
        let distance = radius / (fov_y * 0.5).tan() + radius;
        Self::looking_at(center - Vec3::Z * distance, center, fov_y)
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation.z_axis
    }

    pub fn view_matrix(&self) -> Mat4 {
        let world_to_camera = self.rotation.transpose();
        let translation = -(world_to_camera * self.position);
        Mat4::from_cols(
            world_to_camera.x_axis.extend(0.0),
            world_to_camera.y_axis.extend(0.0),
            world_to_camera.z_axis.extend(0.0),
            translation.extend(1.0),
        )
    }

    pub fn tan_half_fov(&self, config: &RenderConfig) -> (f32, f32) {
        let tan_y = (self.fov_y * 0.5).tan();
        let tan_x = match self.fov_x {
            Some(fov_x) => (fov_x * 0.5).tan(),
            None => tan_y * config.aspect(),
        };
        (tan_x, tan_y)
    }

    /// Camera to clip. Depth maps `znear..zfar` to `0..1` and `w` carries camera-space z.
    pub fn projection_matrix(&self, config: &RenderConfig) -> Mat4 {
        let (tan_x, tan_y) = self.tan_half_fov(config);
        let (n, f) = (config.znear, config.zfar);
        Mat4::from_cols(
            glam::Vec4::new(1.0 / tan_x, 0.0, 0.0, 0.0),
            glam::Vec4::new(0.0, 1.0 / tan_y, 0.0, 0.0),
            glam::Vec4::new(0.0, 0.0, f / (f - n), 1.0),
            glam::Vec4::new(0.0, 0.0, -(f * n) / (f - n), 0.0),
        )
    }

    pub fn uniform(&self, config: &RenderConfig) -> CameraUniform {
        let (tan_x, tan_y) = self.tan_half_fov(config);
        let view = self.view_matrix();
        let projection = self.projection_matrix(config) * view;
        CameraUniform {
            view: view.to_cols_array_2d(),
            projection: projection.to_cols_array_2d(),
            position: self.position.to_array(),
            scale_modifier: config.scale_modifier,
            tan_fov: [tan_x, tan_y],
            focal: [
                config.width as f32 / (2.0 * tan_x),
                config.height as f32 / (2.0 * tan_y),
            ],
        }
    }

    pub fn translate_local(&mut self, delta: Vec3) {
        self.position += self.rotation * delta;
    }

    /// Turn about the camera's down axis, then its right axis.
    pub fn rotate_local(&mut self, yaw: f32, pitch: f32) {
        self.rotation = self.rotation * Mat3::from_rotation_y(yaw) * Mat3::from_rotation_x(pitch);
    }
}
