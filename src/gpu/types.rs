use bytemuck::{Pod, Zeroable};
use std::mem::{align_of, size_of};

// vec3 and vec4 align to 16 bytes in WGSL, so the padding is spelled out.

/// Fixed part of one `Point` in `splat.wgsl`, followed by `sh: array<vec3<f32>, SH_COUNT>`.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct PointHeaderGpu {
    pub position: [f32; 3],
    pub _pad0: f32,
    pub log_scale: [f32; 3],
    pub _pad1: f32,
    pub rotation: [f32; 4],
    pub opacity_logit: f32,
    pub _pad2: [f32; 3],
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct ShCoeffGpu {
    pub rgb: [f32; 3],
    pub _pad: f32,
}

/// Element of the position-only array consumed by `depth_keys.wgsl`.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct PositionGpu {
    pub xyz: [f32; 3],
    pub _pad: f32,
}

impl PositionGpu {
    pub fn new(xyz: [f32; 3]) -> Self {
        Self { xyz, _pad: 0.0 }
    }
}

/// Per-frame camera block shared by the vertex and fragment stages.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct CameraUniform {
    /// World to camera.
    pub view: [[f32; 4]; 4],
    /// World to clip. The depth keys are the z row of this transform.
    pub projection: [[f32; 4]; 4],
    pub position: [f32; 3],
    pub scale_modifier: f32,
    pub tan_fov: [f32; 2],
    pub focal: [f32; 2],
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Pod, Zeroable)]
pub struct SortParams {
    pub k: u32,
    pub j: u32,
    pub len: u32,
    pub _pad: u32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct DepthParams {
    pub transform: [[f32; 4]; 4],
    pub count: u32,
    pub padded_count: u32,
    /// Key for ranks in `count..padded_count`. Passed in because WGSL has no infinity literal.
    pub sentinel: f32,
    pub _pad: u32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct ExpandParams {
    pub count: u32,
    pub _pad: [u32; 3],
}

const _: () = assert!(size_of::<PointHeaderGpu>() == 64);
const _: () = assert!(size_of::<ShCoeffGpu>() == 16);
const _: () = assert!(size_of::<PositionGpu>() == 16);
const _: () = assert!(size_of::<CameraUniform>() == 160);
const _: () = assert!(size_of::<CameraUniform>() % 16 == 0);
const _: () = assert!(size_of::<SortParams>() == 16);
const _: () = assert!(size_of::<DepthParams>() == 80);
const _: () = assert!(size_of::<ExpandParams>() == 16);
const _: () = assert!(align_of::<PointHeaderGpu>() == 4);

/// Byte stride of one `Point` holding `sh_count` coefficients.
pub const fn point_stride(sh_count: usize) -> usize {
    size_of::<PointHeaderGpu>() + sh_count * size_of::<ShCoeffGpu>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;

    #[test]
    fn camera_uniform_matches_wgsl_offsets() {
        assert_eq!(offset_of!(CameraUniform, view), 0);
        assert_eq!(offset_of!(CameraUniform, projection), 64);
        assert_eq!(offset_of!(CameraUniform, position), 128);
        assert_eq!(offset_of!(CameraUniform, scale_modifier), 140);
        assert_eq!(offset_of!(CameraUniform, tan_fov), 144);
        assert_eq!(offset_of!(CameraUniform, focal), 152);
    }

    #[test]
    fn point_header_matches_wgsl_offsets() {
        assert_eq!(offset_of!(PointHeaderGpu, position), 0);
        assert_eq!(offset_of!(PointHeaderGpu, log_scale), 16);
        assert_eq!(offset_of!(PointHeaderGpu, rotation), 32);
        assert_eq!(offset_of!(PointHeaderGpu, opacity_logit), 48);
    }

    #[test]
    fn point_stride_is_sixteen_byte_aligned() {
        for count in [1, 4, 9, 16] {
            assert_eq!(point_stride(count) % 16, 0);
        }
        assert_eq!(point_stride(16), 64 + 256);
    }
}
