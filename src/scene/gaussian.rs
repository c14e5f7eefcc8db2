use crate::error::{Result, SplatError};
use glam::Vec3;

/// Truncation level of the per-point spherical harmonics color model.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ShDegree(u8);

impl ShDegree {
    pub const MAX: u8 = 3;

    pub fn new(degree: u8) -> Option<Self> {
        (degree <= Self::MAX).then_some(Self(degree))
    }

    /// Infer the degree from the total number of `f_rest_*` fields (all three channels).
    pub fn from_rest_fields(rest_fields: usize) -> Result<Self> {
        let err = || SplatError::UnsupportedShLayout { rest_fields };
        if rest_fields % 3 != 0 {
            return Err(err());
        }
        let per_channel = rest_fields / 3;
        (0..=Self::MAX)
            .find(|&d| Self(d).coeff_count() == per_channel + 1)
            .map(Self)
            .ok_or_else(err)
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// RGB coefficient triples per point: `(degree + 1)²`.
    pub fn coeff_count(self) -> usize {
        let side = self.0 as usize + 1;
        side * side
    }

    /// `f_rest_*` fields per point as stored in a scene file.
    pub fn rest_fields(self) -> usize {
        (self.coeff_count() - 1) * 3
    }
}

/// One scene element: an anisotropic 3D Gaussian with an SH color model.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianPoint {
    pub position: [f32; 3],
    pub log_scale: [f32; 3],
    /// Quaternion stored as (w, x, y, z).
    pub rotation: [f32; 4],
    pub opacity_logit: f32,
    pub sh: Vec<[f32; 3]>,
}

/// Decoded point cloud. Every point carries `sh_degree.coeff_count()` coefficients.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianScene {
    pub sh_degree: ShDegree,
    pub points: Vec<GaussianPoint>,
}

impl GaussianScene {
    pub fn new(sh_degree: ShDegree, points: Vec<GaussianPoint>) -> Result<Self> {
        let expected = sh_degree.coeff_count();
        if let Some(i) = points.iter().position(|p| p.sh.len() != expected) {
            return Err(SplatError::malformed(format!(
                "point {i} has {} SH coefficients, expected {expected}",
                points[i].sh.len()
            )));
        }
        Ok(Self { sh_degree, points })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Axis-aligned bounds of the point centers, `None` for an empty scene.
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        let mut iter = self.points.iter().map(|p| Vec3::from(p.position));
        let first = iter.next()?;
        Some(iter.fold((first, first), |(lo, hi), p| (lo.min(p), hi.max(p))))
    }
}
