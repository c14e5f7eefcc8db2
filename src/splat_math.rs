use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};

pub const SH_C0: f32 = 0.282_094_8;
pub const SH_C1: f32 = 0.488_602_5;
pub const SH_C2: [f32; 5] = [
    1.092_548_4,
    -1.092_548_4,
    0.315_391_57,
    -1.092_548_4,
    0.546_274_2,
];

/// Added to both diagonal terms of the 2D covariance so every splat covers at least a pixel.
pub const LOW_PASS: f32 = 0.3;
pub const MIN_DISCRIMINANT: f32 = 0.1;
pub const MAX_ALPHA: f32 = 0.99;
pub const NEAR_CULL: f32 = 0.2;

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Rotation matrix of a (w, x, y, z) quaternion. The quaternion is normalized first.
pub fn rotation_matrix(q: [f32; 4]) -> Mat3 {
    let q = Vec4::from(q).normalize();
    let (r, x, y, z) = (q.x, q.y, q.z, q.w);
    Mat3::from_cols(
        Vec3::new(
            1.0 - 2.0 * (y * y + z * z),
            2.0 * (x * y + r * z),
            2.0 * (x * z - r * y),
        ),
        Vec3::new(
            2.0 * (x * y - r * z),
            1.0 - 2.0 * (x * x + z * z),
            2.0 * (y * z + r * x),
        ),
        Vec3::new(
            2.0 * (x * z + r * y),
            2.0 * (y * z - r * x),
            1.0 - 2.0 * (x * x + y * y),
        ),
    )
}

pub fn covariance_3d(log_scale: [f32; 3], rotation: [f32; 4], scale_modifier: f32) -> Mat3 {
    let s = Vec3::from(log_scale).exp() * scale_modifier;
    let m = rotation_matrix(rotation) * Mat3::from_diagonal(s);
    m * m.transpose()
}

/// Screen-space covariance as (xx, xy, yy), low-pass filtered.
pub fn covariance_2d(
    mean: Vec3,
    cov3d: Mat3,
    view: &Mat4,
    focal: Vec2,
    tan_fov: Vec2,
) -> Vec3 {
    let mut t = view.transform_point3(mean);
    let limit = 1.3 * tan_fov;
    t.x = (t.x / t.z).clamp(-limit.x, limit.x) * t.z;
    t.y = (t.y / t.z).clamp(-limit.y, limit.y) * t.z;

    let j = Mat3::from_cols(
        Vec3::new(focal.x / t.z, 0.0, 0.0),
        Vec3::new(0.0, focal.y / t.z, 0.0),
        Vec3::new(
            -(focal.x * t.x) / (t.z * t.z),
            -(focal.y * t.y) / (t.z * t.z),
            0.0,
        ),
    );
    let w = Mat3::from_mat4(*view);
    let t = j * w;
    let cov = t * cov3d * t.transpose();
    Vec3::new(cov.x_axis.x + LOW_PASS, cov.y_axis.x, cov.y_axis.y + LOW_PASS)
}

pub fn conic(cov2d: Vec3) -> Vec3 {
    let det = cov2d.x * cov2d.z - cov2d.y * cov2d.y;
    let det_inv = 1.0 / det;
    Vec3::new(cov2d.z * det_inv, -cov2d.y * det_inv, cov2d.x * det_inv)
}

/// Conservative quad half-extent in pixels: three standard deviations of the major axis.
pub fn radius_px(cov2d: Vec3) -> f32 {
    let det = cov2d.x * cov2d.z - cov2d.y * cov2d.y;
    let mid = 0.5 * (cov2d.x + cov2d.z);
    let root = (mid * mid - det).max(MIN_DISCRIMINANT).sqrt();
    let lambda_1 = mid + root;
    let lambda_2 = mid - root;
    (3.0 * lambda_1.max(lambda_2).sqrt()).ceil()
}

/// Alpha of a fragment at pixel offset `d` from the splat center, `None` when discarded.
pub fn fragment_alpha(conic: Vec3, opacity: f32, d: Vec2) -> Option<f32> {
    let power = -0.5 * (conic.x * d.x * d.x + conic.z * d.y * d.y) - conic.y * d.x * d.y;
    if power > 0.0 {
        return None;
    }
    Some(MAX_ALPHA.min(opacity * power.exp()))
}

/// View-dependent color. Degree-3 coefficients are ignored even when present.
pub fn sh_color(sh: &[[f32; 3]], degree: u8, direction: Vec3) -> Vec3 {
    let c = |i: usize| Vec3::from(sh[i]);
    let mut result = SH_C0 * c(0);
    if degree > 0 {
        let Vec3 { x, y, z } = direction.normalize();
        result += -SH_C1 * y * c(1) + SH_C1 * z * c(2) - SH_C1 * x * c(3);
        if degree > 1 {
            let (xx, yy, zz) = (x * x, y * y, z * z);
            let (xy, yz, xz) = (x * y, y * z, x * z);
            result += SH_C2[0] * xy * c(4)
                + SH_C2[1] * yz * c(5)
                + SH_C2[2] * (2.0 * zz - xx - yy) * c(6)
                + SH_C2[3] * xz * c(7)
                + SH_C2[4] * (xx - yy) * c(8);
        }
    }
    (result + 0.5).max(Vec3::ZERO)
}

/// The render pipeline's blend: `src · (1 − dst.a) + dst · 1` on color and alpha.
pub fn blend_under(dst: Vec4, src: Vec4) -> Vec4 {
    src * (1.0 - dst.w) + dst
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() <= EPS * a.abs().max(b.abs()).max(1.0)
    }

    #[test]
    fn sigmoid_stays_in_open_unit_interval() {
        for x in [-20.0, -1.0, 0.0, 1.0, 15.0] {
            let s = sigmoid(x);
            assert!(s > 0.0 && s < 1.0, "x={x} s={s}");
        }
        assert!(close(sigmoid(0.0), 0.5));
    }

    #[test]
    fn identity_rotation_gives_diagonal_covariance() {
        let cov = covariance_3d([0.0, 1.0_f32.ln(), 2.0_f32.ln()], [1.0, 0.0, 0.0, 0.0], 1.0);
        assert!(close(cov.x_axis.x, 1.0));
        assert!(close(cov.y_axis.y, 1.0));
        assert!(close(cov.z_axis.z, 4.0));
        assert!(close(cov.x_axis.y, 0.0));
    }

    #[test]
    fn rotation_matrix_is_orthonormal() {
        let r = rotation_matrix([0.3, -0.2, 0.8, 0.4]);
        let should_be_identity = r * r.transpose();
        assert!(should_be_identity.abs_diff_eq(Mat3::IDENTITY, 1e-5));
    }

    #[test]
    fn quarter_turn_about_z_swaps_axes() {
        let half = std::f32::consts::FRAC_PI_4;
        let r = rotation_matrix([half.cos(), 0.0, 0.0, half.sin()]);
        assert!((r * Vec3::X).abs_diff_eq(Vec3::Y, 1e-6));
    }

    #[test]
    fn covariance_2d_adds_low_pass_to_diagonal() {
        let cov2d = covariance_2d(
            Vec3::new(0.0, 0.0, 10.0),
            Mat3::ZERO,
            &Mat4::IDENTITY,
            Vec2::splat(100.0),
            Vec2::splat(1.0),
        );
        assert!(close(cov2d.x, LOW_PASS));
        assert!(close(cov2d.y, 0.0));
        assert!(close(cov2d.z, LOW_PASS));
    }

    #[test]
    fn covariance_2d_scales_with_focal_over_depth() {
        let cov3d = Mat3::from_diagonal(Vec3::splat(1.0));
        let cov2d = covariance_2d(
            Vec3::new(0.0, 0.0, 10.0),
            cov3d,
            &Mat4::IDENTITY,
            Vec2::splat(100.0),
            Vec2::splat(1.0),
        );
        // (f / z)² · σ² = 100
        assert!(close(cov2d.x, 100.0 + LOW_PASS));
        assert!(close(cov2d.z, 100.0 + LOW_PASS));
    }

    #[test]
    fn radius_is_three_sigma_of_major_axis() {
        let r = radius_px(Vec3::new(4.0, 0.0, 1.0));
        assert_eq!(r, 6.0);
        // Degenerate covariance still yields a finite, positive radius.
        let r = radius_px(Vec3::new(0.3, 0.0, 0.3));
        assert!(r.is_finite() && r >= 1.0);
    }

    #[test]
    fn conic_inverts_covariance() {
        let cov = Vec3::new(4.0, 1.0, 2.0);
        let inv = conic(cov);
        // [[4,1],[1,2]] · [[a,b],[b,c]] = I
        assert!(close(cov.x * inv.x + cov.y * inv.y, 1.0));
        assert!(close(cov.x * inv.y + cov.y * inv.z, 0.0));
        assert!(close(cov.y * inv.y + cov.z * inv.z, 1.0));
    }

    #[test]
    fn fragment_alpha_peaks_at_center_and_is_capped() {
        let conic = Vec3::new(1.0, 0.0, 1.0);
        assert_eq!(fragment_alpha(conic, 1.0, Vec2::ZERO), Some(MAX_ALPHA));
        let a = fragment_alpha(conic, 0.5, Vec2::new(1.0, 0.0)).unwrap();
        assert!(close(a, 0.5 * (-0.5f32).exp()));
    }

    #[test]
    fn fragment_with_positive_power_is_discarded() {
        // Indefinite conic: the quadratic form goes negative along the cross term.
        let conic = Vec3::new(0.0, 1.0, 0.0);
        assert_eq!(fragment_alpha(conic, 0.5, Vec2::new(1.0, -1.0)), None);
    }

    #[test]
    fn degree_zero_color_is_view_independent() {
        let sh = [[1.0, 0.0, -1.0]];
        let a = sh_color(&sh, 0, Vec3::X);
        let b = sh_color(&sh, 0, Vec3::new(0.0, -1.0, 1.0));
        assert_eq!(a, b);
        assert!(close(a.x, SH_C0 + 0.5));
        assert!(close(a.z, (0.5 - SH_C0).max(0.0)));
    }

    #[test]
    fn degree_three_terms_are_not_evaluated() {
        let mut sh = vec![[0.0; 3]; 16];
        let truncated = sh_color(&sh, 3, Vec3::new(0.2, 0.5, 0.8));
        for coeff in &mut sh[9..] {
            *coeff = [5.0, 5.0, 5.0];
        }
        assert_eq!(sh_color(&sh, 3, Vec3::new(0.2, 0.5, 0.8)), truncated);
    }

    #[test]
    fn degree_one_follows_view_direction() {
        let mut sh = vec![[0.0; 3]; 4];
        sh[2] = [1.0, 1.0, 1.0];
        let toward = sh_color(&sh, 1, Vec3::Z);
        let away = sh_color(&sh, 1, -Vec3::Z);
        assert!(close(toward.x, 0.5 + SH_C1));
        assert!(close(away.x, 0.5 - SH_C1));
    }

    #[test]
    fn under_blending_matches_reference_accumulation() {
        let (c1, a1) = (Vec3::new(0.2, 0.4, 0.9), 0.5);
        let (c2, a2) = (Vec3::new(1.0, 0.1, 0.3), 0.8);
        let back = Vec4::from((c1 * a1, a1));
        let front = Vec4::from((c2 * a2, a2));

        let cleared = Vec4::ZERO;
        let out = blend_under(blend_under(cleared, front), back);

        let expected_color = c2 * a2 + c1 * a1 * (1.0 - a2);
        let expected_alpha = a2 + a1 * (1.0 - a2);
        assert!(out.truncate().abs_diff_eq(expected_color, 1e-6));
        assert!(close(out.w, expected_alpha));
    }
}
