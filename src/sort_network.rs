use crate::error::{Result, SplatError};
use glam::{Mat4, Vec3, Vec4};

/// Key written into the padding region of a depth key array.
pub const DEPTH_SENTINEL: f32 = f32::INFINITY;

/// Vertices emitted per splat (two triangles).
pub const VERTICES_PER_SPLAT: u32 = 6;

/// One synchronized stage of the bitonic network: merge size `k`, distance `j`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BitonicStage {
    pub k: u32,
    pub j: u32,
}

/// Length of the key array for `num_points` points.
pub fn padded_len(num_points: u32) -> u32 {
    num_points.max(1).next_power_of_two()
}

pub fn check_sort_len(len: usize) -> Result<()> {
    if len.is_power_of_two() {
        Ok(())
    } else {
        Err(SplatError::NonPowerOfTwoSortLength(len))
    }
}

/// Stages in execution order: k = 2, 4, .., n and, inside each, j = k/2 .. 1.
pub fn bitonic_stages(len: u32) -> Vec<BitonicStage> {
    let mut stages = Vec::new();
    let mut k = 2u32;
    while k <= len {
        let mut j = k / 2;
        while j > 0 {
            stages.push(BitonicStage { k, j });
            j /= 2;
        }
        k *= 2;
    }
    stages
}

/// Compare-exchange of lane `i` against `i ^ j`. Only the lower lane of a pair acts.
fn exchange(keys: &mut [f32], indices: &mut [u32], i: usize, stage: BitonicStage) {
    let l = i ^ stage.j as usize;
    if l <= i {
        return;
    }
    let ascending = (i & stage.k as usize) == 0;
    let swap = if ascending {
        keys[i] > keys[l]
    } else {
        keys[i] < keys[l]
    };
    if swap {
        keys.swap(i, l);
        indices.swap(i, l);
    }
}

/// Permutation that sorts `keys` ascending. Equal keys end up in no particular order.
pub fn argsort(keys: &[f32]) -> Result<Vec<u32>> {
    check_sort_len(keys.len())?;
    let mut keys = keys.to_vec();
    let mut indices: Vec<u32> = (0..keys.len() as u32).collect();
    for stage in bitonic_stages(keys.len() as u32) {
        for i in 0..keys.len() {
            exchange(&mut keys, &mut indices, i, stage);
        }
    }
    Ok(indices)
}

/// Depth keys for `positions`, padded with [`DEPTH_SENTINEL`] up to a power of two.
pub fn depth_keys(positions: &[Vec3], transform: &Mat4) -> Vec<f32> {
    let len = padded_len(positions.len() as u32) as usize;
    let mut keys = vec![DEPTH_SENTINEL; len];
    for (key, position) in keys.iter_mut().zip(positions) {
        *key = (*transform * Vec4::from((*position, 1.0))).z;
    }
    keys
}

/// Expand the first `num_points` ranks of a point permutation into vertex ids.
pub fn expand_draw_order(permutation: &[u32], num_points: usize) -> Vec<u32> {
    let mut out = Vec::with_capacity(num_points * VERTICES_PER_SPLAT as usize);
    for &point in &permutation[..num_points] {
        out.extend((0..VERTICES_PER_SPLAT).map(|v| point * VERTICES_PER_SPLAT + v));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;

    fn permuted(keys: &[f32], permutation: &[u32]) -> Vec<f32> {
        permutation.iter().map(|&i| keys[i as usize]).collect()
    }

    fn is_non_decreasing(values: &[f32]) -> bool {
        values.windows(2).all(|w| w[0] <= w[1])
    }

    #[test]
    fn rejects_non_power_of_two() {
        assert!(matches!(
            argsort(&[1.0, 2.0, 3.0]),
            Err(SplatError::NonPowerOfTwoSortLength(3))
        ));
        assert!(matches!(
            argsort(&[]),
            Err(SplatError::NonPowerOfTwoSortLength(0))
        ));
    }

    #[test]
    fn stage_count_is_log_squared() {
        assert!(bitonic_stages(1).is_empty());
        assert_eq!(bitonic_stages(2), vec![BitonicStage { k: 2, j: 1 }]);
        // log2(n) * (log2(n) + 1) / 2
        assert_eq!(bitonic_stages(8).len(), 6);
        assert_eq!(bitonic_stages(1024).len(), 55);
        let stages = bitonic_stages(8);
        assert_eq!(stages[1], BitonicStage { k: 4, j: 2 });
        assert_eq!(stages[2], BitonicStage { k: 4, j: 1 });
    }

    #[test]
    fn sorts_random_keys_with_duplicates() {
        let mut rng = StdRng::seed_from_u64(7);
        for exp in 0..=14 {
            let len = 1usize << exp;
            let keys: Vec<f32> = (0..len)
                .map(|_| rng.random_range(-8i32..8) as f32 * 0.5)
                .collect();
            let permutation = argsort(&keys).unwrap();
            assert!(is_non_decreasing(&permuted(&keys, &permutation)), "len={len}");
        }
    }

    #[test]
    fn permutation_is_a_bijection() {
        let mut rng = StdRng::seed_from_u64(11);
        for exp in [0, 1, 3, 9, 12] {
            let len = 1usize << exp;
            let keys: Vec<f32> = (0..len).map(|_| rng.random::<f32>()).collect();
            let permutation = argsort(&keys).unwrap();
            let seen: HashSet<u32> = permutation.iter().copied().collect();
            let expected: HashSet<u32> = (0..len as u32).collect();
            assert_eq!(permutation.len(), len);
            assert_eq!(seen, expected);
        }
    }

    #[test]
    fn all_equal_keys_still_give_a_permutation() {
        let keys = vec![2.5f32; 64];
        let permutation = argsort(&keys).unwrap();
        let seen: HashSet<u32> = permutation.iter().copied().collect();
        assert_eq!(seen.len(), 64);
    }

    #[test]
    fn sorting_sorted_keys_keeps_them_sorted() {
        let keys: Vec<f32> = (0..256).map(|i| (i / 4) as f32).collect();
        let permutation = argsort(&keys).unwrap();
        assert_eq!(permuted(&keys, &permutation), keys);
    }

    #[test]
    fn padding_never_reaches_real_ranks() {
        let mut rng = StdRng::seed_from_u64(3);
        for num_points in [1usize, 3, 5, 100, 1000] {
            let positions: Vec<Vec3> = (0..num_points)
                .map(|_| Vec3::new(0.0, 0.0, rng.random_range(-1.0e6..1.0e6)))
                .collect();
            let keys = depth_keys(&positions, &Mat4::IDENTITY);
            assert_eq!(keys.len(), num_points.next_power_of_two());
            let permutation = argsort(&keys).unwrap();
            assert!(
                permutation[..num_points]
                    .iter()
                    .all(|&i| (i as usize) < num_points)
            );
        }
    }

    #[test]
    fn power_of_two_point_count_has_no_padding() {
        let positions = vec![Vec3::Z; 8];
        let keys = depth_keys(&positions, &Mat4::IDENTITY);
        assert_eq!(keys.len(), 8);
        assert!(keys.iter().all(|&k| k == 1.0));
    }

    #[test]
    fn expansion_fans_each_point_into_six_vertices() {
        let permutation = [2u32, 0, 1, 3];
        let out = expand_draw_order(&permutation, 3);
        assert_eq!(out.len(), 18);
        for (r, &p) in permutation[..3].iter().enumerate() {
            for v in 0..6 {
                assert_eq!(out[r * 6 + v], p * 6 + v as u32);
            }
        }
    }

    #[test]
    fn depth_sort_and_expand_end_to_end() {
        let positions = [
            Vec3::new(0.0, 0.0, 5.0),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(0.0, 0.0, 3.0),
            Vec3::new(0.0, 0.0, 2.0),
        ];
        let keys = depth_keys(&positions, &Mat4::IDENTITY);
        let permutation = argsort(&keys).unwrap();
        assert_eq!(permutation, vec![1, 3, 2, 0]);
        assert_eq!(
            expand_draw_order(&permutation, 4),
            vec![
                6, 7, 8, 9, 10, 11, 18, 19, 20, 21, 22, 23, 12, 13, 14, 15, 16, 17, 0, 1, 2, 3,
                4, 5
            ]
        );
    }
}
