//! Instance matrix buffers for objects scattered over a chunk.
//!
//! A buffer is a flat `[f32]` of 16-float blocks, one column-major model
//! matrix per instance (translation in elements 12..15). These helpers are
//! pure: every operation returns a new buffer.

use std::f32::consts::TAU;

use glam::{Mat3, Mat4, Quat, Vec3};
use rand::Rng;

use crate::error::MatrixError;

/// Floats per instance matrix.
pub const MATRIX_STRIDE: usize = 16;

/// Smallest basis length accepted by [`decompose_model_matrix`].
const MIN_SCALE: f32 = 1e-6;

/// Translation, rotation and uniform scale of one instance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Decomposed {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

/// Number of whole matrices in `buffer`.
pub fn instance_count(buffer: &[f32]) -> usize {
    buffer.len() / MATRIX_STRIDE
}

/// View the whole matrices of `buffer` as `[f32; 16]` blocks.
pub fn matrices(buffer: &[f32]) -> &[[f32; 16]] {
    let whole = instance_count(buffer) * MATRIX_STRIDE;
    bytemuck::cast_slice(&buffer[..whole])
}

/// Keep every `stride`-th instance, starting with the first.
///
/// The result holds `floor(count / stride)` instances.
pub fn down_sample(buffer: &[f32], stride: usize) -> Result<Vec<f32>, MatrixError> {
    if stride == 0 {
        return Err(MatrixError::ZeroStride);
    }
    let source = matrices(buffer);
    let wanted = source.len() / stride;

    let mut result = Vec::with_capacity(wanted * MATRIX_STRIDE);
    for i in 0..wanted {
        result.extend_from_slice(&source[i * stride]);
    }
    Ok(result)
}

/// Same cardinality as [`down_sample`], but instances are drawn uniformly
/// at random, with replacement.
pub fn random_down_sample<R: Rng + ?Sized>(
    buffer: &[f32],
    stride: usize,
    rng: &mut R,
) -> Result<Vec<f32>, MatrixError> {
    if stride == 0 {
        return Err(MatrixError::ZeroStride);
    }
    let source = matrices(buffer);
    let wanted = source.len() / stride;

    let mut result = Vec::with_capacity(wanted * MATRIX_STRIDE);
    for _ in 0..wanted {
        let index = rng.gen_range(0..source.len());
        result.extend_from_slice(&source[index]);
    }
    Ok(result)
}

/// Tile a `resolution × resolution` grid over a `size × size` square of the
/// XZ plane centred on `position` and place one instance per cell.
///
/// Each instance is jittered inside its cell, scaled uniformly in
/// `[0.7, 1.3]` and rotated about `+Y` by an angle in `[0, 2π)`. Instances
/// lie on `y = 0`; `position.y` is ignored.
pub fn create_square_matrix_buffer<R: Rng + ?Sized>(
    position: Vec3,
    size: f32,
    resolution: u32,
    rng: &mut R,
) -> Vec<f32> {
    let resolution = resolution as usize;
    let cell_size = size / resolution as f32;
    let mut buffer = Vec::with_capacity(resolution * resolution * MATRIX_STRIDE);

    for x in 0..resolution {
        for z in 0..resolution {
            let jitter_x = rng.gen::<f32>() * cell_size;
            let jitter_z = rng.gen::<f32>() * cell_size;
            let translation = Vec3::new(
                position.x + x as f32 * cell_size - size / 2.0 + jitter_x,
                0.0,
                position.z + z as f32 * cell_size - size / 2.0 + jitter_z,
            );
            let scale = 0.7 + rng.gen::<f32>() * 0.6;
            let rotation = Quat::from_axis_angle(Vec3::Y, rng.gen::<f32>() * TAU);

            let matrix =
                Mat4::from_scale_rotation_translation(Vec3::splat(scale), rotation, translation);
            buffer.extend_from_slice(&matrix.to_cols_array());
        }
    }

    buffer
}

/// Split a model matrix into translation, uniform scale and rotation.
///
/// The scale is the length of the first basis vector; the rotation is the
/// basis divided by that scale.
pub fn decompose_model_matrix(matrix: &[f32]) -> Result<Decomposed, MatrixError> {
    let Some(block) = matrix.get(..MATRIX_STRIDE) else {
        return Err(MatrixError::TooShort(matrix.len()));
    };
    if block.iter().any(|c| !c.is_finite()) {
        return Err(MatrixError::NonFinite);
    }

    let position = Vec3::new(block[12], block[13], block[14]);

    let uniform_scale = Vec3::new(block[0], block[1], block[2]).length();
    if uniform_scale < MIN_SCALE {
        return Err(MatrixError::DegenerateScale(uniform_scale));
    }

    let basis = Mat3::from_cols(
        Vec3::new(block[0], block[1], block[2]) / uniform_scale,
        Vec3::new(block[4], block[5], block[6]) / uniform_scale,
        Vec3::new(block[8], block[9], block[10]) / uniform_scale,
    );
    let rotation = Quat::from_mat3(&basis).normalize();

    Ok(Decomposed {
        position,
        rotation,
        scale: Vec3::splat(uniform_scale),
    })
}

/// Apply `transform` after every instance matrix.
///
/// Used to re-express instances in a new parent frame after an LOD
/// transition. Trailing floats that do not form a whole matrix are copied
/// unchanged.
pub fn apply_transformation_to_buffer(transform: &Mat4, buffer: &[f32]) -> Vec<f32> {
    let mut result = Vec::with_capacity(buffer.len());
    for block in matrices(buffer) {
        let matrix = *transform * Mat4::from_cols_array(block);
        result.extend_from_slice(&matrix.to_cols_array());
    }
    result.extend_from_slice(&buffer[instance_count(buffer) * MATRIX_STRIDE..]);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const EPSILON: f32 = 1e-4;

    /// Buffer whose instance `i` is a translation by `(i, 0, 0)`.
    fn indexed_buffer(count: usize) -> Vec<f32> {
        (0..count)
            .flat_map(|i| Mat4::from_translation(Vec3::new(i as f32, 0.0, 0.0)).to_cols_array())
            .collect()
    }

    #[test]
    fn down_sample_keeps_every_stride_th_block() {
        let buffer = indexed_buffer(10);

        let sampled = down_sample(&buffer, 3).unwrap();

        assert_eq!(instance_count(&sampled), 3);
        for (k, block) in matrices(&sampled).iter().enumerate() {
            let source = &buffer[k * 3 * MATRIX_STRIDE..(k * 3 + 1) * MATRIX_STRIDE];
            assert_eq!(&block[..], source);
        }
    }

    #[test]
    fn down_sample_stride_one_is_identity() {
        let buffer = indexed_buffer(5);
        assert_eq!(down_sample(&buffer, 1).unwrap(), buffer);
    }

    #[test]
    fn down_sample_larger_stride_than_count() {
        let buffer = indexed_buffer(2);
        assert!(down_sample(&buffer, 5).unwrap().is_empty());
    }

    #[test]
    fn zero_stride_is_rejected() {
        let buffer = indexed_buffer(4);
        let mut rng = StdRng::seed_from_u64(0);

        assert_eq!(down_sample(&buffer, 0), Err(MatrixError::ZeroStride));
        assert_eq!(random_down_sample(&buffer, 0, &mut rng), Err(MatrixError::ZeroStride));
    }

    #[test]
    fn random_down_sample_picks_source_blocks() {
        let buffer = indexed_buffer(20);
        let mut rng = StdRng::seed_from_u64(42);

        let sampled = random_down_sample(&buffer, 4, &mut rng).unwrap();

        assert_eq!(instance_count(&sampled), 5);
        let source = matrices(&buffer);
        for block in matrices(&sampled) {
            assert!(source.contains(block));
        }
    }

    #[test]
    fn random_down_sample_is_reproducible_with_seed() {
        let buffer = indexed_buffer(20);

        let a = random_down_sample(&buffer, 2, &mut StdRng::seed_from_u64(9)).unwrap();
        let b = random_down_sample(&buffer, 2, &mut StdRng::seed_from_u64(9)).unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn square_buffer_has_one_instance_per_cell() {
        let mut rng = StdRng::seed_from_u64(1);
        let buffer = create_square_matrix_buffer(Vec3::ZERO, 10.0, 4, &mut rng);
        assert_eq!(buffer.len(), 4 * 4 * MATRIX_STRIDE);
    }

    #[test]
    fn square_buffer_decomposes_within_bounds() {
        let position = Vec3::new(100.0, 5.0, -50.0);
        let size = 20.0;
        let resolution = 5;
        let cell_size = size / resolution as f32;
        let mut rng = StdRng::seed_from_u64(3);

        let buffer = create_square_matrix_buffer(position, size, resolution, &mut rng);

        for (index, block) in matrices(&buffer).iter().enumerate() {
            let x = index / resolution as usize;
            let z = index % resolution as usize;
            let decomposed = decompose_model_matrix(block).unwrap();

            let min_x = position.x - size / 2.0 + x as f32 * cell_size;
            let min_z = position.z - size / 2.0 + z as f32 * cell_size;
            assert!(decomposed.position.x >= min_x - EPSILON);
            assert!(decomposed.position.x <= min_x + cell_size + EPSILON);
            assert!(decomposed.position.z >= min_z - EPSILON);
            assert!(decomposed.position.z <= min_z + cell_size + EPSILON);
            assert_eq!(decomposed.position.y, 0.0);

            let scale = decomposed.scale.x;
            assert!((0.7 - EPSILON..=1.3 + EPSILON).contains(&scale));
            assert_eq!(decomposed.scale, Vec3::splat(scale));

            // A rotation about +Y leaves the up axis in place.
            let up = decomposed.rotation * Vec3::Y;
            assert!(up.abs_diff_eq(Vec3::Y, EPSILON));
        }
    }

    #[test]
    fn decompose_recovers_composed_matrix() {
        let rotation = Quat::from_axis_angle(Vec3::Y, 1.2);
        let matrix = Mat4::from_scale_rotation_translation(
            Vec3::splat(2.5),
            rotation,
            Vec3::new(1.0, 2.0, 3.0),
        );

        let decomposed = decompose_model_matrix(&matrix.to_cols_array()).unwrap();

        assert!(decomposed.position.abs_diff_eq(Vec3::new(1.0, 2.0, 3.0), EPSILON));
        assert!((decomposed.scale.x - 2.5).abs() < EPSILON);
        assert!(decomposed.rotation.abs_diff_eq(rotation, EPSILON)
            || decomposed.rotation.abs_diff_eq(-rotation, EPSILON));
    }

    #[test]
    fn decompose_rejects_bad_matrices() {
        assert_eq!(decompose_model_matrix(&[1.0f32; 15]), Err(MatrixError::TooShort(15)));

        let mut non_finite = Mat4::IDENTITY.to_cols_array();
        non_finite[5] = f32::NAN;
        assert_eq!(decompose_model_matrix(&non_finite), Err(MatrixError::NonFinite));

        let zero_scale = Mat4::from_scale(Vec3::ZERO).to_cols_array();
        assert!(matches!(
            decompose_model_matrix(&zero_scale),
            Err(MatrixError::DegenerateScale(_))
        ));
    }

    #[test]
    fn apply_transformation_moves_every_instance() {
        let buffer = indexed_buffer(3);
        let transform = Mat4::from_translation(Vec3::new(0.0, 10.0, 0.0));

        let moved = apply_transformation_to_buffer(&transform, &buffer);

        assert_eq!(moved.len(), buffer.len());
        for (i, block) in matrices(&moved).iter().enumerate() {
            let position = decompose_model_matrix(block).unwrap().position;
            assert!(position.abs_diff_eq(Vec3::new(i as f32, 10.0, 0.0), EPSILON));
        }
    }

    #[test]
    fn apply_transformation_composes_after_instance() {
        let instance = Mat4::from_translation(Vec3::X);
        let transform = Mat4::from_rotation_y(std::f32::consts::FRAC_PI_2);

        let moved = apply_transformation_to_buffer(&transform, &instance.to_cols_array());

        // The instance offset is rotated by the parent frame.
        let position = decompose_model_matrix(&moved).unwrap().position;
        assert!(position.abs_diff_eq(Vec3::new(0.0, 0.0, -1.0), EPSILON));
    }
}
