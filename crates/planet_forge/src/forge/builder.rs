//! CPU backend: builds the displaced grid of one chunk.
//!
//! For each task:
//!
//! 1. Lay an `N × N` grid on the local `+Z` face plane, `size` wide.
//! 2. Rotate it onto the chunk's face and move it to `position_on_cube`.
//! 3. Project each vertex onto the sphere and push it out by the terrain height.
//! 4. Store it relative to `position_on_sphere` to keep `f32` precision.
//!
//! Normals come from finite differences of the terrain around each vertex,
//! so chunks sharing an edge agree on them. Scatter instances, when enabled,
//! are laid on the tangent plane at the chunk centre and then snapped onto the
//! displaced surface. Each instance is written twice: tilted to the surface
//! normal, and upright along the sphere's radial direction.

use std::sync::Arc;

use glam::{DVec3, Mat4, Quat, Vec3};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::id::ChunkId;
use super::task::{ChunkForgeFinalOutput, GeometryBuffer, HeightFieldTask};
use super::terrain::TerrainModel;
use crate::config::ForgeConfig;
use crate::error::WorkerError;
use crate::instances::{
    apply_transformation_to_buffer, create_square_matrix_buffer, decompose_model_matrix, matrices,
};
use crate::pool::{CancelToken, Job};

/// Angular step of the finite differences used for normals.
const NORMAL_STEP: f64 = 1e-5;

/// Per-forge settings shared by every build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuildSettings {
    pub row_vertex_count: u32,
    pub scatter_resolution: Option<u32>,
}

impl From<&ForgeConfig> for BuildSettings {
    fn from(config: &ForgeConfig) -> Self {
        Self {
            row_vertex_count: config.row_vertex_count,
            scatter_resolution: config.scatter_resolution,
        }
    }
}

/// Job for a [`ThreadWorker`](crate::pool::ThreadWorker) running [`build_chunk`].
pub fn thread_job(settings: BuildSettings) -> Job<HeightFieldTask, ChunkForgeFinalOutput> {
    Arc::new(move |task: HeightFieldTask, cancel: &CancelToken| {
        build_chunk(&task, settings, cancel)
    })
}

/// Build the geometry of one chunk.
///
/// Checks `cancel` before every grid row.
pub fn build_chunk(
    task: &HeightFieldTask,
    settings: BuildSettings,
    cancel: &CancelToken,
) -> Result<ChunkForgeFinalOutput, WorkerError> {
    if settings.row_vertex_count < 2 {
        return Err(WorkerError::Build(format!(
            "row_vertex_count must be >= 2, got {}",
            settings.row_vertex_count
        )));
    }
    if !(task.size > 0.0 && task.sphere_radius > 0.0) {
        return Err(WorkerError::Build(format!(
            "chunk {} has a degenerate size ({}) or radius ({})",
            task.id, task.size, task.sphere_radius
        )));
    }

    let n = settings.row_vertex_count as usize;
    let subdivisions = (n - 1) as f64;
    let step = task.size / subdivisions;
    let rotation = task.direction.rotation();

    let mut vertices = Vec::with_capacity(n * n);
    let mut normals = Vec::with_capacity(n * n);
    let mut height_acc = 0.0;

    for y in 0..n {
        if cancel.is_cancelled() {
            return Err(WorkerError::Cancelled);
        }
        for x in 0..n {
            let local = DVec3::new(
                (x as f64 - subdivisions / 2.0) * step,
                (y as f64 - subdivisions / 2.0) * step,
                0.0,
            );
            let unit = (rotation * local + task.position_on_cube).normalize();
            let height = task.terrain.height(unit, task.sphere_radius);
            height_acc += height;
            vertices.push(unit * (task.sphere_radius + height));
            normals.push(surface_normal(&task.terrain, unit, task.sphere_radius));
        }
    }

    let indices = grid_indices(n);

    let positions: Vec<f32> = vertices
        .iter()
        .flat_map(|v| (*v - task.position_on_sphere).as_vec3().to_array())
        .collect();
    let normals: Vec<f32> = normals.iter().flat_map(|v| v.as_vec3().to_array()).collect();

    let scatter = match settings.scatter_resolution {
        Some(resolution) => scatter_instances(task, resolution)?,
        None => Scatter::default(),
    };

    Ok(ChunkForgeFinalOutput {
        id: task.id,
        row_vertex_count: settings.row_vertex_count,
        positions: GeometryBuffer::new(positions),
        normals: GeometryBuffer::new(normals),
        indices: GeometryBuffer::new(indices),
        instances: scatter.instances.into(),
        aligned_instances: scatter.aligned_instances.into(),
        average_height: (height_acc / (n * n) as f64) as f32,
    })
}

/// Two counter-clockwise triangles per cell, seen from outside the planet.
fn grid_indices(n: usize) -> Vec<u32> {
    let mut indices = Vec::with_capacity((n - 1) * (n - 1) * 6);
    for y in 0..n - 1 {
        for x in 0..n - 1 {
            let i00 = (y * n + x) as u32;
            let i10 = i00 + 1;
            let i01 = i00 + n as u32;
            let i11 = i01 + 1;
            indices.extend_from_slice(&[i00, i10, i11, i00, i11, i01]);
        }
    }
    indices
}

/// Outward normal of the displaced sphere at `unit`.
///
/// Depends on the point only, never on the chunk being built.
fn surface_normal(terrain: &TerrainModel, unit: DVec3, radius: f64) -> DVec3 {
    let surface = |direction: DVec3| {
        let unit = direction.normalize();
        unit * (radius + terrain.height(unit, radius))
    };

    let (tangent, bitangent) = unit.any_orthonormal_pair();
    let du = surface(unit + tangent * NORMAL_STEP) - surface(unit - tangent * NORMAL_STEP);
    let dv = surface(unit + bitangent * NORMAL_STEP) - surface(unit - bitangent * NORMAL_STEP);

    match du.cross(dv).try_normalize() {
        Some(normal) if normal.dot(unit) < 0.0 => -normal,
        Some(normal) => normal,
        None => unit,
    }
}

#[derive(Default)]
struct Scatter {
    /// Up axis follows the terrain normal.
    instances: Vec<f32>,
    /// Up axis follows the radial direction.
    aligned_instances: Vec<f32>,
}

fn scatter_instances(task: &HeightFieldTask, resolution: u32) -> Result<Scatter, WorkerError> {
    let mut rng = StdRng::seed_from_u64(chunk_seed(task.id));
    let flat = create_square_matrix_buffer(Vec3::ZERO, task.size as f32, resolution, &mut rng);

    let up = task.position_on_sphere.normalize().as_vec3();
    let to_tangent = Quat::from_rotation_arc(Vec3::Y, up);
    let tangent = apply_transformation_to_buffer(&Mat4::from_quat(to_tangent), &flat);

    let mut scatter = Scatter {
        instances: Vec::with_capacity(tangent.len()),
        aligned_instances: Vec::with_capacity(tangent.len()),
    };
    for block in matrices(&tangent) {
        let instance = decompose_model_matrix(block)
            .map_err(|err| WorkerError::Build(format!("scatter instance for {}: {err}", task.id)))?;

        let unit = (task.position_on_sphere + instance.position.as_dvec3()).normalize();
        let height = task.terrain.height(unit, task.sphere_radius);
        let translation = (unit * (task.sphere_radius + height) - task.position_on_sphere).as_vec3();
        let normal = surface_normal(&task.terrain, unit, task.sphere_radius);

        for (target, buffer) in [
            (normal, &mut scatter.instances),
            (unit, &mut scatter.aligned_instances),
        ] {
            let align = Quat::from_rotation_arc(up, target.as_vec3());
            let matrix = Mat4::from_scale_rotation_translation(
                instance.scale,
                (align * instance.rotation).normalize(),
                translation,
            );
            buffer.extend_from_slice(&matrix.to_cols_array());
        }
    }

    Ok(scatter)
}

/// Stable per-chunk RNG seed.
fn chunk_seed(id: ChunkId) -> u64 {
    let parts = [
        id.root,
        id.direction.index() as u64,
        id.indices.lod as u64,
        id.indices.x as u64,
        id.indices.y as u64,
    ];
    parts.iter().fold(0x243f_6a88_85a3_08d3, |h: u64, part| {
        let h = (h ^ part).wrapping_mul(0x9e37_79b9_7f4a_7c15);
        h ^ (h >> 31)
    })
}
