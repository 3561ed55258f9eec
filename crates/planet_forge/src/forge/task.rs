//! Chunk generation requests and their results.

use std::fmt;
use std::sync::Arc;

use bytemuck::Pod;
use glam::DVec3;

use super::id::{ChunkId, Direction};
use super::terrain::TerrainModel;
use crate::pool::PoolTask;

/// Everything a worker needs to build one chunk.
#[derive(Clone, Debug)]
pub struct HeightFieldTask {
    pub id: ChunkId,
    /// Chunk centre on the cube, planet space.
    pub position_on_cube: DVec3,
    /// Chunk centre projected on the sphere. Output vertices are relative to it.
    pub position_on_sphere: DVec3,
    /// Edge length of the chunk on the cube.
    pub size: f64,
    pub direction: Direction,
    pub sphere_radius: f64,
    pub terrain: TerrainModel,
}

impl HeightFieldTask {
    /// Derive the placement of `id` on a planet of radius `sphere_radius`.
    pub fn for_chunk(id: ChunkId, sphere_radius: f64, terrain: TerrainModel) -> Self {
        Self {
            id,
            position_on_cube: id.indices.position_on_cube(id.direction, sphere_radius),
            position_on_sphere: id.indices.position_on_sphere(id.direction, sphere_radius),
            size: id.indices.side_length(sphere_radius),
            direction: id.direction,
            sphere_radius,
            terrain,
        }
    }
}

impl PoolTask for HeightFieldTask {
    type Key = ChunkId;

    fn key(&self) -> ChunkId {
        self.id
    }
}

/// Opaque handle to a buffer uploaded by the render layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GpuBufferHandle(pub u64);

/// Handles for the three geometry buffers of one chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GpuBuffers {
    pub positions: GpuBufferHandle,
    pub normals: GpuBufferHandle,
    pub indices: GpuBufferHandle,
}

/// CPU data of a buffer, plus its GPU copy once uploaded.
#[derive(Clone)]
pub struct GeometryBuffer<T> {
    pub cpu: Arc<[T]>,
    pub gpu: Option<GpuBufferHandle>,
}

impl<T> GeometryBuffer<T> {
    pub fn new(data: Vec<T>) -> Self {
        Self {
            cpu: data.into(),
            gpu: None,
        }
    }

    pub fn len(&self) -> usize {
        self.cpu.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cpu.is_empty()
    }

    /// Whether both buffers share the same CPU allocation.
    pub fn shares_data(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cpu, &other.cpu)
    }
}

impl<T: Pod> GeometryBuffer<T> {
    /// Byte view for uploading.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.cpu)
    }
}

impl<T> fmt::Debug for GeometryBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeometryBuffer")
            .field("len", &self.cpu.len())
            .field("gpu", &self.gpu)
            .finish()
    }
}

/// A built chunk.
///
/// Cloning is cheap: buffers are shared. Two outputs compare equal when they
/// describe the same chunk with the same buffers.
#[derive(Clone, Debug)]
pub struct ChunkForgeFinalOutput {
    pub id: ChunkId,
    pub row_vertex_count: u32,
    /// `row_vertex_count²` xyz triples relative to the chunk's sphere position.
    pub positions: GeometryBuffer<f32>,
    /// Unit normals, one xyz triple per vertex.
    pub normals: GeometryBuffer<f32>,
    /// Two triangles per grid cell.
    pub indices: GeometryBuffer<u32>,
    /// Scatter instances as 16-float column-major matrices, chunk-relative.
    /// Their up axis follows the terrain normal.
    pub instances: Arc<[f32]>,
    /// The same instances standing upright along the planet's radial direction.
    pub aligned_instances: Arc<[f32]>,
    /// Mean terrain height over the chunk's vertices.
    pub average_height: f32,
}

impl ChunkForgeFinalOutput {
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn instance_count(&self) -> usize {
        crate::instances::instance_count(&self.instances)
    }

    /// GPU handles, if all three buffers were uploaded.
    pub fn gpu_buffers(&self) -> Option<GpuBuffers> {
        Some(GpuBuffers {
            positions: self.positions.gpu?,
            normals: self.normals.gpu?,
            indices: self.indices.gpu?,
        })
    }

    /// Copy of this output carrying `handles`. Buffer data stays shared.
    pub fn with_gpu_buffers(&self, handles: GpuBuffers) -> Self {
        let mut output = self.clone();
        output.positions.gpu = Some(handles.positions);
        output.normals.gpu = Some(handles.normals);
        output.indices.gpu = Some(handles.indices);
        output
    }
}

impl PartialEq for ChunkForgeFinalOutput {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.positions.shares_data(&other.positions)
            && self.normals.shares_data(&other.normals)
            && self.indices.shares_data(&other.indices)
            && Arc::ptr_eq(&self.instances, &other.instances)
            && Arc::ptr_eq(&self.aligned_instances, &other.aligned_instances)
            && self.gpu_buffers() == other.gpu_buffers()
    }
}

/// State of a chunk inside the forge.
#[derive(Clone, Debug, PartialEq)]
pub enum ChunkForgeOutput {
    /// Queued or being built.
    Pending,
    Completed(ChunkForgeFinalOutput),
}

impl ChunkForgeOutput {
    pub fn is_pending(&self) -> bool {
        matches!(self, ChunkForgeOutput::Pending)
    }

    pub fn completed(&self) -> Option<&ChunkForgeFinalOutput> {
        match self {
            ChunkForgeOutput::Completed(output) => Some(output),
            ChunkForgeOutput::Pending => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forge::id::ChunkIndices;

    fn output() -> ChunkForgeFinalOutput {
        ChunkForgeFinalOutput {
            id: ChunkId::face(1, Direction::Up),
            row_vertex_count: 2,
            positions: GeometryBuffer::new(vec![0.0; 12]),
            normals: GeometryBuffer::new(vec![0.0; 12]),
            indices: GeometryBuffer::new(vec![0, 1, 2, 1, 3, 2]),
            instances: Vec::<f32>::new().into(),
            aligned_instances: Vec::<f32>::new().into(),
            average_height: 0.0,
        }
    }

    #[test]
    fn task_placement_matches_indices() {
        let id = ChunkId::new(3, Direction::Left, ChunkIndices::new(2, 1, 2));
        let task = HeightFieldTask::for_chunk(id, 100.0, TerrainModel::flat());

        assert_eq!(task.key(), id);
        assert_eq!(task.direction, Direction::Left);
        assert_eq!(task.size, 50.0);
        assert!((task.position_on_sphere.length() - 100.0).abs() < 1e-9);
        assert!(task
            .position_on_sphere
            .normalize()
            .abs_diff_eq(task.position_on_cube.normalize(), 1e-12));
    }

    #[test]
    fn as_bytes_views_the_whole_buffer() {
        let buffer = GeometryBuffer::new(vec![1.0f32, 2.0, 3.0]);
        assert_eq!(buffer.as_bytes().len(), 12);
        assert_eq!(&buffer.as_bytes()[..4], &1.0f32.to_ne_bytes());
    }

    #[test]
    fn clones_are_equal_and_rebuilds_are_not() {
        let a = output();
        let b = a.clone();
        assert_eq!(a, b);
        assert!(a.positions.shares_data(&b.positions));

        let rebuilt = output();
        assert_ne!(a, rebuilt);
    }

    #[test]
    fn gpu_handles_are_all_or_nothing() {
        let a = output();
        assert_eq!(a.gpu_buffers(), None);

        let handles = GpuBuffers {
            positions: GpuBufferHandle(1),
            normals: GpuBufferHandle(2),
            indices: GpuBufferHandle(3),
        };
        let uploaded = a.with_gpu_buffers(handles);
        assert_eq!(uploaded.gpu_buffers(), Some(handles));
        assert!(uploaded.positions.shares_data(&a.positions));
        assert_ne!(uploaded, a);
    }

    #[test]
    fn counts_follow_buffer_lengths() {
        let a = output();
        assert_eq!(a.vertex_count(), 4);
        assert_eq!(a.triangle_count(), 2);
        assert_eq!(a.instance_count(), 0);
        assert!(ChunkForgeOutput::Pending.is_pending());
        assert_eq!(ChunkForgeOutput::Completed(a.clone()).completed(), Some(&a));
    }
}
