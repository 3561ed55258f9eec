//! Chunk generation for cube-sphere planets.
//!
//! This module provides:
//! - [`ChunkId`] / [`ChunkIndices`] / [`Direction`]: quadtree node identity and placement
//! - [`HeightFieldTask`]: one chunk build request
//! - [`TerrainModel`]: the height function sampled by the builder
//! - [`build_chunk`]: the CPU backend
//! - [`ChunkForge`]: task queue plus LRU output cache over a [`WorkerPool`](crate::pool::WorkerPool)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          ChunkForge                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  HashSet<ChunkId>                  - Pending requests           │
//! │  LruMap<ChunkId, FinalOutput>      - Completed outputs          │
//! │  WorkerPool<HeightFieldTask, W>    - FIFO queue + N workers     │
//! └─────────────────────────────────────────────────────────────────┘
//!                           │ dispatch
//!              ┌────────────┼────────────┐
//!              ▼            ▼            ▼
//!        ┌──────────┐ ┌──────────┐ ┌──────────┐
//!        │  Worker  │ │  Worker  │ │  Worker  │
//!        │ (thread) │ │ (thread) │ │ (thread) │
//!        └──────────┘ └──────────┘ └──────────┘
//! ```
//!
//! # Output lifecycle
//!
//! ```text
//!            push                update               evict / reset
//! ┌────────┐ ─────▶ ┌─────────┐ ───────▶ ┌───────────┐ ───────▶ ┌────────┐
//! │ absent │        │ Pending │          │ Completed │          │ absent │
//! └────────┘ ◀───── └─────────┘          └───────────┘          └────────┘
//!            failure
//! ```

mod builder;
mod chunk_forge;
mod id;
mod stats;
mod task;
mod terrain;

pub use builder::{build_chunk, thread_job, BuildSettings};
pub use chunk_forge::{ChunkForge, ThreadChunkWorker};
pub use id::{ChunkId, ChunkIndices, Direction};
pub use stats::ForgeStats;
pub use task::{
    ChunkForgeFinalOutput, ChunkForgeOutput, GeometryBuffer, GpuBufferHandle, GpuBuffers,
    HeightFieldTask,
};
pub use terrain::{
    ContinentalCrust, Craters, HeightMap, HeightMapTerrainModel, Mountain,
    ProceduralTerrainModel, TerrainModel,
};
