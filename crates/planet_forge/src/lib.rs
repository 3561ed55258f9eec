//! Chunk streaming for procedurally generated planets.
//!
//! A planet surface is a quadtree of chunks projected from a cube onto a
//! sphere. This crate builds the geometry of the chunks a controller asks
//! for, off the frame thread, caches it, and retires replaced chunks only once
//! their replacements are drawable.
//!
//! - [`pool`]: fixed-size worker pool driven by a per-frame `update()`
//! - [`forge`]: chunk requests, the CPU builder and the output cache
//! - [`lru`]: bounded map with an eviction callback
//! - [`semaphore`]: staged disposal of replaced chunks
//! - [`instances`]: instance matrix buffers for scattered objects
//!
//! # Example
//!
//! ```
//! use planet_forge::forge::{ChunkForge, ChunkId, Direction, HeightFieldTask, TerrainModel};
//! use planet_forge::ForgeConfig;
//!
//! let config = ForgeConfig { nb_workers: 1, row_vertex_count: 8, ..ForgeConfig::default() };
//! let mut forge = ChunkForge::with_threads(&config).unwrap();
//!
//! let id = ChunkId::face(0, Direction::Up);
//! assert!(forge.push(HeightFieldTask::for_chunk(id, 1000.0, TerrainModel::flat())));
//!
//! while forge.stats().has_work() {
//!     forge.update();
//!     std::thread::yield_now();
//! }
//!
//! let output = forge.get_output(&id).unwrap();
//! assert_eq!(output.completed().unwrap().vertex_count(), 64);
//! ```
//!
//! The crate logs through `tracing` and never installs a subscriber.

pub mod config;
pub mod error;
pub mod forge;
pub mod instances;
pub mod lru;
pub mod pool;
pub mod semaphore;

pub use crate::config::ForgeConfig;
pub use crate::error::{
    ConfigError, ForgeError, MatrixError, PoolError, QueueFull, TerrainError, WorkerError,
};
pub use crate::forge::{ChunkForge, ChunkForgeOutput, ChunkId, Direction};
pub use crate::lru::LruMap;
pub use crate::pool::{CancelToken, PoolTask, ThreadWorker, Worker, WorkerPool};
pub use crate::semaphore::{ChunkHandle, DeleteSemaphore, DeletionQueue};
