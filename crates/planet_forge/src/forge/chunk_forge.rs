//! ChunkForge - chunk task queue plus output cache.

use std::collections::HashSet;

use glam::DVec3;
use tracing::{debug, trace};

use super::builder::{thread_job, BuildSettings};
use super::id::{ChunkId, Direction};
use super::stats::ForgeStats;
use super::task::{ChunkForgeFinalOutput, ChunkForgeOutput, GpuBuffers, HeightFieldTask};
use super::terrain::TerrainModel;
use crate::config::ForgeConfig;
use crate::error::{ForgeError, PoolError, QueueFull};
use crate::lru::LruMap;
use crate::pool::{ThreadWorker, Worker, WorkerPool};

/// Worker type used by [`ChunkForge::with_threads`].
pub type ThreadChunkWorker = ThreadWorker<HeightFieldTask, ChunkForgeFinalOutput>;

/// Turns chunk requests into pool tasks and caches the results by [`ChunkId`].
///
/// The owner calls [`update`](Self::update) once per frame and polls
/// [`get_output`](Self::get_output) for the chunks it is waiting on.
///
/// Pending chunks are tracked apart from the cache and are never evicted.
/// Completed outputs live in an LRU cache bounded by
/// [`ForgeConfig::cache_capacity`].
pub struct ChunkForge<W>
where
    W: Worker<HeightFieldTask, Output = ChunkForgeFinalOutput>,
{
    pool: WorkerPool<HeightFieldTask, W>,
    row_vertex_count: u32,

    /// Ids queued or in flight.
    pending: HashSet<ChunkId>,

    /// Completed outputs.
    cache: LruMap<ChunkId, ChunkForgeFinalOutput>,

    completed_total: u64,
    failed_total: u64,
}

impl ChunkForge<ThreadChunkWorker> {
    /// Forge backed by `config.nb_workers` threads running the CPU builder.
    pub fn with_threads(config: &ForgeConfig) -> Result<Self, ForgeError> {
        config.validate()?;

        let job = thread_job(BuildSettings::from(config));
        let workers = (0..config.nb_workers)
            .map(|index| {
                ThreadWorker::spawn(index, job.clone()).map_err(|err| PoolError::WorkerCreation {
                    index,
                    reason: err.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(workers = workers.len(), "spawned chunk builder threads");
        Self::from_workers(config, workers)
    }
}

impl<W> ChunkForge<W>
where
    W: Worker<HeightFieldTask, Output = ChunkForgeFinalOutput>,
{
    /// Forge over ready workers. `config.nb_workers` is ignored.
    pub fn from_workers(config: &ForgeConfig, workers: Vec<W>) -> Result<Self, ForgeError> {
        config.validate()?;
        let pool = WorkerPool::from_workers(workers)?;
        Self::from_pool(config, pool)
    }

    /// Forge over an existing pool, e.g. one built with the async
    /// [`WorkerPool::new`].
    pub fn from_pool(
        config: &ForgeConfig,
        pool: WorkerPool<HeightFieldTask, W>,
    ) -> Result<Self, ForgeError> {
        config.validate()?;

        let pool = match config.queue_limit {
            Some(limit) => pool.with_queue_limit(limit),
            None => pool,
        };

        let cache = LruMap::new(config.cache_capacity, traced_eviction(|_, _| {}));

        Ok(Self {
            pool,
            row_vertex_count: config.row_vertex_count,
            pending: HashSet::new(),
            cache,
            completed_total: 0,
            failed_total: 0,
        })
    }

    /// Run `callback` on every output leaving the cache, by eviction or reset.
    ///
    /// The render layer uses it to release the GPU buffers of an output.
    pub fn with_eviction_callback(
        mut self,
        callback: impl FnMut(&ChunkId, ChunkForgeFinalOutput) + Send + 'static,
    ) -> Self {
        self.cache.set_cleanup(traced_eviction(callback));
        self
    }

    /// Vertices per row of every chunk built by this forge.
    pub fn row_vertex_count(&self) -> u32 {
        self.row_vertex_count
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Queue a chunk build.
    ///
    /// Returns `false` without queueing anything if `id` is already pending
    /// or cached.
    #[allow(clippy::too_many_arguments)]
    pub fn push_task(
        &mut self,
        id: ChunkId,
        position_on_cube: DVec3,
        position_on_sphere: DVec3,
        direction: Direction,
        size: f64,
        sphere_radius: f64,
        terrain: TerrainModel,
    ) -> bool {
        self.push(HeightFieldTask {
            id,
            position_on_cube,
            position_on_sphere,
            size,
            direction,
            sphere_radius,
            terrain,
        })
    }

    /// Queue a prepared task. Same duplicate rule as [`push_task`](Self::push_task).
    pub fn push(&mut self, task: HeightFieldTask) -> bool {
        if self.is_known(&task.id) {
            trace!(chunk = %task.id, "chunk already requested");
            return false;
        }
        self.pending.insert(task.id);
        self.pool.push(task);
        true
    }

    /// Like [`push`](Self::push), but refuses the task when the queue limit
    /// of the config is reached.
    pub fn try_push(&mut self, task: HeightFieldTask) -> Result<bool, QueueFull<HeightFieldTask>> {
        if self.is_known(&task.id) {
            return Ok(false);
        }
        let id = task.id;
        self.pool.try_push(task)?;
        self.pending.insert(id);
        Ok(true)
    }

    fn is_known(&self, id: &ChunkId) -> bool {
        self.pending.contains(id) || self.cache.contains_key(id)
    }

    // =========================================================================
    // Frame update
    // =========================================================================

    /// Drive the pool and merge finished chunks into the cache.
    ///
    /// Chunks whose task failed are forgotten so they can be requested again.
    pub fn update(&mut self) {
        self.pool.update();

        for output in self.pool.consume_outputs() {
            let id = output.id;
            if !self.pending.remove(&id) {
                trace!(chunk = %id, "dropping output of a chunk that is no longer requested");
                continue;
            }
            trace!(chunk = %id, vertices = output.vertex_count(), "chunk completed");
            self.cache.set(id, output);
            self.completed_total += 1;
        }

        for id in self.pool.consume_failures() {
            if self.pending.remove(&id) {
                debug!(chunk = %id, "forgetting failed chunk");
                self.failed_total += 1;
            }
        }
    }

    // =========================================================================
    // Results
    // =========================================================================

    /// State of `id`: `None` if unknown, failed or evicted.
    ///
    /// A completed lookup marks the output as recently used.
    pub fn get_output(&mut self, id: &ChunkId) -> Option<ChunkForgeOutput> {
        if self.pending.contains(id) {
            return Some(ChunkForgeOutput::Pending);
        }
        self.cache
            .get(id)
            .cloned()
            .map(ChunkForgeOutput::Completed)
    }

    /// Record GPU handles on a cached output.
    ///
    /// Returns `false` if `id` is not cached.
    pub fn attach_gpu_buffers(&mut self, id: &ChunkId, handles: GpuBuffers) -> bool {
        let Some(output) = self.cache.remove(id) else {
            return false;
        };
        self.cache.set(*id, output.with_gpu_buffers(handles));
        true
    }

    /// Drop queued work, cancel running tasks and empty the cache.
    ///
    /// The eviction callback runs for every cached output.
    pub fn reset(&mut self) {
        debug!(
            pending = self.pending.len(),
            cached = self.cache.len(),
            "resetting chunk forge"
        );
        self.pool.reset();
        self.pending.clear();
        self.cache.clear();
    }

    /// Current counters.
    pub fn stats(&self) -> ForgeStats {
        ForgeStats {
            queued: self.pool.queued_len(),
            in_flight: self.pool.in_flight_len(),
            pending: self.pending.len(),
            cached: self.cache.len(),
            completed_total: self.completed_total,
            failed_total: self.failed_total,
            evicted_total: self.cache.cleanup_count(),
        }
    }
}

impl<W> std::fmt::Debug for ChunkForge<W>
where
    W: Worker<HeightFieldTask, Output = ChunkForgeFinalOutput>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkForge")
            .field("row_vertex_count", &self.row_vertex_count)
            .field("stats", &self.stats())
            .finish()
    }
}

fn traced_eviction(
    mut callback: impl FnMut(&ChunkId, ChunkForgeFinalOutput) + Send + 'static,
) -> impl FnMut(&ChunkId, ChunkForgeFinalOutput) + Send + 'static {
    move |id: &ChunkId, output: ChunkForgeFinalOutput| {
        trace!(chunk = %id, "evicting chunk output");
        callback(id, output);
    }
}
