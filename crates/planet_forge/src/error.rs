//! Error types for the forge, the worker pool and the instance utilities.

use thiserror::Error;

/// Errors raised while building or feeding a [`WorkerPool`](crate::pool::WorkerPool).
#[derive(Debug, Error)]
pub enum PoolError {
    /// A pool needs at least one worker to make progress.
    #[error("a worker pool needs at least one worker")]
    NoWorkers,

    /// The async worker factory failed; pool construction is aborted.
    #[error("failed to create worker {index}: {reason}")]
    WorkerCreation { index: usize, reason: String },
}

/// Returned by [`WorkerPool::try_push`](crate::pool::WorkerPool::try_push) when
/// the queue limit is reached. The rejected task is handed back.
#[derive(Debug, Error)]
#[error("task queue is full ({limit} queued)")]
pub struct QueueFull<T> {
    pub limit: usize,
    pub task: T,
}

/// Failure of a single dispatched task.
///
/// The pool logs and swallows these; they never abort the pool.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkerError {
    /// The task observed its cancel token and stopped early.
    #[error("task was cancelled")]
    Cancelled,

    /// The execution context behind the worker is gone.
    #[error("worker disconnected before replying")]
    Disconnected,

    /// The task ran but could not produce an output.
    #[error("task failed: {0}")]
    Build(String),
}

/// Errors from the instance matrix buffer utilities.
#[derive(Clone, Copy, Debug, Error, PartialEq)]
pub enum MatrixError {
    /// Fewer than 16 floats were given for one matrix.
    #[error("matrix needs 16 components, got {0}")]
    TooShort(usize),

    /// At least one component is NaN or infinite.
    #[error("matrix contains non-finite components")]
    NonFinite,

    /// The basis vectors have (near) zero length.
    #[error("matrix scale {0} is degenerate")]
    DegenerateScale(f32),

    /// A down-sampling stride of zero.
    #[error("down-sampling stride must be >= 1")]
    ZeroStride,
}

/// Invalid [`ForgeConfig`](crate::config::ForgeConfig) values.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("nb_workers must be >= 1")]
    ZeroWorkers,

    #[error("row_vertex_count must be >= 2 (got {0})")]
    RowVertexCount(u32),

    #[error("cache_capacity must be >= 1")]
    ZeroCacheCapacity,

    #[error("scatter_resolution must be >= 1 when set")]
    ScatterResolution,

    #[error("queue_limit must be >= 1 when set")]
    ZeroQueueLimit,
}

/// Invalid terrain input.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TerrainError {
    #[error("height map of {width}x{height} needs {} samples, got {len}", .width * .height)]
    HeightMapSize {
        width: usize,
        height: usize,
        len: usize,
    },

    #[error("height map must be at least 1x1")]
    EmptyHeightMap,
}

/// Top-level error for building a [`ChunkForge`](crate::forge::ChunkForge).
#[derive(Debug, Error)]
pub enum ForgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}
