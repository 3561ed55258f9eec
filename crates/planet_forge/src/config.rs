//! Forge configuration.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for a [`ChunkForge`](crate::forge::ChunkForge).
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ForgeConfig {
    /// Number of workers in the pool.
    pub nb_workers: usize,

    /// Vertices per chunk row. Every chunk is a `row_vertex_count²` grid.
    pub row_vertex_count: u32,

    /// Maximum number of completed outputs kept in the cache.
    pub cache_capacity: usize,

    /// Grid resolution of the scatter-instance buffer, if instances are wanted.
    pub scatter_resolution: Option<u32>,

    /// Upper bound on queued (not yet dispatched) tasks for `try_push`.
    pub queue_limit: Option<usize>,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            nb_workers: default_worker_count(),
            row_vertex_count: 64,
            cache_capacity: 1024,
            scatter_resolution: None,
            queue_limit: None,
        }
    }
}

impl ForgeConfig {
    /// Config for low-end systems: two workers, coarse chunks, small cache.
    pub fn low_end() -> Self {
        Self {
            nb_workers: 2,
            row_vertex_count: 32,
            cache_capacity: 256,
            scatter_resolution: None,
            queue_limit: Some(512),
        }
    }

    /// Config for high-end systems: dense chunks, large cache, scattered instances.
    pub fn high_end() -> Self {
        Self {
            nb_workers: default_worker_count().max(4),
            row_vertex_count: 128,
            cache_capacity: 4096,
            scatter_resolution: Some(16),
            queue_limit: None,
        }
    }

    /// Check that the values can drive a forge.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nb_workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.row_vertex_count < 2 {
            return Err(ConfigError::RowVertexCount(self.row_vertex_count));
        }
        if self.cache_capacity == 0 {
            return Err(ConfigError::ZeroCacheCapacity);
        }
        if self.scatter_resolution == Some(0) {
            return Err(ConfigError::ScatterResolution);
        }
        if self.queue_limit == Some(0) {
            return Err(ConfigError::ZeroQueueLimit);
        }
        Ok(())
    }
}

/// One worker per hardware thread, minus the coordinating thread.
fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ForgeConfig::default();
        assert!(config.nb_workers >= 1);
        assert_eq!(config.row_vertex_count, 64);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn presets_are_valid() {
        assert_eq!(ForgeConfig::low_end().validate(), Ok(()));
        assert_eq!(ForgeConfig::high_end().validate(), Ok(()));
    }

    #[test]
    fn presets_differ() {
        let low = ForgeConfig::low_end();
        let high = ForgeConfig::high_end();
        assert!(high.row_vertex_count > low.row_vertex_count);
        assert!(high.cache_capacity > low.cache_capacity);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let base = ForgeConfig::default();

        let config = ForgeConfig { nb_workers: 0, ..base.clone() };
        assert_eq!(config.validate(), Err(ConfigError::ZeroWorkers));

        let config = ForgeConfig { row_vertex_count: 1, ..base.clone() };
        assert_eq!(config.validate(), Err(ConfigError::RowVertexCount(1)));

        let config = ForgeConfig { cache_capacity: 0, ..base.clone() };
        assert_eq!(config.validate(), Err(ConfigError::ZeroCacheCapacity));

        let config = ForgeConfig { scatter_resolution: Some(0), ..base.clone() };
        assert_eq!(config.validate(), Err(ConfigError::ScatterResolution));

        let config = ForgeConfig { queue_limit: Some(0), ..base };
        assert_eq!(config.validate(), Err(ConfigError::ZeroQueueLimit));
    }
}
