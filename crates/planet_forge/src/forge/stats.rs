//! Counters describing the state of a chunk forge.

/// Snapshot returned by [`ChunkForge::stats`](super::ChunkForge::stats).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ForgeStats {
    /// Tasks waiting for a worker.
    pub queued: usize,
    /// Workers busy with a task, including tasks cancelled by a reset.
    pub in_flight: usize,
    /// Chunks reported as pending.
    pub pending: usize,
    /// Completed outputs held in the cache.
    pub cached: usize,
    /// Outputs merged into the cache since creation.
    pub completed_total: u64,
    /// Tasks that failed since creation.
    pub failed_total: u64,
    /// Outputs evicted or cleared from the cache since creation.
    pub evicted_total: u64,
}

impl ForgeStats {
    /// Check if any chunk is still being worked on.
    pub fn has_work(&self) -> bool {
        self.pending > 0 || self.in_flight > 0
    }

    /// Share of finished tasks that failed, in `[0, 1]`.
    pub fn failure_rate(&self) -> f64 {
        let finished = self.completed_total + self.failed_total;
        if finished == 0 {
            0.0
        } else {
            self.failed_total as f64 / finished as f64
        }
    }
}
