//! Staged chunk replacement.
//!
//! When a chunk splits or merges, the chunks it replaces must stay visible
//! until their replacements can be drawn, otherwise the terrain shows a hole
//! for a few frames. A [`DeleteSemaphore`] holds the retired chunks and
//! disposes them once every replacement is loaded.
//!
//! ```text
//! ┌─────────┐  all new chunks loaded    ┌──────────┐
//! │ Pending │──────────────────────────▶│ Resolved │
//! └─────────┘  or one new chunk disposed└──────────┘
//! ```

use std::rc::Rc;
use std::sync::Arc;

use tracing::debug;

/// Capability the render layer exposes for each chunk.
pub trait ChunkHandle {
    /// Whether the chunk's mesh can be drawn.
    fn is_loaded(&self) -> bool;

    /// Whether the chunk was torn down.
    fn has_been_disposed(&self) -> bool;

    /// Release the chunk's resources.
    fn dispose(&self);
}

impl<T: ChunkHandle + ?Sized> ChunkHandle for Rc<T> {
    fn is_loaded(&self) -> bool {
        (**self).is_loaded()
    }

    fn has_been_disposed(&self) -> bool {
        (**self).has_been_disposed()
    }

    fn dispose(&self) {
        (**self).dispose()
    }
}

impl<T: ChunkHandle + ?Sized> ChunkHandle for Arc<T> {
    fn is_loaded(&self) -> bool {
        (**self).is_loaded()
    }

    fn has_been_disposed(&self) -> bool {
        (**self).has_been_disposed()
    }

    fn dispose(&self) {
        (**self).dispose()
    }
}

/// Disposes `chunks_to_delete` once all `new_chunks` are loaded.
///
/// If one of the new chunks is disposed before it loads (the viewer moved
/// away), the semaphore can never resolve normally. It then resolves right
/// away so the old chunks are not leaked.
#[derive(Debug)]
pub struct DeleteSemaphore<C> {
    new_chunks: Vec<C>,
    chunks_to_delete: Vec<C>,
    resolved: bool,
}

impl<C: ChunkHandle> DeleteSemaphore<C> {
    /// Create a pending semaphore.
    pub fn new(new_chunks: Vec<C>, chunks_to_delete: Vec<C>) -> Self {
        Self {
            new_chunks,
            chunks_to_delete,
            resolved: false,
        }
    }

    /// Check the resolution conditions. Returns `true` once resolved.
    ///
    /// Cheap no-op after resolution.
    pub fn update(&mut self) -> bool {
        if self.resolved {
            return true;
        }

        if self.new_chunks.iter().any(|chunk| chunk.has_been_disposed()) {
            debug!(
                retired = self.chunks_to_delete.len(),
                "replacement chunk disposed before loading, resolving early"
            );
            self.resolve();
        } else if self.new_chunks.iter().all(|chunk| chunk.is_loaded()) {
            self.resolve();
        }

        self.resolved
    }

    /// Whether the retired chunks were disposed.
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Chunks waiting to load.
    pub fn new_chunks(&self) -> &[C] {
        &self.new_chunks
    }

    /// Chunks waiting to be disposed.
    pub fn chunks_to_delete(&self) -> &[C] {
        &self.chunks_to_delete
    }

    /// Dispose both the new and the retired chunks, whatever their state.
    ///
    /// Used when the owning planet is unloaded. Safe after resolution.
    pub fn dispose(&mut self) {
        for chunk in self.new_chunks.drain(..) {
            chunk.dispose();
        }
        for chunk in self.chunks_to_delete.drain(..) {
            chunk.dispose();
        }
    }

    fn resolve(&mut self) {
        for chunk in self.chunks_to_delete.drain(..) {
            chunk.dispose();
        }
        self.new_chunks.clear();
        self.resolved = true;
    }
}

/// The pending semaphores of one chunk tree.
#[derive(Debug)]
pub struct DeletionQueue<C> {
    semaphores: Vec<DeleteSemaphore<C>>,
}

impl<C> Default for DeletionQueue<C> {
    fn default() -> Self {
        Self {
            semaphores: Vec::new(),
        }
    }
}

impl<C: ChunkHandle> DeletionQueue<C> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Retire `chunks_to_delete` once `new_chunks` are loaded.
    pub fn request_deletion(&mut self, new_chunks: Vec<C>, chunks_to_delete: Vec<C>) {
        self.semaphores
            .push(DeleteSemaphore::new(new_chunks, chunks_to_delete));
    }

    /// Update every semaphore and drop the resolved ones.
    ///
    /// Returns how many resolved during this call.
    pub fn update(&mut self) -> usize {
        let before = self.semaphores.len();
        self.semaphores.retain_mut(|semaphore| !semaphore.update());
        before - self.semaphores.len()
    }

    /// Number of unresolved semaphores.
    pub fn len(&self) -> usize {
        self.semaphores.len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.semaphores.is_empty()
    }

    /// Force-dispose every chunk held by the queue.
    pub fn dispose(&mut self) {
        for mut semaphore in self.semaphores.drain(..) {
            semaphore.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug, Default)]
    struct FakeChunk {
        loaded: Cell<bool>,
        disposed: Cell<bool>,
        dispose_calls: Cell<usize>,
    }

    impl FakeChunk {
        fn new() -> Rc<Self> {
            Rc::new(Self::default())
        }
    }

    impl ChunkHandle for FakeChunk {
        fn is_loaded(&self) -> bool {
            self.loaded.get()
        }

        fn has_been_disposed(&self) -> bool {
            self.disposed.get()
        }

        fn dispose(&self) {
            self.disposed.set(true);
            self.dispose_calls.set(self.dispose_calls.get() + 1);
        }
    }

    #[test]
    fn waits_for_all_new_chunks() {
        let (a, b, x) = (FakeChunk::new(), FakeChunk::new(), FakeChunk::new());
        let mut semaphore = DeleteSemaphore::new(vec![a.clone(), b.clone()], vec![x.clone()]);

        assert!(!semaphore.update());
        assert_eq!(x.dispose_calls.get(), 0);

        a.loaded.set(true);
        assert!(!semaphore.update());
        assert_eq!(x.dispose_calls.get(), 0);

        b.loaded.set(true);
        assert!(semaphore.update());
        assert!(semaphore.is_resolved());
        assert_eq!(x.dispose_calls.get(), 1);
        assert_eq!(a.dispose_calls.get(), 0);
        assert_eq!(b.dispose_calls.get(), 0);
    }

    #[test]
    fn zombie_resolves_regardless_of_other_chunks() {
        let (a, b, x) = (FakeChunk::new(), FakeChunk::new(), FakeChunk::new());
        let mut semaphore = DeleteSemaphore::new(vec![a.clone(), b.clone()], vec![x.clone()]);

        assert!(!semaphore.update());

        a.dispose();
        assert!(semaphore.update());
        assert_eq!(x.dispose_calls.get(), 1);
        assert!(!b.loaded.get());
    }

    #[test]
    fn update_after_resolution_is_idempotent() {
        let (a, x) = (FakeChunk::new(), FakeChunk::new());
        let mut semaphore = DeleteSemaphore::new(vec![a.clone()], vec![x.clone()]);

        a.loaded.set(true);
        for _ in 0..5 {
            assert!(semaphore.update());
        }

        assert_eq!(x.dispose_calls.get(), 1);
        assert!(semaphore.new_chunks().is_empty());
        assert!(semaphore.chunks_to_delete().is_empty());
    }

    #[test]
    fn empty_replacement_resolves_immediately() {
        let x = FakeChunk::new();
        let mut semaphore = DeleteSemaphore::new(Vec::new(), vec![x.clone()]);

        assert!(semaphore.update());
        assert_eq!(x.dispose_calls.get(), 1);
    }

    #[test]
    fn dispose_tears_down_everything() {
        let (a, x, y) = (FakeChunk::new(), FakeChunk::new(), FakeChunk::new());
        let mut semaphore = DeleteSemaphore::new(vec![a.clone()], vec![x.clone(), y.clone()]);

        semaphore.dispose();

        assert_eq!(a.dispose_calls.get(), 1);
        assert_eq!(x.dispose_calls.get(), 1);
        assert_eq!(y.dispose_calls.get(), 1);
    }

    #[test]
    fn dispose_after_resolution_is_noop() {
        let (a, x) = (FakeChunk::new(), FakeChunk::new());
        let mut semaphore = DeleteSemaphore::new(vec![a.clone()], vec![x.clone()]);

        a.loaded.set(true);
        semaphore.update();
        semaphore.dispose();

        assert_eq!(a.dispose_calls.get(), 0);
        assert_eq!(x.dispose_calls.get(), 1);
    }

    #[test]
    fn works_with_arc_handles() {
        struct Loaded;
        impl ChunkHandle for Loaded {
            fn is_loaded(&self) -> bool {
                true
            }
            fn has_been_disposed(&self) -> bool {
                false
            }
            fn dispose(&self) {}
        }

        let mut semaphore: DeleteSemaphore<Arc<dyn ChunkHandle>> =
            DeleteSemaphore::new(vec![Arc::new(Loaded)], vec![Arc::new(Loaded)]);
        assert!(semaphore.update());
    }

    #[test]
    fn queue_drops_resolved_semaphores() {
        let (a, b, x, y) = (
            FakeChunk::new(),
            FakeChunk::new(),
            FakeChunk::new(),
            FakeChunk::new(),
        );
        let mut queue = DeletionQueue::new();
        queue.request_deletion(vec![a.clone()], vec![x.clone()]);
        queue.request_deletion(vec![b.clone()], vec![y.clone()]);

        assert_eq!(queue.update(), 0);
        assert_eq!(queue.len(), 2);

        a.loaded.set(true);
        assert_eq!(queue.update(), 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(x.dispose_calls.get(), 1);
        assert_eq!(y.dispose_calls.get(), 0);
    }

    #[test]
    fn queue_dispose_releases_pending_chunks() {
        let (a, x) = (FakeChunk::new(), FakeChunk::new());
        let mut queue = DeletionQueue::new();
        queue.request_deletion(vec![a.clone()], vec![x.clone()]);

        queue.dispose();

        assert!(queue.is_empty());
        assert_eq!(a.dispose_calls.get(), 1);
        assert_eq!(x.dispose_calls.get(), 1);
    }
}
