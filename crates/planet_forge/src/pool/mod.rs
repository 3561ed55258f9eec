//! Fixed-size worker pool driven by a per-frame `update()`.
//!
//! The pool owns N workers and a FIFO queue of tasks. Each `update()` call:
//!
//! 1. **Dispatch phase**: every idle worker takes the head of the queue.
//! 2. **Poll phase**: every in-flight future is polled once with a no-op waker.
//!    Resolved outputs are appended to the output list in completion order.
//!
//! A worker whose future resolved during the poll phase is picked up again by
//! the dispatch phase of the *next* `update()`. Nothing here blocks: all
//! computation happens behind [`Worker::dispatch`].

mod thread;

pub use thread::{Job, ThreadWorker};

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::task::noop_waker_ref;
use futures::FutureExt;
use tracing::{trace, warn};

use crate::error::{PoolError, QueueFull, WorkerError};

/// Shared flag asking an in-flight task to stop.
///
/// Cancellation is cooperative: the task checks the flag whenever it can
/// stop cleanly and returns [`WorkerError::Cancelled`].
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// A unit of work the pool can schedule.
pub trait PoolTask {
    /// Identity reported back through [`WorkerPool::consume_failures`].
    type Key: Clone + fmt::Debug;

    fn key(&self) -> Self::Key;
}

/// An execution context that runs one task at a time.
pub trait Worker<T: PoolTask> {
    type Output;

    /// Start `task`. The returned future resolves once the task is done.
    ///
    /// The pool never calls `dispatch` again before that future resolved.
    fn dispatch(
        &mut self,
        task: T,
        cancel: CancelToken,
    ) -> BoxFuture<'static, Result<Self::Output, WorkerError>>;
}

struct InFlight<K, O> {
    key: K,
    cancel: CancelToken,
    future: BoxFuture<'static, Result<O, WorkerError>>,
    /// Set by `reset()`; the result is discarded on resolution.
    stale: bool,
}

struct Slot<W, K, O> {
    worker: W,
    in_flight: Option<InFlight<K, O>>,
}

/// N workers fed from one FIFO queue.
pub struct WorkerPool<T, W>
where
    T: PoolTask,
    W: Worker<T>,
{
    slots: Vec<Slot<W, T::Key, W::Output>>,
    queue: VecDeque<T>,
    outputs: Vec<W::Output>,
    failures: Vec<T::Key>,
    queue_limit: Option<usize>,
}

impl<T, W> WorkerPool<T, W>
where
    T: PoolTask,
    W: Worker<T>,
{
    /// Build `nb_workers` workers through an async factory.
    ///
    /// The factory receives the worker index. The first failure aborts
    /// construction.
    pub async fn new<F, Fut, E>(nb_workers: usize, mut make_worker: F) -> Result<Self, PoolError>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<W, E>>,
        E: fmt::Display,
    {
        if nb_workers == 0 {
            return Err(PoolError::NoWorkers);
        }

        let mut workers = Vec::with_capacity(nb_workers);
        for index in 0..nb_workers {
            let worker = make_worker(index)
                .await
                .map_err(|err| PoolError::WorkerCreation {
                    index,
                    reason: err.to_string(),
                })?;
            workers.push(worker);
        }

        Self::from_workers(workers)
    }

    /// Build a pool from ready workers.
    pub fn from_workers(workers: Vec<W>) -> Result<Self, PoolError> {
        if workers.is_empty() {
            return Err(PoolError::NoWorkers);
        }

        Ok(Self {
            slots: workers
                .into_iter()
                .map(|worker| Slot {
                    worker,
                    in_flight: None,
                })
                .collect(),
            queue: VecDeque::new(),
            outputs: Vec::new(),
            failures: Vec::new(),
            queue_limit: None,
        })
    }

    /// Bound the queue used by [`try_push`](Self::try_push).
    pub fn with_queue_limit(mut self, limit: usize) -> Self {
        self.queue_limit = Some(limit);
        self
    }

    // =========================================================================
    // Queue
    // =========================================================================

    /// Append a task to the queue. Never rejects.
    pub fn push(&mut self, task: T) {
        self.queue.push_back(task);
    }

    /// Append every task, preserving order.
    pub fn push_all(&mut self, tasks: impl IntoIterator<Item = T>) {
        self.queue.extend(tasks);
    }

    /// Append a task unless the queue limit is reached.
    pub fn try_push(&mut self, task: T) -> Result<(), QueueFull<T>> {
        if let Some(limit) = self.queue_limit {
            if self.queue.len() >= limit {
                return Err(QueueFull { limit, task });
            }
        }
        self.queue.push_back(task);
        Ok(())
    }

    // =========================================================================
    // Frame update
    // =========================================================================

    /// Run one dispatch phase and one poll phase.
    pub fn update(&mut self) {
        self.dispatch_idle();
        self.poll_in_flight();
    }

    fn dispatch_idle(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.in_flight.is_some() {
                continue;
            }
            let Some(task) = self.queue.pop_front() else {
                break;
            };

            let key = task.key();
            trace!(worker = index, task = ?key, "dispatching task");
            let cancel = CancelToken::new();
            let future = slot.worker.dispatch(task, cancel.clone());
            slot.in_flight = Some(InFlight {
                key,
                cancel,
                future,
                stale: false,
            });
        }
    }

    fn poll_in_flight(&mut self) {
        let mut cx = Context::from_waker(noop_waker_ref());

        for (index, slot) in self.slots.iter_mut().enumerate() {
            let Some(in_flight) = slot.in_flight.as_mut() else {
                continue;
            };
            let Poll::Ready(result) = in_flight.future.poll_unpin(&mut cx) else {
                continue;
            };
            let Some(done) = slot.in_flight.take() else {
                continue;
            };

            if done.stale {
                trace!(worker = index, task = ?done.key, "discarding result from before reset");
                continue;
            }

            match result {
                Ok(output) => self.outputs.push(output),
                Err(err) => {
                    warn!(worker = index, task = ?done.key, error = %err, "task failed");
                    self.failures.push(done.key);
                }
            }
        }
    }

    // =========================================================================
    // Results
    // =========================================================================

    /// Take every output produced so far, in completion order.
    pub fn consume_outputs(&mut self) -> Vec<W::Output> {
        std::mem::take(&mut self.outputs)
    }

    /// Take the keys of every task that failed so far.
    pub fn consume_failures(&mut self) -> Vec<T::Key> {
        std::mem::take(&mut self.failures)
    }

    /// Drop queued tasks and pending results, and cancel in-flight tasks.
    ///
    /// Cancelled tasks keep their worker busy until their future resolves.
    /// Their results are then discarded.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.outputs.clear();
        self.failures.clear();

        for in_flight in self.slots.iter_mut().filter_map(|slot| slot.in_flight.as_mut()) {
            in_flight.cancel.cancel();
            in_flight.stale = true;
        }
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Number of workers.
    pub fn nb_workers(&self) -> usize {
        self.slots.len()
    }

    /// Tasks waiting for a worker.
    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Workers with an unresolved future, stale ones included.
    pub fn in_flight_len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.in_flight.is_some())
            .count()
    }

    /// Whether there is nothing queued, nothing in flight and nothing to consume.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.in_flight_len() == 0 && self.outputs.is_empty()
    }
}

impl<T, W> Drop for WorkerPool<T, W>
where
    T: PoolTask,
    W: Worker<T>,
{
    fn drop(&mut self) {
        // Workers are dropped after this; let them stop early.
        for in_flight in self.slots.iter().filter_map(|slot| slot.in_flight.as_ref()) {
            in_flight.cancel.cancel();
        }
    }
}

impl<T, W> fmt::Debug for WorkerPool<T, W>
where
    T: PoolTask,
    W: Worker<T>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("nb_workers", &self.slots.len())
            .field("queued", &self.queue.len())
            .field("in_flight", &self.in_flight_len())
            .field("outputs", &self.outputs.len())
            .field("failures", &self.failures.len())
            .finish()
    }
}
