//! A [`Worker`] backed by a dedicated OS thread.

use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use futures::channel::oneshot;
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use tracing::{debug, warn};

use super::{CancelToken, PoolTask, Worker};
use crate::error::WorkerError;

/// Function run by every [`ThreadWorker`] of a pool.
pub type Job<T, O> = Arc<dyn Fn(T, &CancelToken) -> Result<O, WorkerError> + Send + Sync>;

struct Request<T, O> {
    task: T,
    cancel: CancelToken,
    reply: oneshot::Sender<Result<O, WorkerError>>,
}

/// Runs tasks on its own thread, one at a time.
///
/// Results travel back through a oneshot channel, so the future handed to the
/// pool resolves as soon as the thread is done. A job that panics is reported
/// as [`WorkerError::Build`] and the thread keeps serving requests. Dropping
/// the worker closes the request channel and joins the thread.
pub struct ThreadWorker<T, O> {
    index: usize,
    sender: Option<Sender<Request<T, O>>>,
    handle: Option<JoinHandle<()>>,
}

impl<T, O> ThreadWorker<T, O>
where
    T: Send + 'static,
    O: Send + 'static,
{
    /// Spawn the worker thread.
    pub fn spawn(index: usize, job: Job<T, O>) -> io::Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded::<Request<T, O>>();

        let handle = thread::Builder::new()
            .name(format!("planet-forge-{index}"))
            .spawn(move || serve(index, &receiver, &job))?;

        Ok(Self {
            index,
            sender: Some(sender),
            handle: Some(handle),
        })
    }
}

/// Receive loop of a worker thread. Ends when the sender is dropped.
fn serve<T, O>(index: usize, receiver: &Receiver<Request<T, O>>, job: &Job<T, O>) {
    for request in receiver.iter() {
        let result = if request.cancel.is_cancelled() {
            Err(WorkerError::Cancelled)
        } else {
            let cancel = &request.cancel;
            let task = request.task;
            panic::catch_unwind(AssertUnwindSafe(|| job(task, cancel))).unwrap_or_else(|payload| {
                let reason = panic_message(&*payload);
                warn!(worker = index, %reason, "job panicked");
                Err(WorkerError::Build(format!("job panicked: {reason}")))
            })
        };
        // The pool may have dropped the future; nothing to report then.
        let _ = request.reply.send(result);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}

impl<T, O> Worker<T> for ThreadWorker<T, O>
where
    T: PoolTask + Send + 'static,
    O: Send + 'static,
{
    type Output = O;

    fn dispatch(&mut self, task: T, cancel: CancelToken) -> BoxFuture<'static, Result<O, WorkerError>> {
        let (reply, receiver) = oneshot::channel();
        let request = Request {
            task,
            cancel,
            reply,
        };

        let sent = self
            .sender
            .as_ref()
            .is_some_and(|sender| sender.send(request).is_ok());
        if !sent {
            warn!(worker = self.index, "worker thread is gone");
            return future::ready(Err(WorkerError::Disconnected)).boxed();
        }

        receiver
            .map(|reply| reply.unwrap_or(Err(WorkerError::Disconnected)))
            .boxed()
    }
}

impl<T, O> Drop for ThreadWorker<T, O> {
    fn drop(&mut self) {
        // Closing the channel ends the thread's receive loop.
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(worker = self.index, "worker thread panicked");
            } else {
                debug!(worker = self.index, "worker thread stopped");
            }
        }
    }
}

impl<T, O> fmt::Debug for ThreadWorker<T, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadWorker")
            .field("index", &self.index)
            .field("running", &self.handle.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::WorkerPool;
    use futures::executor::block_on;
    use std::time::{Duration, Instant};

    #[derive(Debug)]
    struct Square(u64);

    impl PoolTask for Square {
        type Key = u64;

        fn key(&self) -> u64 {
            self.0
        }
    }

    fn square_job() -> Job<Square, u64> {
        Arc::new(|task: Square, _: &CancelToken| {
            if task.0 == 13 {
                return Err(WorkerError::Build("unlucky".into()));
            }
            Ok(task.0 * task.0)
        })
    }

    /// Update the pool until it is idle or the deadline passes.
    fn drain<T, W>(pool: &mut WorkerPool<T, W>) -> Vec<W::Output>
    where
        T: PoolTask,
        W: Worker<T>,
    {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut outputs = Vec::new();
        while pool.queued_len() + pool.in_flight_len() > 0 && Instant::now() < deadline {
            pool.update();
            outputs.extend(pool.consume_outputs());
            thread::sleep(Duration::from_millis(1));
        }
        outputs
    }

    #[test]
    fn dispatch_resolves_with_thread_result() {
        let mut worker = ThreadWorker::spawn(0, square_job()).unwrap();
        let result = block_on(worker.dispatch(Square(7), CancelToken::new()));
        assert_eq!(result, Ok(49));
    }

    #[test]
    fn job_errors_are_forwarded() {
        let mut worker = ThreadWorker::spawn(0, square_job()).unwrap();
        let result = block_on(worker.dispatch(Square(13), CancelToken::new()));
        assert_eq!(result, Err(WorkerError::Build("unlucky".into())));
    }

    #[test]
    fn cancelled_before_start_skips_the_job() {
        let mut worker = ThreadWorker::spawn(0, square_job()).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = block_on(worker.dispatch(Square(3), cancel));
        assert_eq!(result, Err(WorkerError::Cancelled));
    }

    fn panic_on_zero() -> Job<Square, u64> {
        Arc::new(|task: Square, _: &CancelToken| {
            if task.0 == 0 {
                panic!("job exploded");
            }
            Ok(task.0 + 100)
        })
    }

    #[test]
    fn panicking_job_keeps_the_thread_alive() {
        let mut worker = ThreadWorker::spawn(0, panic_on_zero()).unwrap();

        let first = block_on(worker.dispatch(Square(0), CancelToken::new()));
        match first {
            Err(WorkerError::Build(reason)) => assert!(reason.contains("job exploded")),
            other => panic!("unexpected result {other:?}"),
        }

        let second = block_on(worker.dispatch(Square(2), CancelToken::new()));
        assert_eq!(second, Ok(102));
    }

    #[test]
    fn single_thread_pool_survives_a_panicking_task() {
        let job = panic_on_zero();
        let mut pool = block_on(WorkerPool::new(1, |index| {
            let job = Arc::clone(&job);
            async move { ThreadWorker::spawn(index, job) }
        }))
        .unwrap();

        pool.push_all((0..4).map(Square));
        let mut outputs = drain(&mut pool);
        outputs.sort_unstable();

        assert_eq!(outputs, vec![101, 102, 103]);
        assert_eq!(pool.consume_failures(), vec![0]);
    }

    #[test]
    fn dropping_the_pool_cancels_running_jobs() {
        let job: Job<Square, u64> = Arc::new(|task: Square, cancel: &CancelToken| {
            let deadline = Instant::now() + Duration::from_secs(30);
            while Instant::now() < deadline {
                if cancel.is_cancelled() {
                    return Err(WorkerError::Cancelled);
                }
                thread::sleep(Duration::from_millis(1));
            }
            Ok(task.0)
        });
        let mut pool = block_on(WorkerPool::new(2, |index| {
            let job = Arc::clone(&job);
            async move { ThreadWorker::spawn(index, job) }
        }))
        .unwrap();

        pool.push_all([Square(1), Square(2)]);
        pool.update();
        assert_eq!(pool.in_flight_len(), 2);

        let started = Instant::now();
        drop(pool);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn pool_of_threads_completes_every_task() {
        let job = square_job();
        let mut pool = block_on(WorkerPool::new(3, |index| {
            let job = Arc::clone(&job);
            async move { ThreadWorker::spawn(index, job) }
        }))
        .unwrap();

        pool.push_all((1..=20).map(Square));
        let mut outputs = drain(&mut pool);
        outputs.sort_unstable();

        let mut expected: Vec<u64> = (1..=20).filter(|n| *n != 13).map(|n| n * n).collect();
        expected.sort_unstable();
        assert_eq!(outputs, expected);
        assert_eq!(pool.consume_failures(), vec![13]);
    }
}
