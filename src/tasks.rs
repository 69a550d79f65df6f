//! Background task pool (C11): a fixed-size worker pool draining a FIFO
//! queue, with cooperative abort of anything still queued at shutdown.
//!
//! Grounded on the same mutex+condvar pairing as [`crate::ring_buffer`]:
//! both are a queue protected by a mutex and condition variable.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// A unit of work submitted to the pool. `execute` runs once, on a worker
/// thread; `abort` runs once, either by the submitter cooperatively checking
/// a shared flag mid-`execute`, or by the pool itself at shutdown for tasks
/// that never got to run.
pub trait Task: Send {
    fn execute(self: Box<Self>);
    fn abort(self: Box<Self>);
}

struct ClosureTask<W, A> {
    work: W,
    on_abort: A,
}

impl<W, A> Task for ClosureTask<W, A>
where
    W: FnOnce() + Send,
    A: FnOnce() + Send,
{
    fn execute(self: Box<Self>) {
        (self.work)();
    }

    fn abort(self: Box<Self>) {
        (self.on_abort)();
    }
}

/// Wrap a pair of closures into a boxed [`Task`]: `work` for normal
/// execution, `on_abort` for the shutdown-time cancellation path.
pub fn task_from_closures<W, A>(work: W, on_abort: A) -> Box<dyn Task>
where
    W: FnOnce() + Send + 'static,
    A: FnOnce() + Send + 'static,
{
    Box::new(ClosureTask { work, on_abort })
}

struct Shared {
    queue: Mutex<VecDeque<Box<dyn Task>>>,
    queue_cv: Condvar,
    terminate: AtomicBool,
}

/// A fixed-size worker pool. Drop joins every worker and calls `abort()` on
/// whatever work was still queued.
pub struct BackgroundTasks {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub fn new(num_workers: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            queue_cv: Condvar::new(),
            terminate: AtomicBool::new(false),
        });

        let workers = (0..num_workers)
            .map(|_| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || worker_loop(shared))
            })
            .collect();

        Self { shared, workers }
    }

    /// Size the pool to the host's ideal parallelism, falling back to 4.
    pub fn with_ideal_parallelism() -> Self {
        let n = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        Self::new(n)
    }

    pub fn submit(&self, task: Box<dyn Task>) {
        self.shared.queue.lock().push_back(task);
        self.shared.queue_cv.notify_one();
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue.lock().len()
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let task = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(task) = queue.pop_front() {
                    break Some(task);
                }
                if shared.terminate.load(Ordering::SeqCst) {
                    break None;
                }
                shared.queue_cv.wait(&mut queue);
            }
        };
        match task {
            Some(task) => task.execute(),
            None => return,
        }
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        self.shared.terminate.store(true, Ordering::SeqCst);
        self.shared.queue_cv.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        let leftover: Vec<Box<dyn Task>> = self.shared.queue.lock().drain(..).collect();
        for task in leftover {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn executes_submitted_tasks() {
        let pool = BackgroundTasks::new(2);
        let (tx, rx) = mpsc::channel();
        for i in 0..5 {
            let tx = tx.clone();
            pool.submit(task_from_closures(move || tx.send(i).unwrap(), || {}));
        }
        drop(tx);
        let mut results: Vec<i32> = rx.iter().collect();
        results.sort_unstable();
        assert_eq!(results, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn drop_aborts_unstarted_queued_tasks() {
        let aborted = Arc::new(AtomicUsize::new(0));
        {
            let pool = BackgroundTasks::new(0);
            // With zero live workers nothing will ever dequeue; everything
            // submitted stays queued until drop.
            for _ in 0..3 {
                let aborted = Arc::clone(&aborted);
                pool.submit(task_from_closures(
                    || {},
                    move || {
                        aborted.fetch_add(1, Ordering::SeqCst);
                    },
                ));
            }
        }
        assert_eq!(aborted.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn shutdown_does_not_hang_with_idle_workers() {
        let pool = BackgroundTasks::new(3);
        std::thread::sleep(Duration::from_millis(10));
        drop(pool);
    }
}
