//! Fixed-size worker pool.
//!
//! The engine schedules short-lived diff tasks onto a pool created once at
//! process start. Tasks are nullary closures delivered FIFO over a channel;
//! idle workers pick them up in arrival order. There is no cancellation
//! primitive here: engine tasks cancel cooperatively through their diff
//! callbacks and the shared error flag.
//!
//! Tasks are expected to trap their own failures and publish them through
//! engine state. A panicking task takes its worker thread down with it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use tracing::info;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Fixed pool of OS worker threads consuming tasks FIFO.
///
/// Dropping the pool closes the queue and joins every worker; tasks already
/// queued still run to completion first.
pub struct ThreadPool {
    sender: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
    scheduled: AtomicU64,
}

impl ThreadPool {
    /// Spawns `num_threads` workers. Panics if `num_threads` is zero.
    pub fn new(num_threads: usize) -> Self {
        assert!(num_threads > 0, "thread pool needs at least one worker");

        let (sender, receiver) = crossbeam_channel::unbounded::<Task>();
        let workers = (0..num_threads)
            .map(|i| {
                let receiver = receiver.clone();
                thread::Builder::new()
                    .name(format!("gitstat-worker-{i}"))
                    .spawn(move || {
                        while let Ok(task) = receiver.recv() {
                            task();
                        }
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();

        info!(num_threads, "spawned worker pool");
        Self {
            sender: Some(sender),
            workers,
            scheduled: AtomicU64::new(0),
        }
    }

    /// Number of worker threads in the pool.
    #[inline]
    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }

    /// Total tasks ever scheduled. Monotonic; used by tests to observe that
    /// a fast-path query scheduled nothing.
    #[inline]
    pub fn scheduled_total(&self) -> u64 {
        self.scheduled.load(Ordering::Relaxed)
    }

    /// Enqueues a task for execution on an idle worker.
    pub fn schedule(&self, task: impl FnOnce() + Send + 'static) {
        self.scheduled.fetch_add(1, Ordering::Relaxed);
        self.sender
            .as_ref()
            .expect("pool is shutting down")
            .send(Box::new(task))
            .expect("worker queue closed");
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
