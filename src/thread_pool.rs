//! A fixed-size thread pool draining a bounded FIFO queue of fallible jobs.
//!
//! Flush jobs (compress a chunk, write it to a sink) are pushed by the thread
//! appending frames and consumed by the workers. A job reports failure by
//! returning `false` with a message in its error slot; failures are routed to
//! the caller-supplied error handler on the worker thread that ran the job.
//!
//! Submission order defines the order in which jobs become eligible to run,
//! not the order in which they complete. The queue is bounded: when it is
//! full, [`ThreadPool::submit`] blocks until a worker frees a slot, so an
//! upstream source cannot outrun compression without bound.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use crate::config::global_config;
use crate::error::ZarrError;

/// A flush job: returns success, or `false` with a message in `error_out`.
pub type Job = Box<dyn FnOnce(&mut String) -> bool + Send>;

struct QueueState {
    jobs: VecDeque<Job>,
    is_accepting_jobs: bool,
}

struct PoolShared {
    state: Mutex<QueueState>,
    /// Signalled when a job is pushed or the pool stops accepting.
    jobs_available: Condvar,
    /// Signalled when a worker pops a job, freeing a queue slot.
    slots_available: Condvar,
    queue_limit: usize,
    error_handler: Box<dyn Fn(&str) + Send + Sync>,
}

impl PoolShared {
    fn should_stop(state: &QueueState) -> bool {
        !state.is_accepting_jobs && state.jobs.is_empty()
    }
}

/// A fixed-size worker set consuming a single queue of fallible jobs.
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    n_threads: usize,
}

impl ThreadPool {
    /// Create a pool with `n_threads` workers, clamped to at least one and at
    /// most the hardware concurrency. Failing jobs report to `error_handler`
    /// on the worker thread that ran them.
    #[must_use]
    pub fn new<F>(n_threads: usize, error_handler: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let hardware = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        let n_threads = n_threads.clamp(1, hardware.max(1));
        let queue_limit = n_threads * global_config().job_queue_multiplier();

        let shared = Arc::new(PoolShared {
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                is_accepting_jobs: true,
            }),
            jobs_available: Condvar::new(),
            slots_available: Condvar::new(),
            queue_limit,
            error_handler: Box::new(error_handler),
        });

        let threads = (0..n_threads)
            .map(|_| {
                let shared = shared.clone();
                std::thread::spawn(move || Self::thread_worker(&shared))
            })
            .collect();

        Self {
            shared,
            threads: Mutex::new(threads),
            n_threads,
        }
    }

    /// The number of worker threads.
    #[must_use]
    pub fn n_threads(&self) -> usize {
        self.n_threads
    }

    /// Push a job onto the queue and wake one worker.
    ///
    /// Blocks while the queue is full.
    ///
    /// # Errors
    /// Returns [`ZarrError::InternalError`] if the pool is shutting down.
    pub fn submit<F>(&self, job: F) -> Result<(), ZarrError>
    where
        F: FnOnce(&mut String) -> bool + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        while state.is_accepting_jobs && state.jobs.len() >= self.shared.queue_limit {
            self.shared.slots_available.wait(&mut state);
        }
        if !state.is_accepting_jobs {
            return Err(ZarrError::InternalError(
                "the thread pool is not accepting jobs".to_string(),
            ));
        }
        state.jobs.push_back(Box::new(job));
        drop(state);

        self.shared.jobs_available.notify_one();
        Ok(())
    }

    /// Stop accepting jobs, drain the remaining queue, and join all workers.
    pub fn await_stop(&self) {
        {
            let mut state = self.shared.state.lock();
            state.is_accepting_jobs = false;
        }
        self.shared.jobs_available.notify_all();
        self.shared.slots_available.notify_all();

        let mut threads = self.threads.lock();
        for thread in threads.drain(..) {
            let _ = thread.join();
        }
    }

    fn thread_worker(shared: &Arc<PoolShared>) {
        loop {
            let mut state = shared.state.lock();
            while state.jobs.is_empty() && !PoolShared::should_stop(&state) {
                shared.jobs_available.wait(&mut state);
            }
            if PoolShared::should_stop(&state) {
                break;
            }

            if let Some(job) = state.jobs.pop_front() {
                drop(state);
                shared.slots_available.notify_one();

                let mut err_msg = String::new();
                if !job(&mut err_msg) {
                    (shared.error_handler)(&err_msg);
                }
            }
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.jobs.clear();
        }
        self.await_stop();
    }
}
