//! Global configuration options for the `zarrs_stream` crate.

use std::sync::{OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Global configuration options for the `zarrs_stream` crate.
///
/// Retrieve the global [`Config`] with [`global_config`] and modify it with [`global_config_mut`].
///
/// ## Thread Pool Workers
/// > default: [`std::thread::available_parallelism`]`()`
///
/// The number of worker threads spawned by each stream's flush thread pool.
/// Clamped to at least one.
///
/// ## Job Queue Multiplier
/// > default: `4`
///
/// The flush job queue holds at most `workers * multiplier` pending jobs.
/// When the queue is full, `ZarrStream::append` blocks until a worker frees a
/// slot. This bounds the memory held by chunks awaiting compression when the
/// upstream source outpaces the store.
///
/// ## S3 Connections
/// > default: `8`
///
/// The number of client handles held by each stream's S3 connection pool.
///
/// ## S3 Part Size
/// > default: `5 MiB`
///
/// The size of parts uploaded by multipart S3 sinks. S3 rejects non-final
/// parts smaller than 5 MiB, so values below that are clamped up.
#[derive(Debug)]
pub struct Config {
    thread_pool_workers: usize,
    job_queue_multiplier: usize,
    s3_connections: usize,
    s3_part_size: usize,
}

/// The smallest part size S3 accepts for non-final multipart parts.
pub const S3_MIN_PART_SIZE: usize = 5 << 20;

impl Default for Config {
    fn default() -> Self {
        Self {
            thread_pool_workers: std::thread::available_parallelism()
                .map_or(1, std::num::NonZeroUsize::get),
            job_queue_multiplier: 4,
            s3_connections: 8,
            s3_part_size: S3_MIN_PART_SIZE,
        }
    }
}

impl Config {
    /// Get the [thread pool workers](#thread-pool-workers) configuration.
    #[must_use]
    pub fn thread_pool_workers(&self) -> usize {
        self.thread_pool_workers.max(1)
    }

    /// Set the [thread pool workers](#thread-pool-workers) configuration.
    pub fn set_thread_pool_workers(&mut self, workers: usize) {
        self.thread_pool_workers = workers;
    }

    /// Get the [job queue multiplier](#job-queue-multiplier) configuration.
    #[must_use]
    pub fn job_queue_multiplier(&self) -> usize {
        self.job_queue_multiplier.max(1)
    }

    /// Set the [job queue multiplier](#job-queue-multiplier) configuration.
    pub fn set_job_queue_multiplier(&mut self, multiplier: usize) {
        self.job_queue_multiplier = multiplier;
    }

    /// Get the [S3 connections](#s3-connections) configuration.
    #[must_use]
    pub fn s3_connections(&self) -> usize {
        self.s3_connections.max(1)
    }

    /// Set the [S3 connections](#s3-connections) configuration.
    pub fn set_s3_connections(&mut self, connections: usize) {
        self.s3_connections = connections;
    }

    /// Get the [S3 part size](#s3-part-size) configuration.
    #[must_use]
    pub fn s3_part_size(&self) -> usize {
        self.s3_part_size.max(S3_MIN_PART_SIZE)
    }

    /// Set the [S3 part size](#s3-part-size) configuration.
    pub fn set_s3_part_size(&mut self, part_size: usize) {
        self.s3_part_size = part_size;
    }
}

static CONFIG: OnceLock<RwLock<Config>> = OnceLock::new();

/// Returns a reference to the global `zarrs_stream` configuration.
///
/// # Panics
/// This function panics if the underlying lock has been poisoned and might panic if the global config is already held by the current thread.
pub fn global_config() -> RwLockReadGuard<'static, Config> {
    CONFIG
        .get_or_init(|| RwLock::new(Config::default()))
        .read()
        .unwrap()
}

/// Returns a mutable reference to the global `zarrs_stream` configuration.
///
/// # Panics
/// This function panics if the underlying lock has been poisoned and might panic if the global config is already held by the current thread.
pub fn global_config_mut() -> RwLockWriteGuard<'static, Config> {
    CONFIG
        .get_or_init(|| RwLock::new(Config::default()))
        .write()
        .unwrap()
}
