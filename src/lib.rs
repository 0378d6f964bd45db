//! # keylite
//!
//! An embeddable, persistent, ordered key-value engine built on a
//! **Log-Structured Merge Tree (LSM-tree)**. Writes are logged and fsynced
//! before they are acknowledged, buffered in memory, and flushed to
//! immutable sorted runs that background workers merge over time.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use keylite::{Db, DbConfig};
//!
//! let db = Db::open("/tmp/my_db", DbConfig::default()).unwrap();
//!
//! // Write
//! db.put(b"hello", b"world").unwrap();
//!
//! // Read
//! assert_eq!(db.get(b"hello").unwrap(), Some(b"world".to_vec()));
//!
//! // Delete
//! db.delete(b"hello").unwrap();
//! assert_eq!(db.get(b"hello").unwrap(), None);
//!
//! // Scan
//! db.put(b"a", b"1").unwrap();
//! db.put(b"b", b"2").unwrap();
//! let pairs: Vec<_> = db
//!     .scan(Some(b"a".as_slice()), Some(b"c".as_slice()))
//!     .unwrap()
//!     .collect::<Result<_, _>>()
//!     .unwrap();
//! assert_eq!(pairs.len(), 2);
//!
//! // Graceful shutdown
//! db.close().unwrap();
//! ```
//!
//! ## Features
//!
//! - **Write-ahead logging**: every mutation is durable before acknowledgement.
//! - **Snapshot iterators**: scans never observe writes made after they start.
//! - **Automatic compaction**: background workers merge runs level by level.
//! - **Bloom filters** and a per-run block cache for point lookups.
//! - **CRC32 integrity**: every on-disk block and log record is checksummed.
//! - **Handle registry**: [`handle::Registry`] exposes the database through
//!   stable integer handles for binding layers.

#![allow(dead_code)]

pub(crate) mod compaction;
pub(crate) mod encoding;
pub(crate) mod engine;
pub mod handle;
pub(crate) mod manifest;
pub(crate) mod memtable;
pub(crate) mod sstable;
pub(crate) mod wal;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use engine::utils::prefix_successor;
use engine::{Engine, EngineConfig, EngineError, RangeIter};
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub use compaction::CompactionStrategyType;
pub use engine::{EngineStats, MAX_ENTRY_SIZE};

/// A single key-value pair yielded by [`DbIterator`].
pub type KeyValue = (Vec<u8>, Vec<u8>);

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Configuration for a [`Db`] instance.
///
/// All fields have defaults via [`DbConfig::default()`]. The configuration
/// is validated when passed to [`Db::open`].
///
/// # Example
///
/// ```rust
/// use keylite::DbConfig;
///
/// let config = DbConfig {
///     write_buffer_size: 128 * 1024,
///     thread_pool_size: 4,
///     ..DbConfig::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Size in bytes at which the active memtable is frozen and handed to
    /// a background flush.
    ///
    /// Default: 64 KiB. Must be ≥ 1024.
    pub write_buffer_size: usize,

    /// Compaction strategy family.
    pub compaction_strategy: CompactionStrategyType,

    /// Runs a level must hold before minor compaction merges it.
    ///
    /// Default: 4. Must be ≥ 2.
    pub min_compaction_threshold: usize,

    /// Maximum number of runs merged by one minor compaction.
    ///
    /// Default: 32. Must be ≥ `min_compaction_threshold`.
    pub max_compaction_threshold: usize,

    /// Data blocks cached per run. `0` disables the cache.
    ///
    /// Default: 64.
    pub block_cache_capacity: usize,

    /// How many times a failed background compaction is retried before the
    /// job gives up until the next flush.
    ///
    /// Default: 3.
    pub compaction_retries: usize,

    /// Number of background worker threads for flushing and compaction.
    ///
    /// Default: 2. Must be ≥ 1.
    pub thread_pool_size: usize,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            write_buffer_size: 64 * 1024,
            compaction_strategy: CompactionStrategyType::default(),
            min_compaction_threshold: 4,
            max_compaction_threshold: 32,
            block_cache_capacity: sstable::DEFAULT_BLOCK_CACHE_CAPACITY,
            compaction_retries: 3,
            thread_pool_size: 2,
        }
    }
}

impl DbConfig {
    /// Validates all configuration parameters.
    fn validate(&self) -> Result<(), DbError> {
        if self.write_buffer_size < 1024 {
            return Err(DbError::InvalidConfig(
                "write_buffer_size must be >= 1024".into(),
            ));
        }
        if self.min_compaction_threshold < 2 {
            return Err(DbError::InvalidConfig(
                "min_compaction_threshold must be >= 2".into(),
            ));
        }
        if self.max_compaction_threshold < self.min_compaction_threshold {
            return Err(DbError::InvalidConfig(
                "max_compaction_threshold must be >= min_compaction_threshold".into(),
            ));
        }
        if self.thread_pool_size < 1 {
            return Err(DbError::InvalidConfig(
                "thread_pool_size must be >= 1".into(),
            ));
        }
        Ok(())
    }

    /// Converts to the internal engine configuration.
    fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            write_buffer_size: self.write_buffer_size,
            compaction_strategy: self.compaction_strategy,
            min_threshold: self.min_compaction_threshold,
            max_threshold: self.max_compaction_threshold,
            block_cache_capacity: self.block_cache_capacity,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors returned by [`Db`] and [`handle::Registry`] operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// The database has been closed.
    #[error("database is closed")]
    Closed,

    /// Invalid configuration parameter.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Key constraint violated.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A null, unknown or already released handle.
    #[error("invalid handle: {0}")]
    InvalidHandle(u64),

    /// Stored bytes are not valid UTF-8.
    #[error("invalid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),

    /// An engine-internal error occurred.
    #[error("{0}")]
    Engine(#[from] EngineError),
}

/// Coarse error category, stable across versions.
///
/// Binding layers map these to their own result codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    InvalidArgument,
    InvalidHandle,
    Encoding,
    Closed,
    Other,
}

impl DbError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Closed => ErrorKind::Closed,
            Self::InvalidConfig(_) | Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::InvalidHandle(_) => ErrorKind::InvalidHandle,
            Self::Encoding(_) => ErrorKind::Encoding,
            Self::Engine(e) => {
                let mut source: Option<&(dyn std::error::Error + 'static)> = Some(e);
                while let Some(err) = source {
                    if err.is::<std::io::Error>() {
                        return ErrorKind::Io;
                    }
                    source = err.source();
                }
                ErrorKind::Other
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Background worker state
// ------------------------------------------------------------------------------------------------

type Job = Box<dyn FnOnce() + Send>;

/// Holds the job queue sender and worker handles.
/// Taken (`Option::take`) on shutdown to ensure single cleanup.
struct BackgroundPool {
    sender: crossbeam::channel::Sender<Job>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl BackgroundPool {
    fn spawn(size: usize) -> Result<Self, DbError> {
        let (sender, receiver) = crossbeam::channel::unbounded::<Job>();

        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            let rx = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("keylite-bg-{id}"))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        job();
                    }
                })
                .map_err(|e| DbError::Engine(EngineError::Io(e)))?;
            workers.push(handle);
        }
        // Workers hold their own receiver clones; drop ours.
        drop(receiver);

        Ok(Self { sender, workers })
    }

    /// Closes the queue, lets workers drain it and joins them.
    fn shutdown(self) {
        drop(self.sender);
        for worker in self.workers {
            if worker.join().is_err() {
                error!("background worker panicked");
            }
        }
    }
}

/// Flushes what is frozen, then runs minor compaction rounds until no
/// level qualifies. Both steps skip when another job holds the slot.
fn background_job(engine: &Engine, retries: usize) {
    loop {
        match engine.try_flush_oldest_frozen() {
            Ok(true) => debug!("background: flushed frozen memtable"),
            Ok(false) => break,
            Err(e) => {
                error!(error = %e, "background flush failed");
                return;
            }
        }
    }

    let mut failures = 0;
    loop {
        match engine.try_minor_compact() {
            Ok(true) => debug!("background: minor compaction round"),
            Ok(false) => break,
            Err(e) if failures < retries => {
                failures += 1;
                warn!(error = %e, attempt = failures, "background compaction failed, retrying");
                thread::sleep(Duration::from_millis(10 * failures as u64));
            }
            Err(e) => {
                error!(error = %e, attempts = failures + 1, "background compaction gave up");
                break;
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Database handle
// ------------------------------------------------------------------------------------------------

/// The main database handle.
///
/// # Thread safety
///
/// `Db` is `Send + Sync` and can be shared across threads via `Arc<Db>`.
/// Writers are serialized; readers and iterators never wait on them.
///
/// # Background work
///
/// When the write buffer fills, the active memtable is frozen and a job is
/// queued that flushes it to a level-0 run and then runs minor compaction
/// while some level holds at least `min_compaction_threshold` runs.
/// Major compaction must be triggered explicitly via [`Db::compact`].
///
/// # Shutdown
///
/// Call [`Db::close`] for a graceful shutdown. If the handle is dropped
/// without calling `close`, the destructor does the same but can only log
/// errors.
pub struct Db {
    engine: Engine,
    bg: Mutex<Option<BackgroundPool>>,
    closed: AtomicBool,
    compaction_retries: usize,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Db {
    /// Opens (or creates) a database at the given directory.
    ///
    /// On an existing directory the catalog and logs are replayed to
    /// recover the last durable state. Memtables recovered frozen are
    /// flushed in the background right away.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidConfig`] if any configuration parameter
    /// is out of range.
    pub fn open(path: impl AsRef<Path>, config: DbConfig) -> Result<Self, DbError> {
        config.validate()?;

        let engine = Engine::open(&path, config.to_engine_config())?;
        let pool = BackgroundPool::spawn(config.thread_pool_size)?;

        info!(
            path = %path.as_ref().display(),
            pool_size = config.thread_pool_size,
            "database opened"
        );

        let db = Self {
            engine,
            bg: Mutex::new(Some(pool)),
            closed: AtomicBool::new(false),
            compaction_retries: config.compaction_retries,
        };
        if db.engine.stats()?.frozen_count > 0 {
            db.schedule_background();
        }
        Ok(db)
    }

    /// Gracefully shuts down the database.
    ///
    /// Waits for queued background jobs, flushes every memtable,
    /// checkpoints the catalog and fsyncs all directories.
    ///
    /// Subsequent operations on this handle return [`DbError::Closed`].
    /// Calling `close` more than once is harmless.
    pub fn close(&self) -> Result<(), DbError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.shutdown_pool();
        self.engine.close()?;

        info!("database closed");
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Write operations
    // --------------------------------------------------------------------------------------------

    /// Inserts or overwrites a key. Empty values are allowed.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidArgument`] if `key` is empty or
    /// `key.len() + value.len()` exceeds [`MAX_ENTRY_SIZE`].
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), DbError> {
        self.check_open()?;
        check_entry(key, value.len())?;

        if self.engine.put(key.to_vec(), value.to_vec())? {
            self.schedule_background();
        }
        Ok(())
    }

    /// Deletes a key. Deleting a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidArgument`] if `key` is empty or longer
    /// than [`MAX_ENTRY_SIZE`].
    pub fn delete(&self, key: &[u8]) -> Result<(), DbError> {
        self.check_open()?;
        check_entry(key, 0)?;

        if self.engine.delete(key.to_vec())? {
            self.schedule_background();
        }
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Read operations
    // --------------------------------------------------------------------------------------------

    /// Returns the value of `key`, or `None` if it is absent or deleted.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DbError> {
        self.check_open()?;
        check_key(key)?;
        Ok(self.engine.get(key)?)
    }

    /// Iterates live pairs in `[start, end)` in ascending key order.
    ///
    /// `None` leaves a side unbounded; `start >= end` yields nothing. The
    /// iterator reads a snapshot taken now and holds the files it needs
    /// until it is dropped, even across compactions and `close`.
    pub fn scan(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Result<DbIterator, DbError> {
        self.check_open()?;
        Ok(DbIterator {
            inner: self.engine.scan(start, end)?,
        })
    }

    /// Iterates every live key that starts with `prefix`.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<DbIterator, DbError> {
        let end = prefix_successor(prefix);
        self.scan(Some(prefix), end.as_deref())
    }

    // --------------------------------------------------------------------------------------------
    // Maintenance
    // --------------------------------------------------------------------------------------------

    /// Writes every buffered mutation to sorted runs. Blocks until done.
    ///
    /// Returns the number of memtables flushed.
    pub fn flush(&self) -> Result<usize, DbError> {
        self.check_open()?;
        Ok(self.engine.flush()?)
    }

    /// Runs a **major compaction**: merges every run into one and drops
    /// all tombstones. Blocks until done.
    ///
    /// Returns `false` if there was nothing to reclaim.
    pub fn compact(&self) -> Result<bool, DbError> {
        self.check_open()?;
        Ok(self.engine.major_compact()?)
    }

    pub fn stats(&self) -> Result<EngineStats, DbError> {
        self.check_open()?;
        Ok(self.engine.stats()?)
    }

    // --------------------------------------------------------------------------------------------
    // Internal helpers
    // --------------------------------------------------------------------------------------------

    /// Returns `Err(DbError::Closed)` if the database has been closed.
    fn check_open(&self) -> Result<(), DbError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DbError::Closed);
        }
        Ok(())
    }

    fn pool(&self) -> MutexGuard<'_, Option<BackgroundPool>> {
        self.bg.lock().unwrap_or_else(|poisoned| {
            warn!("background pool lock poisoned");
            poisoned.into_inner()
        })
    }

    /// Queues one flush-then-compact job.
    fn schedule_background(&self) {
        let guard = self.pool();
        if let Some(bg) = guard.as_ref() {
            let engine = self.engine.clone();
            let retries = self.compaction_retries;
            if bg.sender.send(Box::new(move || background_job(&engine, retries))).is_err() {
                warn!("background queue closed, job dropped");
            } else {
                debug!("background job scheduled");
            }
        }
    }

    /// Drains the job queue and joins all worker threads.
    fn shutdown_pool(&self) {
        let pool = self.pool().take();
        if let Some(pool) = pool {
            pool.shutdown();
        }
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.shutdown_pool();
            if let Err(e) = self.engine.close() {
                error!(error = %e, "close on drop failed");
            }
        }
    }
}

fn check_key(key: &[u8]) -> Result<(), DbError> {
    if key.is_empty() {
        return Err(DbError::InvalidArgument("key must not be empty".into()));
    }
    Ok(())
}

/// A write must fit in one log record.
fn check_entry(key: &[u8], value_len: usize) -> Result<(), DbError> {
    check_key(key)?;
    let size = key.len().saturating_add(value_len);
    if size > MAX_ENTRY_SIZE {
        return Err(DbError::InvalidArgument(format!(
            "entry of {size} bytes exceeds MAX_ENTRY_SIZE ({MAX_ENTRY_SIZE})"
        )));
    }
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Iterator
// ------------------------------------------------------------------------------------------------

/// Snapshot iterator returned by [`Db::scan`] and [`Db::scan_prefix`].
///
/// Lazy and forward-only. A read error is yielded once and ends the
/// iteration.
pub struct DbIterator {
    inner: RangeIter,
}

impl Iterator for DbIterator {
    type Item = Result<KeyValue, DbError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|item| item.map_err(DbError::from))
    }
}

impl std::fmt::Debug for DbIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbIterator").finish_non_exhaustive()
    }
}
