//! Integer handles over databases and iterators.
//!
//! A [`Registry`] owns every object it hands out and refers to each by a
//! stable [`Handle`]. Databases and iterators share one id space, so an
//! iterator handle passed where a database is expected is rejected like
//! any other unknown id. `0` is the null handle and is never issued.
//!
//! Iterators are independent of the database they came from: closing the
//! database does not invalidate them, they keep reading their snapshot
//! until [`Registry::iter_free`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, warn};

use crate::{Db, DbConfig, DbError, DbIterator, KeyValue};

/// Opaque reference to an object owned by a [`Registry`].
pub type Handle = u64;

/// Never issued; always [`DbError::InvalidHandle`].
pub const NULL_HANDLE: Handle = 0;

/// Arena of open databases and live iterators.
pub struct Registry {
    next_id: AtomicU64,
    dbs: RwLock<HashMap<Handle, Arc<Db>>>,
    iters: Mutex<HashMap<Handle, Arc<Mutex<DbIterator>>>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            dbs: RwLock::new(HashMap::new()),
            iters: Mutex::new(HashMap::new()),
        }
    }

    fn issue(&self) -> Handle {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    // The maps are only ever touched by single inserts and removals, so a
    // poisoned lock still guards a consistent map.
    fn dbs_read(&self) -> RwLockReadGuard<'_, HashMap<Handle, Arc<Db>>> {
        self.dbs.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn dbs_write(&self) -> RwLockWriteGuard<'_, HashMap<Handle, Arc<Db>>> {
        self.dbs.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn iters(&self) -> MutexGuard<'_, HashMap<Handle, Arc<Mutex<DbIterator>>>> {
        self.iters.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn db(&self, handle: Handle) -> Result<Arc<Db>, DbError> {
        self.dbs_read()
            .get(&handle)
            .cloned()
            .ok_or(DbError::InvalidHandle(handle))
    }

    // --------------------------------------------------------------------------------------------
    // Databases
    // --------------------------------------------------------------------------------------------

    /// Opens a database and returns its handle.
    pub fn open(&self, path: impl AsRef<Path>, config: DbConfig) -> Result<Handle, DbError> {
        let db = Db::open(path, config)?;
        let handle = self.issue();
        self.dbs_write().insert(handle, Arc::new(db));
        debug!(handle, "database handle issued");
        Ok(handle)
    }

    /// Closes the database and releases its handle.
    ///
    /// The handle is released even if the final flush fails.
    pub fn close(&self, handle: Handle) -> Result<(), DbError> {
        let db = self
            .dbs_write()
            .remove(&handle)
            .ok_or(DbError::InvalidHandle(handle))?;
        debug!(handle, "database handle released");
        db.close()
    }

    pub fn put(&self, handle: Handle, key: &[u8], value: &[u8]) -> Result<(), DbError> {
        self.db(handle)?.put(key, value)
    }

    pub fn get(&self, handle: Handle, key: &[u8]) -> Result<Option<Vec<u8>>, DbError> {
        self.db(handle)?.get(key)
    }

    pub fn delete(&self, handle: Handle, key: &[u8]) -> Result<(), DbError> {
        self.db(handle)?.delete(key)
    }

    pub fn put_str(&self, handle: Handle, key: &str, value: &str) -> Result<(), DbError> {
        self.put(handle, key.as_bytes(), value.as_bytes())
    }

    /// Fails with [`DbError::Encoding`] if the stored value is not UTF-8.
    pub fn get_str(&self, handle: Handle, key: &str) -> Result<Option<String>, DbError> {
        self.get(handle, key.as_bytes())?
            .map(String::from_utf8)
            .transpose()
            .map_err(DbError::from)
    }

    pub fn delete_str(&self, handle: Handle, key: &str) -> Result<(), DbError> {
        self.delete(handle, key.as_bytes())
    }

    // --------------------------------------------------------------------------------------------
    // Iterators
    // --------------------------------------------------------------------------------------------

    /// Starts a snapshot scan over `[start, end)` and returns the iterator
    /// handle.
    pub fn scan(&self, handle: Handle, start: Option<&[u8]>, end: Option<&[u8]>) -> Result<Handle, DbError> {
        let iter = self.db(handle)?.scan(start, end)?;
        let iter_handle = self.issue();
        self.iters().insert(iter_handle, Arc::new(Mutex::new(iter)));
        debug!(db = handle, iter = iter_handle, "iterator handle issued");
        Ok(iter_handle)
    }

    /// Next pair of the iterator, or `None` once it is exhausted.
    pub fn iter_next(&self, handle: Handle) -> Result<Option<KeyValue>, DbError> {
        let iter = self
            .iters()
            .get(&handle)
            .cloned()
            .ok_or(DbError::InvalidHandle(handle))?;

        let mut iter = iter.lock().unwrap_or_else(|poisoned| {
            warn!(iter = handle, "iterator lock poisoned");
            poisoned.into_inner()
        });
        iter.next().transpose()
    }

    /// Releases the iterator and the runs it pinned.
    pub fn iter_free(&self, handle: Handle) -> Result<(), DbError> {
        self.iters()
            .remove(&handle)
            .map(drop)
            .ok_or(DbError::InvalidHandle(handle))?;
        debug!(iter = handle, "iterator handle released");
        Ok(())
    }
}

impl Drop for Registry {
    /// Databases still registered are closed; iterators are dropped.
    fn drop(&mut self) {
        self.iters().clear();
        let dbs: Vec<(Handle, Arc<Db>)> = self.dbs_write().drain().collect();
        for (handle, db) in dbs {
            if let Err(e) = db.close() {
                warn!(handle, error = %e, "close on registry drop failed");
            }
        }
    }
}
