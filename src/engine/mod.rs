//! Scoped transactions over the embedded key-value engine
//!
//! Every access goes through a closure that receives a transaction handle:
//!
//! - `view`: read-only transaction on a consistent snapshot; many may run
//!   at once
//! - `update`: read-write transaction; one at a time, serialized by the engine
//! - `batch`: read-write transaction that may be shared with concurrent
//!   batched callers (see [`batch`])
//!
//! A write transaction commits only when its closure returns `Ok`. Any
//! error return, `?` included, drops the transaction, which rolls it back.

pub mod batch;

use std::fs;
use std::path::Path;

use redb::{Database, ReadTransaction, WriteTransaction};
use tracing::debug;

use crate::config::BatchConfig;
use crate::policy::{PolicyError, PolicyResult};

pub use batch::{BatchCoordinator, BatchFn};

/// Handle to an open database file.
pub struct Engine {
    db: Database,
    batcher: BatchCoordinator,
}

impl Engine {
    /// Opens or creates the database file at `path`.
    ///
    /// Creates parent directories if needed.
    pub fn open(path: &Path, batch: BatchConfig) -> PolicyResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| PolicyError::Engine(redb::Error::Io(e)))?;
        }

        let db = Database::create(path)?;
        debug!(path = %path.display(), batching = batch.enabled, "opened database");

        Ok(Self {
            db,
            batcher: BatchCoordinator::new(batch),
        })
    }

    /// Runs `f` in a read-only transaction.
    pub fn view<T, F>(&self, f: F) -> PolicyResult<T>
    where
        F: FnOnce(&ReadTransaction) -> PolicyResult<T>,
    {
        let tx = self.db.begin_read()?;
        f(&tx)
    }

    /// Runs `f` in a read-write transaction and commits if it succeeds.
    pub fn update<T, F>(&self, f: F) -> PolicyResult<T>
    where
        F: FnOnce(&WriteTransaction) -> PolicyResult<T>,
    {
        let tx = self.db.begin_write()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Runs `f` in a read-write transaction that may be shared with other
    /// concurrent `batch` callers. Returns once the transaction holding `f`
    /// has committed.
    ///
    /// `f` may run more than once and must not depend on side effects of a
    /// previous run.
    pub fn batch<F>(&self, f: F) -> PolicyResult<()>
    where
        F: Fn(&WriteTransaction) -> PolicyResult<()> + Send + 'static,
    {
        self.batcher.submit(&self.db, Box::new(f))
    }
}
