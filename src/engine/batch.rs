//! Write batching
//!
//! Concurrent batched writes share one write transaction:
//! 1. Caller A queues its call and, finding no leader, becomes the leader
//! 2. Callers B and C queue their calls while A's group commits
//! 3. A takes B and C as the next group: one transaction, one commit
//! 4. Every caller is released with its own result
//!
//! Groups are formed only by concurrent arrival. There are no timers and no
//! delays: a call arriving at an idle coordinator commits immediately, alone.
//!
//! If a grouped transaction fails, each call in the group is re-run in its
//! own transaction so a failing call cannot take the others down with it,
//! and every caller sees the outcome of its own call.
//!
//! A call that panics is reported to its caller as `CallPanicked`. The
//! leader runs other callers' code, so a panic must never unwind through it.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use redb::{Database, WriteTransaction};
use tracing::{debug, trace, warn};

use crate::config::BatchConfig;
use crate::policy::{PolicyError, PolicyResult};

/// A write to run inside some write transaction.
///
/// `Fn` rather than `FnOnce`: a call may run twice if its group fails.
pub type BatchFn = Box<dyn Fn(&WriteTransaction) -> PolicyResult<()> + Send>;

struct PendingCall {
    ticket: u64,
    call: BatchFn,
}

#[derive(Default)]
struct BatchInner {
    /// Calls waiting for the next group, in arrival order.
    queue: VecDeque<PendingCall>,
    /// Finished calls whose callers have not picked up the result yet.
    results: HashMap<u64, PolicyResult<()>>,
    next_ticket: u64,
    /// Whether some caller is currently committing groups.
    leader_active: bool,
}

/// Coalesces concurrent batched writes into shared transactions.
pub struct BatchCoordinator {
    config: BatchConfig,
    inner: Mutex<BatchInner>,
    group_complete: Condvar,
}

impl BatchCoordinator {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BatchInner::default()),
            group_complete: Condvar::new(),
        }
    }

    /// Check if batching is enabled.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Number of calls queued behind the group currently committing.
    pub fn pending_calls(&self) -> usize {
        self.lock().queue.len()
    }

    /// Runs `call` in a write transaction, possibly shared with other
    /// concurrent callers, and blocks until that transaction is durable.
    pub fn submit(&self, db: &Database, call: BatchFn) -> PolicyResult<()> {
        if !self.config.enabled {
            return run_solo(db, &call);
        }

        let mut inner = self.lock();
        let ticket = inner.next_ticket;
        inner.next_ticket += 1;
        inner.queue.push_back(PendingCall { ticket, call });

        if !inner.leader_active {
            inner.leader_active = true;
            inner = self.lead(db, inner);
        }

        loop {
            if let Some(result) = inner.results.remove(&ticket) {
                return result;
            }
            inner = self
                .group_complete
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Commits groups until the queue drains, then steps down.
    ///
    /// The lock is released while a group commits so new calls can queue up
    /// for the next one.
    fn lead<'a>(
        &'a self,
        db: &Database,
        mut inner: MutexGuard<'a, BatchInner>,
    ) -> MutexGuard<'a, BatchInner> {
        loop {
            let take = inner.queue.len().min(self.config.max_calls);
            let group: Vec<PendingCall> = inner.queue.drain(..take).collect();
            drop(inner);

            let outcomes = commit_group(db, &group);

            inner = self.lock();
            inner.results.extend(outcomes);
            self.group_complete.notify_all();

            if inner.queue.is_empty() {
                inner.leader_active = false;
                return inner;
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, BatchInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn commit_group(db: &Database, group: &[PendingCall]) -> Vec<(u64, PolicyResult<()>)> {
    trace!(group_size = group.len(), "committing write batch");

    if let [single] = group {
        return vec![(single.ticket, run_solo(db, &single.call))];
    }

    match run_group(db, group) {
        Ok(()) => group
            .iter()
            .map(|pending| (pending.ticket, Ok(())))
            .collect(),
        Err(err) => {
            if matches!(err, PolicyError::Engine(_)) {
                warn!(
                    group_size = group.len(),
                    error = %err,
                    "write batch failed, retrying calls individually"
                );
            } else {
                debug!(
                    group_size = group.len(),
                    code = err.code(),
                    "write call rejected, retrying batch calls individually"
                );
            }
            group
                .iter()
                .map(|pending| (pending.ticket, run_solo(db, &pending.call)))
                .collect()
        }
    }
}

fn run_group(db: &Database, group: &[PendingCall]) -> PolicyResult<()> {
    let tx = db.begin_write()?;
    for pending in group {
        invoke(&pending.call, &tx)?;
    }
    tx.commit()?;
    Ok(())
}

fn run_solo(db: &Database, call: &BatchFn) -> PolicyResult<()> {
    let tx = db.begin_write()?;
    invoke(call, &tx)?;
    tx.commit()?;
    Ok(())
}

/// Runs `call`, turning a panic into `CallPanicked`. The transaction is
/// dropped uncommitted by the caller on any error.
fn invoke(call: &BatchFn, tx: &WriteTransaction) -> PolicyResult<()> {
    match panic::catch_unwind(AssertUnwindSafe(|| call(tx))) {
        Ok(result) => result,
        Err(payload) => Err(PolicyError::CallPanicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redb::{ReadableTable, TableDefinition};
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    const TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("batch_test");

    fn put(key: u8) -> BatchFn {
        Box::new(move |tx: &WriteTransaction| {
            let mut table = tx.open_table(TABLE)?;
            table.insert([key].as_slice(), [key].as_slice())?;
            Ok(())
        })
    }

    fn failing() -> BatchFn {
        Box::new(|_tx: &WriteTransaction| Err(PolicyError::RecordNotFound))
    }

    fn panicking() -> BatchFn {
        Box::new(|tx: &WriteTransaction| -> PolicyResult<()> {
            tx.open_table(TABLE)?
                .insert([0xFFu8].as_slice(), [0xFFu8].as_slice())?;
            panic!("write call exploded");
        })
    }

    fn count(db: &Database) -> usize {
        let tx = db.begin_read().unwrap();
        let table = tx.open_table(TABLE).unwrap();
        let len = table.iter().unwrap().count();
        len
    }

    fn temp_db(temp_dir: &TempDir) -> Database {
        Database::create(temp_dir.path().join("batch.redb")).unwrap()
    }

    #[test]
    fn test_single_call_commits() {
        let temp_dir = TempDir::new().unwrap();
        let db = temp_db(&temp_dir);
        let batcher = BatchCoordinator::new(BatchConfig::default());

        batcher.submit(&db, put(1)).unwrap();

        assert_eq!(count(&db), 1);
        assert_eq!(batcher.pending_calls(), 0);
    }

    #[test]
    fn test_disabled_runs_each_call_alone() {
        let temp_dir = TempDir::new().unwrap();
        let db = temp_db(&temp_dir);
        let batcher = BatchCoordinator::new(BatchConfig::disabled());
        assert!(!batcher.is_enabled());

        batcher.submit(&db, put(1)).unwrap();
        batcher.submit(&db, put(2)).unwrap();

        assert_eq!(count(&db), 2);
    }

    #[test]
    fn test_failed_call_reports_its_own_error() {
        let temp_dir = TempDir::new().unwrap();
        let db = temp_db(&temp_dir);
        let batcher = BatchCoordinator::new(BatchConfig::default());

        let err = batcher.submit(&db, failing()).unwrap_err();
        assert!(matches!(err, PolicyError::RecordNotFound));

        // Nothing from the failed call leaked into the store.
        let tx = db.begin_read().unwrap();
        assert!(tx.open_table(TABLE).is_err());
    }

    #[test]
    fn test_panicking_call_does_not_stall_later_calls() {
        let temp_dir = TempDir::new().unwrap();
        let db = Arc::new(temp_db(&temp_dir));
        let batcher = Arc::new(BatchCoordinator::new(BatchConfig::default()));

        let first = {
            let db = Arc::clone(&db);
            let batcher = Arc::clone(&batcher);
            thread::spawn(move || batcher.submit(&db, panicking()))
        };
        let err = first.join().unwrap().unwrap_err();
        match err {
            PolicyError::CallPanicked(msg) => assert_eq!(msg, "write call exploded"),
            other => panic!("unexpected error: {}", other),
        }

        // The leader stepped down, so the next call leads and commits.
        let second = {
            let db = Arc::clone(&db);
            let batcher = Arc::clone(&batcher);
            thread::spawn(move || batcher.submit(&db, put(1)))
        };
        second.join().unwrap().unwrap();

        assert_eq!(count(&db), 1);
        assert_eq!(batcher.pending_calls(), 0);
    }

    #[test]
    fn test_panic_in_group_only_fails_that_call() {
        let temp_dir = TempDir::new().unwrap();
        let db = temp_db(&temp_dir);

        let group = vec![
            PendingCall {
                ticket: 0,
                call: put(1),
            },
            PendingCall {
                ticket: 1,
                call: panicking(),
            },
            PendingCall {
                ticket: 2,
                call: put(2),
            },
        ];

        let outcomes: HashMap<u64, PolicyResult<()>> =
            commit_group(&db, &group).into_iter().collect();

        assert!(outcomes[&0].is_ok());
        assert!(matches!(outcomes[&1], Err(PolicyError::CallPanicked(_))));
        assert!(outcomes[&2].is_ok());
        // The panicking call's partial write was rolled back.
        assert_eq!(count(&db), 2);
    }

    #[test]
    fn test_group_failure_falls_back_to_solo_calls() {
        let temp_dir = TempDir::new().unwrap();
        let db = temp_db(&temp_dir);

        let group = vec![
            PendingCall {
                ticket: 0,
                call: put(1),
            },
            PendingCall {
                ticket: 1,
                call: failing(),
            },
            PendingCall {
                ticket: 2,
                call: put(2),
            },
        ];

        let outcomes: HashMap<u64, PolicyResult<()>> =
            commit_group(&db, &group).into_iter().collect();

        assert!(outcomes[&0].is_ok());
        assert!(matches!(outcomes[&1], Err(PolicyError::RecordNotFound)));
        assert!(outcomes[&2].is_ok());
        assert_eq!(count(&db), 2);
    }

    #[test]
    fn test_concurrent_calls_all_commit() {
        let temp_dir = TempDir::new().unwrap();
        let db = Arc::new(temp_db(&temp_dir));
        let batcher = Arc::new(BatchCoordinator::new(BatchConfig::enabled(4)));

        let handles: Vec<_> = (0..32u8)
            .map(|key| {
                let db = Arc::clone(&db);
                let batcher = Arc::clone(&batcher);
                thread::spawn(move || batcher.submit(&db, put(key)))
            })
            .collect();

        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert_eq!(count(&db), 32);
        assert_eq!(batcher.pending_calls(), 0);
    }
}
