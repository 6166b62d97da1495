//! Policy store: CRUD over the policies bucket
//!
//! Bucket layout:
//! - key: 32-byte payment hash
//! - value: 40-byte encoded policy (see [`super::record`])
//!
//! The bucket is created by the first insert or by `delete_all`. Until then
//! reads fail with `NoRecordsCreated`, which is distinct from an existing
//! but empty bucket.

use std::sync::Arc;

use redb::{
    ReadOnlyTable, ReadTransaction, ReadableTable, TableDefinition, TableError, WriteTransaction,
};
use tracing::debug;

use super::errors::{PolicyError, PolicyResult};
use super::record::{PaymentHash, Policy};
use crate::config::StoreConfig;
use crate::engine::Engine;

type Bucket<'a> = TableDefinition<'a, &'static [u8], &'static [u8]>;

fn bucket(name: &str) -> Bucket<'_> {
    TableDefinition::new(name)
}

/// Persistent store of fee policies keyed by payment hash.
///
/// Safe to share between threads; see [`Engine`] for the transaction model.
pub struct PolicyStore {
    engine: Engine,
    bucket: Arc<str>,
}

impl PolicyStore {
    /// Opens or creates the store described by `config`.
    pub fn open(config: StoreConfig) -> PolicyResult<Self> {
        config.validate()?;

        let engine = Engine::open(&config.path, config.batch.clone())?;
        debug!(
            path = %config.path.display(),
            bucket = %config.bucket,
            "opened policy store"
        );

        Ok(Self {
            engine,
            bucket: Arc::from(config.bucket),
        })
    }

    /// Name of the bucket this store reads and writes.
    pub fn bucket_name(&self) -> &str {
        &self.bucket
    }

    /// Stores `policy` under its payment hash, replacing any existing record.
    ///
    /// The policy is encoded before a transaction is opened, so an encoding
    /// failure leaves the store untouched. Concurrent inserts may share one
    /// commit; each call still returns only after its write is durable.
    pub fn insert(&self, policy: &Policy) -> PolicyResult<()> {
        let value = policy.encode()?;
        let key = *policy.payment_hash.as_bytes();
        let name = Arc::clone(&self.bucket);

        self.engine.batch(move |tx: &WriteTransaction| {
            let mut policies = tx.open_table(bucket(&name))?;
            policies.insert(key.as_slice(), value.as_slice())?;
            Ok(())
        })
    }

    /// Returns every stored policy in ascending payment hash order.
    ///
    /// Entries with an empty value are skipped. A single undecodable entry
    /// fails the whole call.
    pub fn fetch_all(&self) -> PolicyResult<Vec<Policy>> {
        self.engine.view(|tx| {
            let policies = open_existing(tx, &self.bucket)?;

            let mut out = Vec::new();
            for entry in policies.iter()? {
                let (_key, value) = entry?;
                let bytes = value.value();
                if bytes.is_empty() {
                    continue;
                }
                out.push(Policy::from_bytes(bytes)?);
            }

            Ok(out)
        })
    }

    /// Returns the policy stored under `payment_hash`.
    pub fn lookup(&self, payment_hash: &PaymentHash) -> PolicyResult<Policy> {
        self.engine.view(|tx| {
            let policies = open_existing(tx, &self.bucket)?;

            let found = policies.get(payment_hash.as_bytes().as_slice())?;
            match found {
                Some(value) => Policy::from_bytes(value.value()),
                None => Err(PolicyError::RecordNotFound),
            }
        })
    }

    /// Removes every policy, leaving an empty but initialized bucket.
    ///
    /// Drop and recreate happen in one transaction. Running this on a store
    /// that never had a bucket is not an error.
    pub fn delete_all(&self) -> PolicyResult<()> {
        self.engine.update(|tx| {
            let existed = tx.delete_table(bucket(&self.bucket))?;
            tx.open_table(bucket(&self.bucket))?;
            debug!(bucket = %self.bucket, existed, "reset policy bucket");
            Ok(())
        })
    }
}

/// Opens the bucket for reading, mapping a missing bucket to
/// `NoRecordsCreated`.
fn open_existing(
    tx: &ReadTransaction,
    name: &str,
) -> PolicyResult<ReadOnlyTable<&'static [u8], &'static [u8]>> {
    match tx.open_table(bucket(name)) {
        Ok(table) => Ok(table),
        Err(TableError::TableDoesNotExist(_)) => Err(PolicyError::NoRecordsCreated),
        Err(e) => Err(e.into()),
    }
}
