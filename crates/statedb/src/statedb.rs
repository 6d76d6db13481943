//! Serialization facade over one tree and its database.

use crate::config::StateDbConfig;
use crate::database::Database;
use crate::errors::StateDbError;
use crate::input::Input;
use crate::scalar::{fea_to_string, Fea, Fr};
use crate::smt::{Smt, SmtGetResult, SmtSetResult};
use alloy_primitives::U256;
use bytes::Bytes;
use parking_lot::Mutex;

/// Exclusive-access facade over one [`Database`] and one [`Smt`].
///
/// Every operation acquires one process-wide lock for its entire
/// duration, database I/O included, so no two operations ever overlap.
/// The tree is deterministic and copy-on-write, which makes this single
/// lock the whole consistency model: no lost updates, no torn reads, at
/// the cost of backing-store latency being visible to every queued
/// caller. Root hand-over between consecutive `set` calls is the
/// caller's job.
#[derive(Debug)]
pub struct StateDb {
    engine: Mutex<Engine>,
}

#[derive(Debug)]
struct Engine {
    db: Database,
    smt: Smt,
}

impl StateDb {
    /// Creates a facade over a fresh database opened per `config`.
    pub fn new(config: &StateDbConfig) -> Result<Self, StateDbError> {
        Ok(Self { engine: Mutex::new(Engine { db: Database::new(config)?, smt: Smt::new() }) })
    }

    /// Writes `value` under `key` in the tree rooted at `old_root`.
    pub fn set(
        &self,
        old_root: &Fea,
        key: &Fea,
        value: U256,
        persistent: bool,
    ) -> Result<SmtSetResult, StateDbError> {
        let engine = self.engine.lock();
        engine.smt.set(&engine.db, old_root, key, value, persistent)
    }

    /// Reads `key` from the tree rooted at `root`.
    pub fn get(&self, root: &Fea, key: &Fea) -> Result<SmtGetResult, StateDbError> {
        let engine = self.engine.lock();
        engine.smt.get(&engine.db, root, key)
    }

    /// Stores a bytecode blob under its hash key.
    pub fn set_program(&self, key: &Fea, data: &[u8], persistent: bool) -> Result<(), StateDbError> {
        let engine = self.engine.lock();
        engine.db.set_program(&fea_to_string(key), Bytes::copy_from_slice(data), persistent)
    }

    /// Reads a bytecode blob by its hash key.
    pub fn get_program(&self, key: &Fea) -> Result<Bytes, StateDbError> {
        let engine = self.engine.lock();
        engine.db.get_program(&fea_to_string(key))
    }

    /// Hashes and stores one record outside a tree operation.
    pub fn hash_save(
        &self,
        data: &[Fr; 8],
        capacity: &[Fr; 4],
        persistent: bool,
    ) -> Result<Fea, StateDbError> {
        let engine = self.engine.lock();
        engine.smt.hash_save(&engine.db, data, capacity, persistent)
    }

    /// Persists committed buffered writes to the backing store.
    pub fn flush(&self) -> Result<(), StateDbError> {
        self.engine.lock().db.flush()
    }

    /// Marks buffered writes eligible for the next flush.
    pub fn commit(&self) {
        self.engine.lock().db.commit()
    }

    /// Toggles per-write commit eligibility.
    pub fn set_auto_commit(&self, on: bool) {
        self.engine.lock().db.set_auto_commit(on)
    }

    /// Primes the database caches with a batch's pre-state.
    pub fn preload(&self, input: &Input) -> Result<(), StateDbError> {
        let engine = self.engine.lock();
        input.load_into(&engine.db)
    }
}
