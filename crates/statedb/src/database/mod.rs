//! Write-buffered, read-through cache over persistent key/value storage.
//!
//! Two parallel stores share the same tiering: tree/value nodes keyed by
//! hex hash, and opaque program blobs keyed the same way. Lookups resolve
//! write buffer, then read cache, then the backing store (promoting hits
//! into the read cache). Writes land in the write buffer, immediately
//! visible to reads, and reach the backing store only through [`flush`],
//! and only when flagged persistent. Speculative writes stay cache-only
//! for the life of the process.
//!
//! [`flush`]: Database::flush

mod backend;

pub use backend::{BackingStore, Column, RocksBackend};

use crate::config::StateDbConfig;
use crate::errors::StateDbError;
use crate::metrics::DatabaseMetrics;
use crate::node::{self, NODE_WIDTH};
use crate::scalar::{fea_to_string, Fea, Fr};
use bytes::Bytes;
use parking_lot::RwLock;
use plonky2::field::types::Field;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// One buffered write with its durability markers.
#[derive(Debug, Clone)]
struct Buffered<V> {
    value: V,
    /// Destined for the backing store once flushed.
    persistent: bool,
    /// Eligible for the next flush. Set at write time under autocommit,
    /// otherwise by `commit`.
    committed: bool,
}

/// One tier pair: write buffer over read cache.
#[derive(Debug)]
struct Tiered<V> {
    buffer: HashMap<String, Buffered<V>>,
    cache: HashMap<String, V>,
}

impl<V> Default for Tiered<V> {
    fn default() -> Self {
        Self { buffer: HashMap::new(), cache: HashMap::new() }
    }
}

impl<V: Clone> Tiered<V> {
    fn lookup(&self, key: &str) -> Option<V> {
        if let Some(entry) = self.buffer.get(key) {
            return Some(entry.value.clone());
        }
        self.cache.get(key).cloned()
    }

    fn insert(&mut self, key: String, value: V, persistent: bool, committed: bool) {
        self.buffer.insert(key, Buffered { value, persistent, committed });
    }

    fn commit_all(&mut self) {
        for entry in self.buffer.values_mut() {
            entry.committed = true;
        }
    }

    /// Committed entries destined for the backing store.
    fn committed_persistent(&self) -> Vec<(String, V)> {
        self.buffer
            .iter()
            .filter(|(_, e)| e.committed && e.persistent)
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    /// Moves every committed entry out of the buffer into the read
    /// cache, returning how many moved. Speculative entries stay
    /// readable this way without ever being written out.
    fn drain_committed(&mut self) -> usize {
        let cache = &mut self.cache;
        let before = self.buffer.len();
        self.buffer.retain(|key, entry| {
            if entry.committed {
                cache.insert(key.clone(), entry.value.clone());
                false
            } else {
                true
            }
        });
        before - self.buffer.len()
    }
}

/// Node and program storage with deferred, batched persistence.
///
/// All methods take `&self`; the cache tiers sit behind their own locks
/// so the type is shareable, while the owning [`StateDb`] serializes
/// callers at a coarser level.
///
/// [`StateDb`]: crate::StateDb
pub struct Database {
    nodes: RwLock<Tiered<Vec<Fr>>>,
    programs: RwLock<Tiered<Bytes>>,
    backend: Option<Box<dyn BackingStore>>,
    auto_commit: AtomicBool,
    verify_node_hashes: bool,
    metrics: DatabaseMetrics,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("has_backend", &self.backend.is_some())
            .field("auto_commit", &self.auto_commit.load(Ordering::Relaxed))
            .field("verify_node_hashes", &self.verify_node_hashes)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Opens a database per `config`, with a RocksDB backing store when
    /// a path is configured.
    pub fn new(config: &StateDbConfig) -> Result<Self, StateDbError> {
        let backend: Option<Box<dyn BackingStore>> = match &config.path {
            Some(path) => Some(Box::new(RocksBackend::open(path)?)),
            None => None,
        };
        Ok(Self::with_backend(backend, config))
    }

    /// Cache-only database for speculative execution and tests.
    pub fn in_memory() -> Self {
        Self::with_backend(None, &StateDbConfig::default())
    }

    /// Database over an externally constructed backing store.
    pub fn with_backend(backend: Option<Box<dyn BackingStore>>, config: &StateDbConfig) -> Self {
        Self {
            nodes: RwLock::new(Tiered::default()),
            programs: RwLock::new(Tiered::default()),
            backend,
            auto_commit: AtomicBool::new(config.auto_commit),
            verify_node_hashes: config.verify_node_hashes,
            metrics: DatabaseMetrics::new(),
        }
    }

    /// Reads the node stored under `hash`.
    ///
    /// Fails with [`StateDbError::NotFound`] when the hash is absent
    /// from every tier; for a hash referenced by a reachable node that
    /// is a fatal inconsistency for the caller.
    pub fn get_node(&self, hash: &Fea) -> Result<Vec<Fr>, StateDbError> {
        let key = fea_to_string(hash);
        if let Some(data) = self.nodes.read().lookup(&key) {
            self.metrics.node_hits.increment(1);
            return Ok(data);
        }
        self.metrics.node_misses.increment(1);
        if let Some(store) = &self.backend {
            if let Some(bytes) = store.read(Column::Nodes, &key)? {
                let data = backend::decode_elements(&bytes)
                    .map_err(|detail| StateDbError::InvalidEncoding { key: key.clone(), detail })?;
                if self.verify_node_hashes {
                    self.check_node_hash(&key, hash, &data)?;
                }
                self.nodes.write().cache.insert(key, data.clone());
                return Ok(data);
            }
        }
        Err(StateDbError::NotFound { key })
    }

    /// Buffers a node write, immediately visible to reads. It reaches
    /// the backing store only via [`flush`](Self::flush), and only when
    /// `persistent`.
    pub fn set_node(&self, hash: &Fea, data: Vec<Fr>, persistent: bool) -> Result<(), StateDbError> {
        let committed = self.auto_commit.load(Ordering::Relaxed);
        let mut nodes = self.nodes.write();
        nodes.insert(fea_to_string(hash), data, persistent, committed);
        self.metrics.buffered_nodes.set(nodes.buffer.len() as f64);
        Ok(())
    }

    /// Reads the program blob stored under the hex `key`.
    pub fn get_program(&self, key: &str) -> Result<Bytes, StateDbError> {
        if let Some(blob) = self.programs.read().lookup(key) {
            self.metrics.program_hits.increment(1);
            return Ok(blob);
        }
        self.metrics.program_misses.increment(1);
        if let Some(store) = &self.backend {
            if let Some(bytes) = store.read(Column::Programs, key)? {
                let blob = Bytes::from(bytes);
                self.programs.write().cache.insert(key.to_string(), blob.clone());
                return Ok(blob);
            }
        }
        Err(StateDbError::NotFound { key: key.to_string() })
    }

    /// Buffers a program write with the same persistence semantics as
    /// [`set_node`](Self::set_node).
    pub fn set_program(&self, key: &str, data: Bytes, persistent: bool) -> Result<(), StateDbError> {
        let committed = self.auto_commit.load(Ordering::Relaxed);
        let mut programs = self.programs.write();
        programs.insert(key.to_string(), data, persistent, committed);
        self.metrics.buffered_programs.set(programs.buffer.len() as f64);
        Ok(())
    }

    /// Flushes committed writes: persistent entries go to the backing
    /// store as a single batch, and everything drained becomes
    /// cache-resident. Uncommitted entries stay buffered.
    ///
    /// A backing-store failure leaves the buffers untouched.
    pub fn flush(&self) -> Result<(), StateDbError> {
        let mut nodes = self.nodes.write();
        let mut programs = self.programs.write();

        if let Some(store) = &self.backend {
            let mut entries: Vec<(Column, String, Vec<u8>)> = Vec::new();
            for (key, data) in nodes.committed_persistent() {
                entries.push((Column::Nodes, key, backend::encode_elements(&data)));
            }
            for (key, blob) in programs.committed_persistent() {
                entries.push((Column::Programs, key, blob.to_vec()));
            }
            if !entries.is_empty() {
                store.write_batch(entries)?;
            }
        }

        let drained = nodes.drain_committed() + programs.drain_committed();
        self.metrics.flushes.increment(1);
        self.metrics.flushed_entries.increment(drained as u64);
        self.metrics.buffered_nodes.set(nodes.buffer.len() as f64);
        self.metrics.buffered_programs.set(programs.buffer.len() as f64);
        debug!(drained, remaining = nodes.buffer.len() + programs.buffer.len(), "flushed write buffers");
        Ok(())
    }

    /// Marks every buffered write eligible for the next flush. With
    /// autocommit off this is the atomic batch boundary.
    pub fn commit(&self) {
        self.nodes.write().commit_all();
        self.programs.write().commit_all();
        debug!("committed write buffers");
    }

    /// Toggles per-write commit eligibility.
    pub fn set_auto_commit(&self, on: bool) {
        self.auto_commit.store(on, Ordering::Relaxed);
    }

    /// Primes the node read cache with batch pre-state. Preloaded nodes
    /// bypass the write buffer: they are already persistent upstream and
    /// must never be re-flushed.
    pub fn preload_nodes<I: IntoIterator<Item = (String, Vec<Fr>)>>(&self, entries: I) {
        let mut nodes = self.nodes.write();
        for (key, data) in entries {
            nodes.cache.insert(key, data);
        }
    }

    /// Primes the program read cache with batch pre-state.
    pub fn preload_programs<I: IntoIterator<Item = (String, Bytes)>>(&self, entries: I) {
        let mut programs = self.programs.write();
        for (key, blob) in entries {
            programs.cache.insert(key, blob);
        }
    }

    /// Current node contents across buffer and cache; the buffer wins on
    /// overlap.
    pub fn snapshot_nodes(&self) -> Vec<(String, Vec<Fr>)> {
        let nodes = self.nodes.read();
        let mut out = nodes.cache.clone();
        for (key, entry) in &nodes.buffer {
            out.insert(key.clone(), entry.value.clone());
        }
        out.into_iter().collect()
    }

    /// Current program contents across buffer and cache.
    pub fn snapshot_programs(&self) -> Vec<(String, Bytes)> {
        let programs = self.programs.read();
        let mut out = programs.cache.clone();
        for (key, entry) in &programs.buffer {
            out.insert(key.clone(), entry.value.clone());
        }
        out.into_iter().collect()
    }

    fn check_node_hash(&self, key: &str, hash: &Fea, data: &[Fr]) -> Result<(), StateDbError> {
        if data.len() == NODE_WIDTH {
            let mut a = [Fr::ZERO; 8];
            let mut c = [Fr::ZERO; 4];
            a.copy_from_slice(&data[..8]);
            c.copy_from_slice(&data[8..]);
            if node::hash_node(&a, &c) == *hash {
                return Ok(());
            }
        }
        warn!(key, "stored node fails hash verification");
        Err(StateDbError::InvalidEncoding {
            key: key.to_string(),
            detail: "contents do not hash to the key".to_string(),
        })
    }
}
