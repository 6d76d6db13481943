//! Backing-store seam and the local RocksDB implementation.

use crate::errors::StateDbError;
use crate::scalar::Fr;
use plonky2::field::types::{Field, PrimeField64};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Options, WriteBatch, DB};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Storage tables of the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    /// Tree and value nodes: hex hash to serialized field elements.
    Nodes,
    /// Contract bytecode: hex hash to raw blob.
    Programs,
}

impl Column {
    /// Column family name in the backing store.
    pub const fn name(self) -> &'static str {
        match self {
            Column::Nodes => "nodes",
            Column::Programs => "programs",
        }
    }
}

/// Persistent key/value storage underneath the database caches.
///
/// The crate ships a local RocksDB implementation; a remote store plugs
/// in at this same seam with identical semantics.
pub trait BackingStore: Send + Sync {
    /// Reads one value, `None` when the key is absent.
    fn read(&self, column: Column, key: &str) -> Result<Option<Vec<u8>>, StateDbError>;

    /// Writes a set of entries as one atomic batch.
    fn write_batch(&self, entries: Vec<(Column, String, Vec<u8>)>) -> Result<(), StateDbError>;
}

/// Local RocksDB backing store, one column family per table.
pub struct RocksBackend {
    db: Arc<DB>,
}

impl fmt::Debug for RocksBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RocksBackend").finish_non_exhaustive()
    }
}

impl RocksBackend {
    /// Opens the store at `path`, creating it and any missing column
    /// families.
    pub fn open(path: &Path) -> Result<Self, StateDbError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(Column::Nodes.name(), Self::column_options()),
            ColumnFamilyDescriptor::new(Column::Programs.name(), Self::column_options()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, cf_descriptors)?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Options tuned for hash-keyed point lookups.
    fn column_options() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts.set_write_buffer_size(64 * 1024 * 1024);
        opts.set_target_file_size_base(64 * 1024 * 1024);
        opts
    }

    fn cf(&self, column: Column) -> Result<&ColumnFamily, StateDbError> {
        self.db.cf_handle(column.name()).ok_or_else(|| StateDbError::BackingStoreUnavailable {
            reason: format!("missing column family {}", column.name()),
        })
    }
}

impl BackingStore for RocksBackend {
    fn read(&self, column: Column, key: &str) -> Result<Option<Vec<u8>>, StateDbError> {
        let cf = self.cf(column)?;
        Ok(self.db.get_cf(cf, key.as_bytes())?)
    }

    fn write_batch(&self, entries: Vec<(Column, String, Vec<u8>)>) -> Result<(), StateDbError> {
        let mut batch = WriteBatch::default();
        for (column, key, value) in entries {
            let cf = self.cf(column)?;
            batch.put_cf(cf, key.as_bytes(), value);
        }
        Ok(self.db.write(batch)?)
    }
}

/// Serializes node elements for the backing store, eight little-endian
/// bytes per element.
pub(crate) fn encode_elements(data: &[Fr]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * 8);
    for e in data {
        out.extend_from_slice(&e.to_canonical_u64().to_le_bytes());
    }
    out
}

/// The inverse of [`encode_elements`]. Fails on lengths that do not
/// divide into whole elements.
pub(crate) fn decode_elements(bytes: &[u8]) -> Result<Vec<Fr>, String> {
    if bytes.len() % 8 != 0 {
        return Err(format!("stored length {} is not a whole number of elements", bytes.len()));
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut b = [0u8; 8];
            b.copy_from_slice(chunk);
            Fr::from_noncanonical_u64(u64::from_le_bytes(b))
        })
        .collect())
}
