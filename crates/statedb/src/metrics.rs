//! Operation counters for the database cache tiers.

use metrics::{counter, gauge, Counter, Gauge};
use std::fmt;

/// Metrics collector for database operations.
pub(crate) struct DatabaseMetrics {
    /// Node reads answered from the write buffer or read cache.
    pub(crate) node_hits: Counter,
    /// Node reads that went to the backing store or failed.
    pub(crate) node_misses: Counter,
    /// Program reads answered from the write buffer or read cache.
    pub(crate) program_hits: Counter,
    /// Program reads that went to the backing store or failed.
    pub(crate) program_misses: Counter,
    /// Flush invocations.
    pub(crate) flushes: Counter,
    /// Entries drained out of the write buffers by flushes.
    pub(crate) flushed_entries: Counter,
    /// Current node write-buffer size.
    pub(crate) buffered_nodes: Gauge,
    /// Current program write-buffer size.
    pub(crate) buffered_programs: Gauge,
}

impl DatabaseMetrics {
    pub(crate) fn new() -> Self {
        Self {
            node_hits: counter!("statedb_node_cache_hits_total"),
            node_misses: counter!("statedb_node_cache_misses_total"),
            program_hits: counter!("statedb_program_cache_hits_total"),
            program_misses: counter!("statedb_program_cache_misses_total"),
            flushes: counter!("statedb_flushes_total"),
            flushed_entries: counter!("statedb_flushed_entries_total"),
            buffered_nodes: gauge!("statedb_buffered_nodes"),
            buffered_programs: gauge!("statedb_buffered_programs"),
        }
    }
}

impl fmt::Debug for DatabaseMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseMetrics").finish_non_exhaustive()
    }
}
