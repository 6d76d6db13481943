use std::path::PathBuf;

/// Configuration for a [`StateDb`](crate::StateDb) and its embedded
/// database.
#[derive(Debug, Clone)]
pub struct StateDbConfig {
    /// Directory of the persistent backing store. `None` keeps every
    /// write cache-resident, which is what tests and purely speculative
    /// execution want.
    pub path: Option<PathBuf>,

    /// When on (the default), every write is immediately eligible for
    /// `flush`. When off, writes accumulate until an explicit `commit`,
    /// giving atomic multi-key batch semantics.
    pub auto_commit: bool,

    /// Recompute and compare each node hash on backing-store reads.
    /// Costs one permutation per read; meant for debugging corrupted
    /// stores, not production.
    pub verify_node_hashes: bool,
}

impl Default for StateDbConfig {
    fn default() -> Self {
        Self { path: None, auto_commit: true, verify_node_hashes: false }
    }
}
