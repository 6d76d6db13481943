use thiserror::Error;

/// Errors surfaced by state-storage operations.
///
/// Every kind is fatal to the in-flight operation; neither the tree nor
/// the database attempts partial recovery or retries.
#[derive(Error, Debug)]
pub enum StateDbError {
    /// A referenced node or program hash is absent from every cache tier
    /// and from the backing store. On a tree-node read this signals tree
    /// or cache corruption upstream, since every hash referenced by a
    /// reachable node must exist.
    #[error("key {key} not found in any storage tier")]
    NotFound {
        /// Hex hash the lookup was issued for.
        key: String,
    },

    /// The persistent backing store failed or is unreachable.
    #[error("backing store unavailable: {reason}")]
    BackingStoreUnavailable {
        /// Underlying storage error description.
        reason: String,
    },

    /// Stored contents under a hash do not decode to a valid node shape.
    #[error("invalid node encoding under key {key}: {detail}")]
    InvalidEncoding {
        /// Hex hash the node was read under.
        key: String,
        /// What failed to decode.
        detail: String,
    },

    /// A batch input document could not be parsed.
    #[error("invalid batch input: {0}")]
    InvalidInput(String),
}

impl From<rocksdb::Error> for StateDbError {
    fn from(e: rocksdb::Error) -> Self {
        Self::BackingStoreUnavailable { reason: e.to_string() }
    }
}

impl From<serde_json::Error> for StateDbError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidInput(e.to_string())
    }
}
