//! Shared helpers for tests and benchmarks.

use crate::database::Database;
use crate::scalar::{scalar_to_key, Fea, Fr};
use alloy_primitives::U256;
use plonky2::field::types::Field;

/// Cache-only database for exercising the tree without a disk store.
pub fn test_database() -> Database {
    Database::in_memory()
}

/// Tree key derived from a small integer scalar.
pub fn key_of(scalar: u64) -> Fea {
    scalar_to_key(U256::from(scalar))
}

/// Fea built from four raw element values.
pub fn fea(a: u64, b: u64, c: u64, d: u64) -> Fea {
    [
        Fr::from_canonical_u64(a),
        Fr::from_canonical_u64(b),
        Fr::from_canonical_u64(c),
        Fr::from_canonical_u64(d),
    ]
}
