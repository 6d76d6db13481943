//! State-storage engine for a zero-knowledge execution prover.
//!
//! A sparse Merkle tree keyed by 256-bit scalars over the Goldilocks
//! field, backed by a write-buffered, read-through cached database with
//! deferred commit, and serialized behind a single exclusive facade.
//! Execution semantics (balances, contract storage, nonces, bytecode
//! hashes) are recorded here and proved against the roots and Merkle
//! sibling traces this engine produces.
//!
//! Module map:
//! - [`smt`]: the tree algorithm, get/set over a binary radix trie with
//!   copy-on-write roots and the seven-outcome update classification.
//! - [`database`]: cache tiers and batched persistence over RocksDB.
//! - [`statedb`]: the exclusive-lock facade callers go through.
//! - [`input`]: batch pre-state loading.
//! - [`scalar`] and [`node`]: field-element scalars and node records.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod database;
pub mod errors;
pub mod input;
mod metrics;
pub mod node;
pub mod scalar;
pub mod smt;
pub mod statedb;
mod test;

pub use config::StateDbConfig;
pub use database::{BackingStore, Column, Database, RocksBackend};
pub use errors::StateDbError;
pub use input::Input;
pub use scalar::{Fea, Fr, FEA_ZERO};
pub use smt::{SetMode, Smt, SmtGetResult, SmtSetResult};
pub use statedb::StateDb;
pub use test::utils;
