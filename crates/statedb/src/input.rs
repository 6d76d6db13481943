//! Batch pre-state input.
//!
//! A batch ships with the state root it replays from plus a flat map of
//! every node and contract blob the replay will touch. Loading an input
//! primes the database read caches once, before any tree operation runs,
//! so replay never has to fault individual nodes in.

use crate::database::Database;
use crate::errors::StateDbError;
use crate::scalar::{fea_to_string, string_to_fea, Fea, Fr};
use bytes::Bytes;
use plonky2::field::types::{Field, PrimeField64};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Pre-state of one batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Input {
    /// State root the batch starts from, as a hex scalar.
    pub old_state_root: String,

    /// Node hash to node contents, each element a hex string.
    #[serde(default)]
    pub db: BTreeMap<String, Vec<String>>,

    /// Bytecode hash to hex blob.
    #[serde(default)]
    pub contracts_bytecode: BTreeMap<String, String>,
}

impl Input {
    /// Parses an input document from JSON.
    pub fn from_json(json: &str) -> Result<Self, StateDbError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serializes the input document to JSON.
    pub fn to_json(&self) -> Result<String, StateDbError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Root the batch starts from.
    pub fn old_root(&self) -> Result<Fea, StateDbError> {
        string_to_fea(&self.old_state_root)
    }

    /// Primes `db`'s read caches with this input's pre-state.
    pub fn load_into(&self, db: &Database) -> Result<(), StateDbError> {
        let mut nodes = Vec::with_capacity(self.db.len());
        for (key, elements) in &self.db {
            let mut data = Vec::with_capacity(elements.len());
            for element in elements {
                data.push(parse_element(element)?);
            }
            nodes.push((normalize_key(key)?, data));
        }

        let mut programs = Vec::with_capacity(self.contracts_bytecode.len());
        for (key, blob) in &self.contracts_bytecode {
            let raw = hex::decode(blob.trim_start_matches("0x")).map_err(|e| {
                StateDbError::InvalidInput(format!("bad bytecode blob under {key}: {e}"))
            })?;
            programs.push((normalize_key(key)?, Bytes::from(raw)));
        }

        debug!(nodes = nodes.len(), programs = programs.len(), "loaded batch pre-state");
        db.preload_nodes(nodes);
        db.preload_programs(programs);
        Ok(())
    }

    /// Captures a database's current contents as an input document
    /// starting from `old_state_root`.
    pub fn from_database(old_state_root: &Fea, db: &Database) -> Self {
        let mut out = Self {
            old_state_root: format!("0x{}", fea_to_string(old_state_root)),
            ..Self::default()
        };
        for (key, data) in db.snapshot_nodes() {
            out.db.insert(
                key,
                data.iter().map(|e| format!("{:x}", e.to_canonical_u64())).collect(),
            );
        }
        for (key, blob) in db.snapshot_programs() {
            out.contracts_bytecode.insert(key, hex::encode(&blob));
        }
        out
    }
}

fn parse_element(s: &str) -> Result<Fr, StateDbError> {
    let raw = s.trim_start_matches("0x");
    u64::from_str_radix(raw, 16)
        .map(Fr::from_noncanonical_u64)
        .map_err(|e| StateDbError::InvalidInput(format!("bad field element {s:?}: {e}")))
}

/// Keys are stored fixed-width lowercase; accept any hex spelling on
/// the way in.
fn normalize_key(s: &str) -> Result<String, StateDbError> {
    Ok(fea_to_string(&string_to_fea(s)?))
}
