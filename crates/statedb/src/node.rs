//! Node records and the tree hash.
//!
//! Every persisted record is twelve field elements: eight data elements
//! followed by a four-element capacity that domain-separates node types.
//! The record's database key is the Poseidon permutation of the full
//! twelve-element input, truncated to four output elements.
//!
//! Shapes:
//! - branch: data = left child hash ++ right child hash, capacity zero;
//! - leaf: data = remaining key ++ value-node hash, capacity `[1,0,0,0]`;
//! - value: data = eight 32-bit value chunks, capacity zero.

use crate::errors::StateDbError;
use crate::scalar::{fea_is_zero, fea_to_string, Fea, Fr};
use plonky2::field::types::Field;
use plonky2::hash::poseidon::Poseidon;

/// Stored width of every record.
pub const NODE_WIDTH: usize = 12;

/// Capacity of branch and value nodes.
pub const CAP_ZERO: [Fr; 4] = [Fr::ZERO; 4];

/// Capacity of leaf nodes.
pub const CAP_LEAF: [Fr; 4] = [Fr::ONE, Fr::ZERO, Fr::ZERO, Fr::ZERO];

/// Shape of a decoded tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Two child hashes, left (bit 0) then right (bit 1).
    Branch,
    /// Remaining key plus value-node hash.
    Leaf,
}

/// Classifies a stored record as branch or leaf.
///
/// Anything that is not a well-formed tree node is rejected with
/// [`StateDbError::InvalidEncoding`]; `hash` only provides error context.
pub fn node_kind(data: &[Fr], hash: &Fea) -> Result<NodeKind, StateDbError> {
    if data.len() != NODE_WIDTH {
        return Err(StateDbError::InvalidEncoding {
            key: fea_to_string(hash),
            detail: format!("expected {NODE_WIDTH} elements, got {}", data.len()),
        });
    }
    if data[8] == Fr::ONE {
        Ok(NodeKind::Leaf)
    } else if data[8] == Fr::ZERO {
        Ok(NodeKind::Branch)
    } else {
        Err(StateDbError::InvalidEncoding {
            key: fea_to_string(hash),
            detail: "leaf flag is neither zero nor one".to_string(),
        })
    }
}

/// Copies four elements starting at `offset` out of a record.
pub fn fea_at(data: &[Fr], offset: usize) -> Fea {
    [data[offset], data[offset + 1], data[offset + 2], data[offset + 3]]
}

/// Reads child `bit` (0 = left, 1 = right) out of a branch record.
pub fn child(data: &[Fr], bit: u64) -> Fea {
    fea_at(data, bit as usize * 4)
}

/// Overwrites child `bit`'s hash slot in a branch record.
pub fn set_child(data: &mut [Fr], bit: u64, hash: &Fea) {
    let o = bit as usize * 4;
    data[o..o + 4].copy_from_slice(hash);
}

/// Index of the only non-empty child of a branch, if exactly one
/// remains.
pub fn unique_child(data: &[Fr]) -> Option<u64> {
    let mut found = None;
    for bit in 0..2u64 {
        if !fea_is_zero(&child(data, bit)) {
            if found.is_some() {
                return None;
            }
            found = Some(bit);
        }
    }
    found
}

/// Assembles branch data from two child hashes.
pub fn branch_data(left: &Fea, right: &Fea) -> [Fr; 8] {
    let mut out = [Fr::ZERO; 8];
    out[..4].copy_from_slice(left);
    out[4..].copy_from_slice(right);
    out
}

/// Assembles leaf data from the remaining key and the value-node hash.
pub fn leaf_data(rkey: &Fea, value_hash: &Fea) -> [Fr; 8] {
    branch_data(rkey, value_hash)
}

/// Hash of a record: the Poseidon permutation of the eight data elements
/// and the four capacity elements, truncated to four output elements.
///
/// The capacity rides in the permutation input, not in a sponge padding
/// scheme, so leaves and branches with identical data elements can never
/// collide.
pub fn hash_node(data: &[Fr; 8], capacity: &[Fr; 4]) -> Fea {
    let mut state = [Fr::ZERO; 12];
    state[..8].copy_from_slice(data);
    state[8..].copy_from_slice(capacity);
    let out = Fr::poseidon(state);
    [out[0], out[1], out[2], out[3]]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scalar::FEA_ZERO;

    fn fea(a: u64) -> Fea {
        [Fr::from_canonical_u64(a), Fr::ZERO, Fr::ZERO, Fr::ZERO]
    }

    #[test]
    fn kind_follows_leaf_flag() {
        let mut record = vec![Fr::ZERO; NODE_WIDTH];
        assert_eq!(node_kind(&record, &FEA_ZERO).unwrap(), NodeKind::Branch);
        record[8] = Fr::ONE;
        assert_eq!(node_kind(&record, &FEA_ZERO).unwrap(), NodeKind::Leaf);
        record[8] = Fr::from_canonical_u64(2);
        assert!(node_kind(&record, &FEA_ZERO).is_err());
        assert!(node_kind(&record[..8], &FEA_ZERO).is_err());
    }

    #[test]
    fn unique_child_detection() {
        let empty = branch_data(&FEA_ZERO, &FEA_ZERO);
        assert_eq!(unique_child(&empty), None);
        let left = branch_data(&fea(7), &FEA_ZERO);
        assert_eq!(unique_child(&left), Some(0));
        let right = branch_data(&FEA_ZERO, &fea(7));
        assert_eq!(unique_child(&right), Some(1));
        let both = branch_data(&fea(7), &fea(9));
        assert_eq!(unique_child(&both), None);
    }

    #[test]
    fn capacity_separates_domains() {
        let data = branch_data(&fea(1), &fea(2));
        assert_ne!(hash_node(&data, &CAP_ZERO), hash_node(&data, &CAP_LEAF));
    }
}
