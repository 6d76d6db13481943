//! Sparse Merkle tree algorithm.
//!
//! A binary radix trie over 256-bit keys. The path consumes one key bit
//! per level; empty subtrees are the all-zero sentinel rather than
//! stored nodes. Leaves store the key bits not yet consumed on the way
//! down plus the hash of a separate value node, so values wider than one
//! hash input fit.
//!
//! `set` never mutates a node in place. It writes fresh nodes along the
//! changed path and returns a new root, leaving every previously
//! produced root fully readable (copy-on-write). Unreachable nodes are
//! never collected.

use crate::database::Database;
use crate::errors::StateDbError;
use crate::node::{self, NodeKind, CAP_LEAF, CAP_ZERO, NODE_WIDTH};
use crate::scalar::{
    fea8_to_scalar, fea_is_zero, fea_to_string, scalar_to_fea8, Fea, Fr, FEA_ZERO,
};
use alloy_primitives::U256;
use plonky2::field::types::{Field, Field64, PrimeField64};
use tracing::{error, trace};

/// Maximum tree depth, one level per key bit.
pub const KEY_BITS: usize = 256;

/// Outcome classification of one `set`. Downstream proof construction
/// consumes the mode together with the sibling trace, so the assignment
/// is part of the engine's contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetMode {
    /// Present key, value replaced in place.
    Update,
    /// Absent key whose slot held a leaf with a different key; that leaf
    /// was pushed deeper and both hang off a synthesized branch.
    InsertFound,
    /// Absent key with an empty slot on the path; a fresh leaf fills it.
    InsertNotFound,
    /// Present key removed, and the only remaining sibling was a leaf
    /// that floated up past every branch left single-child.
    DeleteFound,
    /// Present key removed without restructuring.
    DeleteNotFound,
    /// Present key removed and the tree became empty.
    DeleteLast,
    /// Absent key set to zero; the tree is unchanged.
    ZeroToZero,
}

/// Full trace of one tree read.
#[derive(Debug, Clone)]
pub struct SmtGetResult {
    /// Root the read ran against.
    pub root: Fea,
    /// Key looked up.
    pub key: Fea,
    /// Stored value; zero when the key is absent.
    pub value: U256,
    /// Branch nodes traversed, indexed by level.
    pub siblings: Vec<Vec<Fr>>,
    /// Full key of the leaf the path ended at when it holds a different
    /// key than the one looked up.
    pub ins_key: Fea,
    /// That leaf's value.
    pub ins_value: U256,
    /// False when the path ended at a leaf with a different key.
    pub is_old0: bool,
}

/// Full trace of one tree update.
#[derive(Debug, Clone)]
pub struct SmtSetResult {
    /// Root the update started from.
    pub old_root: Fea,
    /// Root after the update. Equal to `old_root` for `ZeroToZero`.
    pub new_root: Fea,
    /// Key written.
    pub key: Fea,
    /// Branch nodes along the rewritten path, indexed by level.
    pub siblings: Vec<Vec<Fr>>,
    /// Full key of the other leaf involved in the outcome, when one was:
    /// the displaced leaf for `InsertFound`, the surviving leaf for
    /// `DeleteFound`, the divergent leaf for `ZeroToZero`.
    pub ins_key: Fea,
    /// That leaf's value.
    pub ins_value: U256,
    /// False when an existing leaf participated in the outcome.
    pub is_old0: bool,
    /// Previous value under `key`; zero when absent.
    pub old_value: U256,
    /// Value written; zero for deletions.
    pub new_value: U256,
    /// Outcome classification.
    pub mode: SetMode,
}

/// Leaf the descent ended at, with its value already resolved.
struct FoundLeaf {
    /// Full key reconstructed from the path bits plus the stored
    /// remaining key.
    key: Fea,
    /// Remaining key as stored in the leaf.
    rkey: Fea,
    /// Hash of the value node.
    value_hash: Fea,
    /// Resolved value.
    value: U256,
}

/// Sparse Merkle tree algorithm over a [`Database`].
///
/// Stateless: every operation takes the database and a root explicitly.
/// Nodes are read through the cache tiers and written copy-on-write, so
/// a `set` is a pure function of (database contents, root, key, value)
/// plus the node writes it leaves behind.
#[derive(Debug, Clone, Copy, Default)]
pub struct Smt;

impl Smt {
    /// Creates the algorithm handle.
    pub fn new() -> Self {
        Self
    }

    /// Reads `key` from the tree rooted at `root`.
    ///
    /// An absent key is not an error: the result carries value zero,
    /// plus the divergent leaf when the path ended at one. Fails only on
    /// database errors.
    pub fn get(&self, db: &Database, root: &Fea, key: &Fea) -> Result<SmtGetResult, StateDbError> {
        let keys = split_key(key);
        let mut r = *root;
        let mut level: i64 = 0;
        let mut acc_key: Vec<u64> = Vec::new();
        let mut siblings: Vec<Vec<Fr>> = Vec::new();

        let mut found: Option<(Fea, U256)> = None;

        while !fea_is_zero(&r) && found.is_none() {
            let data = self.read_node(db, root, key, &r, level)?;
            match node::node_kind(&data, &r)? {
                NodeKind::Leaf => {
                    let rkey = node::fea_at(&data, 0);
                    let value_hash = node::fea_at(&data, 4);
                    let value = self.read_value(db, &value_hash)?;
                    found = Some((join_key(&acc_key, &rkey), value));
                    siblings.push(data);
                }
                NodeKind::Branch => {
                    if level as usize >= KEY_BITS {
                        return Err(self.too_deep(&r));
                    }
                    let bit = keys[level as usize];
                    r = node::child(&data, bit);
                    siblings.push(data);
                    acc_key.push(bit);
                    level += 1;
                }
            }
        }

        level -= 1;
        acc_key.pop();

        let mut value = U256::ZERO;
        let mut ins_key = FEA_ZERO;
        let mut ins_value = U256::ZERO;
        let mut is_old0 = true;
        if let Some((found_key, found_val)) = found {
            if found_key == *key {
                value = found_val;
            } else {
                ins_key = found_key;
                ins_value = found_val;
                is_old0 = false;
            }
        }

        siblings.truncate((level + 1) as usize);
        trace!(key = %fea_to_string(key), level, "tree read");
        Ok(SmtGetResult { root: *root, key: *key, value, siblings, ins_key, ins_value, is_old0 })
    }

    /// Writes `value` under `key` in the tree rooted at `old_root` and
    /// returns the new root with the full update trace.
    ///
    /// A zero `value` deletes the key; deleting an absent key changes
    /// nothing. All produced nodes are written with the caller's
    /// `persistent` flag. Reads and writes are both bounded by the
    /// current depth of the path.
    pub fn set(
        &self,
        db: &Database,
        old_root: &Fea,
        key: &Fea,
        value: U256,
        persistent: bool,
    ) -> Result<SmtSetResult, StateDbError> {
        let keys = split_key(key);
        let mut r = *old_root;
        let mut level: i64 = 0;
        let mut acc_key: Vec<u64> = Vec::new();
        let mut siblings: Vec<Vec<Fr>> = Vec::new();

        let mut found: Option<FoundLeaf> = None;

        // Descend to the key's leaf, to a divergent leaf, or to an empty
        // slot, whichever comes first.
        while !fea_is_zero(&r) && found.is_none() {
            let data = self.read_node(db, old_root, key, &r, level)?;
            match node::node_kind(&data, &r)? {
                NodeKind::Leaf => {
                    let rkey = node::fea_at(&data, 0);
                    let value_hash = node::fea_at(&data, 4);
                    found = Some(FoundLeaf {
                        key: join_key(&acc_key, &rkey),
                        rkey,
                        value_hash,
                        value: self.read_value(db, &value_hash)?,
                    });
                    siblings.push(data);
                }
                NodeKind::Branch => {
                    if level as usize >= KEY_BITS {
                        return Err(self.too_deep(&r));
                    }
                    let bit = keys[level as usize];
                    r = node::child(&data, bit);
                    siblings.push(data);
                    acc_key.push(bit);
                    level += 1;
                }
            }
        }

        // Step back onto the deepest branch; the node at the old `level`
        // is the leaf (or empty slot) the cases below replace.
        level -= 1;
        acc_key.pop();

        let mut new_root = *old_root;
        let mut ins_key = FEA_ZERO;
        let mut ins_value = U256::ZERO;
        let mut is_old0 = true;
        let mut old_value = U256::ZERO;
        let mode;

        if !value.is_zero() {
            if let Some(leaf) = &found {
                if leaf.key == *key {
                    // The key exists: swap the value node, keep the
                    // leaf's remaining key and position.
                    mode = SetMode::Update;
                    old_value = leaf.value;
                    let value_hash =
                        self.hash_save(db, &scalar_to_fea8(&value), &CAP_ZERO, persistent)?;
                    let leaf_hash = self
                        .hash_save(db, &node::leaf_data(&leaf.rkey, &value_hash), &CAP_LEAF, persistent)?;
                    if level >= 0 {
                        node::set_child(&mut siblings[level as usize], keys[level as usize], &leaf_hash);
                    } else {
                        new_root = leaf_hash;
                    }
                } else {
                    // A different key occupies the slot. Split at the
                    // first differing bit, re-keying the old leaf for
                    // its deeper position, and bridge any run of shared
                    // bits with single-child branches.
                    mode = SetMode::InsertFound;
                    ins_key = leaf.key;
                    ins_value = leaf.value;
                    is_old0 = false;

                    let found_bits = split_key(&leaf.key);
                    let mut fork = (level + 1) as usize;
                    while keys[fork] == found_bits[fork] {
                        fork += 1;
                    }

                    let old_rkey = remove_key_bits(&leaf.key, fork + 1);
                    let old_leaf_hash = self
                        .hash_save(db, &node::leaf_data(&old_rkey, &leaf.value_hash), &CAP_LEAF, persistent)?;

                    let new_rkey = remove_key_bits(key, fork + 1);
                    let value_hash =
                        self.hash_save(db, &scalar_to_fea8(&value), &CAP_ZERO, persistent)?;
                    let new_leaf_hash = self
                        .hash_save(db, &node::leaf_data(&new_rkey, &value_hash), &CAP_LEAF, persistent)?;

                    let mut branch = [Fr::ZERO; 8];
                    node::set_child(&mut branch, keys[fork], &new_leaf_hash);
                    node::set_child(&mut branch, found_bits[fork], &old_leaf_hash);
                    let mut subtree = self.hash_save(db, &branch, &CAP_ZERO, persistent)?;

                    let mut bridge = fork as i64 - 1;
                    while bridge > level {
                        let mut chain = [Fr::ZERO; 8];
                        node::set_child(&mut chain, keys[bridge as usize], &subtree);
                        subtree = self.hash_save(db, &chain, &CAP_ZERO, persistent)?;
                        bridge -= 1;
                    }

                    if level >= 0 {
                        node::set_child(&mut siblings[level as usize], keys[level as usize], &subtree);
                    } else {
                        new_root = subtree;
                    }
                }
            } else {
                // Empty slot on the path: a fresh leaf fills it.
                mode = SetMode::InsertNotFound;
                let new_rkey = remove_key_bits(key, (level + 1) as usize);
                let value_hash = self.hash_save(db, &scalar_to_fea8(&value), &CAP_ZERO, persistent)?;
                let leaf_hash =
                    self.hash_save(db, &node::leaf_data(&new_rkey, &value_hash), &CAP_LEAF, persistent)?;
                if level >= 0 {
                    node::set_child(&mut siblings[level as usize], keys[level as usize], &leaf_hash);
                } else {
                    new_root = leaf_hash;
                }
            }
        } else if let Some(leaf) = &found {
            if leaf.key == *key {
                old_value = leaf.value;
                if level >= 0 {
                    // Clear the leaf's slot, then see whether the parent
                    // is left with a lone leaf that can float up.
                    node::set_child(&mut siblings[level as usize], keys[level as usize], &FEA_ZERO);
                    let unique = node::unique_child(&siblings[level as usize]);

                    if let Some(sibling_bit) = unique {
                        let sibling_hash = node::child(&siblings[level as usize], sibling_bit);
                        let sibling = self.read_node(db, old_root, key, &sibling_hash, level)?;
                        if node::node_kind(&sibling, &sibling_hash)? == NodeKind::Leaf {
                            mode = SetMode::DeleteFound;
                            let value_hash = node::fea_at(&sibling, 4);
                            let rkey = node::fea_at(&sibling, 0);
                            ins_value = self.read_value(db, &value_hash)?;

                            let mut path = acc_key.clone();
                            path.push(sibling_bit);
                            ins_key = join_key(&path, &rkey);
                            is_old0 = false;

                            // Climb past every branch the removal leaves
                            // single-child; the survivor re-roots below
                            // the first branch that still has another
                            // child.
                            let mut lone = unique;
                            while lone.is_some() && level >= 0 {
                                level -= 1;
                                if level >= 0 {
                                    lone = node::unique_child(&siblings[level as usize]);
                                }
                            }

                            let new_rkey = remove_key_bits(&ins_key, (level + 1) as usize);
                            let leaf_hash = self
                                .hash_save(db, &node::leaf_data(&new_rkey, &value_hash), &CAP_LEAF, persistent)?;
                            if level >= 0 {
                                node::set_child(
                                    &mut siblings[level as usize],
                                    keys[level as usize],
                                    &leaf_hash,
                                );
                            } else {
                                new_root = leaf_hash;
                            }
                        } else {
                            // The lone sibling is a whole subtree; it
                            // stays where it is.
                            mode = SetMode::DeleteNotFound;
                        }
                    } else {
                        mode = SetMode::DeleteNotFound;
                    }
                } else {
                    // The leaf was the root.
                    mode = SetMode::DeleteLast;
                    new_root = FEA_ZERO;
                }
            } else {
                mode = SetMode::ZeroToZero;
                ins_key = leaf.key;
                ins_value = leaf.value;
                is_old0 = false;
            }
        } else {
            mode = SetMode::ZeroToZero;
        }

        // Rebuild the hash chain from the deepest touched branch back to
        // the root. Untouched branches re-hash to their existing records,
        // so a ZeroToZero pass reproduces the old root.
        siblings.truncate((level + 1) as usize);
        while level >= 0 {
            let mut data = [Fr::ZERO; 8];
            data.copy_from_slice(&siblings[level as usize][..8]);
            new_root = self.hash_save(db, &data, &CAP_ZERO, persistent)?;
            level -= 1;
            if level >= 0 {
                node::set_child(&mut siblings[level as usize], keys[level as usize], &new_root);
            }
        }

        trace!(
            key = %fea_to_string(key),
            mode = ?mode,
            new_root = %fea_to_string(&new_root),
            "tree update"
        );
        Ok(SmtSetResult {
            old_root: *old_root,
            new_root,
            key: *key,
            siblings,
            ins_key,
            ins_value,
            is_old0,
            old_value,
            new_value: value,
            mode,
        })
    }

    /// Hashes a record and stores it under the hash, returning the hash.
    ///
    /// Idempotent: identical contents always land under the same key, so
    /// re-writing is a harmless overwrite.
    pub fn hash_save(
        &self,
        db: &Database,
        data: &[Fr; 8],
        capacity: &[Fr; 4],
        persistent: bool,
    ) -> Result<Fea, StateDbError> {
        let hash = node::hash_node(data, capacity);
        let mut record = Vec::with_capacity(NODE_WIDTH);
        record.extend_from_slice(data);
        record.extend_from_slice(capacity);
        db.set_node(&hash, record, persistent)?;
        Ok(hash)
    }

    fn read_node(
        &self,
        db: &Database,
        root: &Fea,
        key: &Fea,
        hash: &Fea,
        level: i64,
    ) -> Result<Vec<Fr>, StateDbError> {
        db.get_node(hash).map_err(|e| {
            error!(
                root = %fea_to_string(root),
                key = %fea_to_string(key),
                node = %fea_to_string(hash),
                level,
                "node lookup failed during tree traversal"
            );
            e
        })
    }

    fn read_value(&self, db: &Database, hash: &Fea) -> Result<U256, StateDbError> {
        let data = db.get_node(hash)?;
        if data.len() < 8 {
            return Err(StateDbError::InvalidEncoding {
                key: fea_to_string(hash),
                detail: format!("value node holds {} elements, expected at least 8", data.len()),
            });
        }
        Ok(fea8_to_scalar(&data))
    }

    fn too_deep(&self, hash: &Fea) -> StateDbError {
        StateDbError::InvalidEncoding {
            key: fea_to_string(hash),
            detail: "traversal exceeds the key bit-length".to_string(),
        }
    }
}

/// Path bits of a key, one per level: level `l` reads element `l % 4`,
/// bit `l / 4`.
pub(crate) fn split_key(key: &Fea) -> [u64; KEY_BITS] {
    let limbs = [
        key[0].to_canonical_u64(),
        key[1].to_canonical_u64(),
        key[2].to_canonical_u64(),
        key[3].to_canonical_u64(),
    ];
    let mut out = [0u64; KEY_BITS];
    for l in 0..KEY_BITS {
        out[l] = (limbs[l % 4] >> (l / 4)) & 1;
    }
    out
}

/// Rebuilds a full key from the path bits consumed so far plus a leaf's
/// remaining key.
pub(crate) fn join_key(bits: &[u64], rkey: &Fea) -> Fea {
    let mut n = [0u32; 4];
    let mut accs = [0u64; 4];
    for (i, bit) in bits.iter().enumerate() {
        if *bit != 0 {
            accs[i % 4] |= 1u64 << n[i % 4];
        }
        n[i % 4] += 1;
    }
    let mut out = [Fr::ZERO; 4];
    for i in 0..4 {
        let v = rkey[i].to_canonical_u64();
        let shifted = if n[i] >= 64 { 0 } else { v << n[i] };
        out[i] = Fr::from_noncanonical_u64(shifted | accs[i]);
    }
    out
}

/// Drops the first `nbits` path bits from a key, yielding the remaining
/// key a leaf at depth `nbits` stores.
pub(crate) fn remove_key_bits(key: &Fea, nbits: usize) -> Fea {
    let full = nbits / 4;
    let mut out = [Fr::ZERO; 4];
    for i in 0..4 {
        let mut n = full as u32;
        if full * 4 + i < nbits {
            n += 1;
        }
        let v = key[i].to_canonical_u64();
        out[i] = Fr::from_noncanonical_u64(if n >= 64 { 0 } else { v >> n });
    }
    out
}
