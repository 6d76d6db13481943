//! Field-element scalars.
//!
//! Keys, roots and node hashes are 256-bit scalars carried as four
//! Goldilocks elements (a "fea"); values are 256-bit scalars carried as
//! eight 32-bit chunks inside value nodes. The decompositions here feed
//! the node hash directly, so their exact bit layout is part of the
//! public commitment.

use crate::errors::StateDbError;
use alloy_primitives::U256;
use plonky2::field::goldilocks_field::GoldilocksField;
use plonky2::field::types::{Field, Field64, PrimeField64};

/// The prime field every tree quantity is expressed in.
pub type Fr = GoldilocksField;

/// A 256-bit scalar as four field elements: keys, roots, node hashes.
pub type Fea = [Fr; 4];

/// The all-zero scalar. As a root it denotes, and only denotes, the
/// empty tree; as a child slot it denotes an empty subtree.
pub const FEA_ZERO: Fea = [Fr::ZERO; 4];

/// Whether every element of `a` is zero.
pub fn fea_is_zero(a: &Fea) -> bool {
    a.iter().all(|e| *e == Fr::ZERO)
}

/// Derives a tree key from a 256-bit scalar.
///
/// Scalar bit `i` lands in element `i % 4`, bit `i / 4`. With the path
/// decomposition in the tree walker this makes path bit `l` equal to
/// scalar bit `l` for keys built this way.
pub fn scalar_to_key(s: U256) -> Fea {
    let mut aux = [0u64; 4];
    for i in 0..256 {
        if s.bit(i) {
            aux[i % 4] |= 1u64 << (i / 4);
        }
    }
    aux.map(Fr::from_noncanonical_u64)
}

/// Splits a 256-bit value into the eight 32-bit chunks of a value node,
/// least significant chunk first.
pub fn scalar_to_fea8(v: &U256) -> [Fr; 8] {
    let limbs = v.as_limbs();
    let mut out = [Fr::ZERO; 8];
    for i in 0..8 {
        let limb = limbs[i / 2];
        let chunk = if i % 2 == 0 { limb & 0xffff_ffff } else { limb >> 32 };
        out[i] = Fr::from_canonical_u64(chunk);
    }
    out
}

/// Rebuilds a 256-bit value from the first eight elements of a value
/// node.
pub fn fea8_to_scalar(a: &[Fr]) -> U256 {
    let mut limbs = [0u64; 4];
    for i in 0..8 {
        let chunk = a[i].to_canonical_u64() & 0xffff_ffff;
        limbs[i / 2] |= chunk << (32 * (i % 2));
    }
    U256::from_limbs(limbs)
}

/// Packs a 256-bit scalar into four 64-bit limbs, least significant
/// limb first.
pub fn scalar_to_fea(v: &U256) -> Fea {
    v.as_limbs().map(Fr::from_noncanonical_u64)
}

/// The inverse of [`scalar_to_fea`].
pub fn fea_to_scalar(a: &Fea) -> U256 {
    U256::from_limbs([
        a[0].to_canonical_u64(),
        a[1].to_canonical_u64(),
        a[2].to_canonical_u64(),
        a[3].to_canonical_u64(),
    ])
}

/// Fixed-width lowercase hex of a fea. This is the database key format.
pub fn fea_to_string(a: &Fea) -> String {
    format!(
        "{:016x}{:016x}{:016x}{:016x}",
        a[3].to_canonical_u64(),
        a[2].to_canonical_u64(),
        a[1].to_canonical_u64(),
        a[0].to_canonical_u64()
    )
}

/// Parses a hex scalar, with or without a `0x` prefix, into a fea.
pub fn string_to_fea(s: &str) -> Result<Fea, StateDbError> {
    let raw = s.trim_start_matches("0x");
    let v = U256::from_str_radix(raw, 16)
        .map_err(|e| StateDbError::InvalidInput(format!("bad hex scalar {s:?}: {e}")))?;
    Ok(scalar_to_fea(&v))
}
