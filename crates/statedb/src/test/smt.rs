//! Tree algorithm tests: every update outcome, structural collapse and
//! split behavior, and order-independence of the root.

use super::utils::{fea, key_of, test_database};
use crate::errors::StateDbError;
use crate::scalar::{fea_is_zero, scalar_to_key, FEA_ZERO};
use crate::smt::{join_key, remove_key_bits, split_key, SetMode, Smt};
use alloy_primitives::U256;
use assert_matches::assert_matches;
use proptest::prelude::*;

#[test]
fn absent_key_on_empty_tree_reads_zero() {
    let db = test_database();
    let smt = Smt::new();
    let res = smt.get(&db, &FEA_ZERO, &key_of(1)).unwrap();
    assert_eq!(res.value, U256::ZERO);
    assert!(res.is_old0);
    assert!(res.siblings.is_empty());
}

/// One tree driven through every outcome mode in sequence, pinning the
/// mode and trace fields at each step.
#[test]
fn mode_walkthrough_hits_every_outcome() {
    let db = test_database();
    let smt = Smt::new();
    let mut root = FEA_ZERO;

    let key1 = fea(1, 0, 0, 0);
    let key2 = fea(3, 0, 0, 0);
    let key3 = fea(0, 1, 0, 0);

    let res = smt.set(&db, &root, &key1, U256::from(10), false).unwrap();
    assert_matches!(res.mode, SetMode::InsertNotFound);
    root = res.new_root;
    assert_eq!(smt.get(&db, &root, &key1).unwrap().value, U256::from(10));

    let res = smt.set(&db, &root, &key1, U256::ZERO, false).unwrap();
    assert_matches!(res.mode, SetMode::DeleteLast);
    assert_eq!(res.old_value, U256::from(10));
    root = res.new_root;
    assert!(fea_is_zero(&root));

    let res = smt.set(&db, &root, &key1, U256::from(10), false).unwrap();
    assert_matches!(res.mode, SetMode::InsertNotFound);
    root = res.new_root;

    let res = smt.set(&db, &root, &key1, U256::from(20), false).unwrap();
    assert_matches!(res.mode, SetMode::Update);
    assert_eq!(res.old_value, U256::from(10));
    root = res.new_root;
    assert_eq!(smt.get(&db, &root, &key1).unwrap().value, U256::from(20));

    // key2 shares the first four path bits with key1
    let res = smt.set(&db, &root, &key2, U256::from(20), false).unwrap();
    assert_matches!(res.mode, SetMode::InsertFound);
    assert_eq!(res.ins_key, key1);
    assert!(!res.is_old0);
    root = res.new_root;
    assert_eq!(smt.get(&db, &root, &key2).unwrap().value, U256::from(20));

    // removing key2 leaves key1 as the lone leaf, which floats back to
    // the root
    let res = smt.set(&db, &root, &key2, U256::ZERO, false).unwrap();
    assert_matches!(res.mode, SetMode::DeleteFound);
    assert_eq!(res.ins_key, key1);
    assert_eq!(res.old_value, U256::from(20));
    root = res.new_root;
    assert_eq!(smt.get(&db, &root, &key2).unwrap().value, U256::ZERO);

    // deleting it again only touches key1's divergent leaf
    let res = smt.set(&db, &root, &key2, U256::ZERO, false).unwrap();
    assert_matches!(res.mode, SetMode::ZeroToZero);
    assert!(!res.is_old0);
    assert_eq!(res.ins_key, key1);
    assert_eq!(res.new_root, root);

    let res = smt.set(&db, &root, &key2, U256::from(40), false).unwrap();
    assert_matches!(res.mode, SetMode::InsertFound);
    root = res.new_root;
    assert_eq!(smt.get(&db, &root, &key2).unwrap().value, U256::from(40));

    let res = smt.set(&db, &root, &key3, U256::from(30), false).unwrap();
    assert_matches!(res.mode, SetMode::InsertNotFound);
    root = res.new_root;

    // key3's removal leaves a whole subtree as the lone sibling, so no
    // collapse happens
    let res = smt.set(&db, &root, &key3, U256::ZERO, false).unwrap();
    assert_matches!(res.mode, SetMode::DeleteNotFound);
    assert_eq!(res.old_value, U256::from(30));
    root = res.new_root;
    assert!(!fea_is_zero(&root));
    assert_eq!(smt.get(&db, &root, &key2).unwrap().value, U256::from(40));
}

#[test]
fn get_reports_divergent_leaf() {
    let db = test_database();
    let smt = Smt::new();
    let key1 = fea(1, 0, 0, 0);
    let probe = fea(0, 1, 0, 0);

    let root = smt.set(&db, &FEA_ZERO, &key1, U256::from(10), false).unwrap().new_root;
    let res = smt.get(&db, &root, &probe).unwrap();
    assert_eq!(res.value, U256::ZERO);
    assert!(!res.is_old0);
    assert_eq!(res.ins_key, key1);
    assert_eq!(res.ins_value, U256::from(10));
}

#[test]
fn zero_on_absent_key_leaves_root_untouched() {
    let db = test_database();
    let smt = Smt::new();

    let root = smt.set(&db, &FEA_ZERO, &fea(1, 0, 0, 0), U256::from(10), false).unwrap().new_root;
    let res = smt.set(&db, &root, &fea(0, 1, 0, 0), U256::ZERO, false).unwrap();
    assert_matches!(res.mode, SetMode::ZeroToZero);
    assert_eq!(res.new_root, root);
}

#[test]
fn zero_to_zero_behind_shared_prefix() {
    let db = test_database();
    let smt = Smt::new();
    let mut root = FEA_ZERO;

    let res = smt.set(&db, &root, &fea(0x23, 0, 0, 0), U256::from(10), false).unwrap();
    assert_matches!(res.mode, SetMode::InsertNotFound);
    root = res.new_root;

    let res = smt.set(&db, &root, &fea(0x13, 0, 0, 0), U256::from(10), false).unwrap();
    assert_matches!(res.mode, SetMode::InsertFound);
    root = res.new_root;

    // shares a prefix with both, then runs into one of their leaves
    let res = smt.set(&db, &root, &fea(0x73, 0, 0, 0), U256::ZERO, false).unwrap();
    assert_matches!(res.mode, SetMode::ZeroToZero);
    assert!(!res.is_old0);
    assert_eq!(res.new_root, root);
}

#[test]
fn zero_to_zero_reports_divergent_leaf() {
    let db = test_database();
    let smt = Smt::new();

    // two keys in the tree
    let mut root = smt.set(&db, &FEA_ZERO, &key_of(1), U256::from(2), false).unwrap().new_root;
    root = smt.set(&db, &root, &key_of(2), U256::from(3), false).unwrap().new_root;
    let res = smt.set(&db, &root, &key_of(0x10000), U256::ZERO, false).unwrap();
    assert_matches!(res.mode, SetMode::ZeroToZero);
    assert!(!res.is_old0);
    assert_eq!(res.new_root, root);

    // single leaf at the root
    let root = smt.set(&db, &FEA_ZERO, &key_of(1), U256::from(2), false).unwrap().new_root;
    let res = smt.set(&db, &root, &key_of(0x10000), U256::ZERO, false).unwrap();
    assert_matches!(res.mode, SetMode::ZeroToZero);
    assert!(!res.is_old0);
}

#[test]
fn single_key_insert_delete_restores_empty_root() {
    let db = test_database();
    let smt = Smt::new();
    let key = key_of(1);

    let root = smt.set(&db, &FEA_ZERO, &key, U256::from(2), false).unwrap().new_root;
    assert!(!fea_is_zero(&root));
    assert_eq!(smt.get(&db, &root, &key).unwrap().value, U256::from(2));

    let res = smt.set(&db, &root, &key, U256::ZERO, false).unwrap();
    assert_matches!(res.mode, SetMode::DeleteLast);
    assert!(fea_is_zero(&res.new_root));
}

#[test]
fn updating_back_restores_the_old_root() {
    let db = test_database();
    let smt = Smt::new();
    let key = key_of(1);

    let initial = smt.set(&db, &FEA_ZERO, &key, U256::from(2), false).unwrap().new_root;
    let bumped = smt.set(&db, &initial, &key, U256::from(3), false).unwrap().new_root;
    assert_ne!(initial, bumped);
    let restored = smt.set(&db, &bumped, &key, U256::from(2), false).unwrap().new_root;
    assert_eq!(initial, restored);
}

#[test]
fn paired_keys_delete_back_to_empty() {
    // both pairs share every path bit except one deep in the key
    for (a, b) in [(8u64, 9u64), (7, 15)] {
        let db = test_database();
        let smt = Smt::new();
        let (ka, kb) = (key_of(a), key_of(b));

        let mut root = smt.set(&db, &FEA_ZERO, &ka, U256::from(2), false).unwrap().new_root;
        root = smt.set(&db, &root, &kb, U256::from(3), false).unwrap().new_root;
        assert!(!fea_is_zero(&root));

        root = smt.set(&db, &root, &ka, U256::ZERO, false).unwrap().new_root;
        assert!(!fea_is_zero(&root));
        root = smt.set(&db, &root, &kb, U256::ZERO, false).unwrap().new_root;
        assert!(fea_is_zero(&root));
    }
}

#[test]
fn three_shared_keys_delete_back_to_empty() {
    let db = test_database();
    let smt = Smt::new();
    let keys = [key_of(7), key_of(15), key_of(3)];
    let values = [107u64, 115, 103];

    let mut root = FEA_ZERO;
    for (key, value) in keys.iter().zip(values) {
        root = smt.set(&db, &root, key, U256::from(value), false).unwrap().new_root;
        assert!(!fea_is_zero(&root));
    }
    for (i, key) in keys.iter().enumerate() {
        root = smt.set(&db, &root, key, U256::ZERO, false).unwrap().new_root;
        assert_eq!(fea_is_zero(&root), i == keys.len() - 1);
    }
}

#[test]
fn add_remove_128_keys() {
    let db = test_database();
    let smt = Smt::new();

    let mut root = FEA_ZERO;
    for i in 0..128u64 {
        root = smt.set(&db, &root, &key_of(i), U256::from(i + 1000), false).unwrap().new_root;
        assert!(!fea_is_zero(&root));
    }
    for i in 0..128u64 {
        root = smt.set(&db, &root, &key_of(i), U256::ZERO, false).unwrap().new_root;
    }
    assert!(fea_is_zero(&root));
}

#[test]
fn read_back_128_keys() {
    let db = test_database();
    let smt = Smt::new();

    let mut root = FEA_ZERO;
    for i in 0..128u64 {
        root = smt.set(&db, &root, &key_of(i), U256::from(i + 1000), false).unwrap().new_root;
    }
    for i in 0..128u64 {
        assert_eq!(smt.get(&db, &root, &key_of(i)).unwrap().value, U256::from(i + 1000));
    }
}

/// The similar-keys regression scenario: 0x00, 0x1111 and 0x11111 share
/// long runs of path bits, forcing deep leaf pushes. The anchor is
/// determinism: one fixed root out of every insertion order and every
/// rebuild.
#[test]
fn similar_keys_regression_scenario() {
    let entries =
        [(key_of(0x00), 2u64), (key_of(0x1111), 2), (key_of(0x11111), 3)];

    let build = |order: &[usize]| {
        let db = test_database();
        let smt = Smt::new();
        let mut root = FEA_ZERO;
        for &i in order {
            let (key, value) = entries[i];
            root = smt.set(&db, &root, &key, U256::from(value), false).unwrap().new_root;
            assert!(!fea_is_zero(&root));
        }
        (db, smt, root)
    };

    let (db, smt, root) = build(&[0, 1, 2]);
    for (key, value) in entries {
        assert_eq!(smt.get(&db, &root, &key).unwrap().value, U256::from(value));
    }

    // every insertion order lands on the same root
    for order in [[0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]] {
        assert_eq!(build(&order).2, root);
    }

    // deleting and re-inserting the deepest key lands back on it too
    let (key, value) = entries[2];
    let trimmed = smt.set(&db, &root, &key, U256::ZERO, false).unwrap().new_root;
    assert_ne!(trimmed, root);
    let rebuilt = smt.set(&db, &trimmed, &key, U256::from(value), false).unwrap().new_root;
    assert_eq!(rebuilt, root);
}

/// Hash-wide keys and near-field-capacity values, updating a leaf that
/// sits several levels deep.
#[test]
fn deep_keys_and_wide_values() {
    let dec = |s: &str| U256::from_str_radix(s, 10).unwrap();
    let keys = [
        scalar_to_key(dec(
            "56714103185361745016746792718676985000067748055642999311525839752090945477479",
        )),
        scalar_to_key(dec(
            "980275562601266368747428591417466442501663392777380336768719359283138048405",
        )),
        scalar_to_key(dec(
            "53001048207672216258532366725645107222481888169041567493527872624420899640125",
        )),
        scalar_to_key(dec(
            "60338373645545410525187552446039797737650319331856456703054942630761553352879",
        )),
    ];
    let values = [
        dec("8163644824788514136399898658176031121905718480550577527648513153802600646339"),
        dec("115792089237316195423570985008687907853269984665640564039457584007913129639934"),
        dec("115792089237316195423570985008687907853269984665640564039457584007913129639935"),
        dec("7943875943875408"),
    ];
    let updated =
        dec("35179347944617143021579132182092200136526168785636368258055676929581544372820");

    let db = test_database();
    let smt = Smt::new();
    let mut root = FEA_ZERO;
    for (key, value) in keys.iter().zip(values.iter()) {
        root = smt.set(&db, &root, key, *value, false).unwrap().new_root;
    }
    let res = smt.set(&db, &root, &keys[0], updated, false).unwrap();
    assert_matches!(res.mode, SetMode::Update);
    root = res.new_root;

    assert_eq!(smt.get(&db, &root, &keys[0]).unwrap().value, updated);
    for (key, value) in keys.iter().zip(values.iter()).skip(1) {
        assert_eq!(smt.get(&db, &root, key).unwrap().value, *value);
    }

    // a permuted rebuild lands on the same root
    let db2 = test_database();
    let mut root2 = FEA_ZERO;
    root2 = smt.set(&db2, &root2, &keys[3], values[3], false).unwrap().new_root;
    root2 = smt.set(&db2, &root2, &keys[1], values[1], false).unwrap().new_root;
    root2 = smt.set(&db2, &root2, &keys[0], updated, false).unwrap().new_root;
    root2 = smt.set(&db2, &root2, &keys[2], values[2], false).unwrap().new_root;
    assert_eq!(root2, root);
}

#[test]
fn old_roots_remain_readable() {
    let db = test_database();
    let smt = Smt::new();
    let (k1, k2) = (key_of(1), key_of(2));

    let root1 = smt.set(&db, &FEA_ZERO, &k1, U256::from(10), false).unwrap().new_root;
    let root2 = smt.set(&db, &root1, &k2, U256::from(20), false).unwrap().new_root;
    let root3 = smt.set(&db, &root2, &k1, U256::from(30), false).unwrap().new_root;

    assert_eq!(smt.get(&db, &root1, &k1).unwrap().value, U256::from(10));
    assert_eq!(smt.get(&db, &root1, &k2).unwrap().value, U256::ZERO);
    assert_eq!(smt.get(&db, &root2, &k1).unwrap().value, U256::from(10));
    assert_eq!(smt.get(&db, &root2, &k2).unwrap().value, U256::from(20));
    assert_eq!(smt.get(&db, &root3, &k1).unwrap().value, U256::from(30));
    assert_eq!(smt.get(&db, &root3, &k2).unwrap().value, U256::from(20));
}

#[test]
fn missing_node_is_fatal() {
    let db = test_database();
    let smt = Smt::new();
    let root = smt.set(&db, &FEA_ZERO, &key_of(1), U256::from(2), false).unwrap().new_root;

    let empty = test_database();
    assert_matches!(
        smt.get(&empty, &root, &key_of(1)),
        Err(StateDbError::NotFound { .. })
    );
    assert_matches!(
        smt.set(&empty, &root, &key_of(1), U256::from(3), false),
        Err(StateDbError::NotFound { .. })
    );
}

#[test]
fn path_helpers_round_trip() {
    let key = scalar_to_key(U256::from(0xabcd_ef12_3456u64));
    let bits = split_key(&key);
    let consumed: Vec<u64> = bits[..11].to_vec();
    let rkey = remove_key_bits(&key, 11);
    assert_eq!(join_key(&consumed, &rkey), key);

    // path bit l equals scalar bit l for scalar-derived keys
    for l in 0..48 {
        assert_eq!(bits[l], (0xabcd_ef12_3456u64 >> l) & 1);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn set_then_get_round_trips(key_scalar in any::<u128>(), limbs in any::<[u64; 4]>()) {
        let value = U256::from_limbs(limbs);
        prop_assume!(!value.is_zero());

        let db = test_database();
        let smt = Smt::new();
        let key = scalar_to_key(U256::from(key_scalar));
        let root = smt.set(&db, &FEA_ZERO, &key, value, false).unwrap().new_root;
        prop_assert_eq!(smt.get(&db, &root, &key).unwrap().value, value);
    }

    #[test]
    fn insertion_order_commutes(
        a in any::<u128>(),
        b in any::<u128>(),
        va in 1..u64::MAX,
        vb in 1..u64::MAX,
    ) {
        prop_assume!(a != b);
        let smt = Smt::new();
        let (ka, kb) = (scalar_to_key(U256::from(a)), scalar_to_key(U256::from(b)));

        let db1 = test_database();
        let mut r1 = smt.set(&db1, &FEA_ZERO, &ka, U256::from(va), false).unwrap().new_root;
        r1 = smt.set(&db1, &r1, &kb, U256::from(vb), false).unwrap().new_root;

        let db2 = test_database();
        let mut r2 = smt.set(&db2, &FEA_ZERO, &kb, U256::from(vb), false).unwrap().new_root;
        r2 = smt.set(&db2, &r2, &ka, U256::from(va), false).unwrap().new_root;

        prop_assert_eq!(r1, r2);
    }
}
