//! Tree operation benchmarks over a cache-only database.

use alloy_primitives::U256;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use zk_statedb::smt::Smt;
use zk_statedb::utils::{key_of, test_database};
use zk_statedb::FEA_ZERO;

fn bench_set(c: &mut Criterion) {
    c.bench_function("smt_set_256", |b| {
        b.iter_batched(
            test_database,
            |db| {
                let smt = Smt::new();
                let mut root = FEA_ZERO;
                for i in 1..=256u64 {
                    root = smt.set(&db, &root, &key_of(i), U256::from(i), false).unwrap().new_root;
                }
                root
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_get(c: &mut Criterion) {
    let db = test_database();
    let smt = Smt::new();
    let mut root = FEA_ZERO;
    for i in 1..=256u64 {
        root = smt.set(&db, &root, &key_of(i), U256::from(i), false).unwrap().new_root;
    }

    c.bench_function("smt_get_256", |b| {
        b.iter(|| {
            for i in 1..=256u64 {
                smt.get(&db, &root, &key_of(i)).unwrap();
            }
        })
    });
}

criterion_group!(benches, bench_set, bench_get);
criterion_main!(benches);
