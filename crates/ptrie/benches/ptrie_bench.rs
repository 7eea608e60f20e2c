use std::collections::{BTreeSet, HashSet};
use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use ptrie::Set;

fn random_keys(n: usize, len: usize) -> Vec<Vec<u8>> {
    let mut rng = StdRng::seed_from_u64(7);
    (0..n)
        .map(|_| {
            let mut key = vec![0u8; len];
            rng.fill_bytes(&mut key);
            key
        })
        .collect()
}

fn insert_benchmark(c: &mut Criterion) {
    let keys = black_box(random_keys(10_000, 16));

    let mut group = c.benchmark_group("insert 10k random 16-byte keys");
    group.bench_function("ptrie", |b| {
        b.iter_batched_ref(
            Set::new,
            |set| {
                for key in &keys {
                    black_box(set.insert(key).unwrap());
                }
            },
            criterion::BatchSize::LargeInput,
        );
    });
    group.bench_function("std HashSet", |b| {
        b.iter_batched_ref(
            HashSet::new,
            |set| {
                for key in &keys {
                    black_box(set.insert(key.clone()));
                }
            },
            criterion::BatchSize::LargeInput,
        );
    });
    group.bench_function("std BTreeSet", |b| {
        b.iter_batched_ref(
            BTreeSet::new,
            |set| {
                for key in &keys {
                    black_box(set.insert(key.clone()));
                }
            },
            criterion::BatchSize::LargeInput,
        );
    });
    group.finish();
}

fn lookup_benchmark(c: &mut Criterion) {
    let keys = black_box(random_keys(10_000, 16));
    let misses = black_box(random_keys(10_000, 16));

    let mut ptrie = Set::new();
    let mut hashset = HashSet::new();
    let mut btreeset = BTreeSet::new();
    for key in &keys {
        ptrie.insert(key).unwrap();
        hashset.insert(key.clone());
        btreeset.insert(key.clone());
    }

    let mut group = c.benchmark_group("lookup 10k hits + 10k misses");
    group.bench_function("ptrie", |b| {
        b.iter(|| {
            for key in keys.iter().chain(&misses) {
                black_box(ptrie.exists(key).unwrap());
            }
        });
    });
    group.bench_function("std HashSet", |b| {
        b.iter(|| {
            for key in keys.iter().chain(&misses) {
                black_box(hashset.contains(key));
            }
        });
    });
    group.bench_function("std BTreeSet", |b| {
        b.iter(|| {
            for key in keys.iter().chain(&misses) {
                black_box(btreeset.contains(key));
            }
        });
    });
    group.finish();
}

fn erase_benchmark(c: &mut Criterion) {
    let keys = black_box(random_keys(10_000, 16));

    let mut group = c.benchmark_group("erase 10k random 16-byte keys");
    group.bench_function("ptrie", |b| {
        b.iter_batched_ref(
            || {
                let mut set = Set::new();
                for key in &keys {
                    set.insert(key).unwrap();
                }
                set
            },
            |set| {
                for key in &keys {
                    black_box(set.erase(key).unwrap());
                }
            },
            criterion::BatchSize::LargeInput,
        );
    });
    group.bench_function("std BTreeSet", |b| {
        b.iter_batched_ref(
            || keys.iter().cloned().collect::<BTreeSet<_>>(),
            |set| {
                for key in &keys {
                    black_box(set.remove(key));
                }
            },
            criterion::BatchSize::LargeInput,
        );
    });
    group.finish();
}

criterion_group!(benches, insert_benchmark, lookup_benchmark, erase_benchmark);
criterion_main!(benches);
