use std::hint::black_box;

use b_tree::BTree;
use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use rand::SeedableRng;
use rand::seq::SliceRandom;

const N: usize = 10_000;
const DEGREE: usize = 16;

fn shuffled_keys() -> Vec<u64> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    let mut keys: Vec<u64> = (0..N as u64).collect();
    keys.shuffle(&mut rng);
    keys
}

fn build_tree(keys: &[u64]) -> BTree<u64> {
    let mut tree = BTree::new(DEGREE).unwrap();
    for &k in keys {
        tree.insert(k);
    }
    tree
}

fn bench_insert(c: &mut Criterion) {
    let keys = shuffled_keys();
    c.bench_function("insert 10k shuffled keys", |b| {
        b.iter(|| {
            let mut tree = BTree::new(DEGREE).unwrap();
            for &k in &keys {
                tree.insert(black_box(k));
            }
            tree
        })
    });
}

fn bench_search(c: &mut Criterion) {
    let keys = shuffled_keys();
    let tree = build_tree(&keys);
    c.bench_function("search 10k keys", |b| {
        b.iter(|| {
            let mut hits = 0usize;
            for k in &keys {
                hits += usize::from(tree.search(black_box(k)));
            }
            hits
        })
    });
}

fn bench_delete(c: &mut Criterion) {
    let keys = shuffled_keys();
    let tree = build_tree(&keys);
    let mut delete_order = keys.clone();
    delete_order.shuffle(&mut rand::rngs::StdRng::seed_from_u64(7));

    c.bench_function("delete 10k keys", |b| {
        b.iter_batched(
            || tree.clone(),
            |mut tree| {
                for k in &delete_order {
                    tree.delete(black_box(k)).unwrap();
                }
                tree
            },
            BatchSize::LargeInput,
        )
    });
}

fn bench_traverse(c: &mut Criterion) {
    let keys = shuffled_keys();
    let tree = build_tree(&keys);
    c.bench_function("in-order traversal of 10k keys", |b| {
        b.iter(|| tree.iter().copied().sum::<u64>())
    });
}

criterion_group!(benches, bench_insert, bench_search, bench_delete, bench_traverse);
criterion_main!(benches);
