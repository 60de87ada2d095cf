//! Benchmark: weak reference hot paths.
//!
//! Measures dereference of a live and a cleared handle, the cached path of
//! handle creation, and the cost weak processing adds to a collection.

use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use tether::{
    create_regular_weak_reference_impl, deref_regular_weak_reference_impl, Gc, Heap, Root, Trace,
};

#[derive(Trace)]
struct Node {
    value: i64,
    next: Option<Gc<Node>>,
}

fn bench_deref_live(c: &mut Criterion) {
    let heap = Heap::new();
    let mutator = heap.attach();
    let node = heap
        .allocate(&mutator, Node { value: 1, next: None })
        .unwrap();
    let handle = create_regular_weak_reference_impl(&mutator, &node).unwrap();

    c.bench_function("weak_deref_live", |b| {
        b.iter(|| black_box(deref_regular_weak_reference_impl(&mutator, black_box(&handle))));
    });
}

fn bench_deref_cleared(c: &mut Criterion) {
    let heap = Heap::new();
    let mutator = heap.attach();
    let node = heap
        .allocate(&mutator, Node { value: 1, next: None })
        .unwrap();
    let handle = create_regular_weak_reference_impl(&mutator, &node).unwrap();
    drop(node);
    mutator.collect();

    c.bench_function("weak_deref_cleared", |b| {
        b.iter(|| black_box(deref_regular_weak_reference_impl(&mutator, black_box(&handle))));
    });
}

fn bench_create_cached(c: &mut Criterion) {
    let heap = Heap::new();
    let mutator = heap.attach();
    let node = heap
        .allocate(&mutator, Node { value: 1, next: None })
        .unwrap();
    let _handle = create_regular_weak_reference_impl(&mutator, &node).unwrap();

    c.bench_function("weak_create_cached", |b| {
        b.iter(|| black_box(create_regular_weak_reference_impl(&mutator, &node).unwrap()));
    });
}

fn bench_collect_with_weak_refs(c: &mut Criterion) {
    c.bench_function("collect_1000_weak_refs", |b| {
        let heap = Heap::new();
        let mutator = heap.attach();
        b.iter(|| {
            let mut weaks = Vec::with_capacity(1000);
            // Only the previous node stays rooted; the chain keeps the rest alive.
            let mut prev: Option<Root<'_, Node>> = None;
            for i in 0..1000 {
                let next = prev.as_ref().map(Root::as_gc);
                let node = heap.allocate(&mutator, Node { value: i, next }).unwrap();
                weaks.push(node.downgrade(&mutator).unwrap());
                black_box(node.value);
                prev = Some(node);
            }
            drop(prev);
            mutator.collect();
            black_box(&weaks);
        });
    });
}

criterion_group!(
    benches,
    bench_deref_live,
    bench_deref_cleared,
    bench_create_cached,
    bench_collect_with_weak_refs
);
criterion_main!(benches);
