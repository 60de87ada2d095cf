//! Tests for concurrent weak-reference creation, dereference and clearing.
//!
//! Threads that wait on each other do so in the native state, so a
//! collection started by any of them can never stall on a blocked peer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Barrier;
use std::thread;

use tether::{
    create_regular_weak_reference_impl, deref_regular_weak_reference_impl,
    dispose_regular_weak_reference_impl, Heap, HeapConfig, Root, Trace,
};

#[derive(Trace)]
struct Payload {
    id: usize,
    bytes: Vec<u8>,
}

// ============================================================================
// Test 1: racing creates publish exactly one handle
// ============================================================================

#[test]
fn test_concurrent_create_yields_one_handle() {
    const THREADS: usize = 8;

    let heap = Heap::new();
    let mutator = heap.attach();
    let target = heap
        .allocate(&mutator, Payload { id: 0, bytes: Vec::new() })
        .unwrap();
    let barrier = Barrier::new(THREADS);

    let addrs: Vec<usize> = mutator.enter_native(|| {
        thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    s.spawn(|| {
                        let mutator = heap.attach();
                        let target = target.clone();
                        mutator.enter_native(|| barrier.wait());
                        let handle = create_regular_weak_reference_impl(&mutator, &target).unwrap();
                        handle.obj_ref().addr()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
    });

    assert!(addrs.windows(2).all(|w| w[0] == w[1]), "{addrs:?}");

    let handle = create_regular_weak_reference_impl(&mutator, &target).unwrap();
    assert_eq!(handle.obj_ref().addr(), addrs[0]);

    // Losing candidates are plain garbage and go away at the next collection.
    assert!(mutator.collect());
    assert_eq!(heap.object_count(), 2);
    assert!(deref_regular_weak_reference_impl(&mutator, &handle)
        .is_some_and(|root| root.same_object(&target)));
}

// ============================================================================
// Test 2: dereference racing disposal is monotonic
// ============================================================================

#[test]
fn test_deref_racing_dispose_never_resurrects() {
    const READERS: usize = 4;

    let heap = Heap::new();
    let mutator = heap.attach();
    let target = heap
        .allocate(&mutator, Payload { id: 7, bytes: vec![1, 2, 3] })
        .unwrap();
    let handle = create_regular_weak_reference_impl(&mutator, &target).unwrap();
    let start = Barrier::new(READERS + 1);
    let disposed = AtomicBool::new(false);

    mutator.enter_native(|| {
        thread::scope(|s| {
            for _ in 0..READERS {
                s.spawn(|| {
                    let mutator = heap.attach();
                    let handle = handle.clone();
                    mutator.enter_native(|| start.wait());

                    let mut seen_cleared = false;
                    loop {
                        let finished = disposed.load(Ordering::Acquire);
                        match deref_regular_weak_reference_impl(&mutator, &handle) {
                            Some(root) => {
                                assert!(!seen_cleared, "cleared handle produced a referent");
                                let payload = root.downcast::<Payload>().unwrap();
                                assert_eq!(payload.id, 7);
                                assert_eq!(payload.bytes, [1, 2, 3]);
                            }
                            None => seen_cleared = true,
                        }
                        if finished {
                            break;
                        }
                    }
                    // The last load happened after the disposal was published.
                    assert!(seen_cleared);
                });
            }

            start.wait();
            for _ in 0..1_000 {
                std::hint::spin_loop();
            }
            dispose_regular_weak_reference_impl(&handle);
            disposed.store(true, Ordering::Release);
        });
    });

    assert!(handle.is_cleared());
    assert_eq!(target.id, 7);
}

// ============================================================================
// Test 3: collections with several mutators allocating weak references
// ============================================================================

#[test]
fn test_collections_with_concurrent_mutators() {
    const THREADS: usize = 4;
    const OBJECTS: usize = 200;

    // A small threshold makes allocation-triggered collections frequent.
    let heap = Heap::with_config(HeapConfig::new().with_collect_threshold(16 * 1024));
    let mutator = heap.attach();
    let start = Barrier::new(THREADS);

    mutator.enter_native(|| {
        thread::scope(|s| {
            for t in 0..THREADS {
                let heap = &heap;
                let start = &start;
                s.spawn(move || {
                    let mutator = heap.attach();
                    mutator.enter_native(|| start.wait());

                    let mut kept = Vec::new();
                    let mut dropped = Vec::new();
                    for i in 0..OBJECTS {
                        let id = t * OBJECTS + i;
                        let payload = heap
                            .allocate(&mutator, Payload { id, bytes: vec![0; 128] })
                            .unwrap();
                        let weak = payload.downgrade(&mutator).unwrap();
                        if i % 2 == 0 {
                            kept.push((payload, weak));
                        } else {
                            dropped.push(weak);
                        }
                    }

                    for (payload, weak) in &kept {
                        let upgraded = weak.upgrade(&mutator).expect("kept objects stay alive");
                        assert!(Root::ptr_eq(payload, &upgraded));
                    }

                    // Either this thread collects, or it joins a collection
                    // that could not start marking before it parked.
                    mutator.collect();
                    for weak in &dropped {
                        assert!(weak.upgrade(&mutator).is_none());
                    }
                    for (payload, weak) in &kept {
                        assert_eq!(weak.upgrade(&mutator).map(|p| p.id), Some(payload.id));
                    }
                });
            }
        });
    });

    assert!(heap.total_collections() > 0);
    assert!(mutator.collect());
    assert_eq!(heap.object_count(), 0);
    assert_eq!(heap.mutator_count(), 1);
}

// ============================================================================
// Test 4: a native thread holding a root does not block collection
// ============================================================================

#[test]
fn test_native_thread_root_survives_collection() {
    let heap = Heap::new();
    let mutator = heap.attach();
    let target = heap
        .allocate(&mutator, Payload { id: 1, bytes: Vec::new() })
        .unwrap();
    let weak = target.downgrade(&mutator).unwrap();
    let parked = Barrier::new(2);
    let resume = Barrier::new(2);
    let mine = target.clone();

    thread::scope(|s| {
        let (heap, parked_ref, resume_ref) = (&heap, &parked, &resume);
        s.spawn(move || {
            let other = heap.attach();
            let (parked, resume) = (parked_ref, resume_ref);
            other.enter_native(|| {
                parked.wait();
                resume.wait();
            });
            assert_eq!(mine.id, 1);
        });

        mutator.enter_native(|| parked.wait());
        drop(target);
        // The other thread is native, so the collector does not wait for it.
        assert!(mutator.collect());
        assert!(weak.upgrade(&mutator).is_some());
        mutator.enter_native(|| resume.wait());
    });

    mutator.collect();
    assert!(weak.upgrade(&mutator).is_none());
}
