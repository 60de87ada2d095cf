//! Lifecycle tests for weak references.
//!
//! A weak handle is created lazily, shared by every weak reference to the
//! same object, and cleared exactly when the collector finds its referent
//! unreachable.

use tether::{
    create_regular_weak_reference_impl, deref_regular_weak_reference_impl,
    dispose_regular_weak_reference_impl, regular_weak_reference_impl_base_object_unsafe, Gc, Heap,
    Root, Trace, WeakRef,
};

#[cfg(feature = "test-util")]
use tether::test_util::{cached_weak_handle, has_extra_data};

#[derive(Trace)]
struct Node {
    value: i32,
    next: Option<Gc<Node>>,
}

impl Node {
    const fn leaf(value: i32) -> Self {
        Self { value, next: None }
    }
}

// ============================================================================
// Creation
// ============================================================================

#[test]
fn test_upgrade_while_strongly_reachable() {
    let heap = Heap::new();
    let mutator = heap.attach();

    let node = heap.allocate(&mutator, Node::leaf(42)).unwrap();
    let weak = node.downgrade(&mutator).unwrap();

    let upgraded = weak.upgrade(&mutator).expect("referent is rooted");
    assert!(Root::ptr_eq(&node, &upgraded));
    assert_eq!(upgraded.value, 42);
    assert!(!weak.is_cleared());
}

#[test]
fn test_create_is_idempotent() {
    let heap = Heap::new();
    let mutator = heap.attach();
    let node = heap.allocate(&mutator, Node::leaf(1)).unwrap();

    let first = create_regular_weak_reference_impl(&mutator, &node).unwrap();
    let second = create_regular_weak_reference_impl(&mutator, &node).unwrap();
    assert!(Root::ptr_eq(&first, &second));

    let a = WeakRef::new(&mutator, &node).unwrap();
    let b = node.downgrade(&mutator).unwrap();
    assert!(WeakRef::ptr_eq(&a, &b));
    assert!(Root::ptr_eq(a.handle(), &first));

    // One object plus one shared handle.
    assert_eq!(heap.object_count(), 2);
}

#[test]
fn test_each_object_caches_its_own_handle() {
    let heap = Heap::new();
    let mutator = heap.attach();
    let a = heap.allocate(&mutator, Node::leaf(1)).unwrap();
    let b = heap.allocate(&mutator, Node::leaf(2)).unwrap();

    let handle_a = create_regular_weak_reference_impl(&mutator, &a).unwrap();
    let handle_b = create_regular_weak_reference_impl(&mutator, &b).unwrap();
    assert!(!Root::ptr_eq(&handle_a, &handle_b));

    // The cached handle of each object points back at that object.
    for (object, handle) in [(&a, &handle_a), (&b, &handle_b)] {
        let cached = object.header().extra_data().unwrap();
        assert_eq!(cached.base_object(), object.obj_ref());
        assert_eq!(cached.regular_weak_reference_impl(), Some(handle.as_gc()));
        let again = create_regular_weak_reference_impl(&mutator, object).unwrap();
        assert!(deref_regular_weak_reference_impl(&mutator, &again)
            .is_some_and(|root| root.same_object(object)));
    }
}

#[test]
fn test_side_table_is_installed_lazily() {
    let heap = Heap::new();
    let mutator = heap.attach();
    let node = heap.allocate(&mutator, Node::leaf(1)).unwrap();
    assert!(node.header().extra_data().is_none());

    let handle = create_regular_weak_reference_impl(&mutator, &node).unwrap();
    let extra = node.header().extra_data().expect("installed by create");
    assert_eq!(extra.base_object(), node.obj_ref());
    assert_eq!(
        extra.regular_weak_reference_impl().map(Gc::as_obj_ref),
        Some(handle.obj_ref())
    );
}

#[cfg(feature = "test-util")]
#[test]
fn test_test_util_reports_cached_handle() {
    let heap = Heap::new();
    let mutator = heap.attach();
    let node = heap.allocate(&mutator, Node::leaf(1)).unwrap();
    assert!(!has_extra_data(&node));

    let weak = node.downgrade(&mutator).unwrap();
    assert!(has_extra_data(&node));
    assert_eq!(cached_weak_handle(&node), Some(weak.handle().obj_ref()));
}

// ============================================================================
// Dereference
// ============================================================================

#[test]
fn test_deref_returns_erased_root() {
    let heap = Heap::new();
    let mutator = heap.attach();
    let node = heap.allocate(&mutator, Node::leaf(9)).unwrap();
    let handle = create_regular_weak_reference_impl(&mutator, &node).unwrap();

    let any = deref_regular_weak_reference_impl(&mutator, &handle).expect("alive");
    assert!(any.same_object(&node));
    assert!(any.is::<Node>());
    assert!(!any.is::<u64>());
    assert!(any.type_name().ends_with("Node"));

    let before = Root::root_count(&node);
    let any = any.downcast::<u64>().unwrap_err();
    let typed = any.downcast::<Node>().unwrap();
    assert_eq!(typed.value, 9);
    assert_eq!(Root::root_count(&node), before);
}

#[test]
fn test_deref_roots_the_referent() {
    let heap = Heap::new();
    let mutator = heap.attach();
    let node = heap.allocate(&mutator, Node::leaf(3)).unwrap();
    let weak = node.downgrade(&mutator).unwrap();

    let upgraded = weak.upgrade(&mutator).unwrap();
    drop(node);
    assert!(mutator.collect());

    // The upgraded root alone keeps the referent alive.
    assert_eq!(upgraded.value, 3);
    assert!(!weak.is_cleared());
    assert!(weak.upgrade(&mutator).is_some());
}

#[test]
fn test_peek_reports_referent_without_rooting() {
    let heap = Heap::new();
    let mutator = heap.attach();
    let node = heap.allocate(&mutator, Node::leaf(3)).unwrap();
    let handle = create_regular_weak_reference_impl(&mutator, &node).unwrap();

    let roots = Root::root_count(&node);
    // SAFETY: `node` is rooted for the whole test.
    let peeked = unsafe { regular_weak_reference_impl_base_object_unsafe(&handle) };
    assert_eq!(peeked, Some(node.obj_ref()));
    assert_eq!(Root::root_count(&node), roots);
}

// ============================================================================
// Clearing
// ============================================================================

#[test]
fn test_cleared_after_referent_collected() {
    let heap = Heap::new();
    let mutator = heap.attach();

    let node = heap.allocate(&mutator, Node::leaf(5)).unwrap();
    let weak = node.downgrade(&mutator).unwrap();
    drop(node);

    assert!(mutator.collect());
    assert!(weak.is_cleared());
    assert!(weak.upgrade(&mutator).is_none());
    assert!(deref_regular_weak_reference_impl(&mutator, weak.handle()).is_none());
    // SAFETY: only compared against `None`.
    assert!(unsafe { regular_weak_reference_impl_base_object_unsafe(weak.handle()) }.is_none());

    let metrics = heap.last_gc_metrics();
    assert_eq!(metrics.weak_refs_cleared, 1);
    assert_eq!(metrics.objects_reclaimed, 1);
    assert_eq!(metrics.extra_data_released, 1);
    // The handle survives: it is rooted by `weak`.
    assert_eq!(heap.object_count(), 1);
}

#[test]
fn test_referent_reachable_through_edge_survives() {
    let heap = Heap::new();
    let mutator = heap.attach();

    let child = heap.allocate(&mutator, Node::leaf(1)).unwrap();
    let weak_child = child.downgrade(&mutator).unwrap();
    let parent = heap
        .allocate(
            &mutator,
            Node {
                value: 0,
                next: Some(child.as_gc()),
            },
        )
        .unwrap();
    drop(child);

    assert!(mutator.collect());
    assert_eq!(weak_child.upgrade(&mutator).map(|c| c.value), Some(1));

    drop(parent);
    assert!(mutator.collect());
    assert!(weak_child.upgrade(&mutator).is_none());
}

#[test]
fn test_cleared_is_terminal() {
    let heap = Heap::new();
    let mutator = heap.attach();

    let node = heap.allocate(&mutator, Node::leaf(5)).unwrap();
    let weak = node.downgrade(&mutator).unwrap();
    drop(node);
    mutator.collect();
    assert!(weak.is_cleared());

    for _ in 0..3 {
        mutator.collect();
        assert!(weak.upgrade(&mutator).is_none());
    }
}

#[test]
fn test_manual_dispose_is_idempotent() {
    let heap = Heap::new();
    let mutator = heap.attach();
    let node = heap.allocate(&mutator, Node::leaf(5)).unwrap();
    let handle = create_regular_weak_reference_impl(&mutator, &node).unwrap();

    dispose_regular_weak_reference_impl(&handle);
    dispose_regular_weak_reference_impl(&handle);
    assert!(handle.is_cleared());
    assert!(deref_regular_weak_reference_impl(&mutator, &handle).is_none());

    // The disposed handle stays cached for its object.
    let again = create_regular_weak_reference_impl(&mutator, &node).unwrap();
    assert!(Root::ptr_eq(&handle, &again));
    assert!(again.is_cleared());

    // Collecting the referent later does not count it as a fresh clear.
    drop(node);
    mutator.collect();
    assert_eq!(heap.last_gc_metrics().weak_refs_cleared, 0);
}

// ============================================================================
// Handle identity across collections
// ============================================================================

#[test]
fn test_dead_handle_is_unlinked_and_replaced() {
    let heap = Heap::new();
    let mutator = heap.attach();
    let node = heap.allocate(&mutator, Node::leaf(8)).unwrap();

    let weak = node.downgrade(&mutator).unwrap();
    drop(weak);
    assert!(mutator.collect());

    let metrics = heap.last_gc_metrics();
    assert_eq!(metrics.weak_handles_unlinked, 1);
    assert_eq!(metrics.objects_reclaimed, 1);
    assert!(node
        .header()
        .extra_data()
        .expect("side table outlives the handle")
        .regular_weak_reference_impl()
        .is_none());

    let fresh = node.downgrade(&mutator).unwrap();
    assert!(!fresh.is_cleared());
    assert_eq!(fresh.upgrade(&mutator).map(|n| n.value), Some(8));
}

#[test]
fn test_new_object_gets_a_distinct_live_handle() {
    let heap = Heap::new();
    let mutator = heap.attach();

    let old = heap.allocate(&mutator, Node::leaf(1)).unwrap();
    let old_weak = old.downgrade(&mutator).unwrap();
    drop(old);
    mutator.collect();

    // The allocator may hand out the same address again.
    let new = heap.allocate(&mutator, Node::leaf(2)).unwrap();
    let new_weak = new.downgrade(&mutator).unwrap();

    assert!(!WeakRef::ptr_eq(&old_weak, &new_weak));
    assert!(old_weak.upgrade(&mutator).is_none());
    assert_eq!(new_weak.upgrade(&mutator).map(|n| n.value), Some(2));
}

#[test]
fn test_weak_to_weak_handle() {
    let heap = Heap::new();
    let mutator = heap.attach();
    let node = heap.allocate(&mutator, Node::leaf(1)).unwrap();
    let handle = create_regular_weak_reference_impl(&mutator, &node).unwrap();

    // Handles are ordinary managed objects and can be weakly referenced too.
    let meta = handle.downgrade(&mutator).unwrap();
    assert!(Root::ptr_eq(&meta.upgrade(&mutator).unwrap(), &handle));

    drop(handle);
    mutator.collect();
    assert!(meta.upgrade(&mutator).is_none());
    assert!(node.downgrade(&mutator).unwrap().upgrade(&mutator).is_some());
}
