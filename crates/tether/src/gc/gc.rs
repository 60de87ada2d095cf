//! Stop-the-world mark-sweep collection.
//!
//! A collection runs on the mutator thread that requested it:
//!
//! 1. **Rendezvous**: raise `gc_requested` and wait until every other
//!    mutator is `Native` or parked at a safepoint.
//! 2. **Clear**: reset every mark bit.
//! 3. **Mark**: objects with a non-zero root count are the roots; their
//!    transitive closure over `Gc` edges is marked with a worklist.
//! 4. **Weak processing**: clear handles whose referent is unmarked and
//!    unlink handles that are themselves unmarked.
//! 5. **Sweep**: drop and free every unmarked object and its side table.
//!
//! Mutators resume once the sweep has finished.

use std::time::Instant;

use crate::heap::{Heap, Sweeper};
use crate::metrics::{CollectionReason, GcMetrics, PhaseTimer};
use crate::object::ObjRef;
use crate::thread::{Mutator, ThreadRegistry};
use crate::trace::MarkVisitor;

use super::weak_processing::process_weak_references;

#[cfg(feature = "tracing")]
use crate::tracing::internal::{
    log_collection_joined, log_phase_end, log_phase_start, next_gc_id, trace_gc_collection,
    trace_phase, GcPhase,
};

// ============================================================================
// Collect condition
// ============================================================================

/// Heap statistics passed to the [`CollectCondition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectInfo {
    bytes_since_last_collect: usize,
    live_bytes: usize,
    object_count: usize,
    collect_threshold: usize,
}

impl CollectInfo {
    pub(crate) const fn new(
        bytes_since_last_collect: usize,
        live_bytes: usize,
        object_count: usize,
        collect_threshold: usize,
    ) -> Self {
        Self {
            bytes_since_last_collect,
            live_bytes,
            object_count,
            collect_threshold,
        }
    }

    /// Bytes allocated since the last collection finished.
    #[must_use]
    pub const fn bytes_since_last_collect(&self) -> usize {
        self.bytes_since_last_collect
    }

    /// Bytes held by allocated, not yet swept objects.
    #[must_use]
    pub const fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    /// Number of allocated, not yet swept objects.
    #[must_use]
    pub const fn object_count(&self) -> usize {
        self.object_count
    }

    /// The heap's configured collection threshold.
    #[must_use]
    pub const fn collect_threshold(&self) -> usize {
        self.collect_threshold
    }
}

/// Decides, before each allocation, whether to collect first.
pub type CollectCondition = fn(&CollectInfo) -> bool;

/// The default collection condition.
///
/// Returns `true` once the bytes allocated since the last collection reach
/// the configured threshold.
#[must_use]
pub const fn default_collect_condition(info: &CollectInfo) -> bool {
    info.bytes_since_last_collect >= info.collect_threshold
}

// ============================================================================
// Collection
// ============================================================================

/// Releases parked mutators even if a destructor panics mid-sweep.
struct CollectionGuard<'a> {
    registry: &'a ThreadRegistry,
}

impl Drop for CollectionGuard<'_> {
    fn drop(&mut self) {
        self.registry.finish_collection();
    }
}

/// Runs a full collection of `heap` on behalf of `mutator`.
///
/// Returns `false` without collecting if another thread won the request; in
/// that case this thread parks until that collection has finished.
pub(crate) fn collect(heap: &Heap, mutator: &Mutator<'_>, reason: CollectionReason) -> bool {
    mutator.assert_same_heap(heap.id());
    mutator.assert_runnable();
    let registry = heap.registry();

    if !registry.request_collection() {
        #[cfg(feature = "tracing")]
        log_collection_joined(reason.as_str());
        mutator.safepoint();
        return false;
    }
    let guard = CollectionGuard { registry };

    #[cfg(feature = "tracing")]
    let _span = trace_gc_collection(reason.as_str(), next_gc_id());

    let start = Instant::now();
    {
        #[cfg(feature = "tracing")]
        let _phase = trace_phase(GcPhase::Rendezvous);
        registry.wait_for_rendezvous(mutator.thread_data());
    }

    let mut metrics = GcMetrics::new();
    metrics.reason = reason;
    metrics.rendezvous_duration = start.elapsed();
    collect_stopped(heap, &mut metrics, start);

    drop(guard);
    true
}

/// The phases that run while every other mutator is stopped.
///
/// Heap statistics and metrics are settled before any destructor runs, so a
/// panicking `Drop` leaves the heap's accounting consistent.
fn collect_stopped(heap: &Heap, metrics: &mut GcMetrics, start: Instant) {
    let mut timer = PhaseTimer::new();
    let mut objects = heap.objects().lock();

    // Clear
    timer.start();
    #[cfg(feature = "tracing")]
    log_phase_start(GcPhase::Clear, heap.live_bytes());
    for &obj in objects.iter() {
        // SAFETY: every listed object is allocated until swept below.
        unsafe { obj.header() }.clear_mark();
    }
    timer.end_clear();

    // Mark
    timer.start();
    #[cfg(feature = "tracing")]
    log_phase_start(GcPhase::Mark, heap.live_bytes());
    let mut visitor = MarkVisitor::new();
    for &obj in objects.iter() {
        // SAFETY: as above.
        if unsafe { obj.header() }.root_count() > 0 {
            // SAFETY: as above.
            unsafe { visitor.mark(obj) };
        }
    }
    // SAFETY: the world is stopped and every queued object is listed.
    unsafe { visitor.drain() };
    metrics.objects_marked = visitor.objects_marked();
    timer.end_mark();

    // Weak processing
    timer.start();
    #[cfg(feature = "tracing")]
    log_phase_start(GcPhase::WeakProcessing, heap.live_bytes());
    // SAFETY: marking is complete and nothing has been swept yet.
    let weak = unsafe { process_weak_references(&objects) };
    metrics.weak_refs_cleared = weak.cleared;
    metrics.weak_handles_unlinked = weak.unlinked;
    timer.end_weak();

    // Sweep
    timer.start();
    #[cfg(feature = "tracing")]
    log_phase_start(GcPhase::Sweep, heap.live_bytes());
    let mut dead: Vec<ObjRef> = Vec::new();
    let mut bytes_reclaimed = 0;
    objects.retain(|&obj| {
        // SAFETY: as above.
        let header = unsafe { obj.header() };
        let marked = header.is_marked();
        if !marked {
            bytes_reclaimed += header.type_info().layout().size();
            dead.push(obj);
        }
        marked
    });
    metrics.objects_surviving = objects.len();
    drop(objects);

    metrics.bytes_reclaimed = bytes_reclaimed;
    metrics.objects_reclaimed = dead.len();
    metrics.total_collections = heap.finish_collection(bytes_reclaimed, dead.len());
    metrics.bytes_surviving = heap.live_bytes();
    metrics.clear_duration = timer.clear;
    metrics.mark_duration = timer.mark;
    metrics.weak_duration = timer.weak;
    metrics.duration = start.elapsed();
    heap.record_metrics(*metrics);

    // SAFETY: unmarked objects are unreachable from roots and edges, their
    // weak handles have been cleared above, and they are no longer listed.
    let mut sweeper = unsafe { Sweeper::new(dead) };
    metrics.extra_data_released = sweeper.run();
    timer.end_sweep();
    #[cfg(feature = "tracing")]
    log_phase_end(GcPhase::Sweep, metrics.bytes_reclaimed);

    metrics.sweep_duration = timer.sweep;
    metrics.duration = start.elapsed();
    heap.record_metrics(*metrics);
}
