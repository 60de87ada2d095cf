//! GC tracing support.
//!
//! When the `tracing` feature is enabled, this module provides structured
//! tracing spans and events for collections and weak-reference processing.

/// Span and event helpers used by the collector.
#[cfg(feature = "tracing")]
pub mod internal {
    use std::sync::atomic::{AtomicU64, Ordering};
    use tracing::{span, Level};

    /// Collection phases, in execution order.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum GcPhase {
        /// Wait for every other mutator to stop.
        Rendezvous,
        /// Reset mark bits.
        Clear,
        /// Trace the live object graph from the roots.
        Mark,
        /// Clear or unlink weak handles.
        WeakProcessing,
        /// Reclaim unreachable objects.
        Sweep,
    }

    /// Stable identifier for a GC run.
    ///
    /// Correlates all events within a single collection. Monotonically
    /// increasing across every heap in the process, starting at 1.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GcId(pub u64);

    static NEXT_GC_ID: AtomicU64 = AtomicU64::new(1);

    /// Generate the next unique GC ID.
    pub fn next_gc_id() -> GcId {
        GcId(NEXT_GC_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Create a span for the entire GC collection.
    pub fn trace_gc_collection(reason: &str, gc_id: GcId) -> span::EnteredSpan {
        span!(Level::DEBUG, "gc_collect", reason = reason, gc_id = gc_id.0).entered()
    }

    /// Create a span for a single phase.
    pub fn trace_phase(phase: GcPhase) -> span::EnteredSpan {
        span!(Level::DEBUG, "gc_phase", phase = ?phase).entered()
    }

    /// Log the start of a phase.
    pub fn log_phase_start(phase: GcPhase, bytes_before: usize) {
        tracing::debug!(phase = ?phase, bytes_before, "phase_start");
    }

    /// Log the end of a phase.
    pub fn log_phase_end(phase: GcPhase, bytes_reclaimed: usize) {
        tracing::debug!(phase = ?phase, bytes_reclaimed, "phase_end");
    }

    /// Summary of the weak-processing pass.
    pub fn log_weak_processing(cleared: usize, unlinked: usize) {
        tracing::debug!(cleared, unlinked, "weak_processing");
    }

    /// A racing `create` lost the publish; its candidate handle is garbage.
    pub fn log_weak_publish_lost(object_addr: usize) {
        tracing::trace!(object = object_addr, "weak_publish_lost");
    }

    /// Another mutator is already collecting; this one parks instead.
    pub fn log_collection_joined(reason: &str) {
        tracing::trace!(reason = reason, "collection_joined");
    }
}

/// Stand-ins used when the `tracing` feature is off.
#[cfg(not(feature = "tracing"))]
pub mod internal {
    /// Stub type when tracing is disabled.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GcId(pub u64);

    /// Stub function when tracing is disabled.
    pub const fn next_gc_id() -> GcId {
        GcId(0)
    }
}

pub use internal::GcId;
