//! GC metrics and statistics.

use std::time::{Duration, Instant};

/// Statistics from the most recent garbage collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcMetrics {
    /// Wall-clock duration of the whole collection, rendezvous included.
    pub duration: Duration,
    /// Time spent waiting for the other mutators to stop.
    pub rendezvous_duration: Duration,
    /// Duration of the clear phase.
    pub clear_duration: Duration,
    /// Duration of the mark phase.
    pub mark_duration: Duration,
    /// Duration of weak-reference processing.
    pub weak_duration: Duration,
    /// Duration of the sweep phase.
    pub sweep_duration: Duration,
    /// Number of objects marked reachable.
    pub objects_marked: usize,
    /// Number of bytes reclaimed.
    pub bytes_reclaimed: usize,
    /// Number of bytes surviving.
    pub bytes_surviving: usize,
    /// Number of objects reclaimed.
    pub objects_reclaimed: usize,
    /// Number of objects surviving.
    pub objects_surviving: usize,
    /// Weak handles disposed because their referent died.
    pub weak_refs_cleared: usize,
    /// Dead weak handles removed from their referent's side table.
    pub weak_handles_unlinked: usize,
    /// Side tables freed together with their objects.
    pub extra_data_released: usize,
    /// What triggered the collection.
    pub reason: CollectionReason,
    /// Collections run by the heap so far, this one included.
    pub total_collections: usize,
}

impl Default for GcMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GcMetrics {
    /// Create a new `GcMetrics` with all fields set to zero/defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            duration: Duration::ZERO,
            rendezvous_duration: Duration::ZERO,
            clear_duration: Duration::ZERO,
            mark_duration: Duration::ZERO,
            weak_duration: Duration::ZERO,
            sweep_duration: Duration::ZERO,
            objects_marked: 0,
            bytes_reclaimed: 0,
            bytes_surviving: 0,
            objects_reclaimed: 0,
            objects_surviving: 0,
            weak_refs_cleared: 0,
            weak_handles_unlinked: 0,
            extra_data_released: 0,
            reason: CollectionReason::None,
            total_collections: 0,
        }
    }
}

/// What triggered a collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum CollectionReason {
    /// No collection has run yet.
    #[default]
    None = 0,
    /// Requested through `Heap::collect` or `Mutator::collect`.
    Explicit = 1,
    /// The collect condition fired during an allocation.
    Threshold = 2,
    /// An allocation would have exceeded the heap limit.
    HeapLimit = 3,
}

impl CollectionReason {
    /// Short lowercase label, used in log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Explicit => "explicit",
            Self::Threshold => "threshold",
            Self::HeapLimit => "heap_limit",
        }
    }
}

/// Internal helper for capturing phase durations.
///
/// ```
/// use tether::metrics::PhaseTimer;
///
/// let mut timer = PhaseTimer::new();
/// timer.start();
/// // ... mark phase work ...
/// timer.end_mark();
///
/// timer.start();
/// // ... sweep phase work ...
/// timer.end_sweep();
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseTimer {
    /// Clear phase time.
    pub clear: Duration,
    /// Mark phase time.
    pub mark: Duration,
    /// Weak processing time.
    pub weak: Duration,
    /// Sweep phase time.
    pub sweep: Duration,
    current_start: Option<Instant>,
}

impl PhaseTimer {
    /// Create a new `PhaseTimer` with all durations set to zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            clear: Duration::ZERO,
            mark: Duration::ZERO,
            weak: Duration::ZERO,
            sweep: Duration::ZERO,
            current_start: None,
        }
    }

    /// Start timing a phase.
    pub fn start(&mut self) {
        self.current_start = Some(Instant::now());
    }

    fn stop(&mut self) -> Duration {
        self.current_start
            .take()
            .map_or(Duration::ZERO, |start| start.elapsed())
    }

    /// End the clear phase and record its duration.
    pub fn end_clear(&mut self) {
        self.clear = self.stop();
    }

    /// End the mark phase and record its duration.
    pub fn end_mark(&mut self) {
        self.mark = self.stop();
    }

    /// End weak processing and record its duration.
    pub fn end_weak(&mut self) {
        self.weak = self.stop();
    }

    /// End the sweep phase and record its duration.
    pub fn end_sweep(&mut self) {
        self.sweep = self.stop();
    }
}
