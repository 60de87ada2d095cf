//! The managed heap.
//!
//! A [`Heap`] owns every object allocated through it, the registry of
//! mutator threads attached to it, and the statistics the collector uses to
//! decide when to run. Objects are individually allocated with the global
//! allocator and tracked in an object list that the sweeper walks.

use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::error::AllocError;
use crate::extra::ExtraObjectData;
use crate::gc::{self, default_collect_condition, CollectCondition, CollectInfo};
use crate::metrics::{CollectionReason, GcMetrics};
use crate::object::{type_info_of, Gc, HeapId, ObjBox, ObjRef};
use crate::root::Root;
use crate::thread::{Mutator, ThreadRegistry};
use crate::trace::Trace;

/// Default number of bytes allocated between two threshold-triggered collections.
pub const DEFAULT_COLLECT_THRESHOLD: usize = 4 * 1024 * 1024;

// ============================================================================
// HeapConfig
// ============================================================================

/// Tuning knobs for a [`Heap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    collect_threshold: usize,
    heap_limit: Option<usize>,
}

impl HeapConfig {
    /// The default configuration: a 4 MiB collection threshold and no limit.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            collect_threshold: DEFAULT_COLLECT_THRESHOLD,
            heap_limit: None,
        }
    }

    /// Sets how many bytes may be allocated before the default collect
    /// condition requests a collection.
    #[must_use]
    pub const fn with_collect_threshold(mut self, bytes: usize) -> Self {
        self.collect_threshold = bytes;
        self
    }

    /// Caps the bytes held by live objects. Allocations that would exceed the
    /// cap after an emergency collection fail with
    /// [`AllocError::HeapLimitExceeded`].
    ///
    /// The cap is enforced per allocation and is approximate when several
    /// threads allocate at once.
    #[must_use]
    pub const fn with_heap_limit(mut self, bytes: usize) -> Self {
        self.heap_limit = Some(bytes);
        self
    }

    /// Bytes allocated between threshold-triggered collections.
    #[must_use]
    pub const fn collect_threshold(&self) -> usize {
        self.collect_threshold
    }

    /// The live-bytes cap, if any.
    #[must_use]
    pub const fn heap_limit(&self) -> Option<usize> {
        self.heap_limit
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Heap
// ============================================================================

/// A garbage-collected heap shared by any number of mutator threads.
pub struct Heap {
    id: HeapId,
    config: HeapConfig,
    /// Every allocated, not yet swept object.
    objects: Mutex<Vec<ObjRef>>,
    live_bytes: AtomicUsize,
    live_objects: AtomicUsize,
    bytes_since_collect: AtomicUsize,
    registry: ThreadRegistry,
    collect_condition: RwLock<CollectCondition>,
    last_metrics: Mutex<GcMetrics>,
    total_collections: AtomicUsize,
}

impl Heap {
    /// Creates an empty heap with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HeapConfig::default())
    }

    /// Creates an empty heap.
    #[must_use]
    pub fn with_config(config: HeapConfig) -> Self {
        Self {
            id: HeapId::next(),
            config,
            objects: Mutex::new(Vec::new()),
            live_bytes: AtomicUsize::new(0),
            live_objects: AtomicUsize::new(0),
            bytes_since_collect: AtomicUsize::new(0),
            registry: ThreadRegistry::new(),
            collect_condition: RwLock::new(default_collect_condition),
            last_metrics: Mutex::new(GcMetrics::new()),
            total_collections: AtomicUsize::new(0),
        }
    }

    /// Registers the current thread as a mutator of this heap.
    ///
    /// Blocks while a collection is in progress.
    #[must_use]
    pub fn attach(&self) -> Mutator<'_> {
        Mutator::attach(self)
    }

    /// Allocates `value` on the heap and returns a root to it.
    ///
    /// May run a collection first, either because the collect condition asks
    /// for one or because the heap limit would otherwise be exceeded.
    ///
    /// # Rooting
    ///
    /// `value` itself is not visible to the collector until this returns. Any
    /// [`Gc`] edges it holds must stay rooted by the caller for the duration
    /// of the call.
    ///
    /// # Panics
    ///
    /// Panics if `mutator` is not runnable or belongs to another heap.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::HeapLimitExceeded`] if the configured heap limit
    /// cannot accommodate the object.
    pub fn allocate<'h, T: Trace + Send + Sync + 'static>(
        &'h self,
        mutator: &Mutator<'h>,
        value: T,
    ) -> Result<Root<'h, T>, AllocError> {
        mutator.assert_same_heap(self.id);
        mutator.assert_runnable();
        mutator.safepoint();

        let layout = type_info_of::<T>().layout();

        let condition = *self.collect_condition.read();
        if condition(&self.collect_info()) {
            gc::collect(self, mutator, CollectionReason::Threshold);
        }

        if let Some(limit) = self.config.heap_limit {
            if self.live_bytes().saturating_add(layout.size()) > limit {
                gc::collect(self, mutator, CollectionReason::HeapLimit);
                let live = self.live_bytes();
                if live.saturating_add(layout.size()) > limit {
                    return Err(AllocError::HeapLimitExceeded {
                        requested: layout.size(),
                        live,
                        limit,
                    });
                }
            }
        }

        // SAFETY: the layout is never zero-sized; it always contains the header.
        let raw = unsafe { alloc(layout) }.cast::<ObjBox<T>>();
        let Some(ptr) = NonNull::new(raw) else {
            handle_alloc_error(layout);
        };
        // SAFETY: freshly allocated with the layout of `ObjBox<T>`.
        unsafe { ptr.as_ptr().write(ObjBox::new(value, self.id)) };

        // The header starts with a root count of one, owned by the returned root.
        let gc = Gc::from_box(ptr);
        self.objects.lock().push(gc.as_obj_ref());
        self.live_bytes.fetch_add(layout.size(), Ordering::Relaxed);
        self.live_objects.fetch_add(1, Ordering::Relaxed);
        self.bytes_since_collect
            .fetch_add(layout.size(), Ordering::Relaxed);

        Ok(Root::adopt(gc))
    }

    /// Runs a full collection on behalf of `mutator`.
    ///
    /// If another thread is already collecting, parks until it finishes and
    /// returns `false`.
    ///
    /// # Panics
    ///
    /// Panics if `mutator` is not runnable or belongs to another heap.
    pub fn collect(&self, mutator: &Mutator<'_>) -> bool {
        gc::collect(self, mutator, CollectionReason::Explicit)
    }

    /// Replaces the function that decides whether an allocation should first
    /// run a collection.
    pub fn set_collect_condition(&self, condition: CollectCondition) {
        *self.collect_condition.write() = condition;
    }

    /// Snapshot of the statistics fed to the collect condition.
    #[must_use]
    pub fn collect_info(&self) -> CollectInfo {
        CollectInfo::new(
            self.bytes_since_collect.load(Ordering::Relaxed),
            self.live_bytes(),
            self.object_count(),
            self.config.collect_threshold,
        )
    }

    /// The configuration this heap was created with.
    #[must_use]
    pub const fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Bytes held by allocated, not yet swept objects.
    #[must_use]
    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::Relaxed)
    }

    /// Number of allocated, not yet swept objects.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.live_objects.load(Ordering::Relaxed)
    }

    /// Number of collections this heap has run.
    #[must_use]
    pub fn total_collections(&self) -> usize {
        self.total_collections.load(Ordering::Relaxed)
    }

    /// Metrics of the most recent collection.
    #[must_use]
    pub fn last_gc_metrics(&self) -> GcMetrics {
        *self.last_metrics.lock()
    }

    /// Number of currently attached mutators.
    #[must_use]
    pub fn mutator_count(&self) -> usize {
        self.registry.thread_count()
    }

    pub(crate) const fn id(&self) -> HeapId {
        self.id
    }

    pub(crate) const fn registry(&self) -> &ThreadRegistry {
        &self.registry
    }

    pub(crate) const fn objects(&self) -> &Mutex<Vec<ObjRef>> {
        &self.objects
    }

    /// Accounts for a finished collection and returns its sequence number.
    pub(crate) fn finish_collection(
        &self,
        bytes_reclaimed: usize,
        objects_reclaimed: usize,
    ) -> usize {
        self.live_bytes.fetch_sub(bytes_reclaimed, Ordering::Relaxed);
        self.live_objects
            .fetch_sub(objects_reclaimed, Ordering::Relaxed);
        self.bytes_since_collect.store(0, Ordering::Relaxed);
        self.total_collections.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn record_metrics(&self, metrics: GcMetrics) {
        *self.last_metrics.lock() = metrics;
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        let objects = std::mem::take(self.objects.get_mut());
        // SAFETY: no mutator or root can outlive the heap borrow they hold,
        // so every object is unreachable and freed exactly once here.
        unsafe { Sweeper::new(objects) }.run();
    }
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("config", &self.config)
            .field("live_bytes", &self.live_bytes())
            .field("objects", &self.object_count())
            .field("mutators", &self.mutator_count())
            .finish_non_exhaustive()
    }
}

/// Frees a batch of unreachable objects.
///
/// If a destructor panics, the objects that have not been freed yet are still
/// dropped and deallocated while the panic unwinds.
pub(crate) struct Sweeper {
    pending: std::vec::IntoIter<ObjRef>,
    extra_released: usize,
}

impl Sweeper {
    /// # Safety
    ///
    /// Every object in `dead` must be an unreachable object of this heap that
    /// is listed nowhere else, so that it is freed exactly once.
    pub(crate) unsafe fn new(dead: Vec<ObjRef>) -> Self {
        Self {
            pending: dead.into_iter(),
            extra_released: 0,
        }
    }

    /// Frees every pending object. Returns the number of side tables released.
    pub(crate) fn run(&mut self) -> usize {
        while let Some(obj) = self.pending.next() {
            // SAFETY: guaranteed by `Sweeper::new`.
            if unsafe { free_object(obj) } {
                self.extra_released += 1;
            }
        }
        self.extra_released
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.run();
    }
}

/// Returns the memory of an object even if its destructor panics.
struct Dealloc {
    ptr: *mut u8,
    layout: Layout,
}

impl Drop for Dealloc {
    fn drop(&mut self) {
        // SAFETY: allocated in `Heap::allocate` with this layout.
        unsafe { dealloc(self.ptr, self.layout) };
    }
}

/// Drops and deallocates `obj` along with its side table.
///
/// Returns whether a side table was freed.
///
/// # Safety
///
/// `obj` must be an unreachable object of this heap that is freed only once.
unsafe fn free_object(obj: ObjRef) -> bool {
    // SAFETY: the object is still allocated until `Dealloc` runs.
    let header = unsafe { obj.header() };
    let type_info = header.type_info();
    // SAFETY: caller guarantees nobody uses the side table any more.
    let extra_released = unsafe { ExtraObjectData::release(header) };
    let _dealloc = Dealloc {
        ptr: obj.as_ptr().as_ptr().cast::<u8>(),
        layout: type_info.layout(),
    };
    // SAFETY: the drop fn matches the object's type and runs once.
    unsafe { (type_info.drop_fn())(obj) };
    extra_released
}
