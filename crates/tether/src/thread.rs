//! Mutator registration and thread states.
//!
//! Every thread that touches a [`Heap`] registers with it through
//! [`Heap::attach`] and receives a [`Mutator`]. A mutator is in one of three
//! states:
//!
//! | State       | May touch the heap | Collector waits for it |
//! |-------------|--------------------|------------------------|
//! | `Runnable`  | yes                | yes                    |
//! | `Native`    | no                 | no                     |
//! | `Suspended` | no (parked)        | no                     |
//!
//! Collections are cooperative: the collector raises `gc_requested` and waits
//! until every other registered mutator is `Native` or has parked itself at a
//! safepoint. Allocation polls the safepoint; long-running loops that do not
//! allocate should call [`Mutator::safepoint`].

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::heap::Heap;
use crate::object::HeapId;

/// Scheduling state of a registered mutator thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadState {
    /// Executing managed code; may read and write the heap.
    Runnable = 0,
    /// Executing code that promises not to touch the heap.
    Native = 1,
    /// Parked at a safepoint while a collection runs.
    Suspended = 2,
}

impl ThreadState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Runnable,
            1 => Self::Native,
            _ => Self::Suspended,
        }
    }

    /// Returns `true` if the collector may proceed while a thread is in this state.
    #[must_use]
    pub const fn is_stopped(self) -> bool {
        matches!(self, Self::Native | Self::Suspended)
    }
}

/// Per-thread registration record.
pub(crate) struct ThreadData {
    thread_id: std::thread::ThreadId,
    state: CachePadded<AtomicU8>,
}

impl ThreadData {
    fn new() -> Self {
        Self {
            thread_id: std::thread::current().id(),
            state: CachePadded::new(AtomicU8::new(ThreadState::Runnable as u8)),
        }
    }

    pub(crate) fn state(&self) -> ThreadState {
        ThreadState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ThreadState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

impl fmt::Debug for ThreadData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadData")
            .field("thread_id", &self.thread_id)
            .field("state", &self.state())
            .finish()
    }
}

// ============================================================================
// ThreadRegistry
// ============================================================================

/// The set of mutators attached to one heap, plus the safepoint handshake.
///
/// All state transitions that the collector depends on happen under `threads`,
/// so the collector can never miss a thread leaving `Runnable`, and a thread
/// can never resume while a collection is in progress.
pub(crate) struct ThreadRegistry {
    threads: Mutex<Vec<Arc<ThreadData>>>,
    /// Signalled when a thread stops (parks, goes native, or detaches).
    stopped: Condvar,
    /// Signalled when a collection finishes.
    resumed: Condvar,
    gc_requested: CachePadded<AtomicBool>,
}

impl ThreadRegistry {
    pub(crate) fn new() -> Self {
        Self {
            threads: Mutex::new(Vec::new()),
            stopped: Condvar::new(),
            resumed: Condvar::new(),
            gc_requested: CachePadded::new(AtomicBool::new(false)),
        }
    }

    fn register(&self) -> Arc<ThreadData> {
        let mut threads = self.threads.lock();
        // A thread must not become runnable in the middle of a collection.
        self.wait_for_collection(&mut threads);
        let data = Arc::new(ThreadData::new());
        threads.push(Arc::clone(&data));
        data
    }

    fn unregister(&self, data: &Arc<ThreadData>) {
        let mut threads = self.threads.lock();
        threads.retain(|t| !Arc::ptr_eq(t, data));
        self.stopped.notify_all();
    }

    pub(crate) fn thread_count(&self) -> usize {
        self.threads.lock().len()
    }

    #[inline]
    pub(crate) fn is_gc_requested(&self) -> bool {
        self.gc_requested.load(Ordering::Acquire)
    }

    fn wait_for_collection(&self, threads: &mut MutexGuard<'_, Vec<Arc<ThreadData>>>) {
        while self.gc_requested.load(Ordering::Acquire) {
            self.resumed.wait(threads);
        }
    }

    /// Parks `data` until the pending collection (if any) has finished.
    fn park(&self, data: &ThreadData) {
        let mut threads = self.threads.lock();
        if !self.gc_requested.load(Ordering::Acquire) {
            return;
        }
        data.set_state(ThreadState::Suspended);
        self.stopped.notify_all();
        self.wait_for_collection(&mut threads);
        data.set_state(ThreadState::Runnable);
    }

    fn enter_native(&self, data: &ThreadData) {
        let _threads = self.threads.lock();
        data.set_state(ThreadState::Native);
        self.stopped.notify_all();
    }

    fn leave_native(&self, data: &ThreadData) {
        let mut threads = self.threads.lock();
        self.wait_for_collection(&mut threads);
        data.set_state(ThreadState::Runnable);
    }

    /// Tries to become the collector. Returns `false` if another thread
    /// already requested a collection.
    pub(crate) fn request_collection(&self) -> bool {
        let _threads = self.threads.lock();
        self.gc_requested
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Blocks until every mutator other than `collector` is stopped.
    pub(crate) fn wait_for_rendezvous(&self, collector: &ThreadData) {
        let mut threads = self.threads.lock();
        while threads
            .iter()
            .any(|t| !std::ptr::eq(&**t, collector) && !t.state().is_stopped())
        {
            self.stopped.wait(&mut threads);
        }
    }

    /// Ends the collection and wakes every parked mutator.
    pub(crate) fn finish_collection(&self) {
        let _threads = self.threads.lock();
        self.gc_requested.store(false, Ordering::Release);
        self.resumed.notify_all();
    }
}

// ============================================================================
// Mutator
// ============================================================================

/// A thread's registration with a [`Heap`].
///
/// Obtained from [`Heap::attach`]; dropping it detaches the thread. A
/// `Mutator` is bound to the thread that created it and cannot be sent to
/// another one. Attach at most one mutator per thread and heap: a second,
/// idle registration on the same thread would stall every collection.
pub struct Mutator<'h> {
    heap: &'h Heap,
    data: Arc<ThreadData>,
    _not_send: PhantomData<*const ()>,
}

impl<'h> Mutator<'h> {
    pub(crate) fn attach(heap: &'h Heap) -> Self {
        let data = heap.registry().register();
        Self {
            heap,
            data,
            _not_send: PhantomData,
        }
    }

    /// The heap this mutator is attached to.
    #[must_use]
    pub const fn heap(&self) -> &'h Heap {
        self.heap
    }

    /// Current state of this thread.
    #[must_use]
    pub fn state(&self) -> ThreadState {
        self.data.state()
    }

    /// Returns `true` if this thread may touch the heap.
    #[must_use]
    pub fn is_runnable(&self) -> bool {
        self.state() == ThreadState::Runnable
    }

    /// Checks the precondition of every heap-mutating operation.
    ///
    /// # Panics
    ///
    /// Panics if this thread is not runnable. The breach is treated as fatal
    /// to the operation but reported by unwinding, not by aborting the
    /// process: a caller that catches the panic finds the thread state and
    /// the heap unchanged. Build with `panic = "abort"` for a hard stop.
    #[track_caller]
    pub fn assert_runnable(&self) {
        let state = self.state();
        assert!(
            state == ThreadState::Runnable,
            "mutator must be in the Runnable state, found {state:?}"
        );
    }

    /// Checks that an object or handle of heap `owner` may be used with this
    /// mutator.
    #[track_caller]
    pub(crate) fn assert_same_heap(&self, owner: HeapId) {
        assert!(
            self.heap.id() == owner,
            "mutator is attached to a different heap"
        );
    }

    /// Parks this thread if a collection has been requested, returning once
    /// it has finished.
    #[inline]
    pub fn safepoint(&self) {
        if self.heap.registry().is_gc_requested() {
            self.heap.registry().park(&self.data);
        }
    }

    /// Runs `f` in the native state, during which collections may proceed
    /// without waiting for this thread.
    ///
    /// `f` must not touch the heap; operations that require a runnable mutator
    /// panic if called from inside it.
    pub fn enter_native<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = NativeGuard::new(self);
        f()
    }

    /// Runs a full collection, or parks until a collection requested by
    /// another thread has finished.
    ///
    /// Returns `true` if this thread performed the collection.
    pub fn collect(&self) -> bool {
        self.heap.collect(self)
    }

    pub(crate) fn thread_data(&self) -> &ThreadData {
        &self.data
    }
}

impl Drop for Mutator<'_> {
    fn drop(&mut self) {
        self.heap.registry().unregister(&self.data);
    }
}

impl fmt::Debug for Mutator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutator")
            .field("thread", &self.data.thread_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Keeps a mutator in the native state until dropped.
///
/// Leaving the native state waits for any in-progress collection.
pub struct NativeGuard<'m, 'h> {
    mutator: &'m Mutator<'h>,
}

impl<'m, 'h> NativeGuard<'m, 'h> {
    /// Switches `mutator` to the native state.
    ///
    /// # Panics
    ///
    /// Panics if `mutator` is not runnable.
    #[must_use]
    pub fn new(mutator: &'m Mutator<'h>) -> Self {
        mutator.assert_runnable();
        mutator.heap.registry().enter_native(&mutator.data);
        Self { mutator }
    }
}

impl Drop for NativeGuard<'_, '_> {
    fn drop(&mut self) {
        self.mutator
            .heap
            .registry()
            .leave_native(&self.mutator.data);
    }
}
