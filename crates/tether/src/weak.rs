//! Weak references.
//!
//! A weak reference is represented by a managed [`WeakReferenceImpl`] object
//! whose single field is an atomic, untraced pointer to its referent. Each
//! object has at most one such handle, cached in its
//! [`ExtraObjectData`] side table, so every weak reference to the same object
//! shares it.
//!
//! The handle's lifecycle is `Live(referred = target)` → `Cleared(referred =
//! null)`. Only the collector clears it, through
//! [`dispose_regular_weak_reference_impl`], and only while the referent is
//! being found unreachable. Cleared is terminal.
//!
//! # Examples
//!
//! ```ignore
//! use tether::Heap;
//!
//! let heap = Heap::new();
//! let mutator = heap.attach();
//!
//! let value = heap.allocate(&mutator, 42_u64)?;
//! let weak = value.downgrade(&mutator)?;
//! assert_eq!(*weak.upgrade(&mutator).unwrap(), 42);
//!
//! drop(value);
//! mutator.collect();
//! assert!(weak.upgrade(&mutator).is_none());
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::error::AllocError;
use crate::extra::ExtraObjectData;
use crate::object::{HeapId, ObjHeader, ObjRef};
use crate::root::{AnyRoot, Root};
use crate::thread::Mutator;
use crate::trace::{Trace, Visitor};

// ============================================================================
// WeakReferenceImpl - the managed handle object
// ============================================================================

/// The managed object behind every weak reference.
pub struct WeakReferenceImpl {
    /// The referent, or null once cleared. Never reported to the marker.
    referred: AtomicPtr<ObjHeader>,
    /// Heap of the referent, which is also the heap of the handle.
    heap: HeapId,
}

impl WeakReferenceImpl {
    pub(crate) fn new(referred: &ObjHeader) -> Self {
        Self {
            referred: AtomicPtr::new(ptr::from_ref(referred).cast_mut()),
            heap: referred.heap_id(),
        }
    }

    /// Returns `true` once the collector has cleared this handle.
    #[must_use]
    pub fn is_cleared(&self) -> bool {
        self.referred.load(Ordering::Acquire).is_null()
    }
}

impl fmt::Debug for WeakReferenceImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakReferenceImpl")
            .field("referred", &self.referred.load(Ordering::Relaxed))
            .finish()
    }
}

// SAFETY: the referent is deliberately not reported; that is what makes the
// reference weak.
unsafe impl Trace for WeakReferenceImpl {
    #[inline]
    fn trace(&self, _visitor: &mut impl Visitor) {}
}

// ============================================================================
// Manager operations
// ============================================================================

/// Returns the weak handle for `object`, creating it on first request.
///
/// Every call for the same live object returns the same handle, including
/// calls racing on different threads: a freshly allocated candidate is
/// published with a first-writer-wins compare-and-set, and a losing candidate
/// is left unreachable for the next collection.
///
/// # Panics
///
/// Panics if `mutator` is not in the runnable state, or if `object` lives on
/// a heap other than the mutator's. Both are invariant violations; they
/// unwind like any `assert!` rather than aborting the process.
///
/// # Errors
///
/// Propagates [`AllocError`] if allocating the handle fails.
pub fn create_regular_weak_reference_impl<'h, T: Trace + Send + Sync + 'static>(
    mutator: &Mutator<'h>,
    object: &Root<'h, T>,
) -> Result<Root<'h, WeakReferenceImpl>, AllocError> {
    mutator.assert_same_heap(object.header().heap_id());
    mutator.assert_runnable();

    let extra = ExtraObjectData::get_or_install(object.header());
    if let Some(weak_ref) = extra.regular_weak_reference_impl() {
        // SAFETY: a published handle is live (the collector unlinks dead ones
        // before sweeping) and we are runnable, so no collection can intervene.
        return Ok(unsafe { Root::from_gc(weak_ref) });
    }

    let candidate = mutator
        .heap()
        .allocate(mutator, WeakReferenceImpl::new(object.header()))?;
    let published = extra.get_or_set_regular_weak_reference_impl(candidate.as_gc());
    if published == candidate.as_gc() {
        return Ok(candidate);
    }

    #[cfg(feature = "tracing")]
    crate::tracing::internal::log_weak_publish_lost(object.obj_ref().addr());

    drop(candidate);
    // SAFETY: as above, the winner is published and we are still runnable.
    Ok(unsafe { Root::from_gc(published) })
}

/// Clears `weak_ref`. Every later dereference returns `None`.
///
/// This is the collector's clearing hook: it is called for each handle whose
/// referent was found unreachable, before the referent is swept. Only one
/// clearer may act on a handle at a time; concurrent dereferences are fine.
/// Disposing an already cleared handle is a no-op.
pub fn dispose_regular_weak_reference_impl(weak_ref: &WeakReferenceImpl) {
    weak_ref.referred.store(ptr::null_mut(), Ordering::Release);
}

/// Loads the referent of `weak_ref` and roots it.
///
/// Returns `None` once the handle has been cleared. Never blocks.
///
/// # Panics
///
/// Panics if `mutator` is not in the runnable state (loading and rooting the
/// referent must not straddle a collection), or if `weak_ref` belongs to a
/// heap other than the mutator's.
#[must_use]
pub fn deref_regular_weak_reference_impl<'h>(
    mutator: &Mutator<'h>,
    weak_ref: &WeakReferenceImpl,
) -> Option<AnyRoot<'h>> {
    mutator.assert_same_heap(weak_ref.heap);
    mutator.assert_runnable();
    let referred = NonNull::new(weak_ref.referred.load(Ordering::Acquire))?;
    // SAFETY: a non-null referent is live: the collector clears handles before
    // sweeping their referents, and it cannot run while we are runnable.
    Some(unsafe { AnyRoot::new(ObjRef::from_non_null(referred)) })
}

/// Reads the referent of `weak_ref` without rooting it.
///
/// # Safety
///
/// The returned pointer is not protected from collection or disposal. The
/// caller must already hold a stronger guarantee for as long as it uses the
/// pointer, for example by running inside the collector's weak-processing
/// pass, and must not store it beyond that window.
#[must_use]
pub unsafe fn regular_weak_reference_impl_base_object_unsafe(
    weak_ref: &WeakReferenceImpl,
) -> Option<ObjRef> {
    NonNull::new(weak_ref.referred.load(Ordering::Acquire)).map(ObjRef::from_non_null)
}

// ============================================================================
// WeakRef<T> - typed convenience wrapper
// ============================================================================

/// A typed weak reference to a managed `T`.
///
/// Wraps a rooted handle to the object's [`WeakReferenceImpl`]. Cloning a
/// `WeakRef` shares the handle.
pub struct WeakRef<'h, T: Trace + Send + Sync + 'static> {
    handle: Root<'h, WeakReferenceImpl>,
    _marker: PhantomData<fn() -> T>,
}

impl<'h, T: Trace + Send + Sync + 'static> WeakRef<'h, T> {
    /// Creates (or fetches) the weak reference for `target`.
    ///
    /// # Errors
    ///
    /// Propagates [`AllocError`] if allocating the handle fails.
    pub fn new(mutator: &Mutator<'h>, target: &Root<'h, T>) -> Result<Self, AllocError> {
        create_regular_weak_reference_impl(mutator, target).map(|handle| Self {
            handle,
            _marker: PhantomData,
        })
    }

    /// Returns a root to the referent, or `None` once it has been collected.
    #[must_use]
    pub fn upgrade(&self, mutator: &Mutator<'h>) -> Option<Root<'h, T>> {
        deref_regular_weak_reference_impl(mutator, &self.handle)
            .and_then(|root| root.downcast::<T>().ok())
    }

    /// Returns `true` once the referent has been collected.
    #[must_use]
    pub fn is_cleared(&self) -> bool {
        self.handle.is_cleared()
    }

    /// The shared handle object.
    #[must_use]
    pub const fn handle(&self) -> &Root<'h, WeakReferenceImpl> {
        &self.handle
    }

    /// Returns `true` if both weak references share a handle.
    #[must_use]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Root::ptr_eq(&this.handle, &other.handle)
    }
}

impl<T: Trace + Send + Sync + 'static> Clone for WeakRef<'_, T> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Trace + Send + Sync + 'static> fmt::Debug for WeakRef<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakRef")
            .field("handle", &self.handle.obj_ref())
            .field("cleared", &self.is_cleared())
            .finish()
    }
}

impl<'h, T: Trace + Send + Sync + 'static> Root<'h, T> {
    /// Creates (or fetches) the weak reference for this object.
    ///
    /// # Errors
    ///
    /// Propagates [`AllocError`] if allocating the handle fails.
    pub fn downgrade(&self, mutator: &Mutator<'h>) -> Result<WeakRef<'h, T>, AllocError> {
        WeakRef::new(mutator, self)
    }
}
