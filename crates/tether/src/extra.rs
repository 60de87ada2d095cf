//! Per-object side table.
//!
//! Most objects never need more than their header. The few that do (today:
//! objects that have been the target of a weak reference request) get an
//! [`ExtraObjectData`] installed lazily into the header's side-table slot.
//! The entry is owned by its object and released by the sweeper when the
//! object is reclaimed.

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::object::{Gc, ObjHeader, ObjRef};
use crate::weak::WeakReferenceImpl;

/// Side-table entry attached to a managed object.
pub struct ExtraObjectData {
    /// The object this entry belongs to.
    base_object: ObjRef,
    /// Non-owning pointer to the object's weak handle, or null.
    ///
    /// Not traced: the handle is kept alive by whoever holds it, and the
    /// collector unlinks it here when it dies.
    regular_weak_reference_impl: AtomicPtr<ObjHeader>,
}

impl ExtraObjectData {
    fn new(base_object: ObjRef) -> Self {
        Self {
            base_object,
            regular_weak_reference_impl: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Returns the side table of `object`, installing it on first use.
    ///
    /// Concurrent callers on the same object race on a single compare-and-set
    /// of the header slot; the loser frees its candidate and every caller gets
    /// the winning entry.
    pub fn get_or_install(object: &ObjHeader) -> &Self {
        if let Some(extra) = object.extra_data() {
            return extra;
        }

        let candidate = Box::into_raw(Box::new(Self::new(ObjRef::from_header(object))));
        match object.extra_slot().compare_exchange(
            ptr::null_mut(),
            candidate,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            // SAFETY: we just published `candidate`; it lives as long as `object`.
            Ok(_) => unsafe { &*candidate },
            Err(installed) => {
                // SAFETY: `candidate` was never published.
                drop(unsafe { Box::from_raw(candidate) });
                // SAFETY: the slot only ever holds live entries owned by `object`.
                unsafe { &*installed }
            }
        }
    }

    /// The object this entry is attached to.
    #[must_use]
    pub const fn base_object(&self) -> ObjRef {
        self.base_object
    }

    /// The cached weak handle, if one has been published.
    #[must_use]
    pub fn regular_weak_reference_impl(&self) -> Option<Gc<WeakReferenceImpl>> {
        NonNull::new(self.regular_weak_reference_impl.load(Ordering::Acquire))
            .map(|ptr| Gc::from_obj_ref(ObjRef::from_non_null(ptr)))
    }

    /// Publishes `candidate` unless another handle is already installed.
    ///
    /// First writer wins: returns the handle that ends up published, which is
    /// `candidate` only if the slot was empty.
    pub(crate) fn get_or_set_regular_weak_reference_impl(
        &self,
        candidate: Gc<WeakReferenceImpl>,
    ) -> Gc<WeakReferenceImpl> {
        match self.regular_weak_reference_impl.compare_exchange(
            ptr::null_mut(),
            candidate.as_obj_ref().as_ptr().as_ptr(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => candidate,
            Err(installed) => {
                // SAFETY: the failed CAS observed a non-null value.
                let installed = unsafe { NonNull::new_unchecked(installed) };
                Gc::from_obj_ref(ObjRef::from_non_null(installed))
            }
        }
    }

    /// Unlinks `expected` if it is still the published handle.
    ///
    /// Called by the collector when the handle itself was found unreachable.
    pub(crate) fn clear_regular_weak_reference_impl(&self, expected: Gc<WeakReferenceImpl>) -> bool {
        self.regular_weak_reference_impl
            .compare_exchange(
                expected.as_obj_ref().as_ptr().as_ptr(),
                ptr::null_mut(),
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    /// Detaches and frees the side table of `object`, if any.
    ///
    /// Returns `true` if an entry was released.
    ///
    /// # Safety
    ///
    /// No reference obtained from [`ExtraObjectData::get_or_install`] or
    /// [`ObjHeader::extra_data`] for this object may be used afterwards. The
    /// sweeper calls this while the object is being reclaimed.
    pub(crate) unsafe fn release(object: &ObjHeader) -> bool {
        let extra = object.extra_slot().swap(ptr::null_mut(), Ordering::AcqRel);
        if extra.is_null() {
            return false;
        }
        // SAFETY: the slot owned this allocation and nobody else can reach it now.
        drop(unsafe { Box::from_raw(extra) });
        true
    }
}

impl std::fmt::Debug for ExtraObjectData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtraObjectData")
            .field("base_object", &self.base_object)
            .field(
                "regular_weak_reference_impl",
                &self.regular_weak_reference_impl.load(Ordering::Relaxed),
            )
            .finish()
    }
}
