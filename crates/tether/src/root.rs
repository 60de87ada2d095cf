//! Rooted references.
//!
//! A [`Root`] pins its object for the collector: while at least one root
//! exists, the object's header root count is non-zero and the marker treats
//! it as live. Roots are tied to the lifetime of the [`Heap`] they came from.

use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;

use crate::heap::Heap;
use crate::object::{Gc, ObjHeader, ObjRef};
use crate::trace::Trace;

/// A strong, rooted reference to a managed `T`.
///
/// Cloning a root increments the object's root count; dropping it decrements
/// it. Unlike [`Gc`], a root keeps its target alive across collections.
pub struct Root<'h, T: Trace + Send + Sync + 'static> {
    gc: Gc<T>,
    _heap: PhantomData<&'h Heap>,
}

impl<'h, T: Trace + Send + Sync + 'static> Root<'h, T> {
    /// Adopts an object whose root count was already incremented for us.
    pub(crate) const fn adopt(gc: Gc<T>) -> Self {
        Self {
            gc,
            _heap: PhantomData,
        }
    }

    /// Roots an object that is currently live.
    ///
    /// # Safety
    ///
    /// `gc` must point at a live object of the heap `'h`, and no collection may
    /// run between the caller observing it as live and this call returning.
    /// Holding a runnable [`Mutator`](crate::Mutator) without passing a
    /// safepoint satisfies the second condition.
    #[must_use]
    pub unsafe fn from_gc(gc: Gc<T>) -> Self {
        // SAFETY: upheld by the caller.
        unsafe { gc.header() }.inc_root();
        Self::adopt(gc)
    }

    /// The unrooted edge for this object, for storing inside other objects.
    #[must_use]
    pub const fn as_gc(&self) -> Gc<T> {
        self.gc
    }

    /// The type-erased object pointer.
    #[must_use]
    pub const fn obj_ref(&self) -> ObjRef {
        self.gc.as_obj_ref()
    }

    /// The object header.
    #[must_use]
    pub const fn header(&self) -> &ObjHeader {
        // SAFETY: rooted objects are never swept.
        unsafe { self.gc.header() }
    }

    /// Returns `true` if both roots point at the same object.
    #[must_use]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Gc::ptr_eq(this.gc, other.gc)
    }

    /// Number of roots currently pinning this object.
    #[must_use]
    pub fn root_count(this: &Self) -> usize {
        this.header().root_count()
    }
}

impl<T: Trace + Send + Sync + 'static> Deref for Root<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: rooted objects are never swept.
        unsafe { self.gc.as_ref() }
    }
}

impl<T: Trace + Send + Sync + 'static> Clone for Root<'_, T> {
    fn clone(&self) -> Self {
        // The count is already non-zero, so the collector cannot free the object
        // regardless of when it observes the increment.
        self.header().inc_root();
        Self::adopt(self.gc)
    }
}

impl<T: Trace + Send + Sync + 'static> Drop for Root<'_, T> {
    fn drop(&mut self) {
        self.header().dec_root();
    }
}

impl<T: Trace + Send + Sync + fmt::Debug + 'static> fmt::Debug for Root<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Root").field(&**self).finish()
    }
}

// ============================================================================
// AnyRoot - type-erased root
// ============================================================================

/// A rooted reference whose static type has been erased.
///
/// Returned by weak-reference dereference, which only knows the referent as
/// an object header.
pub struct AnyRoot<'h> {
    obj: ObjRef,
    _heap: PhantomData<&'h Heap>,
}

impl<'h> AnyRoot<'h> {
    /// Roots a live object.
    ///
    /// # Safety
    ///
    /// Same contract as [`Root::from_gc`].
    pub(crate) unsafe fn new(obj: ObjRef) -> Self {
        // SAFETY: upheld by the caller.
        unsafe { obj.header() }.inc_root();
        Self {
            obj,
            _heap: PhantomData,
        }
    }

    /// The type-erased object pointer.
    #[must_use]
    pub const fn obj_ref(&self) -> ObjRef {
        self.obj
    }

    /// The object header.
    #[must_use]
    pub const fn header(&self) -> &ObjHeader {
        // SAFETY: rooted objects are never swept.
        unsafe { self.obj.header() }
    }

    /// Name of the referent's type.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.header().type_info().type_name()
    }

    /// Returns `true` if the referent is a `T`.
    #[must_use]
    pub fn is<T: Trace + Send + Sync + 'static>(&self) -> bool {
        self.header().type_info().type_id() == TypeId::of::<T>()
    }

    /// Returns `true` if this root and `other` pin the same object.
    #[must_use]
    pub fn same_object<T: Trace + Send + Sync + 'static>(&self, other: &Root<'_, T>) -> bool {
        self.obj == other.obj_ref()
    }

    /// Recovers the static type, transferring the root.
    ///
    /// # Errors
    ///
    /// Returns `self` unchanged if the referent is not a `T`.
    pub fn downcast<T: Trace + Send + Sync + 'static>(self) -> Result<Root<'h, T>, Self> {
        if !self.is::<T>() {
            return Err(self);
        }
        let gc = Gc::from_obj_ref(self.obj);
        std::mem::forget(self);
        Ok(Root::adopt(gc))
    }
}

impl<'h, T: Trace + Send + Sync + 'static> From<Root<'h, T>> for AnyRoot<'h> {
    fn from(root: Root<'h, T>) -> Self {
        let obj = root.obj_ref();
        std::mem::forget(root);
        Self {
            obj,
            _heap: PhantomData,
        }
    }
}

impl Clone for AnyRoot<'_> {
    fn clone(&self) -> Self {
        self.header().inc_root();
        Self {
            obj: self.obj,
            _heap: PhantomData,
        }
    }
}

impl Drop for AnyRoot<'_> {
    fn drop(&mut self) {
        self.header().dec_root();
    }
}

impl fmt::Debug for AnyRoot<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyRoot")
            .field("obj", &self.obj)
            .field("type", &self.type_name())
            .finish()
    }
}
