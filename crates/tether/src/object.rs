//! Managed object layout.
//!
//! Every managed allocation is an [`ObjBox<T>`]: an [`ObjHeader`] followed by
//! the user value. The header carries the per-type [`TypeInfo`] vtable, the
//! root count, the mark bit, and one pointer-sized slot for the lazily
//! installed [`ExtraObjectData`] side table.

#![allow(clippy::ptr_as_ptr)]

use std::alloc::Layout;
use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};

use crate::extra::ExtraObjectData;
use crate::trace::{MarkVisitor, Trace, Visitor};

// ============================================================================
// TypeInfo - per-type vtable
// ============================================================================

pub(crate) type TraceFn = unsafe fn(ObjRef, &mut MarkVisitor);
pub(crate) type DropFn = unsafe fn(ObjRef);

/// Static per-type metadata referenced from every object header.
pub struct TypeInfo {
    type_name: fn() -> &'static str,
    type_id: fn() -> TypeId,
    layout: Layout,
    trace_fn: TraceFn,
    drop_fn: DropFn,
}

impl TypeInfo {
    /// Name of the managed type, for diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        (self.type_name)()
    }

    /// `TypeId` of the managed value (not of the `ObjBox`).
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        (self.type_id)()
    }

    /// Layout of the whole `ObjBox`, header included.
    #[must_use]
    pub const fn layout(&self) -> Layout {
        self.layout
    }

    pub(crate) const fn trace_fn(&self) -> TraceFn {
        self.trace_fn
    }

    pub(crate) const fn drop_fn(&self) -> DropFn {
        self.drop_fn
    }
}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeInfo")
            .field("type_name", &self.type_name())
            .field("size", &self.layout.size())
            .field("align", &self.layout.align())
            .finish()
    }
}

// Associated consts are promoted to `'static`, which gives one vtable per `T`
// without a registry.
pub(crate) fn type_info_of<T: Trace + Send + Sync + 'static>() -> &'static TypeInfo {
    trait HasTypeInfo: Trace + Sized + 'static {
        const TYPE_INFO: &'static TypeInfo;
    }

    impl<T: Trace + Send + Sync + 'static> HasTypeInfo for T {
        const TYPE_INFO: &'static TypeInfo = &TypeInfo {
            type_name: std::any::type_name::<T>,
            type_id: TypeId::of::<T>,
            layout: Layout::new::<ObjBox<T>>(),
            trace_fn: ObjBox::<T>::trace_erased,
            drop_fn: ObjBox::<T>::drop_erased,
        };
    }

    T::TYPE_INFO
}

// ============================================================================
// HeapId
// ============================================================================

/// Identity of the heap that owns an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct HeapId(usize);

impl HeapId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicUsize = AtomicUsize::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

// ============================================================================
// ObjHeader
// ============================================================================

/// Header shared by all managed objects.
#[repr(C)]
pub struct ObjHeader {
    type_info: &'static TypeInfo,
    heap: HeapId,
    /// Side table slot. Null until the first weak reference request.
    extra: AtomicPtr<ExtraObjectData>,
    /// Number of live [`Root`](crate::Root)s pointing at this object.
    root_count: AtomicUsize,
    marked: AtomicBool,
}

impl ObjHeader {
    pub(crate) const fn new(type_info: &'static TypeInfo, heap: HeapId) -> Self {
        Self {
            type_info,
            heap,
            extra: AtomicPtr::new(std::ptr::null_mut()),
            root_count: AtomicUsize::new(1),
            marked: AtomicBool::new(false),
        }
    }

    /// The vtable of the object's type.
    #[must_use]
    pub const fn type_info(&self) -> &'static TypeInfo {
        self.type_info
    }

    /// Returns the installed side table, if any.
    #[must_use]
    pub fn extra_data(&self) -> Option<&ExtraObjectData> {
        let extra = self.extra.load(Ordering::Acquire);
        // SAFETY: a non-null slot points at a live `ExtraObjectData` owned by this
        // object; it is only released by the sweeper together with the object.
        unsafe { extra.as_ref() }
    }

    pub(crate) const fn heap_id(&self) -> HeapId {
        self.heap
    }

    pub(crate) const fn extra_slot(&self) -> &AtomicPtr<ExtraObjectData> {
        &self.extra
    }

    /// Current number of roots.
    #[must_use]
    pub fn root_count(&self) -> usize {
        self.root_count.load(Ordering::Acquire)
    }

    pub(crate) fn inc_root(&self) {
        self.root_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dec_root(&self) {
        let previous = self.root_count.fetch_sub(1, Ordering::Release);
        debug_assert!(previous > 0, "root count underflow");
    }

    pub(crate) fn is_marked(&self) -> bool {
        self.marked.load(Ordering::Acquire)
    }

    /// Sets the mark bit. Returns `true` if this call marked the object.
    pub(crate) fn try_mark(&self) -> bool {
        !self.marked.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn clear_mark(&self) {
        self.marked.store(false, Ordering::Relaxed);
    }
}

impl fmt::Debug for ObjHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjHeader")
            .field("type", &self.type_info.type_name())
            .field("roots", &self.root_count())
            .field("has_extra", &!self.extra.load(Ordering::Relaxed).is_null())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ObjBox - header + value
// ============================================================================

/// The heap allocation wrapping a managed value.
#[repr(C)]
pub struct ObjBox<T> {
    pub(crate) header: ObjHeader,
    pub(crate) value: T,
}

impl<T: Trace + Send + Sync + 'static> ObjBox<T> {
    pub(crate) fn new(value: T, heap: HeapId) -> Self {
        Self {
            header: ObjHeader::new(type_info_of::<T>(), heap),
            value,
        }
    }

    unsafe fn trace_erased(obj: ObjRef, visitor: &mut MarkVisitor) {
        // SAFETY: the vtable is only reachable from headers of `ObjBox<T>`.
        let this = unsafe { obj.as_ptr().cast::<Self>().as_ref() };
        this.value.trace(visitor);
    }

    unsafe fn drop_erased(obj: ObjRef) {
        // SAFETY: caller guarantees `obj` is an `ObjBox<T>` that is dropped once.
        unsafe { std::ptr::drop_in_place(obj.as_ptr().cast::<Self>().as_ptr()) };
    }
}

// ============================================================================
// ObjRef - type-erased object pointer
// ============================================================================

/// A raw, unrooted, type-erased pointer to a managed object.
///
/// Holding an `ObjRef` does not keep the object alive. Reading through it is
/// only valid while something else guarantees the object has not been swept.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef(NonNull<ObjHeader>);

impl ObjRef {
    pub(crate) const fn from_non_null(ptr: NonNull<ObjHeader>) -> Self {
        Self(ptr)
    }

    pub(crate) fn from_header(header: &ObjHeader) -> Self {
        Self(NonNull::from(header))
    }

    /// Raw header pointer.
    #[must_use]
    pub const fn as_ptr(self) -> NonNull<ObjHeader> {
        self.0
    }

    /// Address of the object, for identity comparisons and logging.
    #[must_use]
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    /// Borrows the header.
    ///
    /// # Safety
    ///
    /// The object must not be swept for the duration of `'a`.
    #[must_use]
    pub const unsafe fn header<'a>(self) -> &'a ObjHeader {
        // SAFETY: upheld by the caller.
        unsafe { self.0.as_ref() }
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjRef({:#x})", self.addr())
    }
}

// SAFETY: only types that are `Send + Sync` can be allocated on the heap.
unsafe impl Send for ObjRef {}
// SAFETY: see above.
unsafe impl Sync for ObjRef {}

// ============================================================================
// Gc<T> - unrooted typed edge
// ============================================================================

/// An unrooted pointer to a managed `T`, used for edges inside managed values.
///
/// `Gc<T>` is traced: storing one in a reachable object keeps its target
/// alive. A `Gc<T>` held outside the heap (on the stack, in a Rust-owned
/// structure) is invisible to the collector; promote it with
/// [`Root::from_gc`](crate::Root::from_gc) or keep a [`Root`](crate::Root).
pub struct Gc<T> {
    ptr: NonNull<ObjBox<T>>,
    _marker: PhantomData<T>,
}

impl<T> Gc<T> {
    pub(crate) const fn from_box(ptr: NonNull<ObjBox<T>>) -> Self {
        Self {
            ptr,
            _marker: PhantomData,
        }
    }

    pub(crate) fn from_obj_ref(obj: ObjRef) -> Self {
        Self::from_box(obj.as_ptr().cast())
    }

    /// Erases the type.
    #[must_use]
    pub const fn as_obj_ref(self) -> ObjRef {
        ObjRef(self.ptr.cast())
    }

    /// Returns `true` if both point at the same allocation.
    #[must_use]
    pub fn ptr_eq(this: Self, other: Self) -> bool {
        this.ptr == other.ptr
    }

    /// Borrows the header.
    ///
    /// # Safety
    ///
    /// The object must not be swept for the duration of `'a`.
    pub(crate) const unsafe fn header<'a>(self) -> &'a ObjHeader {
        // SAFETY: upheld by the caller; the header is the first field.
        unsafe { &(*self.ptr.as_ptr()).header }
    }

    /// Borrows the value.
    ///
    /// # Safety
    ///
    /// The object must be reachable (rooted directly or through a rooted
    /// object) for the duration of `'a`.
    #[must_use]
    pub const unsafe fn as_ref<'a>(self) -> &'a T {
        // SAFETY: upheld by the caller.
        unsafe { &(*self.ptr.as_ptr()).value }
    }
}

impl<T> Clone for Gc<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Gc<T> {}

impl<T> PartialEq for Gc<T> {
    fn eq(&self, other: &Self) -> bool {
        Self::ptr_eq(*self, *other)
    }
}

impl<T> Eq for Gc<T> {}

impl<T> fmt::Debug for Gc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Gc({:p})", self.ptr)
    }
}

// SAFETY: Gc<T> is a pointer to a T that may be observed from any mutator.
unsafe impl<T: Send + Sync> Send for Gc<T> {}
// SAFETY: see above.
unsafe impl<T: Send + Sync> Sync for Gc<T> {}

// SAFETY: reports itself as an edge.
unsafe impl<T: Trace + 'static> Trace for Gc<T> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        visitor.visit(self);
    }
}
