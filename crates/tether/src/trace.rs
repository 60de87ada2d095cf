//! Trace trait and Visitor pattern for garbage collection.
//!
//! Types that implement `Trace` can be allocated on a [`Heap`](crate::Heap)
//! and are traversed by the marker. Fields that are not [`Gc`] edges (and do
//! not contain any) trace to nothing.

use std::cell::Cell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::hash::BuildHasher;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::object::{Gc, ObjRef};

// ============================================================================
// Core Traits
// ============================================================================

/// A type that can be traced by the garbage collector.
///
/// # Safety
///
/// Implementations **MUST** report every [`Gc`] edge they own by calling
/// `visitor.visit()` on it (usually by calling `trace` on each field). A
/// missed edge lets the collector free an object that is still referenced.
///
/// Prefer `#[derive(Trace)]` over a manual implementation.
///
/// ```ignore
/// unsafe impl Trace for Pair {
///     fn trace(&self, visitor: &mut impl Visitor) {
///         self.left.trace(visitor);
///         self.right.trace(visitor);
///     }
/// }
/// ```
pub unsafe trait Trace {
    /// Visit all `Gc` edges contained within this value.
    fn trace(&self, visitor: &mut impl Visitor);
}

/// A visitor that receives every edge reported by [`Trace::trace`].
pub trait Visitor {
    /// Visit a managed edge.
    fn visit<T: Trace + 'static>(&mut self, gc: &Gc<T>);
}

// ============================================================================
// MarkVisitor - the marker's worklist
// ============================================================================

/// Marks objects and queues newly marked ones for scanning.
pub(crate) struct MarkVisitor {
    worklist: Vec<ObjRef>,
    objects_marked: usize,
}

impl MarkVisitor {
    pub(crate) const fn new() -> Self {
        Self {
            worklist: Vec::new(),
            objects_marked: 0,
        }
    }

    /// Mark `obj` and queue it if it was not marked yet.
    ///
    /// # Safety
    ///
    /// `obj` must be a live object of the heap being collected.
    pub(crate) unsafe fn mark(&mut self, obj: ObjRef) {
        // SAFETY: upheld by the caller.
        if unsafe { obj.header() }.try_mark() {
            self.objects_marked += 1;
            self.worklist.push(obj);
        }
    }

    /// Scan queued objects until the transitive closure is marked.
    ///
    /// # Safety
    ///
    /// Every queued object must be live and no mutator may run concurrently.
    pub(crate) unsafe fn drain(&mut self) {
        while let Some(obj) = self.worklist.pop() {
            // SAFETY: queued objects are live (caller contract).
            let trace_fn = unsafe { obj.header() }.type_info().trace_fn();
            // SAFETY: the trace fn belongs to this object's type.
            unsafe { trace_fn(obj, self) };
        }
    }

    pub(crate) const fn objects_marked(&self) -> usize {
        self.objects_marked
    }
}

impl Visitor for MarkVisitor {
    #[inline]
    fn visit<T: Trace + 'static>(&mut self, gc: &Gc<T>) {
        // SAFETY: an edge reported by a live object points at a live object.
        unsafe { self.mark(gc.as_obj_ref()) };
    }
}

// ============================================================================
// Trace implementations for leaf types
// ============================================================================

macro_rules! impl_trace_for_leaves {
    ($($t:ty),* $(,)?) => {
        $(
            // SAFETY: contains no Gc edges.
            unsafe impl Trace for $t {
                #[inline]
                fn trace(&self, _visitor: &mut impl Visitor) {}
            }
        )*
    };
}

impl_trace_for_leaves! {
    i8, i16, i32, i64, i128, isize,
    u8, u16, u32, u64, u128, usize,
    f32, f64,
    bool, char, (),
    String, str,
    std::time::Duration,
    std::time::Instant,
    std::sync::atomic::AtomicBool,
    std::sync::atomic::AtomicU32,
    std::sync::atomic::AtomicU64,
    std::sync::atomic::AtomicUsize,
    std::sync::atomic::AtomicI64,
}

// ============================================================================
// Trace implementations for containers
// ============================================================================

// SAFETY: forwards to the boxed value.
unsafe impl<T: Trace + ?Sized> Trace for Box<T> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        (**self).trace(visitor);
    }
}

// SAFETY: forwards to the shared value.
unsafe impl<T: Trace + ?Sized> Trace for Arc<T> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        (**self).trace(visitor);
    }
}

// SAFETY: forwards to every element.
unsafe impl<T: Trace> Trace for [T] {
    fn trace(&self, visitor: &mut impl Visitor) {
        for item in self {
            item.trace(visitor);
        }
    }
}

// SAFETY: forwards to every element.
unsafe impl<T: Trace, const N: usize> Trace for [T; N] {
    fn trace(&self, visitor: &mut impl Visitor) {
        self.as_slice().trace(visitor);
    }
}

// SAFETY: forwards to every element.
unsafe impl<T: Trace> Trace for Vec<T> {
    fn trace(&self, visitor: &mut impl Visitor) {
        self.as_slice().trace(visitor);
    }
}

// SAFETY: forwards to every element.
unsafe impl<T: Trace> Trace for VecDeque<T> {
    fn trace(&self, visitor: &mut impl Visitor) {
        for item in self {
            item.trace(visitor);
        }
    }
}

// SAFETY: forwards to the contained value, if any.
unsafe impl<T: Trace> Trace for Option<T> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        if let Some(value) = self {
            value.trace(visitor);
        }
    }
}

// SAFETY: forwards to whichever variant is present.
unsafe impl<T: Trace, E: Trace> Trace for Result<T, E> {
    fn trace(&self, visitor: &mut impl Visitor) {
        match self {
            Ok(value) => value.trace(visitor),
            Err(err) => err.trace(visitor),
        }
    }
}

// SAFETY: `Copy` contents can be read without borrowing.
unsafe impl<T: Trace + Copy> Trace for Cell<T> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        self.get().trace(visitor);
    }
}

// SAFETY: forwards to keys and values.
unsafe impl<K: Trace, V: Trace, S: BuildHasher> Trace for HashMap<K, V, S> {
    fn trace(&self, visitor: &mut impl Visitor) {
        for (key, value) in self {
            key.trace(visitor);
            value.trace(visitor);
        }
    }
}

// SAFETY: forwards to keys and values.
unsafe impl<K: Trace, V: Trace> Trace for BTreeMap<K, V> {
    fn trace(&self, visitor: &mut impl Visitor) {
        for (key, value) in self {
            key.trace(visitor);
            value.trace(visitor);
        }
    }
}

// SAFETY: holds no value.
unsafe impl<T: ?Sized> Trace for PhantomData<T> {
    #[inline]
    fn trace(&self, _visitor: &mut impl Visitor) {}
}

macro_rules! impl_trace_for_tuples {
    () => {};
    ($first:ident $(, $rest:ident)*) => {
        // SAFETY: forwards to every component.
        unsafe impl<$first: Trace $(, $rest: Trace)*> Trace for ($first, $($rest,)*) {
            #[allow(non_snake_case)]
            fn trace(&self, visitor: &mut impl Visitor) {
                let ($first, $($rest,)*) = self;
                $first.trace(visitor);
                $($rest.trace(visitor);)*
            }
        }
        impl_trace_for_tuples!($($rest),*);
    };
}

impl_trace_for_tuples!(A, B, C, D, E, F);

#[cfg(test)]
mod tests {
    use super::*;

    /// Counts edges without touching the targets.
    struct CountingVisitor(usize);

    impl Visitor for CountingVisitor {
        fn visit<T: Trace + 'static>(&mut self, _gc: &Gc<T>) {
            self.0 += 1;
        }
    }

    #[test]
    fn leaves_report_no_edges() {
        let mut visitor = CountingVisitor(0);
        42_u32.trace(&mut visitor);
        String::from("leaf").trace(&mut visitor);
        (1_i32, 2.0_f64, 'c').trace(&mut visitor);
        vec![Some(1_u8), None].trace(&mut visitor);
        assert_eq!(visitor.0, 0);
    }

    #[test]
    fn empty_containers_report_no_edges() {
        let mut visitor = CountingVisitor(0);
        let none: Option<Gc<u32>> = None;
        none.trace(&mut visitor);
        Vec::<Gc<u32>>::new().trace(&mut visitor);
        HashMap::<u32, Gc<u32>>::new().trace(&mut visitor);
        assert_eq!(visitor.0, 0);
    }
}
