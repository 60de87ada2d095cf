//! Weak references for a multi-mutator, garbage-collected heap.
//!
//! `tether` provides a managed [`Heap`] with a stop-the-world mark-sweep
//! collector and a weak-reference subsystem built on a lazily allocated
//! per-object side table ([`ExtraObjectData`]). Each object has at most one
//! weak handle ([`WeakReferenceImpl`]), shared by every weak reference to it
//! and cleared by the collector when the object dies.
//!
//! # Quick Start
//!
//! ```ignore
//! use tether::{Gc, Heap, Trace};
//!
//! #[derive(Trace)]
//! struct Node {
//!     value: i32,
//!     next: Option<Gc<Node>>,
//! }
//!
//! let heap = Heap::new();
//! let mutator = heap.attach();
//!
//! let node = heap.allocate(&mutator, Node { value: 1, next: None })?;
//! let weak = node.downgrade(&mutator)?;
//! assert_eq!(weak.upgrade(&mutator).map(|n| n.value), Some(1));
//!
//! drop(node);
//! mutator.collect();
//! assert!(weak.upgrade(&mutator).is_none());
//! ```
//!
//! # Threads
//!
//! Every thread that touches a heap holds a [`Mutator`] obtained from
//! [`Heap::attach`]. Collections wait until every other mutator is parked at
//! a safepoint or running native code (see [`Mutator::enter_native`]).
//! Creating and dereferencing weak references requires a runnable mutator
//! and panics otherwise.
//!
//! # Destructors
//!
//! Unreachable objects are dropped in no particular order. A `Drop` impl of a
//! managed type must not dereference the [`Gc`] edges it holds.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod error;
mod extra;
mod gc;
mod heap;
pub mod metrics;
mod object;
mod root;
mod thread;
mod trace;
pub mod tracing;
mod weak;

pub use error::AllocError;
pub use extra::ExtraObjectData;
pub use gc::{default_collect_condition, CollectCondition, CollectInfo};
pub use heap::{Heap, HeapConfig, DEFAULT_COLLECT_THRESHOLD};
pub use metrics::{CollectionReason, GcMetrics};
pub use object::{Gc, ObjHeader, ObjRef, TypeInfo};
pub use root::{AnyRoot, Root};
pub use thread::{Mutator, NativeGuard, ThreadState};
pub use trace::{Trace, Visitor};
pub use weak::{
    create_regular_weak_reference_impl, deref_regular_weak_reference_impl,
    dispose_regular_weak_reference_impl, regular_weak_reference_impl_base_object_unsafe, WeakRef,
    WeakReferenceImpl,
};

// Re-export derive macro when feature is enabled
#[cfg(feature = "derive")]
pub use tether_derive::Trace;

#[cfg(any(test, feature = "test-util"))]
#[doc(hidden)]
pub mod test_util {
    use crate::{ObjRef, Root, Trace};

    /// Returns `true` once a side table has been installed for `root`'s object.
    pub fn has_extra_data<T: Trace + Send + Sync + 'static>(root: &Root<'_, T>) -> bool {
        root.header().extra_data().is_some()
    }

    /// The weak handle currently cached in the side table of `root`'s object.
    pub fn cached_weak_handle<T: Trace + Send + Sync + 'static>(root: &Root<'_, T>) -> Option<ObjRef> {
        root.header()
            .extra_data()
            .and_then(crate::ExtraObjectData::regular_weak_reference_impl)
            .map(crate::Gc::as_obj_ref)
    }
}
