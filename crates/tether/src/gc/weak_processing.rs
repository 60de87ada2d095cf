//! Weak-reference processing.
//!
//! Runs after marking and before sweeping. Each live weak handle is cached in
//! its referent's side table (racing losers are dropped at once and never
//! survive a collection), so visiting the side tables visits every handle:
//!
//! | handle   | referent | action                                  |
//! |----------|----------|-----------------------------------------|
//! | marked   | marked   | nothing                                 |
//! | marked   | unmarked | dispose: later dereferences see `None`  |
//! | unmarked | any      | unlink from the side table              |

use crate::object::ObjRef;
use crate::weak::{
    dispose_regular_weak_reference_impl, regular_weak_reference_impl_base_object_unsafe,
};

#[cfg(feature = "tracing")]
use crate::tracing::internal::log_weak_processing;

/// Outcome of one weak-processing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct WeakStats {
    /// Handles disposed because their referent is dying.
    pub(crate) cleared: usize,
    /// Dying handles removed from their referent's side table.
    pub(crate) unlinked: usize,
}

/// Clears and unlinks weak handles according to the mark bits.
///
/// # Safety
///
/// Must run while every other mutator is stopped, after marking has
/// completed and before any object in `objects` has been swept.
pub(crate) unsafe fn process_weak_references(objects: &[ObjRef]) -> WeakStats {
    let mut stats = WeakStats::default();

    for &obj in objects {
        // SAFETY: nothing has been swept yet.
        let header = unsafe { obj.header() };
        let Some(extra) = header.extra_data() else {
            continue;
        };
        let Some(handle) = extra.regular_weak_reference_impl() else {
            continue;
        };

        // SAFETY: the handle is a listed object and nothing has been swept yet.
        if !unsafe { handle.header() }.is_marked() {
            // The next `create` for a surviving object allocates a fresh handle.
            if extra.clear_regular_weak_reference_impl(handle) {
                stats.unlinked += 1;
            }
            continue;
        }

        if header.is_marked() {
            continue;
        }

        // SAFETY: the handle is marked, so it survives this collection.
        let weak_ref = unsafe { handle.as_ref() };
        // SAFETY: we are inside the stopped-world window and only compare the
        // pointer; a handle disposed earlier by hand reads as `None`.
        if unsafe { regular_weak_reference_impl_base_object_unsafe(weak_ref) } == Some(obj) {
            dispose_regular_weak_reference_impl(weak_ref);
            stats.cleared += 1;
        }
    }

    #[cfg(feature = "tracing")]
    log_weak_processing(stats.cleared, stats.unlinked);

    stats
}
