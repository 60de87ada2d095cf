//! Error types.

use thiserror::Error;

/// Failure to allocate a managed object.
///
/// Exhaustion of process memory is not reported here: like the standard
/// collections, the heap aborts through [`std::alloc::handle_alloc_error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The configured heap limit would be exceeded even after a collection.
    #[error("heap limit exceeded: requested {requested} bytes with {live} live of {limit} allowed")]
    HeapLimitExceeded {
        /// Size of the failed allocation, header included.
        requested: usize,
        /// Bytes held by live objects after the emergency collection.
        live: usize,
        /// The configured limit.
        limit: usize,
    },
}
