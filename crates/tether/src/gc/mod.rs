//! Garbage collection.
//!
//! This module provides:
//! - the collect condition consulted before each allocation
//! - the stop-the-world mark-sweep driver
//! - weak-reference processing between mark and sweep

#[allow(clippy::module_inception)]
mod gc;
mod weak_processing;

pub use gc::{default_collect_condition, CollectCondition, CollectInfo};

pub(crate) use gc::collect;
