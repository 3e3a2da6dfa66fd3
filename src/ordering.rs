//! Standard memory orderings for concurrent node access.
//!
//! These constants ensure consistent ordering usage across the codebase
//! and make the intent clear at each access point.

use std::sync::atomic::Ordering;

/// Ordering for reading child pointers and counts during descent.
/// Pairs with the writer's Release stores.
pub const READ_ORD: Ordering = Ordering::Acquire;

/// Ordering for publishing child pointers and counts.
/// Pairs with the reader's Acquire loads.
pub const WRITE_ORD: Ordering = Ordering::Release;

/// Ordering for CAS success (split claim, split-counter acquire).
pub const CAS_SUCCESS: Ordering = Ordering::AcqRel;

/// Ordering for CAS failure.
/// Only needs to observe the current value.
pub const CAS_FAILURE: Ordering = Ordering::Acquire;

/// Ordering for counters whose exact value is repaired after the build
/// (`leaves_below`) or that are only mutated under the split lock.
pub const RELAXED: Ordering = Ordering::Relaxed;

/// Ordering for publishing a new root pointer.
/// A root swap must be a full barrier so every thread that subsequently
/// enters the tree observes the fully-built replacement.
pub const PUBLISH_ORD: Ordering = Ordering::SeqCst;
