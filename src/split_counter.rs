//! Filepath: src/split_counter.rs
//!
//! Tree-wide split counter for optimistic concurrency control.
//!
//! [`SplitCounter`] packs two monotonic counters, `begin` and `end`, into a
//! single `AtomicU64` (`begin` in the high 32 bits, `end` in the low 32) so
//! both advance under one CAS. Together they act as an optimistic lock over
//! the whole tree's structure:
//!
//! - `begin == end` — no split is in progress anywhere.
//! - `begin == end + 1` — exactly one thread holds the split lock.
//! - Every completed split bumps `begin` once (acquire) and `end` once
//!   (release).
//!
//! # Concurrency Model
//! 1. An insert snapshots the counter on entry ([`SplitCounter::snapshot`]).
//! 2. To split, it calls [`SplitCounter::try_acquire`] with its snapshot. The
//!    CAS fails whenever *any* split began after the snapshot, which forces
//!    every insert whose descent path predates a split to restart from the
//!    root.
//! 3. The winner publishes its restructure, then calls
//!    [`SplitCounter::release`].
//!
//! Packing both halves into one word is load-bearing: updating them with
//! separate atomics would let a begin/end pair from two different splits
//! masquerade as a quiescent counter (an ABA race). The 32-bit halves cap a
//! tree at 2³² splits, which the acquire path enforces with a checked add.

use std::sync::atomic::AtomicU64;

use crate::ordering::{CAS_FAILURE, CAS_SUCCESS, READ_ORD, WRITE_ORD};

// ============================================================================
//  SplitEpoch
// ============================================================================

/// A point-in-time copy of the split counter.
///
/// Inserts carry one of these from tree entry to any split attempt; the
/// acquire CAS validates it against the live counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitEpoch {
    /// Splits ever started.
    begin: u32,
    /// Splits ever finished.
    end: u32,
}

impl SplitEpoch {
    /// True when no split was in flight at snapshot time.
    #[inline]
    #[must_use]
    pub const fn is_quiescent(self) -> bool {
        self.begin == self.end
    }

    /// Splits started at snapshot time.
    #[inline]
    #[must_use]
    pub const fn begin(self) -> u32 {
        self.begin
    }

    /// Splits finished at snapshot time.
    #[inline]
    #[must_use]
    pub const fn end(self) -> u32 {
        self.end
    }

    #[inline]
    const fn pack(self) -> u64 {
        ((self.begin as u64) << 32) | self.end as u64
    }

    #[inline]
    const fn unpack(raw: u64) -> Self {
        Self {
            begin: (raw >> 32) as u32,
            end: raw as u32,
        }
    }
}

// ============================================================================
//  SplitCounter
// ============================================================================

/// The tree-wide paired split counter.
///
/// Cache-line aligned so the hot CAS does not false-share with the root
/// pointer stored next to it in the tree.
///
/// # Example
///
/// ```
/// use k_tree::split_counter::SplitCounter;
///
/// let counter = SplitCounter::new();
/// let mut epoch = counter.snapshot();
///
/// assert!(counter.try_acquire(&mut epoch));
/// assert!(!counter.is_quiescent());
///
/// counter.release(&mut epoch);
/// assert!(counter.is_quiescent());
/// assert_eq!(counter.completed_splits(), 1);
/// ```
#[derive(Debug)]
#[repr(align(64))]
pub struct SplitCounter {
    value: AtomicU64,
}

impl SplitCounter {
    /// Create a quiescent counter (`begin == end == 0`).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Read the current epoch.
    #[inline]
    #[must_use]
    pub fn snapshot(&self) -> SplitEpoch {
        SplitEpoch::unpack(self.value.load(READ_ORD))
    }

    /// Attempt to take the split lock against `epoch`.
    ///
    /// Fails — forcing the caller to retry its insert from the root — when
    /// the snapshot already recorded an in-flight split, or when the live
    /// counter no longer matches the snapshot. On success the lock is held
    /// and `epoch` is advanced to the locked value so the matching
    /// [`release`](Self::release) can store it back.
    ///
    /// # Panics
    /// Panics after 2³² splits (the packed-counter capacity).
    #[must_use]
    pub fn try_acquire(&self, epoch: &mut SplitEpoch) -> bool {
        if !epoch.is_quiescent() {
            // A split was already running when this insert entered the
            // tree; its return path may be stale.
            return false;
        }

        let begin = epoch
            .begin
            .checked_add(1)
            .expect("split counter exhausted");
        let locked = SplitEpoch {
            begin,
            end: epoch.end,
        };

        if self
            .value
            .compare_exchange(epoch.pack(), locked.pack(), CAS_SUCCESS, CAS_FAILURE)
            .is_err()
        {
            // Someone else split since the snapshot.
            return false;
        }

        *epoch = locked;
        true
    }

    /// Release the split lock held via `epoch`.
    ///
    /// The plain store is sound because exactly one thread can hold the
    /// lock: nobody else writes the counter between acquire and release.
    ///
    /// # Panics
    /// Panics if `epoch` does not describe a held lock; that is an
    /// implementation bug, not a recoverable state.
    pub fn release(&self, epoch: &mut SplitEpoch) {
        assert!(
            epoch.begin == epoch.end + 1,
            "split counter release without a held lock: {epoch:?}"
        );

        epoch.end += 1;
        self.value.store(epoch.pack(), WRITE_ORD);
    }

    /// True when no split is currently in progress.
    #[inline]
    #[must_use]
    pub fn is_quiescent(&self) -> bool {
        self.snapshot().is_quiescent()
    }

    /// Number of splits ever completed.
    #[inline]
    #[must_use]
    pub fn completed_splits(&self) -> u64 {
        u64::from(self.snapshot().end)
    }
}

impl Default for SplitCounter {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
//  Tests
// ============================================================================
