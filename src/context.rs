//! Filepath: src/context.rs
//!
//! Per-insert bundle threaded down the recursion.

use crate::arena::Arena;
use crate::split_counter::SplitEpoch;
use crate::tree::Tree;

/// Everything one insert attempt needs while descending: the owning tree,
/// the arena new nodes come from, and the split-counter epoch captured when
/// the attempt entered the tree. The epoch is what later validates that the
/// attempt's return path is still current (see
/// [`SplitCounter`](crate::split_counter::SplitCounter)).
///
/// A fresh context is built per attempt; a retry from the root gets a fresh
/// snapshot.
pub(crate) struct InsertContext<'t, 'a> {
    tree: &'t Tree<'a>,
    arena: &'a Arena,
    epoch: SplitEpoch,
}

impl<'t, 'a> InsertContext<'t, 'a> {
    /// Snapshot the tree's split counter and bundle the refs.
    pub(crate) fn new(tree: &'t Tree<'a>, arena: &'a Arena) -> Self {
        Self {
            tree,
            arena,
            epoch: tree.split_counter().snapshot(),
        }
    }

    /// Arena serving this insert's allocations.
    #[inline]
    pub(crate) fn arena(&self) -> &'a Arena {
        self.arena
    }

    /// Try to take the tree-wide split lock against this attempt's epoch.
    ///
    /// A `false` return means some split started since this attempt entered
    /// the tree: the whole attempt must restart from the root.
    #[must_use]
    pub(crate) fn try_acquire_split_lock(&mut self) -> bool {
        self.tree.split_counter().try_acquire(&mut self.epoch)
    }

    /// Release the split lock taken by [`try_acquire_split_lock`].
    ///
    /// Called at the highest node that absorbs a split without splitting
    /// itself, or after a root replacement.
    ///
    /// [`try_acquire_split_lock`]: Self::try_acquire_split_lock
    pub(crate) fn release_split_lock(&mut self) {
        self.tree.split_counter().release(&mut self.epoch);
    }
}
