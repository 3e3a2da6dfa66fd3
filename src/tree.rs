//! Filepath: src/tree.rs
//!
//! `Tree` — the concurrent K-tree driver.
//!
//! A [`Tree`] owns the atomic root pointer, a template node carrying the
//! branching factor and vector width, and the tree-wide
//! [`SplitCounter`](crate::split_counter::SplitCounter). Inserts retry in a
//! loop: each attempt snapshots the split counter, descends from the
//! current root, and either commits or restarts when a concurrent split
//! invalidates its path. The loop is unbounded but terminates with
//! probability 1 — every completed split reduces contention at the node
//! that split for all future attempts.
//!
//! The tree borrows no storage of its own: every node lives in caller
//! arenas (`'a` in `Tree<'a>`), and nodes allocated by different workers'
//! arenas freely coexist.

use crate::arena::Arena;
use crate::context::InsertContext;
use crate::node::{InsertResult, Node};
use crate::ordering::PUBLISH_ORD;
use crate::split_counter::SplitCounter;
use crate::tracing_helpers::debug_log;
use crate::vector::Vector;
use std::sync::atomic::AtomicPtr;

/// A height-balanced tree of vectors in which every internal entry stores
/// the centroid of the leaves beneath it — a hierarchical vector quantizer.
///
/// `'a` is the lifetime of the arenas feeding the tree; the borrow checker
/// enforces the "all arenas outlive the tree" contract.
///
/// # Example
///
/// ```
/// use k_tree::{Arena, Tree, Vector};
///
/// let arena = Arena::new();
/// let mut tree = Tree::new(&arena, 4, 2);
///
/// for point in [[0.0, 0.0], [0.0, 1.0], [1.0, 0.0]] {
///     tree.insert(&arena, Vector::from_slice_in(&arena, &point));
/// }
/// tree.normalize_counts();
///
/// assert_eq!(tree.leaf_count(), 3);
/// ```
pub struct Tree<'a> {
    /// The tree-wide optimistic split lock. Declared first and 64-byte
    /// aligned so its hot CAS does not false-share with `root`.
    split_counter: SplitCounter,

    /// The current root; replaced wholesale on root splits.
    root: AtomicPtr<Node>,

    /// Never part of the tree: exists to carry `max_children` and a
    /// zero-filled centroid of the tree's vector width, from which all
    /// nodes are stamped.
    template: *mut Node,

    /// Ties the tree to the arenas that back its nodes.
    _arenas: std::marker::PhantomData<&'a Arena>,
}

// SAFETY: All shared state is atomic or reached through the nodes' own
// synchronization; the raw template pointer is read-only after new().
unsafe impl Send for Tree<'_> {}
unsafe impl Sync for Tree<'_> {}

impl<'a> Tree<'a> {
    /// Create an empty tree of the given branching factor and vector width.
    ///
    /// # Panics
    /// Panics if `order < 2` (a split needs two non-empty children) or
    /// `dims == 0`.
    #[must_use]
    pub fn new(arena: &'a Arena, order: usize, dims: usize) -> Self {
        assert!(order >= 2, "tree order must be at least 2");
        assert!(dims > 0, "vector width must be at least 1");

        let template = Node::new_template(arena, order, dims);

        Self {
            split_counter: SplitCounter::new(),
            root: AtomicPtr::new(std::ptr::null_mut()),
            template,
            _arenas: std::marker::PhantomData,
        }
    }

    // ========================================================================
    //  Insertion
    // ========================================================================

    /// Insert `point` into the tree, retrying until it commits.
    ///
    /// The point itself becomes the new leaf's centroid — it is not copied,
    /// so it must come from an arena that outlives the tree (which `'a`
    /// enforces). `arena` supplies storage for the nodes this insert
    /// creates; each calling thread normally passes its own.
    ///
    /// # Panics
    /// Panics if `point`'s width differs from the tree's: a width mismatch
    /// is a contract violation, never silently tolerated.
    pub fn insert(&self, arena: &'a Arena, point: &'a Vector) {
        assert_eq!(
            point.dims(),
            self.dims(),
            "inserted vector width does not match the tree"
        );

        let point: *mut Vector = std::ptr::from_ref(point).cast_mut();
        loop {
            match self.attempt_insert(arena, point) {
                InsertResult::Inserted => return,
                InsertResult::Retry => {}
                InsertResult::Split(..) => {
                    unreachable!("root splits are absorbed by attempt_insert")
                }
            }
        }
    }

    /// One insert attempt: fresh split-counter snapshot, one descent.
    fn attempt_insert(&self, arena: &'a Arena, point: *mut Vector) -> InsertResult {
        let mut ctx = InsertContext::new(self, arena);

        // The root must be read *after* the snapshot: a quiescent snapshot
        // then orders this load after any root publication it covers, and
        // a stale snapshot fails the lock CAS before it can do harm.
        let root = self.root.load(PUBLISH_ORD);

        if root.is_null() {
            // First insert ever. The split lock serializes root creation;
            // a loser retries and then sees the published root.
            if !ctx.try_acquire_split_lock() {
                return InsertResult::Retry;
            }

            let template = self.template();
            let leaf = template.new_leaf(arena, point);
            let root = template.new_internal_with(arena, &[leaf]);

            // SAFETY: `root` is fresh and still thread-local.
            unsafe { (*root).compute_mean() };

            debug_log!("publishing initial root");
            self.root.store(root, PUBLISH_ORD);
            ctx.release_split_lock();
            return InsertResult::Inserted;
        }

        // SAFETY: a published root is a valid arena node.
        match unsafe { (*root).add_to_node(&mut ctx, point) } {
            InsertResult::Split(low, high) => {
                // The old root split and we still hold the lock: mount the
                // pair under a fresh root. The tree grows one level, which
                // is the only way height changes — balance is preserved.
                // SAFETY: the pair is fresh and still thread-local.
                unsafe {
                    (*low).compute_mean();
                    (*high).compute_mean();
                }

                let new_root = self.template().new_internal_with(arena, &[low, high]);
                // SAFETY: `new_root` is fresh and still thread-local.
                unsafe { (*new_root).compute_mean() };

                debug_log!("root split; tree grows a level");
                self.root.store(new_root, PUBLISH_ORD);
                ctx.release_split_lock();
                InsertResult::Inserted
            }
            other => other,
        }
    }

    // ========================================================================
    //  Post-build passes
    // ========================================================================

    /// Repair every `leaves_below` counter after a concurrent build.
    ///
    /// Centroids are not touched. `&mut self` guarantees no insert is in
    /// flight.
    pub fn normalize_counts(&mut self) {
        if let Some(root) = self.root() {
            root.normalize_counts();
        }
    }

    /// Recompute counts *and* centroids exactly, bottom-up, for callers
    /// that need tighter accuracy than the drift-tolerant build provides.
    pub fn recompute_means(&mut self) {
        if let Some(root) = self.root() {
            root.recompute_means();
        }
    }

    // ========================================================================
    //  Read surface
    // ========================================================================

    /// The current root, if any insert has committed.
    #[must_use]
    pub fn root(&self) -> Option<&Node> {
        let root = self.root.load(PUBLISH_ORD);
        if root.is_null() {
            return None;
        }

        // SAFETY: a published root is a valid arena node.
        Some(unsafe { &*root })
    }

    /// The tree's branching factor.
    #[inline]
    #[must_use]
    pub fn order(&self) -> usize {
        self.template().max_children()
    }

    /// The tree's vector width.
    #[inline]
    #[must_use]
    pub fn dims(&self) -> usize {
        self.template().centroid().dims()
    }

    /// A zero-filled vector of the tree's width, for callers that allocate
    /// points shaped for this tree.
    #[must_use]
    pub fn template_vector(&self) -> &Vector {
        self.template().centroid()
    }

    /// True before the first committed insert.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root().is_none()
    }

    /// Exact leaf count by traversal.
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.root().map_or(0, Node::count_leaves)
    }

    /// Root-to-leaf path length (0 for an empty tree). Every path has this
    /// length — the tree is height-balanced by construction.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.root().map_or(0, Node::subtree_depth)
    }

    /// Number of splits the tree has completed.
    #[must_use]
    pub fn completed_splits(&self) -> u64 {
        self.split_counter.completed_splits()
    }

    /// True when no split is in progress — at any externally-observed
    /// quiescent moment this must hold.
    #[must_use]
    pub fn splits_quiescent(&self) -> bool {
        self.split_counter.is_quiescent()
    }

    /// The tree-wide split counter.
    pub(crate) fn split_counter(&self) -> &SplitCounter {
        &self.split_counter
    }

    /// The template node all nodes are stamped from.
    pub(crate) fn template(&self) -> &Node {
        // SAFETY: the template is created in new() and immutable after.
        unsafe { &*self.template }
    }

    /// Adopt `root` as the tree's root (deserialization only).
    pub(crate) fn set_root(&mut self, root: *mut Node) {
        self.root.store(root, PUBLISH_ORD);
    }
}

impl std::fmt::Debug for Tree<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree")
            .field("order", &self.order())
            .field("dims", &self.dims())
            .field("depth", &self.depth())
            .field("completed_splits", &self.completed_splits())
            .finish()
    }
}

// ============================================================================
//  Tests
// ============================================================================
