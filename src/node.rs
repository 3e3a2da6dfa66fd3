//! Filepath: src/node.rs
//!
//! Tree nodes: the data model plus the concurrent insertion protocol.
//!
//! One [`Node`] type plays both roles. A **leaf** has a null child array and
//! its centroid *is* the stored input vector. An **internal** node owns
//! `max_children + 1` atomic child slots (the `+1` is the overflow slot that
//! triggers a split) and a centroid equal to the leaves-weighted mean of its
//! subtree. Leaves never become internal nodes or vice versa — splits always
//! build fresh nodes.
//!
//! # Insert Protocol
//!
//! Descent ([`Node::add_to_node`]) recurses into the child whose centroid is
//! closest to the new point. At the bottom, [`Node::add_to_leaf`] claims a
//! slot with one `fetch_add`; overflow claims the node's one-shot split flag
//! and then the tree-wide split lock. A successful split bubbles a
//! replacement pair up the recursion inside [`InsertResult::Split`]; the
//! parent installs the pair, possibly splitting itself in turn, and the
//! split lock is released at the highest node that absorbs the cascade.
//! [`InsertResult::Retry`] aborts the attempt wholesale; the tree's insert
//! loop restarts it from the root with a fresh snapshot.
//!
//! On every non-retry outcome a node folds the new point into its centroid
//! with the running-mean identity `centroid += (point - centroid) / (n + 1)`
//! and bumps its leaf counter. Those updates race with concurrent inserts by
//! design; [`Node::normalize_counts`] repairs the counts once the build
//! quiesces, and [`Node::recompute_means`] can re-derive exact centroids.

mod split;

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize};

use crate::arena::Arena;
use crate::context::InsertContext;
use crate::ordering::{CAS_FAILURE, CAS_SUCCESS, READ_ORD, RELAXED, WRITE_ORD};
use crate::tracing_helpers::debug_log;
use crate::vector::Vector;

// ============================================================================
//  InsertResult
// ============================================================================

/// Outcome of one insert attempt at (or below) a node.
pub(crate) enum InsertResult {
    /// The point was attached here or below.
    Inserted,

    /// A concurrent split invalidated this attempt; restart from the root.
    Retry,

    /// This node was replaced by the pair; the caller must install both.
    /// The thread still holds the tree-wide split lock.
    Split(*mut Node, *mut Node),
}

// ============================================================================
//  Node
// ============================================================================

/// A node (or leaf) of the K-tree.
///
/// All nodes live in arena storage and are shared across threads through
/// raw pointers; every mutable field is atomic or tolerates the documented
/// centroid drift.
pub struct Node {
    /// Branching factor, copied from the parent at construction.
    max_children: usize,

    /// Claimed child slots. May transiently exceed `max_children` while a
    /// full node waits to split; readers clamp with
    /// [`visible_child_count`](Self::visible_child_count).
    child_count: AtomicUsize,

    /// `max_children + 1` atomic child pointers, or null for a leaf.
    children: *mut AtomicPtr<Node>,

    /// Leaf: the stored point. Internal: leaves-weighted subtree mean.
    centroid: *mut Vector,

    /// Leaves reachable below. Exact only after count normalization.
    leaves_below: AtomicUsize,

    /// One-shot flag: some thread owns (or already performed) this node's
    /// split. Reverted only when the owner failed to take the tree lock.
    split_claimed: AtomicBool,
}

// SAFETY: Shared mutation goes through atomics; centroid storage races are
// the tree's documented drift tradeoff. Nodes are arena-backed and outlive
// every thread that can reach them.
unsafe impl Send for Node {}
unsafe impl Sync for Node {}

impl Node {
    // ========================================================================
    //  Construction
    // ========================================================================

    /// Allocate the template node a tree stamps all other nodes from: it
    /// carries the branching factor and a zero-filled centroid of the
    /// tree's vector width, and never itself enters the tree.
    pub(crate) fn new_template(arena: &Arena, order: usize, dims: usize) -> *mut Node {
        let centroid: *mut Vector = Vector::zeroed_in(arena, dims);
        arena.place(Self {
            max_children: order,
            child_count: AtomicUsize::new(0),
            children: ptr::null_mut(),
            centroid,
            leaves_below: AtomicUsize::new(0),
            split_claimed: AtomicBool::new(false),
        })
    }

    /// Allocate a leaf wrapping `point`. The point becomes the centroid —
    /// no copy is made, so its arena must outlive the tree.
    pub(crate) fn new_leaf(&self, arena: &Arena, point: *mut Vector) -> *mut Node {
        arena.place(Self {
            max_children: self.max_children,
            child_count: AtomicUsize::new(0),
            children: ptr::null_mut(),
            centroid: point,
            leaves_below: AtomicUsize::new(1),
            split_claimed: AtomicBool::new(false),
        })
    }

    /// Allocate an empty internal shell: zeroed centroid of this node's
    /// width, `max_children + 1` null child slots.
    pub(crate) fn new_internal(&self, arena: &Arena) -> *mut Node {
        let slots = self.max_children + 1;
        let children = arena
            .alloc(slots * std::mem::size_of::<AtomicPtr<Node>>())
            .cast::<AtomicPtr<Node>>()
            .as_ptr();
        // Zeroed arena storage is already an array of null AtomicPtrs.

        let centroid: *mut Vector = self.centroid().zeroed_like_in(arena);

        arena.place(Self {
            max_children: self.max_children,
            child_count: AtomicUsize::new(0),
            children,
            centroid,
            leaves_below: AtomicUsize::new(0),
            split_claimed: AtomicBool::new(false),
        })
    }

    /// Allocate an internal node adopting `children` in order.
    ///
    /// Used for root creation; the caller recomputes the mean afterwards.
    pub(crate) fn new_internal_with(&self, arena: &Arena, children: &[*mut Node]) -> *mut Node {
        debug_assert!(children.len() <= self.max_children);

        let node = self.new_internal(arena);
        for &child in children {
            // SAFETY: node was just allocated and is not yet published.
            unsafe { (*node).push_child(child) };
        }
        node
    }

    /// Overwrite the cached leaf count (deserialization only).
    pub(crate) fn set_leaves_below(&self, leaves: usize) {
        self.leaves_below.store(leaves, RELAXED);
    }

    /// Append a child to an unpublished node.
    ///
    /// Only valid while this thread has exclusive access (fresh shells,
    /// deserialization); published nodes grow through the insert protocol.
    pub(crate) fn push_child(&self, child: *mut Node) {
        let slot = self.child_count.load(RELAXED);
        debug_assert!(slot <= self.max_children, "push_child past the overflow slot");

        // Plain ordering: publication happens later, when a pointer to this
        // node is released into the tree.
        self.child_slot(slot).store(child, RELAXED);
        self.child_count.store(slot + 1, RELAXED);
    }

    // ========================================================================
    //  Accessors
    // ========================================================================

    /// A node is a leaf iff it has no child array.
    #[inline]
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_null()
    }

    /// The node's centroid. For a leaf this is the stored input vector.
    #[inline]
    #[must_use]
    pub fn centroid(&self) -> &Vector {
        // SAFETY: every node is constructed with a non-null centroid that
        // lives in an arena outliving the tree.
        unsafe { &*self.centroid }
    }

    /// Cached count of leaves in this subtree. Exact after
    /// [`normalize_counts`](Self::normalize_counts); approximate during a
    /// concurrent build.
    #[inline]
    #[must_use]
    pub fn leaves_below(&self) -> usize {
        self.leaves_below.load(RELAXED)
    }

    /// Branching factor.
    #[inline]
    #[must_use]
    pub fn max_children(&self) -> usize {
        self.max_children
    }

    /// Child slots safe to read: `min(child_count, max_children)`.
    ///
    /// Entries may still be null (a slot reservation not yet published);
    /// readers skip those.
    #[inline]
    #[must_use]
    pub fn visible_child_count(&self) -> usize {
        self.child_count.load(READ_ORD).min(self.max_children)
    }

    /// The `i`-th child, if this is an internal node and the slot has been
    /// published.
    #[must_use]
    pub fn child(&self, i: usize) -> Option<&Node> {
        if self.is_leaf() || i >= self.visible_child_count() {
            return None;
        }

        let child = self.child_slot(i).load(READ_ORD);
        if child.is_null() {
            return None;
        }

        // SAFETY: published child pointers refer to arena-backed nodes
        // that outlive the tree.
        Some(unsafe { &*child })
    }

    /// Iterate the published children.
    pub fn children(&self) -> impl Iterator<Item = &Node> + '_ {
        let visible = if self.is_leaf() {
            0
        } else {
            self.visible_child_count()
        };
        (0..visible).filter_map(move |i| self.child(i))
    }

    /// The `i`-th child slot.
    #[inline]
    pub(crate) fn child_slot(&self, i: usize) -> &AtomicPtr<Node> {
        debug_assert!(!self.children.is_null());
        debug_assert!(i <= self.max_children);

        // SAFETY: internal nodes own max_children + 1 slots; the bound is
        // checked above.
        unsafe { &*self.children.add(i) }
    }

    // ========================================================================
    //  Geometry
    // ========================================================================

    /// Index of the published child whose centroid is nearest to `point`.
    /// Ties keep the lowest index.
    pub(crate) fn closest(&self, point: &Vector) -> usize {
        let visible = self.visible_child_count();
        let mut best = 0;
        let mut best_distance = f32::INFINITY;

        for i in 0..visible {
            let child = self.child_slot(i).load(READ_ORD);
            if child.is_null() {
                // Reserved but not yet published; skip.
                continue;
            }

            // SAFETY: published child pointers are valid arena nodes.
            let distance = point.distance_squared(unsafe { (*child).centroid() });
            if distance < best_distance {
                best_distance = distance;
                best = i;
            }
        }

        best
    }

    /// Recompute this node's centroid as the leaves-weighted mean of its
    /// children, and its leaf count as their sum.
    ///
    /// The weighting matters: branches hold different numbers of leaves and
    /// the centroid must be the middle of the leaves, not of the children.
    pub(crate) fn compute_mean(&self) {
        let visible = self.visible_child_count();
        let centroid = self.centroid();
        let mut total_leaves = 0usize;

        centroid.zero();
        for i in 0..visible {
            let child = self.child_slot(i).load(READ_ORD);
            if child.is_null() {
                continue;
            }

            // SAFETY: published child pointers are valid arena nodes.
            let child = unsafe { &*child };
            let weight = child.leaves_below();
            total_leaves += weight;
            centroid.fused_multiply_add(child.centroid(), weight as f32);
        }

        self.leaves_below.store(total_leaves, RELAXED);
        centroid.div_assign(total_leaves as f32);
    }

    // ========================================================================
    //  Insertion
    // ========================================================================

    /// Insert `point` into the subtree rooted here.
    ///
    /// On [`InsertResult::Split`] the caller owns the tree-wide split lock
    /// and must install the returned pair.
    pub(crate) fn add_to_node(
        &self,
        ctx: &mut InsertContext<'_, '_>,
        point: *mut Vector,
    ) -> InsertResult {
        let first = self.child_slot(0).load(READ_ORD);
        debug_assert!(!first.is_null(), "internal node without a first child");

        // SAFETY: child 0 of a reachable internal node is always published.
        let outcome = if unsafe { (*first).is_leaf() } {
            self.add_to_leaf(ctx, point)
        } else {
            // SAFETY: `point` refers to a live arena vector.
            let best = self.closest(unsafe { &*point });
            let child = self.child_slot(best).load(READ_ORD);

            // SAFETY: `best` indexes a published child.
            match unsafe { (*child).add_to_node(ctx, point) } {
                InsertResult::Split(low, high) => self.install_split(ctx, best, low, high),
                other => other,
            }
        };

        if !matches!(outcome, InsertResult::Retry) {
            // Fold the new point into the running mean instead of a full
            // recompute: centroid += (point - centroid) / (n + 1). Rounding
            // and racing updates accumulate drift; normalization repairs
            // the count and recompute_means() the centroid if needed.
            let n = self.leaves_below.load(RELAXED);

            // SAFETY: `point` refers to a live arena vector.
            self.centroid()
                .fused_subtract_divide(unsafe { &*point }, (n + 1) as f32);
            self.leaves_below.fetch_add(1, RELAXED);
        }

        outcome
    }

    /// A child at `slot` split into `low` and `high`: replace it with `low`,
    /// append `high`, and split this node too if it overflowed.
    ///
    /// Runs with the tree-wide split lock held, which is what makes the
    /// plain read-modify-write of `child_count` sound here.
    fn install_split(
        &self,
        ctx: &mut InsertContext<'_, '_>,
        slot: usize,
        low: *mut Node,
        high: *mut Node,
    ) -> InsertResult {
        self.child_slot(slot).store(low, WRITE_ORD);

        let count = self.child_count.load(RELAXED);
        self.child_slot(count).store(high, WRITE_ORD);
        self.child_count.store(count + 1, WRITE_ORD);

        if count + 1 > self.max_children {
            // Cascade: this node overflowed in turn. The lock stays held
            // and travels up with the new pair.
            debug_log!("split cascades to parent level");
            let (low, high) = self.split(ctx.arena());

            // SAFETY: split() returns fresh unpublished nodes.
            unsafe {
                (*low).compute_mean();
                (*high).compute_mean();
            }
            InsertResult::Split(low, high)
        } else {
            ctx.release_split_lock();
            InsertResult::Inserted
        }
    }

    /// Insert `point` into this node, whose children are leaves.
    pub(crate) fn add_to_leaf(
        &self,
        ctx: &mut InsertContext<'_, '_>,
        point: *mut Vector,
    ) -> InsertResult {
        // One atomic claim decides everything. Three outcomes:
        //   slot <  max_children: ours to fill, no split.
        //   slot >= max_children: the node is full; whichever full-path
        //   thread wins the claim flag performs the split, the rest retry.
        let slot = self.child_count.fetch_add(1, CAS_SUCCESS);

        if slot < self.max_children {
            let leaf = self.new_leaf(ctx.arena(), point);
            self.child_slot(slot).store(leaf, WRITE_ORD);
            return InsertResult::Inserted;
        }

        if self
            .split_claimed
            .compare_exchange(false, true, CAS_SUCCESS, CAS_FAILURE)
            .is_err()
        {
            // Another thread owns (or already performed) this split.
            return InsertResult::Retry;
        }

        if !ctx.try_acquire_split_lock() {
            // The descent path is stale; give the claim back so a later
            // attempt can split this node.
            self.split_claimed.store(false, WRITE_ORD);
            return InsertResult::Retry;
        }

        // The overflow slot is written exactly once, by the thread that
        // holds both the claim flag and the tree lock.
        let leaf = self.new_leaf(ctx.arena(), point);
        self.child_slot(self.max_children).store(leaf, WRITE_ORD);

        // Drain concurrent appenders that reserved a lower slot but have
        // not yet published their leaf. Expected wait: a few stores.
        for i in 0..self.max_children {
            while self.child_slot(i).load(READ_ORD).is_null() {
                std::hint::spin_loop();
            }
        }

        debug_log!("leaf node full; splitting");
        let (low, high) = self.split(ctx.arena());

        // SAFETY: split() returns fresh unpublished nodes.
        unsafe {
            (*low).compute_mean();
            (*high).compute_mean();
        }
        InsertResult::Split(low, high)
    }

    // ========================================================================
    //  Post-build passes
    // ========================================================================

    /// Recompute `leaves_below` exactly, bottom-up. Centroids are left
    /// untouched. Requires that no insert is in flight.
    pub(crate) fn normalize_counts(&self) {
        if self.is_leaf() {
            self.leaves_below.store(1, RELAXED);
            return;
        }

        let mut total = 0usize;
        for i in 0..self.visible_child_count() {
            let child = self.child_slot(i).load(READ_ORD);
            if child.is_null() {
                continue;
            }

            // SAFETY: published child pointers are valid arena nodes.
            let child = unsafe { &*child };
            child.normalize_counts();
            total += child.leaves_below();
        }

        self.leaves_below.store(total, RELAXED);
    }

    /// Recompute counts *and* centroids exactly, bottom-up, discarding the
    /// drift the concurrent running-mean updates accumulated. Requires that
    /// no insert is in flight.
    pub(crate) fn recompute_means(&self) {
        if self.is_leaf() {
            self.leaves_below.store(1, RELAXED);
            return;
        }

        for child in self.children() {
            child.recompute_means();
        }
        self.compute_mean();
    }

    /// Exact leaf count by traversal, independent of the cached counters.
    #[must_use]
    pub fn count_leaves(&self) -> usize {
        if self.is_leaf() {
            return 1;
        }
        self.children().map(Self::count_leaves).sum()
    }

    /// Length of the path from this node to a leaf, following first
    /// children. Height balance makes every path the same length.
    #[must_use]
    pub fn subtree_depth(&self) -> usize {
        let mut depth = 1;
        let mut node = self;
        while let Some(child) = node.child(0) {
            depth += 1;
            node = child;
        }
        depth
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("leaf", &self.is_leaf())
            .field("children", &self.visible_child_count())
            .field("leaves_below", &self.leaves_below())
            .finish_non_exhaustive()
    }
}

// ============================================================================
//  Tests
// ============================================================================
