//! # K-tree
//!
//! A concurrent, height-balanced K-tree: a B-tree-like index over
//! high-dimensional `f32` vectors in which every internal entry stores the
//! centroid of the leaf vectors reachable beneath it. The tree is a
//! hierarchical vector quantizer — a scaffold for approximate
//! nearest-neighbor search and multi-resolution clustering.
//!
//! See: S. Geva (2000), "K-tree: a height balanced tree structured vector
//! quantizer", IEEE NNSP 2000.
//!
//! ## Design
//!
//! - Leaves store one input vector each; internal nodes store up to `order`
//!   children plus a leaves-weighted mean of their subtree.
//! - Construction is concurrent: many threads insert into one shared tree.
//!   Descent is lock-free; only splits serialize, through a tree-wide
//!   paired counter acting as an optimistic lock
//!   ([`split_counter::SplitCounter`]). Any insert whose descent path
//!   predates a split restarts from the root.
//! - All storage comes from monotonic [`Arena`]s; nothing is freed until
//!   the arenas drop, which is what makes lock-free descent over raw node
//!   pointers sound.
//! - Centroids drift slightly under concurrent running-mean updates;
//!   [`Tree::normalize_counts`] repairs the leaf counters exactly and
//!   [`Tree::recompute_means`] re-derives exact centroids when needed.
//!
//! ## Example
//!
//! ```
//! use k_tree::{Arena, Tree, Vector};
//!
//! let arena = Arena::new();
//! let mut tree = Tree::new(&arena, 4, 2);
//!
//! for point in [[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0], [10.0, 10.0]] {
//!     tree.insert(&arena, Vector::from_slice_in(&arena, &point));
//! }
//! tree.normalize_counts();
//!
//! assert_eq!(tree.leaf_count(), 5);
//! let mut out = Vec::new();
//! tree.serialize(&mut out).unwrap();
//! ```

pub mod arena;
mod context;
pub mod node;
mod ordering;
pub mod points;
pub mod serialize;
pub mod split_counter;
mod tracing_helpers;
pub mod tree;
pub mod vector;

pub use arena::Arena;
pub use node::Node;
pub use points::{
    parse_binary_points, parse_text_points, read_binary_points, read_text_points,
    write_binary_points, PointFileError,
};
pub use serialize::TreeParseError;
pub use tree::Tree;
pub use vector::Vector;

/// Install a `tracing` subscriber honoring `RUST_LOG`.
///
/// With the `tracing` feature disabled this is a no-op, so binaries can
/// call it unconditionally.
#[cfg(feature = "tracing")]
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Install a `tracing` subscriber honoring `RUST_LOG`.
///
/// With the `tracing` feature disabled this is a no-op, so binaries can
/// call it unconditionally.
#[cfg(not(feature = "tracing"))]
pub fn init_tracing() {}
