//! Literal build scenarios exercising the documented boundary behavior:
//! first split, cluster separation, identical points under contention,
//! serialization fixed points, and split-counter quiescence.

mod common;

use std::thread;

use k_tree::{Arena, Tree, Vector};

use common::{assert_balanced, assert_node_invariants, penultimate_nodes, serialized};

fn insert_all<'a>(tree: &Tree<'a>, arena: &'a Arena, points: &[[f32; 2]]) {
    for point in points {
        tree.insert(arena, Vector::from_slice_in(arena, point));
    }
}

/// Five points, order 4: the fifth insert overflows the first leaf level
/// and the root splits into the unit-square cluster and the outlier.
#[test]
fn fifth_insert_splits_into_two_clusters() {
    let arena = Arena::new();
    let mut tree = Tree::new(&arena, 4, 2);

    insert_all(
        &tree,
        &arena,
        &[[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0], [10.0, 10.0]],
    );
    tree.normalize_counts();

    let root = tree.root().expect("root");
    assert_eq!(root.visible_child_count(), 2);
    assert_eq!(root.leaves_below(), 5);
    assert_eq!(tree.completed_splits(), 1);

    let mut centroids: Vec<Vec<f32>> = root
        .children()
        .map(|child| child.centroid().as_slice().to_vec())
        .collect();
    centroids.sort_by(|a, b| a[0].total_cmp(&b[0]));

    assert!((centroids[0][0] - 0.5).abs() < 1e-4 && (centroids[0][1] - 0.5).abs() < 1e-4);
    assert!((centroids[1][0] - 10.0).abs() < 1e-4 && (centroids[1][1] - 10.0).abs() < 1e-4);

    assert_balanced(&tree);
    assert_node_invariants(&tree);
}

/// Sixteen points in two tight clusters, inserted single-threaded and
/// interleaved: once the first split separates the clusters, descent keeps
/// them apart, so every bottom-level cluster is pure and the per-cluster
/// leaf totals are 8 and 8.
#[test]
fn two_clusters_partition_cleanly() {
    let arena = Arena::new();
    let mut tree = Tree::new(&arena, 4, 2);

    for i in 0..8 {
        let jitter = i as f32 * 0.01;
        insert_all(
            &tree,
            &arena,
            &[[1.0 + jitter, 1.0 - jitter], [8.0 + jitter, 8.0 - jitter]],
        );
    }
    tree.normalize_counts();

    assert_eq!(tree.leaf_count(), 16);
    assert_balanced(&tree);
    assert_node_invariants(&tree);

    let mut clusters = Vec::new();
    penultimate_nodes(tree.root().expect("root"), &mut clusters);

    let mut totals = [0usize; 2];
    for cluster in clusters {
        let mut leaves = Vec::new();
        common::collect_leaves(cluster, &mut leaves);

        // Assign each leaf to its nearest center; a pure cluster has them
        // all on one side.
        let sides: Vec<usize> = leaves
            .iter()
            .map(|leaf| usize::from((leaf[0] - 1.0).abs() > (leaf[0] - 8.0).abs()))
            .collect();
        assert!(
            sides.windows(2).all(|w| w[0] == w[1]),
            "mixed bottom-level cluster: {leaves:?}"
        );

        totals[sides[0]] += leaves.len();
    }

    assert_eq!(totals, [8, 8]);
}

/// A thousand identical points from four threads: the tree stays balanced,
/// every point survives, and every internal centroid is the point itself.
#[test]
fn identical_points_concurrent_build() {
    let worker_arenas: Vec<Arena> = (0..4).map(|_| Arena::new()).collect();
    let tree_arena = Arena::new();
    let mut tree = Tree::new(&tree_arena, 4, 2);

    thread::scope(|scope| {
        let tree = &tree;
        for arena in &worker_arenas {
            scope.spawn(move || {
                for _ in 0..250 {
                    tree.insert(arena, Vector::from_slice_in(arena, &[3.0, 3.0]));
                }
            });
        }
    });
    tree.normalize_counts();

    assert_eq!(tree.leaf_count(), 1000);
    assert_balanced(&tree);
    assert_node_invariants(&tree);
    assert!(tree.splits_quiescent());

    fn check_centroids(node: &k_tree::Node) {
        for component in node.centroid().as_slice() {
            assert!(
                (component - 3.0).abs() < 1e-4,
                "centroid drifted to {component}"
            );
        }
        for child in node.children() {
            check_centroids(child);
        }
    }
    check_centroids(tree.root().expect("root"));
}

/// Build over 10,000 pseudo-random points with four threads, then
/// serialize → deserialize → serialize: both serializations byte-equal.
#[test]
fn concurrent_build_serialization_fixed_point() {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let point_arena = Arena::new();
    let worker_arenas: Vec<Arena> = (0..4).map(|_| Arena::new()).collect();
    let tree_arena = Arena::new();

    let mut rng = StdRng::seed_from_u64(0x5eed);
    let points: Vec<&Vector> = (0..10_000)
        .map(|_| {
            let point = [rng.gen_range(-100.0..100.0f32), rng.gen_range(-100.0..100.0f32)];
            &*Vector::from_slice_in(&point_arena, &point)
        })
        .collect();

    let mut tree = Tree::new(&tree_arena, 10, 2);

    thread::scope(|scope| {
        let tree = &tree;
        for (worker, arena) in worker_arenas.iter().enumerate() {
            let chunk = &points[worker * 2500..(worker + 1) * 2500];
            scope.spawn(move || {
                for &point in chunk {
                    tree.insert(arena, point);
                }
            });
        }
    });
    tree.normalize_counts();

    assert_eq!(tree.leaf_count(), 10_000);
    assert_balanced(&tree);
    assert_node_invariants(&tree);

    let first = serialized(&tree);
    let fresh_arena = Arena::new();
    let reloaded =
        Tree::deserialize(&fresh_arena, 10, first.as_bytes()).expect("reload built tree");
    let second = serialized(&reloaded);

    assert_eq!(first, second);
}

/// With no insert in flight, `begin == end` must hold — quiescence is the
/// externally observable face of the split lock.
#[test]
fn split_counter_quiesces_between_builds() {
    let arena = Arena::new();
    let tree = Tree::new(&arena, 2, 2);
    assert!(tree.splits_quiescent());

    for i in 0..50 {
        tree.insert(&arena, Vector::from_slice_in(&arena, &[i as f32, -(i as f32)]));
        // Single-threaded, so every externally-observed moment is quiescent.
        assert!(tree.splits_quiescent());
    }

    assert!(tree.completed_splits() > 0);
}

/// Four points fit a leaf level of order 4 exactly: no split, four leaves
/// under the root.
#[test]
fn exact_capacity_does_not_split() {
    let arena = Arena::new();
    let mut tree = Tree::new(&arena, 4, 2);

    insert_all(&tree, &arena, &[[0.0, 0.0], [1.0, 1.0]]);
    insert_all(&tree, &arena, &[[1.0, 0.0], [0.0, 1.0]]);
    tree.normalize_counts();

    assert_eq!(tree.completed_splits(), 0);
    assert_eq!(tree.leaf_count(), 4);
    assert_eq!(tree.root().expect("root").visible_child_count(), 4);
    assert_eq!(tree.depth(), 2);
}

/// An empty tree round-trips to an empty serialization and a load of an
/// empty file is a hard error, not a silent empty tree.
#[test]
fn empty_serialization_is_rejected_on_load() {
    let arena = Arena::new();
    let tree = Tree::new(&arena, 4, 2);
    let text = serialized(&tree);
    assert!(text.is_empty());

    assert!(Tree::deserialize(&arena, 4, text.as_bytes()).is_err());
}
