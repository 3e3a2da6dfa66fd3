//! Concurrent stress tests for the shared-tree insert protocol.
//!
//! These runs are designed to force the interesting interleavings:
//! simultaneous leaf fills, contended split claims, failed lock
//! acquisitions, and root replacement under load. Every test checks the
//! full invariant set afterwards — balance, fanout, exact leaf counts —
//! because a lost or duplicated insert is precisely the kind of bug that
//! only shows up in the totals.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use k_tree::{Arena, Tree, Vector};

use common::{assert_balanced, assert_node_invariants};

/// Build with `threads` workers over per-worker point generators, then
/// normalize and verify the invariant set.
fn build_and_verify<F>(threads: usize, per_thread: usize, order: usize, dims: usize, point_fn: F)
where
    F: Fn(usize, usize, &mut StdRng) -> Vec<f32> + Sync,
{
    let worker_arenas: Vec<Arena> = (0..threads).map(|_| Arena::new()).collect();
    let tree_arena = Arena::new();
    let mut tree = Tree::new(&tree_arena, order, dims);

    thread::scope(|scope| {
        let tree = &tree;
        let point_fn = &point_fn;
        for (worker, arena) in worker_arenas.iter().enumerate() {
            scope.spawn(move || {
                let mut rng = StdRng::seed_from_u64(worker as u64 ^ 0xDEAD_BEEF);
                for i in 0..per_thread {
                    let components = point_fn(worker, i, &mut rng);
                    tree.insert(arena, Vector::from_slice_in(arena, &components));
                }
            });
        }
    });

    assert!(tree.splits_quiescent(), "split lock leaked past join");
    tree.normalize_counts();

    assert_eq!(tree.leaf_count(), threads * per_thread, "lost or duplicated inserts");
    assert_eq!(
        tree.root().map(k_tree::Node::leaves_below),
        Some(threads * per_thread)
    );
    assert_balanced(&tree);
    assert_node_invariants(&tree);
}

#[test]
fn uniform_random_8_threads() {
    build_and_verify(8, 500, 8, 4, |_, _, rng| {
        (0..4).map(|_| rng.gen_range(-50.0..50.0)).collect()
    });
}

#[test]
fn small_order_maximizes_splits() {
    // Order 2 splits constantly; the split lock is the bottleneck and
    // every insert races it.
    build_and_verify(4, 300, 2, 2, |_, _, rng| {
        (0..2).map(|_| rng.gen_range(0.0..1.0)).collect()
    });
}

#[test]
fn disjoint_regions_commit_independently() {
    // Each worker owns a far-apart region, so descents rarely collide
    // below the root.
    build_and_verify(4, 500, 6, 2, |worker, i, _| {
        let base = worker as f32 * 1000.0;
        vec![base + (i % 25) as f32, base + (i / 25) as f32]
    });
}

#[test]
fn contended_single_cluster() {
    // Everyone hammers the same tight cluster: maximal contention on the
    // same descent path and on every split.
    build_and_verify(8, 250, 4, 2, |_, _, rng| {
        vec![5.0 + rng.gen_range(-0.01..0.01), 5.0 + rng.gen_range(-0.01..0.01)]
    });
}

#[test]
fn duplicate_heavy_workload() {
    // Duplicates force the alternating split fallback under contention.
    build_and_verify(4, 400, 4, 2, |_, i, _| {
        let which = (i % 3) as f32;
        vec![which, which]
    });
}

#[test]
fn high_dimensional_vectors() {
    build_and_verify(4, 200, 10, 37, |_, _, rng| {
        (0..37).map(|_| rng.gen_range(-1.0..1.0)).collect()
    });
}

/// Workers pulling from one shared job list with an atomic claim flag:
/// at-most-once delivery even when every worker scans every job.
#[test]
fn shared_work_list_at_most_once() {
    struct Job<'a> {
        claimed: AtomicBool,
        point: &'a Vector,
    }

    let point_arena = Arena::new();
    let worker_arenas: Vec<Arena> = (0..4).map(|_| Arena::new()).collect();
    let tree_arena = Arena::new();

    let mut rng = StdRng::seed_from_u64(7);
    let jobs: Vec<Job<'_>> = (0..2000)
        .map(|_| {
            let point = [rng.gen_range(-10.0..10.0f32), rng.gen_range(-10.0..10.0f32)];
            Job {
                claimed: AtomicBool::new(false),
                point: Vector::from_slice_in(&point_arena, &point),
            }
        })
        .collect();

    let mut tree = Tree::new(&tree_arena, 5, 2);

    thread::scope(|scope| {
        let tree = &tree;
        let jobs = &jobs;
        for arena in &worker_arenas {
            scope.spawn(move || {
                for job in jobs {
                    if job.claimed.load(Ordering::Relaxed) {
                        continue;
                    }
                    if job
                        .claimed
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        tree.insert(arena, job.point);
                    }
                }
            });
        }
    });
    tree.normalize_counts();

    assert_eq!(tree.leaf_count(), 2000);
    assert_balanced(&tree);
    assert_node_invariants(&tree);
}

/// Repeated small concurrent builds: shapes differ run to run, the
/// invariants never do.
#[test]
fn repeated_runs_hold_invariants() {
    for run in 0..10 {
        build_and_verify(4, 100, 3, 2, move |worker, i, _| {
            let angle = (worker * 100 + i + run) as f32 * 0.7;
            vec![angle.sin() * 10.0, angle.cos() * 10.0]
        });
    }
}
