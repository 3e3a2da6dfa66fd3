//! Filepath: src/node/split.rs
//!
//! Binary k-means partitioning of an overfull node.
//!
//! [`Node::split`] is called on a node holding exactly `max_children + 1`
//! populated children and produces two fresh shells, each adopting one
//! cluster. Seeding is furthest-first: seed A is child 0's centroid, seed B
//! the child centroid farthest from A, which biases the first cut toward a
//! meaningful separation instead of a random one.
//!
//! Reassignment uses the triangle-inequality bounds from Elkan (2003,
//! "Using the Triangle Inequality to Accelerate k-Means"): each member
//! keeps an overestimate of its distance to its assigned seed and an
//! underestimate to the other, both slackened by the seeds' movement each
//! round; when the bounds (or the half-separation lemma) already prove the
//! assignment, the explicit distance is skipped.
//!
//! If the iteration collapses into one cluster — all members identical, or
//! dragged together by concurrent centroid updates — the clustering is
//! discarded and members are dealt alternately to the two shells, which
//! guarantees progress.

use std::mem;

use crate::arena::Arena;
use crate::ordering::READ_ORD;
use crate::vector::Vector;

use super::Node;

/// Relative improvement below which the Lloyd iteration stops.
const CONVERGENCE_EPSILON: f32 = 1e-6;

/// Centroid of the `i`-th member.
fn member_centroid(members: &[*mut Node], i: usize) -> &Vector {
    // SAFETY: split() snapshots only published, arena-backed children.
    unsafe { (*members[i]).centroid() }
}

impl Node {
    /// Partition this full node's `max_children + 1` children into two
    /// fresh shells. The caller computes the shells' means and installs
    /// them; this node is left untouched and becomes garbage once replaced.
    pub(crate) fn split(&self, arena: &Arena) -> (*mut Node, *mut Node) {
        let group = self.max_children + 1;
        let members: Vec<*mut Node> = (0..group)
            .map(|i| self.child_slot(i).load(READ_ORD))
            .collect();
        debug_assert!(
            members.iter().all(|p| !p.is_null()),
            "split on a node with unpublished children"
        );

        let mut assignment = vec![0u8; group];
        let clustered = self.two_means(arena, &members, &mut assignment);

        let low = self.new_internal(arena);
        let high = self.new_internal(arena);

        if clustered {
            for (i, &cluster) in assignment.iter().enumerate() {
                let shell = if cluster == 0 { low } else { high };
                // SAFETY: the shells are fresh and unpublished.
                unsafe { (*shell).push_child(members[i]) };
            }
        } else {
            // Everything landed in one cluster. Deal the members out
            // alternately; both shells end non-empty and the tree makes
            // progress even on identical vectors.
            for (i, &member) in members.iter().enumerate() {
                let shell = if i % 2 == 0 { low } else { high };
                // SAFETY: the shells are fresh and unpublished.
                unsafe { (*shell).push_child(member) };
            }
        }

        (low, high)
    }

    /// Lloyd iteration with k = 2. Writes the final cluster of each member
    /// into `assignment`; returns false when one cluster ended empty.
    fn two_means(&self, arena: &Arena, members: &[*mut Node], assignment: &mut [u8]) -> bool {
        let n = members.len();

        // Scratch centroids: the two current seeds and the two being built.
        // They come from the arena like everything else the split touches.
        let mut seeds: [&Vector; 2] = [
            self.centroid().zeroed_like_in(arena),
            self.centroid().zeroed_like_in(arena),
        ];
        let mut next: [&Vector; 2] = [
            self.centroid().zeroed_like_in(arena),
            self.centroid().zeroed_like_in(arena),
        ];

        // Furthest-first seeding.
        seeds[0].copy_from(member_centroid(members, 0));

        let mut farthest = 1;
        let mut farthest_distance = seeds[0].distance_squared(member_centroid(members, 1));
        for i in 2..n {
            let distance = seeds[0].distance_squared(member_centroid(members, i));
            if distance > farthest_distance {
                farthest = i;
                farthest_distance = distance;
            }
        }
        seeds[1].copy_from(member_centroid(members, farthest));

        // Elkan state: `upper[i]` overestimates the distance to the
        // assigned seed, `lower[i]` underestimates the distance to the
        // other seed, `delta[j]` is how far seed j moved last round.
        let mut upper = vec![f32::MAX; n];
        let mut lower = vec![0.0f32; n];
        let mut delta = [0.0f32; 2];
        assignment.fill(0);

        let mut old_sum = f32::MAX;
        let mut new_sum = old_sum / 2.0;

        while old_sum > (1.0 + CONVERGENCE_EPSILON) * new_sum {
            // Lemma 1 (Elkan): if d(x, c1) < d(c1, c2) / 2 then c1 is
            // certainly the closer seed. Everything here is squared, so
            // compare against (d(c1, c2) / 2)^2.
            let half_separation = seeds[0].distance_squared(seeds[1]) * 0.25;

            old_sum = new_sum;
            new_sum = 0.0;
            let mut sizes = [0usize; 2];

            for i in 0..n {
                let assigned = assignment[i] as usize;
                let other = 1 - assigned;

                // Slacken the bounds by the seeds' movement.
                upper[i] += delta[assigned];
                lower[i] -= delta[other];

                if upper[i] < lower[i] || upper[i] < half_separation {
                    // The bounds prove the assignment without a distance.
                    sizes[assigned] += 1;
                    new_sum += upper[i];
                    continue;
                }

                upper[i] = seeds[assigned].distance_squared(member_centroid(members, i));
                if upper[i] >= half_separation || upper[i] >= lower[i] {
                    lower[i] = seeds[other].distance_squared(member_centroid(members, i));
                }

                if upper[i] > lower[i] {
                    assignment[i] = other as u8;
                    mem::swap(&mut upper[i], &mut lower[i]);
                    sizes[other] += 1;
                } else if upper[i] == lower[i] {
                    // Exact tie: place into the currently smaller cluster
                    // so identical members cannot all pile onto one side.
                    let into = usize::from(sizes[0] > sizes[1]);
                    if into != assigned {
                        assignment[i] = into as u8;
                        mem::swap(&mut upper[i], &mut lower[i]);
                    }
                    sizes[into] += 1;
                } else {
                    sizes[assigned] += 1;
                }

                new_sum += upper[i];
            }

            if sizes[0] == 0 || sizes[1] == 0 {
                return false;
            }

            // Rebuild each seed as the unweighted mean of its members.
            next[0].zero();
            next[1].zero();
            for i in 0..n {
                next[assignment[i] as usize].add_assign(member_centroid(members, i));
            }
            for j in 0..2 {
                next[j].div_assign(sizes[j] as f32);
                delta[j] = next[j].distance_squared(seeds[j]);
                mem::swap(&mut seeds[j], &mut next[j]);
            }
        }

        true
    }
}

// ============================================================================
//  Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::super::tests::{leaf_at, template};
    use super::*;

    fn full_node<'a>(
        arena: &'a Arena,
        order: usize,
        points: &[&[f32]],
    ) -> &'a Node {
        assert_eq!(points.len(), order + 1);

        // SAFETY: template() returns a live arena node.
        let template = unsafe { &*template(arena, order, points[0].len()) };
        let node = template.new_internal(arena);
        for point in points {
            let leaf = leaf_at(template, arena, point);
            // SAFETY: node is fresh and unpublished.
            unsafe { (*node).push_child(leaf) };
        }

        // SAFETY: fully initialized above.
        unsafe { &*node }
    }

    fn leaf_values(node: &Node) -> Vec<Vec<f32>> {
        node.children()
            .map(|child| child.centroid().as_slice().to_vec())
            .collect()
    }

    #[test]
    fn separates_an_outlier_from_a_cluster() {
        let arena = Arena::with_slab_size(1 << 20);
        let node = full_node(
            &arena,
            4,
            &[
                &[0.0, 0.0],
                &[0.0, 1.0],
                &[1.0, 0.0],
                &[1.0, 1.0],
                &[10.0, 10.0],
            ],
        );

        let (low, high) = node.split(&arena);
        // SAFETY: split() returns fresh arena nodes.
        let (low, high) = unsafe { (&*low, &*high) };
        low.compute_mean();
        high.compute_mean();

        // Seed A is (0,0); the farthest member (10,10) seeds the other
        // cluster, so the unit square and the outlier separate cleanly.
        let (square, outlier) = if low.visible_child_count() == 4 {
            (low, high)
        } else {
            (high, low)
        };

        assert_eq!(square.visible_child_count(), 4);
        assert_eq!(outlier.visible_child_count(), 1);
        assert_eq!(square.centroid().as_slice(), &[0.5, 0.5]);
        assert_eq!(outlier.centroid().as_slice(), &[10.0, 10.0]);
        assert_eq!(square.leaves_below(), 4);
        assert_eq!(outlier.leaves_below(), 1);
    }

    #[test]
    fn identical_members_split_non_empty() {
        let arena = Arena::with_slab_size(1 << 20);
        let point: &[f32] = &[3.0, 3.0];
        let node = full_node(&arena, 4, &[point; 5]);

        let (low, high) = node.split(&arena);
        // SAFETY: split() returns fresh arena nodes.
        let (low, high) = unsafe { (&*low, &*high) };
        low.compute_mean();
        high.compute_mean();

        assert!(low.visible_child_count() > 0);
        assert!(high.visible_child_count() > 0);
        assert_eq!(low.visible_child_count() + high.visible_child_count(), 5);
        assert_eq!(low.centroid().as_slice(), &[3.0, 3.0]);
        assert_eq!(high.centroid().as_slice(), &[3.0, 3.0]);
    }

    #[test]
    fn two_tight_clusters_separate() {
        let arena = Arena::with_slab_size(1 << 20);
        let node = full_node(
            &arena,
            6,
            &[
                &[1.0, 1.0],
                &[8.0, 8.0],
                &[1.1, 0.9],
                &[7.9, 8.1],
                &[0.9, 1.1],
                &[8.1, 7.9],
                &[1.0, 0.9],
            ],
        );

        let (low, high) = node.split(&arena);
        // SAFETY: split() returns fresh arena nodes.
        let (low, high) = unsafe { (&*low, &*high) };

        for (shell, center) in [(low, 1.0f32), (high, 8.0f32)] {
            let members = leaf_values(shell);
            assert!(!members.is_empty());
            for member in &members {
                for &component in member {
                    assert!(
                        (component - center).abs() < 1.0,
                        "member {member:?} not near {center}"
                    );
                }
            }
        }

        assert_eq!(
            leaf_values(low).len() + leaf_values(high).len(),
            7
        );
    }

    #[test]
    fn every_member_lands_in_exactly_one_shell() {
        let arena = Arena::with_slab_size(1 << 20);
        let node = full_node(
            &arena,
            4,
            &[&[0.0], &[1.0], &[2.0], &[3.0], &[4.0]],
        );

        let (low, high) = node.split(&arena);
        // SAFETY: split() returns fresh arena nodes.
        let (low, high) = unsafe { (&*low, &*high) };

        let mut all: Vec<f32> = leaf_values(low)
            .into_iter()
            .chain(leaf_values(high))
            .map(|v| v[0])
            .collect();
        all.sort_by(f32::total_cmp);

        assert_eq!(all, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }
}
