//! Shared helpers for the integration tests.

#![allow(dead_code)]

use k_tree::{Node, Tree};

/// Collect the depth of every leaf under `node`.
pub fn leaf_depths(node: &Node, depth: usize, out: &mut Vec<usize>) {
    if node.is_leaf() {
        out.push(depth);
        return;
    }
    for child in node.children() {
        leaf_depths(child, depth + 1, out);
    }
}

/// Panic unless every root-to-leaf path has the same length.
pub fn assert_balanced(tree: &Tree<'_>) {
    let Some(root) = tree.root() else { return };

    let mut depths = Vec::new();
    leaf_depths(root, 1, &mut depths);

    assert!(
        depths.windows(2).all(|w| w[0] == w[1]),
        "unbalanced tree: leaf depths {depths:?}"
    );
}

/// Panic unless every internal node holds between 1 and `order` visible
/// children and its normalized leaf counter matches a real traversal.
pub fn assert_node_invariants(tree: &Tree<'_>) {
    fn check(node: &Node, order: usize) {
        if node.is_leaf() {
            assert_eq!(node.leaves_below(), 1, "leaf counter");
            return;
        }

        let visible = node.visible_child_count();
        assert!(
            (1..=order).contains(&visible),
            "internal node fanout {visible} outside 1..={order}"
        );
        assert_eq!(
            node.leaves_below(),
            node.count_leaves(),
            "normalized counter disagrees with traversal"
        );

        for child in node.children() {
            check(child, order);
        }
    }

    if let Some(root) = tree.root() {
        check(root, tree.order());
    }
}

/// Collect the nodes whose children are leaves (the bottom-level clusters).
pub fn penultimate_nodes<'t>(node: &'t Node, out: &mut Vec<&'t Node>) {
    if node.is_leaf() {
        return;
    }
    if node.child(0).is_some_and(Node::is_leaf) {
        out.push(node);
        return;
    }
    for child in node.children() {
        penultimate_nodes(child, out);
    }
}

/// Collect every leaf vector under `node`.
pub fn collect_leaves(node: &Node, out: &mut Vec<Vec<f32>>) {
    if node.is_leaf() {
        out.push(node.centroid().as_slice().to_vec());
        return;
    }
    for child in node.children() {
        collect_leaves(child, out);
    }
}

/// Serialize a tree to a string.
pub fn serialized(tree: &Tree<'_>) -> String {
    let mut out = Vec::new();
    tree.serialize(&mut out).expect("serialize to memory");
    String::from_utf8(out).expect("serialized form is ascii")
}
