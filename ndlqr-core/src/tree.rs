//! Ordered binary tree over the knot points of the horizon.
//!
//! For a horizon of `N = 2^depth` knot points the tree has `N - 1` nodes, one
//! per knot `0..N-1`. Node `k` sits at level 0 when `k` is even; each internal
//! node separates the knots of its left subtree from those of its right
//! subtree. The node array has length `N`: the last slot is not part of the
//! tree and only exists so that knot `N - 1` can be addressed.
//!
//! ```text
//! N = 8:            3            level 2
//!               /       \
//!              1         5       level 1
//!             / \       / \
//!            0   2     4   6     level 0
//! ```

use crate::error::{NdlqrError, NdlqrResult};

/// Span of knot indices covered by one side of a node.
///
/// Leaves cover the single knots on either side of them; internal nodes cover
/// the union of their children's spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnitRange {
    pub start: usize,
    pub stop: usize,
}

impl UnitRange {
    pub fn new(start: usize, stop: usize) -> Self {
        Self { start, stop }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryNode {
    /// Knot index owned by this node.
    pub idx: usize,
    /// 0 at the leaves, `depth - 1` at the root.
    pub level: usize,
    pub left_inds: UnitRange,
    pub right_inds: UnitRange,
    pub parent: Option<usize>,
    pub left_child: Option<usize>,
    pub right_child: Option<usize>,
}

impl BinaryNode {
    fn unlinked(idx: usize) -> Self {
        Self {
            idx,
            level: 0,
            left_inds: UnitRange::default(),
            right_inds: UnitRange::default(),
            parent: None,
            left_child: None,
            right_child: None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.left_child.is_none() && self.right_child.is_none()
    }
}

/// Immutable tree built once per horizon length. Links are indices into the
/// node array.
#[derive(Debug, Clone)]
pub struct OrderedBinaryTree {
    nodes: Vec<BinaryNode>,
    root: usize,
    depth: usize,
}

impl OrderedBinaryTree {
    /// Build the tree for `nhorizon` knot points.
    pub fn new(nhorizon: usize) -> NdlqrResult<Self> {
        if nhorizon < 2 || !nhorizon.is_power_of_two() {
            return Err(NdlqrError::InvalidHorizon(nhorizon));
        }
        let mut nodes: Vec<BinaryNode> = (0..nhorizon).map(BinaryNode::unlinked).collect();
        let root = build_subtree(&mut nodes, 0, nhorizon - 1);
        let depth = nhorizon.trailing_zeros() as usize;
        debug_assert_eq!(nodes[root].level + 1, depth);
        Ok(Self { nodes, root, depth })
    }

    /// Closed-form separator index for `leaf` at `level`: `2^level (2 leaf + 1) - 1`.
    #[inline]
    pub fn index_from_leaf(leaf: usize, level: usize) -> usize {
        (1usize << level) * (2 * leaf + 1) - 1
    }

    pub fn root(&self) -> &BinaryNode {
        &self.nodes[self.root]
    }

    /// Number of levels (`log2` of the horizon).
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Number of separators at `level`: `2^(depth - level - 1)`.
    pub fn leaves_at_level(&self, level: usize) -> usize {
        if level >= self.depth {
            return 0;
        }
        1usize << (self.depth - level - 1)
    }

    /// Horizon length, including the trailing addressing slot.
    pub fn num_elements(&self) -> usize {
        self.nodes.len()
    }

    /// Tree nodes, ordered by knot index. The trailing addressing slot is
    /// excluded.
    pub fn nodes(&self) -> &[BinaryNode] {
        &self.nodes[..self.nodes.len() - 1]
    }

    pub fn node(&self, index: usize) -> Option<&BinaryNode> {
        self.nodes().get(index)
    }

    /// Level of the node owning knot `index`.
    pub fn index_level(&self, index: usize) -> Option<usize> {
        self.node(index).map(|node| node.level)
    }

    /// Index of the node at `level` on the path through knot `index`.
    ///
    /// Walks up through parents while below `level` and down toward `index`
    /// while above it, preferring the left child on ties. The final knot is
    /// routed through its left neighbour, which owns it.
    pub fn index_at_level(&self, index: usize, level: usize) -> Option<usize> {
        let n = self.nodes.len();
        if index >= n || level >= self.depth {
            return None;
        }
        let mut current = if index == n - 1 { n - 2 } else { index };
        loop {
            let node = &self.nodes[current];
            current = match node.level.cmp(&level) {
                std::cmp::Ordering::Equal => return Some(node.idx),
                std::cmp::Ordering::Greater => {
                    if index <= node.idx {
                        node.left_child?
                    } else {
                        node.right_child?
                    }
                }
                std::cmp::Ordering::Less => node.parent?,
            };
        }
    }

    /// Whether the update routed through separator `index` should also touch
    /// the dual block of knot `i`.
    ///
    /// The knots at the start of either of the separator's ranges have their
    /// dual coupling eliminated by the separator itself, except knot 0 whose
    /// dual is the initial-state multiplier.
    pub fn should_calc_lambda(&self, index: usize, i: usize) -> bool {
        match self.node(index) {
            Some(node) => {
                let is_start = i == node.left_inds.start || i == node.right_inds.start;
                !is_start || i == 0
            }
            None => true,
        }
    }
}

/// Link the subtree covering `len` nodes starting at `start`; returns its root.
fn build_subtree(nodes: &mut [BinaryNode], start: usize, len: usize) -> usize {
    let mid = (len + 1) / 2;
    let new_len = mid - 1;
    if len > 1 {
        let root = start + new_len;
        let left = build_subtree(nodes, start, new_len);
        let right = build_subtree(nodes, start + mid, new_len);

        nodes[left].parent = Some(root);
        nodes[right].parent = Some(root);

        let left_inds = UnitRange::new(nodes[left].left_inds.start, nodes[left].right_inds.stop);
        let right_inds = UnitRange::new(nodes[right].left_inds.start, nodes[right].right_inds.stop);
        let level = nodes[left].level + 1;

        let node = &mut nodes[root];
        node.left_child = Some(left);
        node.right_child = Some(right);
        node.left_inds = left_inds;
        node.right_inds = right_inds;
        node.level = level;
        root
    } else {
        let node = &mut nodes[start];
        let k = node.idx;
        node.left_inds = UnitRange::new(k, k);
        node.right_inds = UnitRange::new(k + 1, k + 1);
        node.level = 0;
        start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_tree_8() {
        let tree = OrderedBinaryTree::new(8).unwrap();
        let root = tree.root();
        assert_eq!(root.idx, 3);
        assert_eq!(root.level, 2);
        assert_eq!(root.left_inds, UnitRange::new(0, 3));
        assert_eq!(root.right_inds, UnitRange::new(4, 7));
        assert_eq!(tree.depth(), 3);
        assert_eq!(tree.num_elements(), 8);

        let levels: Vec<usize> = (0..7).map(|k| tree.index_level(k).unwrap()).collect();
        assert_eq!(levels, vec![0, 1, 0, 2, 0, 1, 0]);

        let n1 = tree.node(1).unwrap();
        assert_eq!(n1.left_child, Some(0));
        assert_eq!(n1.right_child, Some(2));
        assert_eq!(n1.parent, Some(3));
        assert!(tree.node(6).unwrap().is_leaf());
    }

    #[test]
    fn test_index_at_level() {
        let tree = OrderedBinaryTree::new(8).unwrap();
        assert_eq!(tree.index_at_level(5, 0), Some(4));
        assert_eq!(tree.index_at_level(3, 0), Some(2));
        assert_eq!(tree.index_at_level(2, 2), Some(3));
        assert_eq!(tree.index_at_level(7, 2), Some(3));
        assert_eq!(tree.index_at_level(7, 0), Some(6));
        assert_eq!(tree.index_at_level(8, 0), None);
        assert_eq!(tree.index_at_level(0, 3), None);
    }

    #[test]
    fn test_smallest_tree() {
        let tree = OrderedBinaryTree::new(2).unwrap();
        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.root().idx, 0);
        assert_eq!(tree.index_at_level(1, 0), Some(0));
        assert!(!tree.should_calc_lambda(0, 1));
        assert!(tree.should_calc_lambda(0, 0));
    }

    #[test]
    fn test_rejects_bad_horizon() {
        for n in [0, 1, 3, 6, 12, 100] {
            assert!(matches!(OrderedBinaryTree::new(n), Err(NdlqrError::InvalidHorizon(_))), "n = {}", n);
        }
    }

    #[test]
    fn test_index_from_leaf() {
        assert_eq!(OrderedBinaryTree::index_from_leaf(0, 0), 0);
        assert_eq!(OrderedBinaryTree::index_from_leaf(3, 0), 6);
        assert_eq!(OrderedBinaryTree::index_from_leaf(1, 1), 5);
        assert_eq!(OrderedBinaryTree::index_from_leaf(0, 2), 3);
    }
}
