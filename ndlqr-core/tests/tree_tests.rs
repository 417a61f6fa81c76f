//! Structural properties of the elimination tree and of the update schedule
//! built on it.

use ndlqr_core::OrderedBinaryTree;
use proptest::prelude::*;
use std::collections::HashSet;

fn depth_and_horizon() -> impl Strategy<Value = (usize, usize)> {
    (1usize..=10).prop_map(|d| (d, 1usize << d))
}

proptest! {
    #[test]
    fn prop_root_and_ranges((depth, nhorizon) in depth_and_horizon()) {
        let tree = OrderedBinaryTree::new(nhorizon).unwrap();
        prop_assert_eq!(tree.depth(), depth);
        prop_assert_eq!(tree.root().idx, nhorizon / 2 - 1);
        prop_assert_eq!(tree.nodes().len(), nhorizon - 1);

        for node in tree.nodes() {
            prop_assert_eq!(node.left_inds.stop + 1, node.right_inds.start, "node {}", node.idx);
            let spans_all = node.left_inds.start == 0 && node.right_inds.stop == nhorizon - 1;
            prop_assert_eq!(spans_all, node.idx == tree.root().idx, "node {}", node.idx);
            if let Some(parent) = node.parent {
                prop_assert_eq!(tree.node(parent).unwrap().level, node.level + 1);
            }
        }
    }

    #[test]
    fn prop_leaf_level_consistency(
        (depth, nhorizon, level, leaf) in depth_and_horizon().prop_flat_map(|(d, n)| {
            (Just(d), Just(n), 0..d).prop_flat_map(|(d, n, level)| {
                (Just(d), Just(n), Just(level), 0..(1usize << (d - level - 1)))
            })
        })
    ) {
        let tree = OrderedBinaryTree::new(nhorizon).unwrap();
        prop_assert!(level < depth);
        let index = OrderedBinaryTree::index_from_leaf(leaf, level);
        prop_assert_eq!(tree.index_level(index), Some(level));
        prop_assert_eq!(tree.leaves_at_level(level), 1usize << (depth - level - 1));
    }

    #[test]
    fn prop_index_at_own_level(
        (nhorizon, index) in depth_and_horizon().prop_flat_map(|(_, n)| (Just(n), 0..n - 1))
    ) {
        let tree = OrderedBinaryTree::new(nhorizon).unwrap();
        let level = tree.index_level(index).unwrap();
        prop_assert_eq!(tree.index_at_level(index, level), Some(index));
    }
}

#[test]
fn test_index_at_level_out_of_range() {
    let tree = OrderedBinaryTree::new(16).unwrap();
    assert_eq!(tree.index_at_level(16, 0), None);
    assert_eq!(tree.index_at_level(3, 4), None);
    assert_eq!(tree.index_level(15), None);
    assert_eq!(tree.leaves_at_level(4), 0);
}

/// For every depth and level, the Schur updates of the factor and solve
/// passes write disjoint blocks and never write a separator dual block that
/// another update reads. Every knot routes to a separator whose neighbour
/// routes back to it.
#[test]
fn test_update_schedule_is_disjoint() {
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
    enum Part {
        Lambda,
        State,
        Input,
    }

    for depth in 1..=10 {
        let nhorizon = 1usize << depth;
        let tree = OrderedBinaryTree::new(nhorizon).unwrap();
        for level in 0..depth {
            // factor pass: one write set per (knot, upper level) item
            let mut writes: HashSet<(usize, usize, Part)> = HashSet::new();
            let mut reads: HashSet<(usize, usize, Part)> = HashSet::new();
            // solve pass: width-1 container, single level
            let mut soln_writes: HashSet<(usize, Part)> = HashSet::new();
            let mut soln_reads: HashSet<(usize, Part)> = HashSet::new();

            for k in 0..nhorizon {
                let index = tree.index_at_level(k, level).unwrap();
                assert_eq!(tree.index_level(index), Some(level), "depth {} knot {}", depth, k);
                assert_eq!(
                    tree.index_at_level(index + 1, level),
                    Some(index),
                    "depth {} level {} knot {}",
                    depth,
                    level,
                    k
                );
                let calc = tree.should_calc_lambda(index, k);
                let parts: &[Part] = if calc {
                    &[Part::Lambda, Part::State, Part::Input]
                } else {
                    &[Part::State, Part::Input]
                };

                for upper in level + 1..depth {
                    for &part in parts {
                        assert!(writes.insert((k, upper, part)), "duplicate write at depth {}", depth);
                    }
                    reads.insert((index + 1, upper, Part::Lambda));
                }
                for &part in parts {
                    assert!(soln_writes.insert((k, part)));
                }
                soln_reads.insert((index + 1, Part::Lambda));
            }

            let overlap: Vec<_> = writes.intersection(&reads).collect();
            assert!(overlap.is_empty(), "depth {} level {}: {:?}", depth, level, overlap);
            let overlap: Vec<_> = soln_writes.intersection(&soln_reads).collect();
            assert!(overlap.is_empty(), "depth {} level {}: {:?}", depth, level, overlap);
        }
    }
}
