//! Walks over a complete tree: visibility orderings of its regions and the convex pieces of a
//! set of regions.

use std::collections::BTreeSet;

use tinyvec::{tiny_vec, TinyVec};

use crate::kdtree::{Bounds, KdTree, NodeId};

impl KdTree {
    /// Regions in the order they are met depth first, descending into the first child picked by
    /// `near_first` at every cut. Only regions accepted by `keep` are returned.
    fn view_order<F, K>(&self, mut near_first: F, keep: K) -> Vec<usize>
    where
        F: FnMut(&KdTree, NodeId, usize) -> bool,
        K: Fn(usize) -> bool,
    {
        let mut order = Vec::new();
        let mut stack: TinyVec<[NodeId; 32]> = tiny_vec![self.root()];
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            match (node.children, node.cut) {
                (Some([l, r]), Some(axis)) => {
                    if near_first(self, l, axis.index()) {
                        stack.push(r);
                        stack.push(l);
                    } else {
                        stack.push(l);
                        stack.push(r);
                    }
                }
                (Some([l, r]), None) => {
                    stack.push(r);
                    stack.push(l);
                }
                (None, _) => {
                    if let Some(region) = node.region_id().filter(|&r| keep(r)) {
                        order.push(region);
                    }
                }
            }
        }
        order
    }

    /// Every region, front to back for a viewer looking along `direction`.
    pub fn view_order_all_regions_in_direction(&self, direction: [f64; 3]) -> Vec<usize> {
        self.view_order_regions_in_direction(None, direction)
    }

    /// The regions in `regions` (every region if `None`), front to back for a viewer looking
    /// along `direction`.
    pub fn view_order_regions_in_direction(
        &self,
        regions: Option<&BTreeSet<usize>>,
        direction: [f64; 3],
    ) -> Vec<usize> {
        self.view_order(
            // unless looking towards +d, the upper half is nearer
            |_, _, d| direction[d] > 0.0,
            |region| regions.map_or(true, |set| set.contains(&region)),
        )
    }

    /// Every region, front to back for a viewer at `position`.
    pub fn view_order_all_regions_from_position(&self, position: [f64; 3]) -> Vec<usize> {
        self.view_order_regions_from_position(None, position)
    }

    /// The regions in `regions` (every region if `None`), front to back for a viewer at
    /// `position`.
    pub fn view_order_regions_from_position(
        &self,
        regions: Option<&BTreeSet<usize>>,
        position: [f64; 3],
    ) -> Vec<usize> {
        self.view_order(
            |tree, left, d| position[d] < tree.node(left).bounds.max[d],
            |region| regions.map_or(true, |set| set.contains(&region)),
        )
    }

    /// The fewest boxes whose union is exactly the union of `regions`: the bounds of every
    /// largest subtree all of whose regions are in the set.
    pub fn minimal_convex_subregions(&self, regions: &BTreeSet<usize>) -> Vec<Bounds> {
        let mut boxes = Vec::new();
        if regions.is_empty() {
            return boxes;
        }
        let mut stack: TinyVec<[NodeId; 32]> = tiny_vec![self.root()];
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            let covered = node.regions();
            if covered.is_empty() {
                continue;
            }
            if covered.clone().all(|r| regions.contains(&r)) {
                boxes.push(node.bounds);
            } else if let Some([l, r]) = node.children {
                stack.push(r);
                stack.push(l);
            }
        }
        boxes
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::kdtree::test::balanced_tree;

    #[test]
    fn direction_order_along_x() {
        // depth 1 cuts x only
        let tree = balanced_tree(1);
        assert_eq!(tree.view_order_all_regions_in_direction([-1.0, 0.0, 0.0]), vec![1, 0]);
        assert_eq!(tree.view_order_all_regions_in_direction([1.0, 0.0, 0.0]), vec![0, 1]);
    }

    #[test]
    fn every_region_appears_once() {
        let tree = balanced_tree(4);
        for direction in [[1.0, -1.0, 0.5], [-0.1, 2.0, -3.0]] {
            let mut order = tree.view_order_all_regions_in_direction(direction);
            order.sort_unstable();
            assert_eq!(order, (0..16).collect::<Vec<_>>());
        }
        let mut order = tree.view_order_all_regions_from_position([0.3, 0.9, 0.1]);
        order.sort_unstable();
        assert_eq!(order, (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn nearest_region_comes_first() {
        let tree = balanced_tree(3);
        for position in [[0.1, 0.1, 0.1], [0.9, 0.2, 0.8], [0.6, 0.6, 0.4]] {
            let order = tree.view_order_all_regions_from_position(position);
            assert_eq!(Some(order[0]), tree.region_containing_point(position));
        }
    }

    #[test]
    fn subset_keeps_relative_order() {
        let tree = balanced_tree(3);
        let subset: BTreeSet<usize> = [1, 4, 6].into_iter().collect();
        let all = tree.view_order_all_regions_from_position([0.9, 0.9, 0.9]);
        let expected: Vec<usize> = all.into_iter().filter(|r| subset.contains(r)).collect();
        assert_eq!(
            tree.view_order_regions_from_position(Some(&subset), [0.9, 0.9, 0.9]),
            expected
        );
    }

    #[test]
    fn convex_subregions_merge_whole_subtrees() {
        let tree = balanced_tree(3);
        let left_half: BTreeSet<usize> = (0..4).collect();
        assert_eq!(
            tree.minimal_convex_subregions(&left_half),
            vec![tree.node(tree.node(tree.root()).left().unwrap()).bounds]
        );

        let scattered: BTreeSet<usize> = [0, 1, 2, 5].into_iter().collect();
        let boxes = tree.minimal_convex_subregions(&scattered);
        assert_eq!(boxes.len(), 3);
        assert_eq!(boxes[2], tree.region_bounds(5).unwrap());

        assert!(tree.minimal_convex_subregions(&BTreeSet::new()).is_empty());
    }
}
