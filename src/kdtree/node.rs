use std::ops::Range;

use tinyvec::TinyVec;

use crate::error::{PKdTreeError, Result};
use crate::kdtree::{Axis, Bounds};

/// Index of a node in a [`KdTree`].
pub type NodeId = usize;

/// One spatial region of a [`KdTree`]: a leaf, or an internal node cut in two.
#[derive(Debug, Clone, PartialEq)]
pub struct KdNode {
    pub(crate) bounds: Bounds,
    pub(crate) data_bounds: Bounds,
    pub(crate) num_points: usize,
    pub(crate) cut: Option<Axis>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Option<[NodeId; 2]>,
    /// Regions (leaf ids) under this node, assigned once the tree is complete.
    pub(crate) regions: Range<usize>,
}

impl KdNode {
    pub(crate) fn new(bounds: Bounds, data_bounds: Bounds, num_points: usize) -> Self {
        Self {
            bounds,
            data_bounds,
            num_points,
            cut: None,
            parent: None,
            children: None,
            regions: 0..0,
        }
    }

    /// A node standing in for one this process knows nothing about.
    pub(crate) fn placeholder() -> Self {
        Self::new(Bounds::PLACEHOLDER, Bounds::PLACEHOLDER, 0)
    }

    /// The spatial extent of the region.
    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    /// The extent of the points inside the region.
    pub fn data_bounds(&self) -> &Bounds {
        &self.data_bounds
    }

    /// The number of points the build placed in the region.
    ///
    /// This can differ from the number of points [`KdTree::region_containing_point`] sends here.
    /// When every allowed axis of a node is flat, the build splits its points by index alone and
    /// cuts at their shared coordinate, so a lookup sends all of them to the lower side.
    pub fn num_points(&self) -> usize {
        self.num_points
    }

    /// The axis this node is cut across, `None` for a leaf.
    pub fn cut(&self) -> Option<Axis> {
        self.cut
    }

    /// The parent node, `None` for the root.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// The lower half.
    pub fn left(&self) -> Option<NodeId> {
        self.children.map(|c| c[0])
    }

    /// The upper half.
    pub fn right(&self) -> Option<NodeId> {
        self.children.map(|c| c[1])
    }

    /// Whether this node has no children.
    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    /// The region id of a leaf of a complete tree.
    pub fn region_id(&self) -> Option<usize> {
        (self.is_leaf() && !self.regions.is_empty()).then_some(self.regions.start)
    }

    /// The ids of the regions under this node.
    pub fn regions(&self) -> Range<usize> {
        self.regions.clone()
    }
}

/// A binary space partition stored as an arena of nodes. The root is node 0.
///
/// During a build every process holds only the nodes it helped divide. Once the tree is complete
/// every process holds the same tree, and its leaves are numbered as regions `0..n` in
/// depth-first order, left before right.
#[derive(Debug, Clone, PartialEq)]
pub struct KdTree {
    nodes: Vec<KdNode>,
    /// Leaf node of each region.
    regions: Vec<NodeId>,
}

impl KdTree {
    /// A tree with a single root region covering `bounds`.
    pub(crate) fn new(bounds: Bounds, num_points: usize) -> Self {
        Self {
            nodes: vec![KdNode::new(bounds, bounds, num_points)],
            regions: vec![],
        }
    }

    /// The root node.
    pub fn root(&self) -> NodeId {
        0
    }

    /// The node at `id`.
    ///
    /// ## Panics
    ///
    /// If `id` is not a node of this tree.
    pub fn node(&self, id: NodeId) -> &KdNode {
        &self.nodes[id]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut KdNode {
        &mut self.nodes[id]
    }

    /// The number of nodes, internal and leaf.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// The spatial extent of the whole tree.
    pub fn bounds(&self) -> &Bounds {
        &self.nodes[0].bounds
    }

    /// Make room for one more pair of children.
    pub(crate) fn reserve_children(&mut self) -> Result<()> {
        self.nodes
            .try_reserve(2)
            .map_err(|_| PKdTreeError::Allocation {
                location: "tree nodes",
            })
    }

    /// Cut `parent` across `axis` into `left` and `right`.
    pub(crate) fn add_children(
        &mut self,
        parent: NodeId,
        axis: Axis,
        mut left: KdNode,
        mut right: KdNode,
    ) -> Result<[NodeId; 2]> {
        self.reserve_children()?;
        left.parent = Some(parent);
        right.parent = Some(parent);
        let ids = [self.nodes.len(), self.nodes.len() + 1];
        self.nodes.push(left);
        self.nodes.push(right);
        let node = &mut self.nodes[parent];
        node.cut = Some(axis);
        node.children = Some(ids);
        Ok(ids)
    }

    /// Drop the children of `id`. The detached nodes are removed by the next [`Self::compact`].
    pub(crate) fn prune(&mut self, id: NodeId) {
        let node = &mut self.nodes[id];
        node.children = None;
        node.cut = None;
    }

    /// The number of levels below the root.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut stack: TinyVec<[(NodeId, usize); 32]> = TinyVec::new();
        stack.push((self.root(), 0));
        while let Some((id, level)) = stack.pop() {
            match self.nodes[id].children {
                Some([l, r]) => {
                    stack.push((l, level + 1));
                    stack.push((r, level + 1));
                }
                None => depth = depth.max(level),
            }
        }
        depth
    }

    /// Give every node above `depth` children, adding placeholders where this process has none.
    pub(crate) fn fill_out(&mut self, depth: usize) -> Result<()> {
        let mut stack: TinyVec<[(NodeId, usize); 32]> = TinyVec::new();
        stack.push((self.root(), 0));
        while let Some((id, level)) = stack.pop() {
            if level == depth {
                continue;
            }
            let [l, r] = match self.nodes[id].children {
                Some(children) => children,
                None => {
                    let cut = self.nodes[id].cut;
                    let ids = self.add_children(
                        id,
                        Axis::X,
                        KdNode::placeholder(),
                        KdNode::placeholder(),
                    )?;
                    // a placeholder parent stays uncut
                    self.nodes[id].cut = cut;
                    ids
                }
            };
            stack.push((l, level + 1));
            stack.push((r, level + 1));
        }
        Ok(())
    }

    /// Node ids reachable from the root, parents before children, left subtrees before right.
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: TinyVec<[NodeId; 32]> = TinyVec::new();
        stack.push(self.root());
        while let Some(id) = stack.pop() {
            order.push(id);
            if let Some([l, r]) = self.nodes[id].children {
                stack.push(r);
                stack.push(l);
            }
        }
        order
    }

    /// Drop detached nodes, renumber the rest in preorder, and number the leaves as regions.
    pub(crate) fn compact(&mut self) {
        let order = self.preorder();
        let mut new_id = vec![usize::MAX; self.nodes.len()];
        for (i, &old) in order.iter().enumerate() {
            new_id[old] = i;
        }

        let mut nodes: Vec<KdNode> = order
            .iter()
            .map(|&old| {
                let mut node = self.nodes[old].clone();
                node.parent = node.parent.map(|p| new_id[p]);
                node.children = node.children.map(|[l, r]| [new_id[l], new_id[r]]);
                node
            })
            .collect();

        let mut regions = Vec::new();
        for (id, node) in nodes.iter_mut().enumerate() {
            if node.is_leaf() {
                node.regions = regions.len()..regions.len() + 1;
                regions.push(id);
            }
        }
        // children follow their parent in preorder
        for id in (0..nodes.len()).rev() {
            if let Some([l, r]) = nodes[id].children {
                nodes[id].regions = nodes[l].regions.start..nodes[r].regions.end;
            }
        }

        self.nodes = nodes;
        self.regions = regions;
    }

    /// The number of leaf regions of a complete tree.
    pub fn number_of_regions(&self) -> usize {
        self.regions.len()
    }

    /// The leaf node of `region`.
    pub fn region(&self, region: usize) -> Option<&KdNode> {
        self.regions.get(region).map(|&id| &self.nodes[id])
    }

    /// The node id of the leaf of `region`.
    pub fn region_node(&self, region: usize) -> Option<NodeId> {
        self.regions.get(region).copied()
    }

    /// The spatial bounds of `region`.
    pub fn region_bounds(&self, region: usize) -> Option<Bounds> {
        self.region(region).map(|node| node.bounds)
    }

    /// The bounds of the points inside `region`.
    pub fn region_data_bounds(&self, region: usize) -> Option<Bounds> {
        self.region(region).map(|node| node.data_bounds)
    }

    /// The region holding `p`, or `None` if `p` lies outside the tree.
    ///
    /// A point on a cut plane belongs to the lower side.
    pub fn region_containing_point(&self, p: [f64; 3]) -> Option<usize> {
        if !self.bounds().contains(&p) {
            return None;
        }
        let mut id = self.root();
        while let Some([l, r]) = self.nodes[id].children {
            let d = self.nodes[id].cut?.index();
            id = if p[d] <= self.nodes[l].bounds.max[d] {
                l
            } else {
                r
            };
        }
        self.nodes[id].region_id()
    }

    /// The nodes exactly `level` cuts below the root, left to right. A leaf above `level` stands
    /// in for the nodes it would have had.
    pub fn nodes_at_level(&self, level: usize) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack: TinyVec<[(NodeId, usize); 32]> = TinyVec::new();
        stack.push((self.root(), 0));
        while let Some((id, l)) = stack.pop() {
            match self.nodes[id].children {
                Some([left, right]) if l < level => {
                    stack.push((right, l + 1));
                    stack.push((left, l + 1));
                }
                _ => found.push(id),
            }
        }
        found
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// root cut at x = 5, left half cut at y = 5
    fn small_tree() -> KdTree {
        let mut tree = KdTree::new(Bounds::new([0.0; 3], [10.0; 3]), 4);
        let (l, r) = tree.bounds().split(Axis::X, 5.0);
        let [left, _] = tree
            .add_children(0, Axis::X, KdNode::new(l, l, 2), KdNode::new(r, r, 2))
            .unwrap();
        let (ll, lr) = l.split(Axis::Y, 5.0);
        tree.add_children(left, Axis::Y, KdNode::new(ll, ll, 1), KdNode::new(lr, lr, 1))
            .unwrap();
        tree.compact();
        tree
    }

    #[test]
    fn leaves_numbered_depth_first() {
        let tree = small_tree();
        assert_eq!(tree.number_of_regions(), 3);
        assert_eq!(tree.depth(), 2);
        assert_eq!(tree.region_bounds(0).unwrap().max, [5.0, 5.0, 10.0]);
        assert_eq!(tree.region_bounds(1).unwrap().min, [0.0, 5.0, 0.0]);
        assert_eq!(tree.region_bounds(2).unwrap().min, [5.0, 0.0, 0.0]);
        assert_eq!(tree.node(tree.root()).regions(), 0..3);
        assert_eq!(tree.region(3), None);
    }

    #[test]
    fn point_lookup() {
        let tree = small_tree();
        assert_eq!(tree.region_containing_point([1.0, 1.0, 1.0]), Some(0));
        assert_eq!(tree.region_containing_point([1.0, 9.0, 1.0]), Some(1));
        assert_eq!(tree.region_containing_point([9.0, 9.0, 1.0]), Some(2));
        // on the cut plane
        assert_eq!(tree.region_containing_point([5.0, 5.0, 5.0]), Some(0));
        assert_eq!(tree.region_containing_point([11.0, 5.0, 5.0]), None);
    }

    #[test]
    fn fill_out_then_prune() {
        let mut tree = small_tree();
        tree.fill_out(3).unwrap();
        assert_eq!(tree.depth(), 3);
        assert_eq!(tree.nodes_at_level(3).len(), 8);
        for id in tree.preorder() {
            if tree.node(id).bounds() == &Bounds::PLACEHOLDER {
                assert_eq!(tree.node(id).cut(), None);
            }
        }
        for region in 0..3 {
            let id = tree.region_node(region).unwrap();
            tree.prune(id);
        }
        let right = tree.node(tree.root()).right().unwrap();
        tree.prune(right);
        tree.compact();
        assert_eq!(tree, small_tree());
    }

    #[test]
    fn nodes_at_level_stops_at_leaves() {
        let tree = small_tree();
        let level1 = tree.nodes_at_level(1);
        assert_eq!(level1.len(), 2);
        let level2 = tree.nodes_at_level(2);
        assert_eq!(level2.len(), 3);
        assert_eq!(tree.node(level2[2]).region_id(), Some(2));
    }
}
