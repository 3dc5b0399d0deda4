//! Breadth-first division of the distributed point array into regions.

use std::collections::VecDeque;

use crate::buffer::{GlobalIndexTable, PointBuffer};
use crate::comm::{tags, ClusterContext, Communicator, ReduceOp, SubGroup};
use crate::config::{BuildParameters, ValidDirections};
use crate::error::{PKdTreeError, Result};
use crate::kdtree::{Axis, Bounds, KdNode, KdTree, NodeId};
use crate::select::select;

/// The axis to cut a node across: the only allowed axis, or else the allowed axis along which
/// the node's points are most spread out. Ties go to the earlier axis.
pub fn select_cut_direction(data_bounds: &Bounds, valid: ValidDirections) -> Axis {
    let mut axes = valid.axes();
    let Some(first) = axes.next() else {
        return Axis::X;
    };
    let mut best = first;
    let mut widest = data_bounds.extent(first);
    for axis in axes {
        let extent = data_bounds.extent(axis);
        if extent > widest {
            best = axis;
            widest = extent;
        }
    }
    best
}

/// The bounds of every point on every process of `group`, padded so no side is flat.
///
/// `local` is the extent of this process's data, [`Bounds::EMPTY`] if it has none. Returns the
/// padded bounds and the fudge factor they were pushed out by on sides that were not flat.
pub(crate) fn volume_bounds<C: Communicator>(
    group: &SubGroup<'_, C>,
    local: &Bounds,
) -> Result<(Bounds, f64)> {
    // maxima are negated so one min-reduce gives both
    let mut reduce = [0.0f64; 6];
    for d in 0..3 {
        reduce[d] = local.min[d];
        reduce[d + 3] = -local.max[d];
    }
    let global = group.all_reduce(&reduce, ReduceOp::Min)?;

    let mut bounds = Bounds::new(
        [global[0], global[1], global[2]],
        [-global[3], -global[4], -global[5]],
    );

    let mut diff = [0.0f64; 3];
    let mut a_little = 0.0f64;
    for axis in Axis::ALL {
        let d = axis.index();
        diff[d] = bounds.extent(axis);
        if diff[d] > a_little {
            a_little = diff[d];
        }
    }
    a_little /= 100.0;
    if a_little <= 0.0 {
        log::error!("volume bounds - degenerate volume");
        return Err(PKdTreeError::DegenerateVolume);
    }

    let fudge_factor = a_little * 1e-3;
    for d in 0..3 {
        let pad = if diff[d] <= 0.0 { a_little } else { fudge_factor };
        bounds.min[d] -= pad;
        bounds.max[d] += pad;
    }
    log::debug!("volume bounds {:?}, fudge factor {}", bounds.to_array(), fudge_factor);
    Ok((bounds, fudge_factor))
}

#[derive(Debug, Clone, Copy)]
struct NodeInfo {
    node: NodeId,
    /// Global index of the node's first point.
    left: usize,
    level: usize,
    /// 1 for the root, then one bit per level: 0 for left, 1 for right.
    path: u64,
}

struct Divider<'a, C: Communicator> {
    ctx: &'a ClusterContext<C>,
    params: &'a BuildParameters,
    table: &'a GlobalIndexTable,
    points: &'a mut PointBuffer,
    tree: KdTree,
}

/// Divide the point array level by level, starting from a root region covering `volume`.
///
/// Every process walks the same queue of nodes in the same order and takes part in the divides
/// of the nodes whose points it holds, so on return each process holds only the part of the tree
/// it helped build. If a divide fails the walk still runs to the end so that no peer is left
/// waiting, and the first failure is returned.
pub(crate) fn breadth_first_divide<C: Communicator>(
    ctx: &ClusterContext<C>,
    params: &BuildParameters,
    table: &GlobalIndexTable,
    points: &mut PointBuffer,
    volume: Bounds,
) -> Result<KdTree> {
    let mut divider = Divider {
        ctx,
        params,
        table,
        points,
        tree: KdTree::new(volume, table.total_num_cells()),
    };

    let mut queue = VecDeque::new();
    queue.push_back(NodeInfo {
        node: divider.tree.root(),
        left: 0,
        level: 0,
        path: 1,
    });

    let mut failure = None;
    let mut divided = 0;
    while let Some(info) = queue.pop_front() {
        match divider.divide_region(&info) {
            Ok(Some(midpt)) => {
                divided += 1;
                let node = divider.tree.node(info.node);
                if let (Some(l), Some(r)) = (node.left(), node.right()) {
                    queue.push_back(NodeInfo {
                        node: l,
                        left: info.left,
                        level: info.level + 1,
                        path: info.path << 1,
                    });
                    queue.push_back(NodeInfo {
                        node: r,
                        left: midpt,
                        level: info.level + 1,
                        path: (info.path << 1) | 1,
                    });
                }
            }
            Ok(None) => {}
            Err(err @ PKdTreeError::Communication(_)) => return Err(err),
            Err(err) => {
                failure.get_or_insert(err);
            }
        }
    }
    log::debug!("rank {} divided {} nodes", ctx.rank(), divided);

    match failure {
        Some(err) => Err(err),
        None => Ok(divider.tree),
    }
}

impl<'a, C: Communicator> Divider<'a, C> {
    /// Divide one node. Returns the global index of the first point of the right child, or
    /// `None` if this process did not divide the node.
    fn divide_region(&mut self, info: &NodeInfo) -> Result<Option<usize>> {
        let num_points = self.tree.node(info.node).num_points;
        if !self.params.divide_test(num_points, info.level) {
            return Ok(None);
        }
        if num_points < 2 {
            return self.divide_sparse_region(info, num_points);
        }

        let left = info.left;
        let right = left + num_points - 1;
        let (Some(p1), Some(p2)) = (self.table.who_has(left), self.table.who_has(right)) else {
            return Err(PKdTreeError::General(format!(
                "node {} holds points {}..={} beyond the {} in the array",
                info.path,
                left,
                right,
                self.table.total_num_cells()
            )));
        };
        let me = self.ctx.rank();
        if me < p1 || me > p2 {
            return Ok(None);
        }

        let group = self.ctx.group(p1, p2, tags::NODE | info.path);
        let node = self.tree.node(info.node);
        let bounds = node.bounds;
        let valid = self.params.valid_directions;

        let mut axis = select_cut_direction(&node.data_bounds, valid);
        let mut midpt = select(&group, self.table, self.points, axis, left, right)?;

        if midpt < left + 1 {
            log::debug!(
                "could not divide points {}..={} across {:?}, trying other axes",
                left,
                right,
                axis
            );
            let first_choice = axis;
            let mut divided = false;
            for other in valid.axes().filter(|&a| a != first_choice) {
                midpt = select(&group, self.table, self.points, other, left, right)?;
                if midpt >= left + 1 {
                    axis = other;
                    divided = true;
                    break;
                }
            }
            if !divided {
                log::warn!(
                    "points {}..={} are coincident, splitting at the middle index",
                    left,
                    right
                );
                midpt = (left + right) / 2 + 1;
            }
        }

        let (left_data, right_data) = self.data_bounds(&group, left, midpt, right)?;

        let reserved = self.tree.reserve_children();
        group.check_for_failure(reserved.is_err(), "divide region", "memory allocation")?;

        // halfway between the last point on the left and the first on the right
        let d = axis.index();
        let coord = (left_data.max[d] + right_data.min[d]) * 0.5;
        let (left_bounds, right_bounds) = bounds.split(axis, coord);

        self.tree.add_children(
            info.node,
            axis,
            KdNode::new(left_bounds, left_data, midpt - left),
            KdNode::new(right_bounds, right_data, right - midpt + 1),
        )?;
        Ok(Some(midpt))
    }

    /// A node with fewer than two points is divided by the process holding its first index
    /// alone: every point goes left and the right child is empty. Both children start at the
    /// same global index, so they stay with the same process.
    fn divide_sparse_region(&mut self, info: &NodeInfo, num_points: usize) -> Result<Option<usize>> {
        if self.table.who_has(info.left) != Some(self.ctx.rank()) {
            return Ok(None);
        }
        let Some(anchor) = self.points.get(info.left).copied() else {
            return Ok(None);
        };

        let node = self.tree.node(info.node);
        let bounds = node.bounds;
        let axis = select_cut_direction(&node.data_bounds, self.params.valid_directions);
        let d = axis.index();
        let coord = if num_points > 0 {
            anchor[d] as f64
        } else {
            (bounds.min[d] + bounds.max[d]) * 0.5
        };
        let (left_bounds, right_bounds) = bounds.split(axis, coord);

        // Data bounds are pinned to the point at the first index, even for an empty region.
        let tight = Bounds::around_point(&anchor);
        self.tree.add_children(
            info.node,
            axis,
            KdNode::new(left_bounds, tight, num_points),
            KdNode::new(right_bounds, tight, 0),
        )?;
        Ok(Some(info.left))
    }

    /// The extents of the points in `left..midpt` and in `midpt..=right` over the whole group.
    fn data_bounds(
        &self,
        group: &SubGroup<'_, C>,
        left: usize,
        midpt: usize,
        right: usize,
    ) -> Result<(Bounds, Bounds)> {
        // per half: three minima, then three negated maxima
        let mut local = [f32::INFINITY; 12];
        for (half, range) in [left..midpt, midpt..right + 1].into_iter().enumerate() {
            let out = &mut local[half * 6..half * 6 + 6];
            for p in self.points.slice(range) {
                for d in 0..3 {
                    out[d] = out[d].min(p[d]);
                    out[d + 3] = out[d + 3].min(-p[d]);
                }
            }
        }
        let global = group.all_reduce(&local, ReduceOp::Min)?;

        let unpack = |b: &[f32]| {
            Bounds::new(
                [b[0] as f64, b[1] as f64, b[2] as f64],
                [-b[3] as f64, -b[4] as f64, -b[5] as f64],
            )
        };
        Ok((unpack(&global[..6]), unpack(&global[6..])))
    }
}
