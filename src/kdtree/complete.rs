//! Merging the partial trees built on each process into one tree held by every process.
//!
//! After the divide each process knows only the nodes it helped cut. The trees are padded to a
//! common shape, every node's description is collected on rank 0, boundaries are made exactly
//! consistent there, and the result is broadcast back node by node.

use tinyvec::{tiny_vec, TinyVec};

use crate::comm::{tags, ClusterContext, Communicator, CommunicatorExt, ReduceOp, SubGroup};
use crate::error::{PKdTreeError, Result};
use crate::kdtree::{Axis, Bounds, KdTree, NodeId};

/// Length of the record describing the two children of a node.
const RECORD_LEN: usize = 27;

/// `[cut, left count, right count]`, then per axis the left bounds, left data bounds, right
/// bounds and right data bounds as `(min, max)` pairs. A missing cut is written as 3.
type NodeRecord = [f64; RECORD_LEN];

fn pack_children(tree: &KdTree, id: NodeId) -> NodeRecord {
    let mut record = [0.0; RECORD_LEN];
    let node = tree.node(id);
    let (Some(l), Some(r)) = (node.left(), node.right()) else {
        record[0] = 3.0;
        return record;
    };
    let (left, right) = (tree.node(l), tree.node(r));
    record[0] = node.cut.map_or(3.0, |axis| axis.index() as f64);
    record[1] = left.num_points as f64;
    record[2] = right.num_points as f64;
    for d in 0..3 {
        let out = &mut record[3 + d * 8..3 + (d + 1) * 8];
        out[0] = left.bounds.min[d];
        out[1] = left.bounds.max[d];
        out[2] = left.data_bounds.min[d];
        out[3] = left.data_bounds.max[d];
        out[4] = right.bounds.min[d];
        out[5] = right.bounds.max[d];
        out[6] = right.data_bounds.min[d];
        out[7] = right.data_bounds.max[d];
    }
    record
}

fn unpack_children(tree: &mut KdTree, id: NodeId, record: &[f64]) {
    let Some([l, r]) = tree.node(id).children else {
        return;
    };
    tree.node_mut(id).cut = Axis::from_index(record[0] as usize);

    let mut bounds = [Bounds::PLACEHOLDER; 4];
    for d in 0..3 {
        let values = &record[3 + d * 8..3 + (d + 1) * 8];
        for (i, b) in bounds.iter_mut().enumerate() {
            b.min[d] = values[2 * i];
            b.max[d] = values[2 * i + 1];
        }
    }
    let [left_bounds, left_data, right_bounds, right_data] = bounds;

    let left = tree.node_mut(l);
    left.num_points = record[1] as usize;
    left.bounds = left_bounds;
    left.data_bounds = left_data;
    let right = tree.node_mut(r);
    right.num_points = record[2] as usize;
    right.bounds = right_bounds;
    right.data_bounds = right_data;
}

/// Turn the partial trees of every process into the same complete tree everywhere.
pub(crate) fn complete_tree<C: Communicator>(ctx: &ClusterContext<C>, tree: &mut KdTree) -> Result<()> {
    let world = ctx.world(tags::COMPLETE);

    let depth = world.all_reduce_value(tree.depth() as u64, ReduceOp::Max)? as usize;
    let filled = tree.fill_out(depth);
    if let Err(err) = &filled {
        log::error!("could not pad tree to depth {}: {}", depth, err);
    }
    world.check_for_failure(filled.is_err(), "complete tree", "memory allocation")?;

    reduce_data(ctx, &world, tree)?;
    if ctx.rank() == 0 {
        check_fix_region_boundaries(tree);
    }
    broadcast_data(&world, tree)?;

    tree.compact();
    log::debug!(
        "complete tree has depth {} and {} regions",
        depth,
        tree.number_of_regions()
    );
    Ok(())
}

/// Collect the description of every cut node on rank 0. Nodes that no process cut are pruned
/// everywhere.
fn reduce_data<C: Communicator>(
    ctx: &ClusterContext<C>,
    world: &SubGroup<'_, C>,
    tree: &mut KdTree,
) -> Result<()> {
    let me = ctx.rank();
    let mut stack: TinyVec<[NodeId; 32]> = tiny_vec![tree.root()];
    while let Some(id) = stack.pop() {
        let Some([l, r]) = tree.node(id).children else {
            continue;
        };
        let have = tree.node(id).cut.is_some() as u8;
        let sources = world.all_gather(&[have])?;

        if sources[0] == 0 {
            match sources.iter().position(|&s| s != 0) {
                None => {
                    tree.prune(id);
                    continue;
                }
                Some(source) if me == source => {
                    ctx.comm()
                        .send(0, tags::NODE_DATA, &pack_children(tree, id))?;
                }
                Some(source) if me == 0 => {
                    let record = ctx.comm().receive::<f64>(source, tags::NODE_DATA)?;
                    if record.len() != RECORD_LEN {
                        return Err(PKdTreeError::Communication(format!(
                            "node record of {} values from rank {}",
                            record.len(),
                            source
                        )));
                    }
                    unpack_children(tree, id, &record);
                }
                Some(_) => {}
            }
        }

        stack.push(r);
        stack.push(l);
    }
    Ok(())
}

/// Make the children of every node tile it exactly: each child keeps its parent's bounds except
/// on the cut axis, where the two share the cut plane.
pub(crate) fn check_fix_region_boundaries(tree: &mut KdTree) {
    for id in tree.preorder() {
        let node = tree.node(id);
        let Some([l, r]) = node.children else {
            continue;
        };
        let parent = node.bounds;
        let cut = node.cut.map(Axis::index);

        let mut left = tree.node(l).bounds;
        let mut right = tree.node(r).bounds;
        for d in 0..3 {
            left.min[d] = parent.min[d];
            right.max[d] = parent.max[d];
            if cut == Some(d) {
                left.max[d] = right.min[d];
            } else {
                left.max[d] = parent.max[d];
                right.min[d] = parent.min[d];
            }
        }
        tree.node_mut(l).bounds = left;
        tree.node_mut(r).bounds = right;
    }
}

/// Send rank 0's description of every node to every other process.
fn broadcast_data<C: Communicator>(world: &SubGroup<'_, C>, tree: &mut KdTree) -> Result<()> {
    let root = world.first();
    let me = world.comm().rank();
    let mut stack: TinyVec<[NodeId; 32]> = tiny_vec![tree.root()];
    while let Some(id) = stack.pop() {
        let Some([l, r]) = tree.node(id).children else {
            continue;
        };
        let mut record = pack_children(tree, id);
        world.broadcast(&mut record, root)?;
        if me != root {
            unpack_children(tree, id, &record);
        }
        stack.push(r);
        stack.push(l);
    }
    Ok(())
}
