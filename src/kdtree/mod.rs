//! A k-d tree over points spread across cooperating processes.
//!
//! The tree is built in two phases. In the divide phase every process walks the tree level by
//! level, taking part in the median selection of each node whose points it holds. In the
//! completion phase the partial trees are merged so that every process ends up holding the same
//! tree, with its leaves numbered as regions.

#![warn(missing_docs)]

mod bounds;
pub(crate) mod builder;
pub(crate) mod complete;
mod node;
mod traversal;

pub use bounds::{Axis, Bounds};
pub use builder::select_cut_direction;
pub use node::{KdNode, KdTree, NodeId};

#[cfg(test)]
pub(crate) mod test;
