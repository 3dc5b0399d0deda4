//! Collective operations over a contiguous range of ranks.

use bytemuck::Pod;
use num_traits::Num;

use crate::comm::{Communicator, CommunicatorExt, Rank, Tag};
use crate::error::{PKdTreeError, Result};

/// The element-wise combination applied by a reduce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    /// Sum of all contributions.
    Sum,
    /// Smallest contribution.
    Min,
    /// Largest contribution.
    Max,
}

/// Values that can be combined by a [`ReduceOp`].
pub trait Reducible: Pod + Num + PartialOrd {}

impl<T: Pod + Num + PartialOrd> Reducible for T {}

impl ReduceOp {
    #[inline]
    fn combine<T: Reducible>(self, acc: T, value: T) -> T {
        match self {
            ReduceOp::Sum => acc + value,
            ReduceOp::Min => {
                if value < acc {
                    value
                } else {
                    acc
                }
            }
            ReduceOp::Max => {
                if value > acc {
                    value
                } else {
                    acc
                }
            }
        }
    }
}

/// The ranks `from..=to` cooperating on one collective scope, distinguished from overlapping
/// scopes by `tag`.
///
/// Every member must issue the same collective calls in the same order. All `root` arguments
/// are global ranks and must be members of the group.
#[derive(Debug)]
pub struct SubGroup<'a, C: Communicator> {
    comm: &'a C,
    from: Rank,
    to: Rank,
    tag: Tag,
}

impl<'a, C: Communicator> SubGroup<'a, C> {
    /// A group of the ranks `from..=to`. The calling rank must be a member.
    pub fn new(comm: &'a C, from: Rank, to: Rank, tag: Tag) -> Self {
        debug_assert!(from <= to && to < comm.size());
        debug_assert!((from..=to).contains(&comm.rank()));
        Self {
            comm,
            from,
            to,
            tag,
        }
    }

    /// A group of every rank.
    pub fn world(comm: &'a C, tag: Tag) -> Self {
        Self::new(comm, 0, comm.size() - 1, tag)
    }

    /// The communicator this group sends over.
    pub fn comm(&self) -> &'a C {
        self.comm
    }

    /// The tag of this group.
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// The lowest rank of the group.
    pub fn first(&self) -> Rank {
        self.from
    }

    /// The highest rank of the group.
    pub fn last(&self) -> Rank {
        self.to
    }

    /// The number of ranks in the group.
    pub fn len(&self) -> usize {
        self.to - self.from + 1
    }

    /// Always false: a group has at least the calling rank.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Position of global `rank` within the group.
    pub fn local_rank(&self, rank: Rank) -> Option<usize> {
        self.contains(rank).then(|| rank - self.from)
    }

    /// Whether `rank` is a member.
    pub fn contains(&self, rank: Rank) -> bool {
        (self.from..=self.to).contains(&rank)
    }

    fn check_root(&self, root: Rank) -> Result<()> {
        if self.contains(root) {
            Ok(())
        } else {
            Err(PKdTreeError::Communication(format!(
                "root {} is outside the group {}..={}",
                root, self.from, self.to
            )))
        }
    }

    fn peers(&self) -> impl Iterator<Item = Rank> + '_ {
        let me = self.comm.rank();
        (self.from..=self.to).filter(move |&r| r != me)
    }

    /// Copy `data` from `root` into `data` on every member.
    pub fn broadcast<T: Pod>(&self, data: &mut [T], root: Rank) -> Result<()> {
        self.check_root(root)?;
        if self.comm.rank() == root {
            for peer in self.peers() {
                self.comm.send(peer, self.tag, data)?;
            }
            Ok(())
        } else {
            self.comm.receive_into(root, self.tag, data)
        }
    }

    /// Broadcast a single value from `root`.
    pub fn broadcast_value<T: Pod>(&self, value: T, root: Rank) -> Result<T> {
        let mut buf = [value];
        self.broadcast(&mut buf, root)?;
        Ok(buf[0])
    }

    /// Combine `local` element-wise across the group. The result is returned on `root` only.
    pub fn reduce<T: Reducible>(&self, local: &[T], op: ReduceOp, root: Rank) -> Result<Option<Vec<T>>> {
        self.check_root(root)?;
        if self.comm.rank() != root {
            self.comm.send(root, self.tag, local)?;
            return Ok(None);
        }
        let mut acc = local.to_vec();
        let mut buf = vec![T::zero(); local.len()];
        for peer in self.peers() {
            self.comm.receive_into(peer, self.tag, &mut buf)?;
            for (a, &v) in acc.iter_mut().zip(&buf) {
                *a = op.combine(*a, v);
            }
        }
        Ok(Some(acc))
    }

    /// Reduce onto the first rank of the group and broadcast the result back.
    pub fn all_reduce<T: Reducible>(&self, local: &[T], op: ReduceOp) -> Result<Vec<T>> {
        let root = self.from;
        let mut result = self
            .reduce(local, op, root)?
            .unwrap_or_else(|| vec![T::zero(); local.len()]);
        self.broadcast(&mut result, root)?;
        Ok(result)
    }

    /// [`all_reduce`][Self::all_reduce] of a single value.
    pub fn all_reduce_value<T: Reducible>(&self, value: T, op: ReduceOp) -> Result<T> {
        Ok(self.all_reduce(&[value], op)?[0])
    }

    /// Concatenate every member's `local` in rank order on `root`. Other members get `None`.
    ///
    /// Every member must contribute the same number of values.
    pub fn gather<T: Pod>(&self, local: &[T], root: Rank) -> Result<Option<Vec<T>>> {
        self.check_root(root)?;
        let me = self.comm.rank();
        if me != root {
            self.comm.send(root, self.tag, local)?;
            return Ok(None);
        }
        let n = local.len();
        let mut all = vec![T::zeroed(); n * self.len()];
        for (i, rank) in (self.from..=self.to).enumerate() {
            let slot = &mut all[i * n..(i + 1) * n];
            if rank == me {
                slot.copy_from_slice(local);
            } else {
                self.comm.receive_into(rank, self.tag, slot)?;
            }
        }
        Ok(Some(all))
    }

    /// Gather onto the first rank of the group and broadcast the result back.
    pub fn all_gather<T: Pod>(&self, local: &[T]) -> Result<Vec<T>> {
        let root = self.from;
        let mut all = self
            .gather(local, root)?
            .unwrap_or_else(|| vec![T::zeroed(); local.len() * self.len()]);
        self.broadcast(&mut all, root)?;
        Ok(all)
    }

    /// Let every member learn whether any member failed.
    ///
    /// Returns `Ok(())` if no member reports `failed`, otherwise a
    /// [`CollectiveFailure`][PKdTreeError::CollectiveFailure] on every member.
    pub fn check_for_failure(
        &self,
        failed: bool,
        location: &'static str,
        reason: &'static str,
    ) -> Result<()> {
        let vote = if self.len() > 1 {
            self.all_reduce_value(failed as u32, ReduceOp::Sum)?
        } else {
            failed as u32
        };
        if vote == 0 {
            return Ok(());
        }
        let err = PKdTreeError::CollectiveFailure {
            location,
            reason,
            local: failed,
        };
        log::warn!("{}", err);
        Err(err)
    }
}

#[cfg(test)]
mod test {
    use crate::comm::{Communicator, LocalCluster, ReduceOp, SubGroup};
    use crate::error::PKdTreeError;

    #[test]
    fn broadcast_from_any_root() {
        let out = LocalCluster::run(4, |comm| {
            let group = SubGroup::world(&comm, 1);
            let mut data = if comm.rank() == 2 { [4.5f32, 1.0] } else { [0.0; 2] };
            group.broadcast(&mut data, 2).unwrap();
            data
        });
        assert!(out.iter().all(|d| *d == [4.5, 1.0]));
    }

    #[test]
    fn reductions() {
        let out = LocalCluster::run(5, |comm| {
            let group = SubGroup::world(&comm, 1);
            let r = comm.rank() as i64;
            let sum = group.all_reduce_value(r, ReduceOp::Sum).unwrap();
            let min = group.all_reduce(&[r, -r], ReduceOp::Min).unwrap();
            let max = group.all_reduce_value(r as f64, ReduceOp::Max).unwrap();
            (sum, min, max)
        });
        for (sum, min, max) in out {
            assert_eq!(sum, 10);
            assert_eq!(min, vec![0, -4]);
            assert_eq!(max, 4.0);
        }
    }

    #[test]
    fn gather_in_rank_order() {
        let out = LocalCluster::run(3, |comm| {
            let group = SubGroup::world(&comm, 9);
            let r = comm.rank() as u32;
            let at_root = group.gather(&[r, 10 * r], 0).unwrap();
            let everywhere = group.all_gather(&[r]).unwrap();
            (at_root, everywhere)
        });
        assert_eq!(out[0].0, Some(vec![0, 0, 1, 10, 2, 20]));
        assert_eq!(out[1].0, None);
        for (_, everywhere) in out {
            assert_eq!(everywhere, vec![0, 1, 2]);
        }
    }

    #[test]
    fn partial_group_leaves_others_alone() {
        let out = LocalCluster::run(4, |comm| {
            if comm.rank() == 0 || comm.rank() == 3 {
                return None;
            }
            let group = SubGroup::new(&comm, 1, 2, 42);
            assert_eq!(group.local_rank(comm.rank()), Some(comm.rank() - 1));
            Some(group.all_reduce_value(comm.rank() as u32, ReduceOp::Sum).unwrap())
        });
        assert_eq!(out, vec![None, Some(3), Some(3), None]);
    }

    #[test]
    fn failure_vote_reaches_every_member() {
        let out = LocalCluster::run(3, |comm| {
            let group = SubGroup::world(&comm, 5);
            group.check_for_failure(comm.rank() == 1, "test", "memory allocation")
        });
        for (rank, result) in out.into_iter().enumerate() {
            match result {
                Err(PKdTreeError::CollectiveFailure { local, .. }) => assert_eq!(local, rank == 1),
                other => panic!("unexpected {:?}", other),
            }
        }
    }
}
