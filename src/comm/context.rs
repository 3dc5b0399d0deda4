use crate::comm::{Communicator, Rank, SubGroup, Tag, Transport};
use crate::error::{PKdTreeError, Result};

/// The immutable view of the process set that every distributed operation runs in.
///
/// Rank and size are read once from the communicator when the context is created and cannot
/// change for its lifetime.
#[derive(Debug)]
pub struct ClusterContext<C: Communicator> {
    comm: C,
    rank: Rank,
    size: usize,
}

impl<C: Communicator> ClusterContext<C> {
    /// Wrap a communicator, rejecting transports that cannot carry collective operations.
    pub fn new(comm: C) -> Result<Self> {
        if comm.transport() == Transport::ClientServer {
            log::error!("parallel k-d tree communication will fail with a client/server transport");
            return Err(PKdTreeError::UnsupportedTransport);
        }
        let size = comm.size();
        let rank = comm.rank();
        if size == 0 || rank >= size {
            return Err(PKdTreeError::Communication(format!(
                "rank {} is not valid in a process set of {}",
                rank, size
            )));
        }
        Ok(Self { comm, rank, size })
    }

    /// The rank of this process.
    #[inline]
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// The number of processes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// The underlying communicator.
    #[inline]
    pub fn comm(&self) -> &C {
        &self.comm
    }

    /// A collective scope over every process.
    pub fn world(&self, tag: Tag) -> SubGroup<'_, C> {
        SubGroup::world(&self.comm, tag)
    }

    /// A collective scope over the processes `from..=to`.
    pub fn group(&self, from: Rank, to: Rank, tag: Tag) -> SubGroup<'_, C> {
        SubGroup::new(&self.comm, from, to, tag)
    }

    /// Release the communicator.
    pub fn into_inner(self) -> C {
        self.comm
    }
}
