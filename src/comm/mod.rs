//! Message passing between the cooperating processes of a parallel build.
//!
//! Every distributed step of the k-d tree build is expressed with the point-to-point operations
//! of a [`Communicator`]. Collective operations (broadcast, reduce, gather) over a contiguous range
//! of ranks are layered on top by [`SubGroup`].

#![warn(missing_docs)]

mod context;
mod local;
#[cfg(feature = "mpi")]
mod mpi_comm;
mod subgroup;

pub use context::ClusterContext;
pub use local::{LocalCluster, LocalCommunicator};
#[cfg(feature = "mpi")]
pub use mpi_comm::MpiCommunicator;
pub use subgroup::{ReduceOp, Reducible, SubGroup};

use bytemuck::Pod;

use crate::error::{PKdTreeError, Result};

/// The rank of a process, in `0..size`.
pub type Rank = usize;

/// A message tag. Messages are matched on `(source, tag)`.
pub type Tag = u64;

/// Tags of the collective phases of a build.
pub(crate) mod tags {
    use super::Tag;

    /// Parameter agreement, volume bounds and the global index table.
    pub const BUILD: Tag = 0x1000;
    /// The failure vote after the divide.
    pub const DIVIDE_VOTE: Tag = 0x2000;
    /// Depth agreement, reduction and broadcast of the tree.
    pub const COMPLETE: Tag = 0x3000;
    /// Node records sent to rank 0 while completing the tree.
    pub const NODE_DATA: Tag = 0x1111;
    /// Process/region tables and field ranges.
    pub const TABLES: Tag = 0xf000;
    /// Set on the tag of every node divide; the rest of the tag is the node's path from the root.
    pub const NODE: Tag = 1 << 63;
}

/// The kind of transport behind a [`Communicator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Every rank can exchange messages with every other rank.
    Symmetric,
    /// A client/server link between exactly two endpoints.
    ClientServer,
}

/// Blocking point-to-point messaging between the ranks of a fixed process set.
///
/// Messages from one source with one tag must be delivered in the order they were sent.
pub trait Communicator {
    /// The rank of the calling process.
    fn rank(&self) -> Rank;

    /// The number of processes.
    fn size(&self) -> usize;

    /// Send a message to `dest`.
    fn send_bytes(&self, dest: Rank, tag: Tag, bytes: Vec<u8>) -> Result<()>;

    /// Block until a message from `source` with `tag` arrives, and return its payload.
    fn receive_bytes(&self, source: Rank, tag: Tag) -> Result<Vec<u8>>;

    /// The kind of transport this communicator runs over.
    fn transport(&self) -> Transport {
        Transport::Symmetric
    }
}

/// Typed helpers for any [`Communicator`].
pub trait CommunicatorExt: Communicator {
    /// Send a slice of plain-old-data values to `dest`.
    fn send<T: Pod>(&self, dest: Rank, tag: Tag, data: &[T]) -> Result<()> {
        self.send_bytes(dest, tag, bytemuck::cast_slice(data).to_vec())
    }

    /// Receive a message of plain-old-data values from `source`.
    fn receive<T: Pod>(&self, source: Rank, tag: Tag) -> Result<Vec<T>> {
        let bytes = self.receive_bytes(source, tag)?;
        let size = std::mem::size_of::<T>();
        if size == 0 || bytes.len() % size != 0 {
            return Err(PKdTreeError::Communication(format!(
                "received {} bytes from rank {}, not a whole number of {}-byte values",
                bytes.len(),
                source,
                size
            )));
        }
        // Copy into a typed vector so the values are correctly aligned.
        let mut values = vec![T::zeroed(); bytes.len() / size];
        bytemuck::cast_slice_mut::<T, u8>(&mut values).copy_from_slice(&bytes);
        Ok(values)
    }

    /// Receive a message from `source` into `buf`, which must have exactly the message's length.
    fn receive_into<T: Pod>(&self, source: Rank, tag: Tag, buf: &mut [T]) -> Result<()> {
        let values = self.receive::<T>(source, tag)?;
        if values.len() != buf.len() {
            return Err(PKdTreeError::Communication(format!(
                "expected {} values from rank {}, received {}",
                buf.len(),
                source,
                values.len()
            )));
        }
        buf.copy_from_slice(&values);
        Ok(())
    }
}

impl<C: Communicator + ?Sized> CommunicatorExt for C {}
