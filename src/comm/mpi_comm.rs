//! A [`Communicator`] over MPI, for running a build across real processes.
//!
//! All traffic travels on one MPI tag. Each message carries its [`Tag`] in an 8-byte header,
//! because node tags are wider than the tags MPI guarantees. MPI keeps messages between two
//! ranks on one tag in order, which gives the ordering [`Communicator`] requires.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;

use ::mpi::request;
use ::mpi::topology::{Rank as MpiRank, SimpleCommunicator};
use ::mpi::traits::{Communicator as _, Destination as _, Source as _};

use crate::comm::{Communicator, Rank, Tag};
use crate::error::{PKdTreeError, Result};

const WIRE_TAG: MpiRank = 0x504b;
const HEADER_LEN: usize = std::mem::size_of::<Tag>();

#[derive(Debug)]
struct Envelope {
    source: Rank,
    tag: Tag,
    payload: Vec<u8>,
}

/// Prefix `payload` with its tag.
fn frame(tag: Tag, payload: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(HEADER_LEN + payload.len());
    message.extend_from_slice(&tag.to_le_bytes());
    message.extend_from_slice(payload);
    message
}

/// Split a framed message back into its tag and payload.
fn unframe(source: Rank, mut message: Vec<u8>) -> Result<Envelope> {
    if message.len() < HEADER_LEN {
        return Err(PKdTreeError::Communication(format!(
            "{}-byte message from rank {} has no tag header",
            message.len(),
            source
        )));
    }
    let mut header = [0u8; HEADER_LEN];
    header.copy_from_slice(&message[..HEADER_LEN]);
    message.drain(..HEADER_LEN);
    Ok(Envelope {
        source,
        tag: Tag::from_le_bytes(header),
        payload: message,
    })
}

/// One rank of an MPI job.
///
/// ```no_run
/// use pkdtree::comm::{ClusterContext, MpiCommunicator};
/// use pkdtree::{BuildParameters, PKdTree, PointCloud};
///
/// let universe = mpi::initialize().unwrap();
/// let ctx = ClusterContext::new(MpiCommunicator::new(universe.world())).unwrap();
/// let points = vec![[ctx.rank() as f64, 0.0, 1.0], [ctx.rank() as f64, 1.0, 0.0]];
/// let mut locator = PKdTree::new(BuildParameters::default().with_min_cells(1));
/// locator.build_locator(&ctx, &[PointCloud::new(points)]).unwrap();
/// ```
pub struct MpiCommunicator {
    comm: SimpleCommunicator,
    pending: RefCell<VecDeque<Envelope>>,
}

impl fmt::Debug for MpiCommunicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MpiCommunicator")
            .field("rank", &self.rank())
            .field("size", &self.size())
            .field("pending", &self.pending.borrow().len())
            .finish()
    }
}

impl MpiCommunicator {
    /// Wrap an MPI communicator, typically `universe.world()`.
    pub fn new(comm: SimpleCommunicator) -> Self {
        Self {
            comm,
            pending: RefCell::new(VecDeque::new()),
        }
    }

    fn mpi_rank(&self, rank: Rank) -> Result<MpiRank> {
        match MpiRank::try_from(rank) {
            Ok(r) if rank < self.size() => Ok(r),
            _ => Err(PKdTreeError::Communication(format!(
                "no rank {} among {} processes",
                rank,
                self.size()
            ))),
        }
    }

    fn take_pending(&self, source: Rank, tag: Tag) -> Option<Vec<u8>> {
        let mut pending = self.pending.borrow_mut();
        let pos = pending
            .iter()
            .position(|env| env.source == source && env.tag == tag)?;
        pending.remove(pos).map(|env| env.payload)
    }

    /// Park every message that has already arrived.
    fn drain(&self) -> Result<()> {
        while let Some((message, status)) =
            self.comm.any_process().immediate_matched_probe_with_tag(WIRE_TAG)
        {
            let (bytes, _) = message.matched_receive_vec::<u8>();
            let envelope = unframe(status.source_rank() as Rank, bytes)?;
            self.pending.borrow_mut().push_back(envelope);
        }
        Ok(())
    }
}

impl Communicator for MpiCommunicator {
    fn rank(&self) -> Rank {
        self.comm.rank() as Rank
    }

    fn size(&self) -> usize {
        self.comm.size() as usize
    }

    fn send_bytes(&self, dest: Rank, tag: Tag, bytes: Vec<u8>) -> Result<()> {
        let dest = self.mpi_rank(dest)?;
        let message = frame(tag, &bytes);
        let mut failed = None;
        // Keep receiving while the send is in flight, so two ranks sending to each other
        // cannot both wait on the other's receive.
        request::scope(|scope| {
            let mut sending =
                self.comm
                    .process_at_rank(dest)
                    .immediate_send_with_tag(scope, &message[..], WIRE_TAG);
            loop {
                match sending.test() {
                    Ok(_) => break,
                    Err(still_sending) => sending = still_sending,
                }
                if let Err(err) = self.drain() {
                    failed.get_or_insert(err);
                }
                std::hint::spin_loop();
            }
        });
        failed.map_or(Ok(()), Err)
    }

    fn receive_bytes(&self, source: Rank, tag: Tag) -> Result<Vec<u8>> {
        let mpi_source = self.mpi_rank(source)?;
        loop {
            if let Some(payload) = self.take_pending(source, tag) {
                return Ok(payload);
            }
            let (message, _) = self
                .comm
                .process_at_rank(mpi_source)
                .matched_probe_with_tag(WIRE_TAG);
            let (bytes, _) = message.matched_receive_vec::<u8>();
            let envelope = unframe(source, bytes)?;
            if envelope.tag == tag {
                return Ok(envelope.payload);
            }
            self.pending.borrow_mut().push_back(envelope);
        }
    }
}
