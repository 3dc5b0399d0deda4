//! An in-process cluster: one thread per rank, messages over channels.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;
use std::thread;

use crossbeam_channel::{never, select, unbounded, Receiver, Sender};

use crate::comm::{Communicator, Rank, Tag};
use crate::error::{PKdTreeError, Result};

#[derive(Debug)]
struct Envelope {
    source: Rank,
    tag: Tag,
    payload: Vec<u8>,
}

/// The endpoint of one rank of a [`LocalCluster`].
///
/// Messages that arrive before they are asked for are parked in a pending queue, so receives may
/// be posted in any order relative to the sends that satisfy them.
#[derive(Debug)]
pub struct LocalCommunicator {
    rank: Rank,
    size: usize,
    /// One sender per peer, `None` at our own rank.
    peers: Vec<Option<Sender<Envelope>>>,
    inbox: Receiver<Envelope>,
    abort: Receiver<()>,
    pending: RefCell<VecDeque<Envelope>>,
}

impl LocalCommunicator {
    fn take_pending(&self, source: Rank, tag: Tag) -> Option<Vec<u8>> {
        let mut pending = self.pending.borrow_mut();
        let pos = pending
            .iter()
            .position(|env| env.source == source && env.tag == tag)?;
        pending.remove(pos).map(|env| env.payload)
    }
}

impl Communicator for LocalCommunicator {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send_bytes(&self, dest: Rank, tag: Tag, bytes: Vec<u8>) -> Result<()> {
        let envelope = Envelope {
            source: self.rank,
            tag,
            payload: bytes,
        };
        match self.peers.get(dest) {
            Some(Some(sender)) => sender.send(envelope).map_err(|_| {
                PKdTreeError::Communication(format!("rank {} has shut down", dest))
            }),
            Some(None) => {
                self.pending.borrow_mut().push_back(envelope);
                Ok(())
            }
            None => Err(PKdTreeError::Communication(format!(
                "no rank {} in a cluster of {}",
                dest, self.size
            ))),
        }
    }

    fn receive_bytes(&self, source: Rank, tag: Tag) -> Result<Vec<u8>> {
        if source >= self.size {
            return Err(PKdTreeError::Communication(format!(
                "no rank {} in a cluster of {}",
                source, self.size
            )));
        }
        if let Some(payload) = self.take_pending(source, tag) {
            return Ok(payload);
        }
        loop {
            let envelope = select! {
                recv(self.inbox) -> msg => msg.map_err(|_| {
                    PKdTreeError::Communication("all peers have shut down".to_string())
                })?,
                recv(self.abort) -> _ => {
                    return Err(PKdTreeError::Communication("a peer rank aborted".to_string()));
                }
            };
            if envelope.source == source && envelope.tag == tag {
                return Ok(envelope.payload);
            }
            self.pending.borrow_mut().push_back(envelope);
        }
    }
}

/// Runs a closure on every rank of an in-process cluster.
///
/// ```
/// use pkdtree::comm::{Communicator, LocalCluster};
///
/// let ranks = LocalCluster::run(3, |comm| comm.rank());
/// assert_eq!(ranks, vec![0, 1, 2]);
/// ```
#[derive(Debug)]
pub struct LocalCluster;

impl LocalCluster {
    /// Create the connected endpoints of a cluster of `size` ranks.
    pub fn communicators(size: usize) -> Vec<LocalCommunicator> {
        Self::connect(size, never())
    }

    fn connect(size: usize, abort: Receiver<()>) -> Vec<LocalCommunicator> {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| unbounded()).unzip();

        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| LocalCommunicator {
                rank,
                size,
                peers: senders
                    .iter()
                    .enumerate()
                    .map(|(peer, tx)| (peer != rank).then(|| tx.clone()))
                    .collect(),
                inbox,
                abort: abort.clone(),
                pending: RefCell::new(VecDeque::new()),
            })
            .collect()
    }

    /// Run `f` on `size` threads, one per rank, and return the results in rank order.
    ///
    /// If any rank panics, ranks blocked in a receive are released with a communication error and
    /// the first panic is propagated once every thread has finished.
    pub fn run<F, R>(size: usize, f: F) -> Vec<R>
    where
        F: Fn(LocalCommunicator) -> R + Sync,
        R: Send,
    {
        // Nothing is ever sent on the abort channel. Dropping its only sender disconnects it,
        // which wakes every receive blocked on it, now and later.
        let (abort_tx, abort_rx) = unbounded::<()>();
        let abort_tx = Mutex::new(Some(abort_tx));
        let comms = Self::connect(size, abort_rx);
        let f = &f;
        let abort_tx = &abort_tx;

        let outcomes: Vec<thread::Result<R>> = thread::scope(|s| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| {
                    s.spawn(move || {
                        let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(comm)));
                        if outcome.is_err() {
                            if let Ok(mut tx) = abort_tx.lock() {
                                tx.take();
                            }
                        }
                        outcome
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().and_then(|outcome| outcome))
                .collect()
        });

        let mut results = Vec::with_capacity(size);
        for outcome in outcomes {
            match outcome {
                Ok(result) => results.push(result),
                Err(payload) => panic::resume_unwind(payload),
            }
        }
        results
    }
}

#[cfg(test)]
mod test {
    use crate::comm::{Communicator, CommunicatorExt, LocalCluster};

    #[test]
    fn out_of_order_receives_are_matched_by_tag() {
        let received = LocalCluster::run(2, |comm| {
            if comm.rank() == 0 {
                comm.send(1, 7, &[7.0f64]).unwrap();
                comm.send(1, 3, &[3.0f64]).unwrap();
                vec![]
            } else {
                let three = comm.receive::<f64>(0, 3).unwrap();
                let seven = comm.receive::<f64>(0, 7).unwrap();
                vec![three[0], seven[0]]
            }
        });
        assert_eq!(received[1], vec![3.0, 7.0]);
    }

    #[test]
    fn messages_from_one_source_keep_their_order() {
        let received = LocalCluster::run(2, |comm| {
            if comm.rank() == 0 {
                for i in 0..10u32 {
                    comm.send(1, 1, &[i]).unwrap();
                }
                vec![]
            } else {
                (0..10)
                    .map(|_| comm.receive::<u32>(0, 1).unwrap()[0])
                    .collect::<Vec<_>>()
            }
        });
        assert_eq!(received[1], (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn send_to_self() {
        let comm = LocalCluster::communicators(1).pop().unwrap();
        comm.send(0, 5, &[1i32, 2, 3]).unwrap();
        let mut buf = [0i32; 3];
        comm.receive_into(0, 5, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
    }

    #[test]
    fn wrong_length_is_an_error() {
        let comm = LocalCluster::communicators(1).pop().unwrap();
        comm.send(0, 5, &[1i32, 2, 3]).unwrap();
        let mut buf = [0i32; 2];
        assert!(comm.receive_into(0, 5, &mut buf).is_err());
    }

    #[test]
    #[should_panic(expected = "rank 1 failed")]
    fn panicking_rank_releases_blocked_peers() {
        LocalCluster::run(2, |comm| {
            if comm.rank() == 1 {
                panic!("rank 1 failed");
            }
            // rank 0 waits for a message that will never come
            assert!(comm.receive::<u8>(1, 0).is_err());
        });
    }
}
