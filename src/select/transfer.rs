use crate::comm::Rank;

/// One process's share of a global range after it partitioned its piece locally.
///
/// The piece holds global indices `start..start + less + equal + greater`: first the values less
/// than the pivot, then the values equal to it, then the values greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// The process holding the piece.
    pub rank: Rank,
    /// Global index of the first value of the piece.
    pub start: usize,
    /// Number of values less than the pivot.
    pub less: usize,
    /// Number of values equal to the pivot.
    pub equal: usize,
    /// Number of values greater than the pivot.
    pub greater: usize,
}

impl Segment {
    /// Build a segment from the piece bounds `start..end` and the local partition points.
    pub fn from_bounds(
        rank: Rank,
        start: usize,
        end: usize,
        first_equal: usize,
        first_greater: usize,
    ) -> Self {
        Self {
            rank,
            start,
            less: first_equal - start,
            equal: first_greater - first_equal,
            greater: end - first_greater,
        }
    }

    /// Total number of values in the piece.
    pub fn len(&self) -> usize {
        self.less + self.equal + self.greater
    }

    /// Whether the piece holds no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Move `count` consecutive values from global index `from_index` on process `from` to global
/// index `to_index` on process `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    pub from: Rank,
    pub to: Rank,
    pub from_index: usize,
    pub to_index: usize,
    pub count: usize,
}

/// Schedule the moves that turn locally partitioned pieces into one globally partitioned range.
///
/// The pieces must be contiguous and in rank order. Every process keeps the same number of values
/// it started with. Receivers are filled in rank order, each drawing first from the pool of
/// values less than the pivot, then the equal pool, then the greater pool; each pool is drained
/// in sender rank order. The result depends only on `segments`, so every process computes the
/// same schedule.
pub fn plan_transfers(segments: &[Segment]) -> Vec<Transfer> {
    // (rank, first global index, count) for each pool chunk, in the order they are drained
    let mut sources = Vec::with_capacity(segments.len() * 3);
    for pool in 0..3 {
        for seg in segments {
            let (offset, count) = match pool {
                0 => (0, seg.less),
                1 => (seg.less, seg.equal),
                _ => (seg.less + seg.equal, seg.greater),
            };
            if count > 0 {
                sources.push((seg.rank, seg.start + offset, count));
            }
        }
    }

    let mut transfers = Vec::new();
    let mut sources = sources.into_iter().peekable();
    let mut used = 0;

    for recvr in segments {
        let mut have = 0;
        while have < recvr.len() {
            let Some(&(rank, first, count)) = sources.peek() else {
                break;
            };
            let take = (count - used).min(recvr.len() - have);
            transfers.push(Transfer {
                from: rank,
                to: recvr.rank,
                from_index: first + used,
                to_index: recvr.start + have,
                count: take,
            });
            have += take;
            used += take;
            if used == count {
                sources.next();
                used = 0;
            }
        }
    }
    transfers
}
