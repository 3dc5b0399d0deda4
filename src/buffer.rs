//! The distributed point array: each process holds one contiguous slice of a conceptual global
//! array of cell centers, addressed by global index.

use std::ops::Range;

use crate::comm::{Communicator, Rank, SubGroup};
use crate::error::{PKdTreeError, Result};

/// A cell center.
pub type Point = [f32; 3];

/// Which process holds which global indices.
///
/// Process `p` holds the global indices `start_val(p)..start_val(p) + num_cells(p)`. The ranges
/// are contiguous, in rank order, and cover `0..total_num_cells()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalIndexTable {
    start_val: Vec<usize>,
    num_cells: Vec<usize>,
    total: usize,
}

impl GlobalIndexTable {
    /// Lay out the global index ranges from every process's local count, in rank order.
    pub fn from_counts(num_cells: Vec<usize>) -> Self {
        let mut start_val = Vec::with_capacity(num_cells.len());
        let mut total = 0;
        for &n in &num_cells {
            start_val.push(total);
            total += n;
        }
        Self {
            start_val,
            num_cells,
            total,
        }
    }

    /// Share every process's local count over `group` (one gather and one broadcast) and lay out
    /// the global index ranges. `group` must span every process.
    pub fn build<C: Communicator>(group: &SubGroup<'_, C>, num_my_cells: usize) -> Result<Self> {
        let counts = group.all_gather(&[num_my_cells as u64])?;
        Ok(Self::from_counts(counts.into_iter().map(|n| n as usize).collect()))
    }

    /// The number of processes.
    pub fn num_processes(&self) -> usize {
        self.num_cells.len()
    }

    /// The number of points over all processes.
    pub fn total_num_cells(&self) -> usize {
        self.total
    }

    /// First global index held by `process`.
    pub fn start_val(&self, process: Rank) -> usize {
        self.start_val[process]
    }

    /// Last global index held by `process`, or `None` if it holds no points.
    pub fn end_val(&self, process: Rank) -> Option<usize> {
        (self.num_cells[process] > 0).then(|| self.start_val[process] + self.num_cells[process] - 1)
    }

    /// Number of points held by `process`.
    pub fn num_cells(&self, process: Rank) -> usize {
        self.num_cells[process]
    }

    /// The global indices held by `process`.
    pub fn range(&self, process: Rank) -> Range<usize> {
        self.start_val[process]..self.start_val[process] + self.num_cells[process]
    }

    /// The process holding global index `pos`, or `None` if `pos` is out of range.
    ///
    /// A binary search over the start offsets. Processes holding no points are never returned.
    pub fn who_has(&self, pos: usize) -> Option<Rank> {
        if pos >= self.total {
            return None;
        }
        // The last process starting at or before `pos`. Empty processes share their start with
        // the next process, so they always sort before the holder.
        Some(self.start_val.partition_point(|&start| start <= pos) - 1)
    }
}

/// One process's slice of the distributed point array, double buffered.
///
/// Redistribution writes into the "next" buffer, then swaps, so the two buffers are allocated
/// once per build and reused by every partition step.
#[derive(Debug, Clone)]
pub struct PointBuffer {
    buffers: [Vec<Point>; 2],
    current: usize,
    start: usize,
}

impl PointBuffer {
    /// Take ownership of the local points, which hold global indices `start..start + len`.
    ///
    /// Fails with [`PKdTreeError::Allocation`] if the second buffer cannot be allocated.
    pub fn new(points: Vec<Point>, start: usize) -> Result<Self> {
        let mut next = Vec::new();
        next.try_reserve_exact(points.len())
            .map_err(|_| PKdTreeError::Allocation {
                location: "double buffer",
            })?;
        next.resize(points.len(), [0.0; 3]);
        Ok(Self {
            buffers: [points, next],
            current: 0,
            start,
        })
    }

    /// The number of local points.
    pub fn len(&self) -> usize {
        self.buffers[0].len()
    }

    /// Whether this process holds no points.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The global indices held here.
    pub fn range(&self) -> Range<usize> {
        self.start..self.start + self.len()
    }

    #[inline]
    fn local(&self, pos: usize) -> Option<usize> {
        self.range().contains(&pos).then(|| pos - self.start)
    }

    /// The point at global index `pos`, if it is held here.
    #[inline]
    pub fn get(&self, pos: usize) -> Option<&Point> {
        let i = self.local(pos)?;
        Some(&self.buffers[self.current][i])
    }

    /// The current buffer.
    pub fn as_slice(&self) -> &[Point] {
        &self.buffers[self.current]
    }

    /// The current buffer, mutably.
    pub fn as_mut_slice(&mut self) -> &mut [Point] {
        &mut self.buffers[self.current]
    }

    /// The points with global indices in `range` (clipped to what is held here).
    pub fn slice(&self, range: Range<usize>) -> &[Point] {
        let (lo, hi) = self.clip(range);
        &self.buffers[self.current][lo..hi]
    }

    /// The points with global indices in `range` (clipped to what is held here), mutably.
    pub fn slice_mut(&mut self, range: Range<usize>) -> &mut [Point] {
        let (lo, hi) = self.clip(range);
        &mut self.buffers[self.current][lo..hi]
    }

    fn clip(&self, range: Range<usize>) -> (usize, usize) {
        let mine = self.range();
        let lo = range.start.clamp(mine.start, mine.end);
        let hi = range.end.clamp(lo, mine.end);
        (lo - self.start, hi - self.start)
    }

    /// Copy `count` points starting at global `from` in the current buffer to global `to` in the
    /// next buffer.
    pub fn copy_to_next(&mut self, from: usize, to: usize, count: usize) {
        let (from, to) = (from - self.start, to - self.start);
        let (a, b) = self.buffers.split_at_mut(1);
        let (current, next) = if self.current == 0 {
            (&a[0], &mut b[0])
        } else {
            (&b[0], &mut a[0])
        };
        next[to..to + count].copy_from_slice(&current[from..from + count]);
    }

    /// The next buffer at global indices `to..to + count`.
    pub fn next_slice_mut(&mut self, to: usize, count: usize) -> &mut [Point] {
        let to = to - self.start;
        &mut self.buffers[1 - self.current][to..to + count]
    }

    /// Make the next buffer a copy of the current one.
    pub fn sync_next(&mut self) {
        let (a, b) = self.buffers.split_at_mut(1);
        if self.current == 0 {
            b[0].copy_from_slice(&a[0]);
        } else {
            a[0].copy_from_slice(&b[0]);
        }
    }

    /// Swap the current and next buffers.
    pub fn switch(&mut self) {
        self.current = 1 - self.current;
    }

    /// Release the double buffer and return the points in their current order.
    pub fn into_points(mut self) -> Vec<Point> {
        std::mem::take(&mut self.buffers[self.current])
    }
}
