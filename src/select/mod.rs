//! Distributed order-statistic selection.
//!
//! The point array is spread over processes by contiguous global index ranges. [`select`] runs
//! Floyd–Rivest selection over a global range `[left, right]` of that array, physically moving
//! points between processes so that, on return, every point before the split index has a smaller
//! coordinate on the chosen axis than every point at or after it.

mod partition;
mod transfer;

pub use partition::{partition_about_my_value, partition_about_other_value};
pub use transfer::{plan_transfers, Segment, Transfer};

use std::cmp;

use crate::buffer::{GlobalIndexTable, PointBuffer};
use crate::comm::{Communicator, CommunicatorExt, ReduceOp, SubGroup};
use crate::error::{PKdTreeError, Result};
use crate::kdtree::Axis;

/// Partition the global range `[left, right]` about its median on `axis` and return the split
/// index.
///
/// Must be called by every member of `group`, and `group` must span the processes holding
/// `left` and `right`. The split starts at `(left + right) / 2 + 1` and is rolled back to the
/// first occurrence of the value there, so that every point before the split is strictly less
/// than every point at or after it. A split equal to `left` means the range could not be divided
/// on this axis.
pub fn select<C: Communicator>(
    group: &SubGroup<'_, C>,
    table: &GlobalIndexTable,
    points: &mut PointBuffer,
    axis: Axis,
    left: usize,
    right: usize,
) -> Result<usize> {
    if right <= left {
        return Ok(left);
    }
    let mut selector = Selector {
        group,
        table,
        points,
        axis: axis.index(),
    };
    let k = (left + right) / 2 + 1;
    selector.select_range(left, right, k)?;
    selector.roll_back_ties(left, k)
}

struct Selector<'s, 'a, C: Communicator> {
    group: &'s SubGroup<'a, C>,
    table: &'s GlobalIndexTable,
    points: &'s mut PointBuffer,
    axis: usize,
}

impl<'s, 'a, C: Communicator> Selector<'s, 'a, C> {
    fn who_has(&self, pos: usize) -> Result<usize> {
        self.table.who_has(pos).ok_or_else(|| {
            PKdTreeError::General(format!(
                "global index {} is outside the point array of {}",
                pos,
                self.table.total_num_cells()
            ))
        })
    }

    /// The local coordinate at `pos`, or zero if the point is held elsewhere.
    #[inline]
    fn value(&self, pos: usize) -> f32 {
        self.points.get(pos).map_or(0.0, |p| p[self.axis])
    }

    /// Rearrange `[left, right]` so that position `k` holds the value it would hold if the range
    /// were sorted, with no larger value before it and no smaller value after it.
    fn select_range(&mut self, mut left: usize, mut right: usize, k: usize) -> Result<()> {
        while right > left {
            if right - left > 600 {
                // Narrow to a sample around k first so the pivot lands near the k-th value.
                let n = (right - left + 1) as f64;
                let m = (k - left + 1) as f64;
                let z = f64::ln(n);
                let s = 0.5 * f64::exp((2.0 * z) / 3.0);
                let sd = 0.5
                    * f64::sqrt((z * s * (n - s)) / n)
                    * (if m - n / 2.0 < 0.0 { -1.0 } else { 1.0 });
                let new_left = cmp::max(left, f64::floor(k as f64 - (m * s) / n + sd) as usize);
                let new_right = cmp::min(
                    right,
                    f64::floor(k as f64 + ((n - m) * s) / n + sd) as usize,
                );
                self.select_range(new_left, new_right, k)?;
            }

            let (first_equal, first_greater) = self.partition_sub_array(left, right, k)?;

            if k >= first_greater {
                left = first_greater;
            } else if k >= first_equal {
                // k sits among the values equal to the pivot
                left = right;
            } else {
                right = first_equal - 1;
            }
        }
        Ok(())
    }

    /// Partition `[left, right]` globally into values less than, equal to, and greater than the
    /// value at `k`. Returns the global indices of the first equal and the first greater value.
    fn partition_sub_array(
        &mut self,
        left: usize,
        right: usize,
        k: usize,
    ) -> Result<(usize, usize)> {
        let p1 = self.who_has(left)?;
        let p2 = self.who_has(right)?;
        let me = self.group.comm().rank();

        let mut idx = [0u64; 2];

        if me < p1 || me > p2 {
            self.group.broadcast(&mut idx, p1)?;
            return Ok((idx[0] as usize, idx[1] as usize));
        }

        if p1 == p2 {
            let piece = self.points.slice_mut(left..right + 1);
            let (i, j) = partition_about_my_value(piece, k - left, self.axis);
            idx = [(left + i) as u64, (left + j) as u64];
            self.group.broadcast(&mut idx, p1)?;
            return Ok((idx[0] as usize, idx[1] as usize));
        }

        let inner = SubGroup::new(self.group.comm(), p1, p2, self.group.tag());
        let has_k = self.who_has(k)?;
        let t = inner.broadcast_value(self.value(k), has_k)?;

        let mine = self.table.range(me);
        let lo = cmp::max(mine.start, left);
        let hi = cmp::max(cmp::min(mine.end, right + 1), lo);

        let piece = self.points.slice_mut(lo..hi);
        let (i, j) = if has_k == me {
            partition_about_my_value(piece, k - lo, self.axis)
        } else {
            partition_about_other_value(piece, self.axis, t)
        };

        let local = [lo as u64, hi as u64, (lo + i) as u64, (lo + j) as u64];
        let all = inner.all_gather(&local)?;
        let segments: Vec<Segment> = all
            .chunks_exact(4)
            .enumerate()
            .map(|(i, s)| {
                Segment::from_bounds(
                    p1 + i,
                    s[0] as usize,
                    s[1] as usize,
                    s[2] as usize,
                    s[3] as usize,
                )
            })
            .collect();

        // Values outside [left, right] are not scheduled, so carry them over first.
        if lo > mine.start || hi < mine.end {
            self.points.sync_next();
        }
        for transfer in plan_transfers(&segments) {
            self.do_transfer(&transfer)?;
        }
        self.points.switch();

        let less: usize = segments.iter().map(|s| s.less).sum();
        let equal: usize = segments.iter().map(|s| s.equal).sum();
        let first_center = left + less;
        idx = [first_center as u64, (first_center + equal) as u64];
        self.group.broadcast(&mut idx, p1)?;
        Ok((idx[0] as usize, idx[1] as usize))
    }

    fn do_transfer(&mut self, t: &Transfer) -> Result<()> {
        let me = self.group.comm().rank();
        let tag = self.group.tag();
        if t.from == me && t.to == me {
            self.points.copy_to_next(t.from_index, t.to_index, t.count);
        } else if t.from == me {
            let data = self.points.slice(t.from_index..t.from_index + t.count);
            self.group.comm().send(t.to, tag, data)?;
        } else if t.to == me {
            let buf = self.points.next_slice_mut(t.to_index, t.count);
            self.group.comm().receive_into(t.from, tag, buf)?;
        }
        Ok(())
    }

    /// Move `k` back to the first position holding the same value as `k`.
    fn roll_back_ties(&mut self, left: usize, k: usize) -> Result<usize> {
        let has_k = self.who_has(k)?;
        let has_k_left = self.who_has(k - 1)?;

        let k_val = self.group.broadcast_value(self.value(k), has_k)?;
        let k_left_val = self.group.broadcast_value(self.value(k - 1), has_k_left)?;

        if k_left_val != k_val {
            return Ok(k);
        }

        let me = self.group.comm().rank();
        let mut first_k_val = self.table.total_num_cells() as u64;

        if me <= has_k_left {
            let mine = self.table.range(me);
            // Only positions inside [left, k - 1] can hold the tied values.
            let lo = cmp::max(mine.start, left);
            let hi = cmp::min(mine.end, k);
            for pos in (lo..hi).rev() {
                if self.value(pos) != k_val {
                    break;
                }
                first_k_val = pos as u64;
            }
        }

        let new_k = self.group.all_reduce_value(first_k_val, ReduceOp::Min)?;
        Ok(new_k as usize)
    }
}
