//! Parameters that control how the tree is built and how its regions are assigned.

use bitflags::bitflags;

use crate::assignment::RegionAssignment;
use crate::comm::{Communicator, SubGroup};
use crate::error::Result;
use crate::kdtree::Axis;

/// Deepest level a node may be divided at. Node message tags encode the path from the root, one
/// bit per level.
pub const MAX_TREE_LEVEL: usize = 62;

bitflags! {
    /// The axes the tree may be cut across.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ValidDirections: u32 {
        /// Cuts perpendicular to the x axis.
        const X = 0b001;
        /// Cuts perpendicular to the y axis.
        const Y = 0b010;
        /// Cuts perpendicular to the z axis.
        const Z = 0b100;
    }
}

impl Default for ValidDirections {
    fn default() -> Self {
        Self::all()
    }
}

impl ValidDirections {
    /// The flag of a single axis.
    pub fn from_axis(axis: Axis) -> Self {
        match axis {
            Axis::X => Self::X,
            Axis::Y => Self::Y,
            Axis::Z => Self::Z,
        }
    }

    /// Whether cuts across `axis` are allowed.
    pub fn allows(self, axis: Axis) -> bool {
        self.contains(Self::from_axis(axis))
    }

    /// The allowed axes, in X, Y, Z order.
    pub fn axes(self) -> impl Iterator<Item = Axis> {
        Axis::ALL.into_iter().filter(move |&axis| self.allows(axis))
    }
}

/// Everything that decides the shape of the tree and who owns its regions.
///
/// Every process must build with the same parameters; before a build the values on rank 0 are
/// adopted everywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildParameters {
    /// Do not divide a region into halves smaller than this. Zero disables the limit.
    pub min_cells: usize,
    /// Do not divide regions at this level or deeper.
    pub max_level: usize,
    /// Stop before the region count would exceed this. Zero disables the limit.
    pub number_of_regions_or_less: usize,
    /// Stop once the region count reaches this. Zero disables the limit.
    pub number_of_regions_or_more: usize,
    /// The axes cuts may be made across.
    pub valid_directions: ValidDirections,
    /// How regions are mapped to processes after a build.
    pub region_assignment: RegionAssignment,
}

impl Default for BuildParameters {
    fn default() -> Self {
        Self {
            min_cells: 100,
            max_level: 20,
            number_of_regions_or_less: 0,
            number_of_regions_or_more: 0,
            valid_directions: ValidDirections::all(),
            region_assignment: RegionAssignment::Contiguous,
        }
    }
}

impl BuildParameters {
    /// Set the smallest number of points a divided region may leave on each side.
    pub fn with_min_cells(mut self, min_cells: usize) -> Self {
        self.min_cells = min_cells;
        self
    }

    /// Set the level below which no region is divided.
    pub fn with_max_level(mut self, max_level: usize) -> Self {
        self.max_level = max_level.min(MAX_TREE_LEVEL);
        self
    }

    /// Set the largest number of regions to build.
    pub fn with_number_of_regions_or_less(mut self, n: usize) -> Self {
        self.number_of_regions_or_less = n;
        self
    }

    /// Set the region count at which dividing stops.
    pub fn with_number_of_regions_or_more(mut self, n: usize) -> Self {
        self.number_of_regions_or_more = n;
        self
    }

    /// Set the axes the tree may be cut across.
    pub fn with_valid_directions(mut self, directions: ValidDirections) -> Self {
        self.valid_directions = directions;
        self
    }

    /// Set how regions are mapped to processes.
    pub fn with_region_assignment(mut self, assignment: RegionAssignment) -> Self {
        self.region_assignment = assignment;
        self
    }

    /// Whether a node holding `num_points` points at `level` should be divided.
    pub fn divide_test(&self, num_points: usize, level: usize) -> bool {
        if level >= self.max_level.min(MAX_TREE_LEVEL) {
            return false;
        }
        if self.min_cells > 0 && self.min_cells > num_points / 2 {
            return false;
        }
        let regions_now = 1usize << level;
        let regions_next = regions_now << 1;
        if self.number_of_regions_or_less > 0 && regions_next > self.number_of_regions_or_less {
            return false;
        }
        if self.number_of_regions_or_more > 0 && regions_now >= self.number_of_regions_or_more {
            return false;
        }
        true
    }

    /// The fixed-size record compared across processes.
    pub fn encode(&self) -> [u64; 10] {
        [
            self.valid_directions.bits() as u64,
            self.min_cells as u64,
            self.number_of_regions_or_less as u64,
            self.number_of_regions_or_more as u64,
            self.region_assignment.code(),
            self.max_level as u64,
            0,
            0,
            0,
            0,
        ]
    }

    fn apply(&mut self, record: &[u64; 10]) {
        self.valid_directions = ValidDirections::from_bits_truncate(record[0] as u32);
        self.min_cells = record[1] as usize;
        self.number_of_regions_or_less = record[2] as usize;
        self.number_of_regions_or_more = record[3] as usize;
        self.max_level = (record[5] as usize).min(MAX_TREE_LEVEL);
        if self.region_assignment.code() != record[4] {
            self.region_assignment = RegionAssignment::from_code(record[4]);
        }
    }

    /// Make every process of `group` use the parameters of rank 0.
    ///
    /// Processes whose parameters differ log a warning and switch. A user-defined assignment map
    /// on rank 0 is shared as well.
    pub fn agree<C: Communicator>(&self, group: &SubGroup<'_, C>) -> Result<Self> {
        let root = group.first();
        let mine = self.encode();
        let mut record = mine;
        group.broadcast(&mut record, root)?;

        let mut agreed = self.clone();
        if record != mine {
            log::warn!("changing my runtime parameters to match process {}", root);
            agreed.apply(&record);
        }

        if let RegionAssignment::UserDefined(map) = &mut agreed.region_assignment {
            let len = group.broadcast_value(map.len() as u64, root)? as usize;
            let mut shared: Vec<u64> = if group.comm().rank() == root {
                map.iter().map(|&p| p as u64).collect()
            } else {
                vec![0; len]
            };
            group.broadcast(&mut shared, root)?;
            let shared: Vec<usize> = shared.into_iter().map(|p| p as usize).collect();
            if *map != shared {
                if !map.is_empty() {
                    log::warn!("changing my region assignment map to match process {}", root);
                }
                *map = shared;
            }
        }
        Ok(agreed)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::comm::LocalCluster;

    #[test]
    fn divide_test_limits() {
        let params = BuildParameters::default().with_min_cells(10);
        assert!(params.divide_test(20, 0));
        assert!(!params.divide_test(19, 0));
        assert!(!params.divide_test(1000, 20));

        let params = BuildParameters::default()
            .with_min_cells(0)
            .with_number_of_regions_or_less(4);
        assert!(params.divide_test(1, 1));
        assert!(!params.divide_test(1000, 2));

        let params = BuildParameters::default()
            .with_min_cells(0)
            .with_number_of_regions_or_more(8);
        assert!(params.divide_test(0, 2));
        assert!(!params.divide_test(1000, 3));
    }

    #[test]
    fn directions() {
        let d = ValidDirections::X | ValidDirections::Z;
        assert_eq!(d.axes().collect::<Vec<_>>(), vec![Axis::X, Axis::Z]);
        assert!(!d.allows(Axis::Y));
        assert_eq!(ValidDirections::default(), ValidDirections::all());
    }

    #[test]
    fn everyone_adopts_rank_zero_parameters() {
        let out = LocalCluster::run(3, |comm| {
            let params = if comm.rank() == 0 {
                BuildParameters::default()
                    .with_min_cells(7)
                    .with_region_assignment(RegionAssignment::UserDefined(vec![2, 1, 0, 0]))
            } else {
                BuildParameters::default()
                    .with_min_cells(comm.rank())
                    .with_valid_directions(ValidDirections::Y)
            };
            params.agree(&SubGroup::world(&comm, 1)).unwrap()
        });
        for params in &out {
            assert_eq!(params, &out[0]);
        }
        assert_eq!(out[1].min_cells, 7);
        assert_eq!(out[2].valid_directions, ValidDirections::all());
        assert_eq!(
            out[2].region_assignment,
            RegionAssignment::UserDefined(vec![2, 1, 0, 0])
        );
    }
}
