//! Tables shared by every process after a build: which processes hold cells in which regions,
//! and the global value ranges of the field arrays.
//!
//! Both are built with a few collectives and are then answered locally.

use crate::comm::{tags, ClusterContext, Communicator, Rank, ReduceOp, SubGroup};
use crate::dataset::{rounded_center, DataSet, FieldArray};
use crate::error::{PKdTreeError, Result};
use crate::kdtree::KdTree;

/// Which process holds cells in which region, and how many.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRegionTables {
    num_processes: usize,
    num_regions: usize,
    /// `1` at `[process * num_regions + region]` if the process has cells in the region.
    data_location: Vec<u8>,
    /// Processes with cells in each region, ascending.
    process_list: Vec<Vec<Rank>>,
    /// Cell counts matching `process_list`.
    cell_count_list: Vec<Vec<usize>>,
    /// Regions each process has cells in, ascending.
    region_list: Vec<Vec<usize>>,
    /// Cell counts matching `region_list`.
    region_cell_counts: Vec<Vec<usize>>,
}

impl ProcessRegionTables {
    /// Count the local cells of every region and share the counts with every process.
    ///
    /// Collective over all processes. Fails on every process if any process has a cell whose
    /// center lies outside the tree.
    pub fn create<C: Communicator, D: DataSet>(
        ctx: &ClusterContext<C>,
        tree: &KdTree,
        datasets: &[D],
    ) -> Result<Self> {
        let world = ctx.world(tags::TABLES);
        let regions = tree.number_of_regions();

        let mut counts = vec![0u64; regions];
        let mut corrupt = None;
        let mut cell = 0;
        for data in datasets {
            for i in 0..data.number_of_cells() {
                match tree.region_containing_point(rounded_center(data, i)) {
                    Some(region) => counts[region] += 1,
                    None => {
                        corrupt.get_or_insert(cell);
                    }
                }
                cell += 1;
            }
        }

        let vote = world.check_for_failure(
            corrupt.is_some(),
            "create process cell count data",
            "corrupt region data",
        );
        if let Some(cell) = corrupt {
            log::error!("cell {} is outside every region", cell);
            return Err(PKdTreeError::CorruptRegionData { cell });
        }
        vote?;

        let presence: Vec<u8> = counts.iter().map(|&n| (n > 0) as u8).collect();
        let data_location = world.all_gather(&presence)?;
        let cell_counts = world.all_gather(&counts)?;
        Ok(Self::from_counts(ctx.size(), regions, data_location, &cell_counts))
    }

    /// Derive the lists from the gathered `[process][region]` presence and count matrices.
    fn from_counts(
        num_processes: usize,
        num_regions: usize,
        data_location: Vec<u8>,
        cell_counts: &[u64],
    ) -> Self {
        let mut process_list = vec![Vec::new(); num_regions];
        let mut cell_count_list = vec![Vec::new(); num_regions];
        let mut region_list = vec![Vec::new(); num_processes];
        let mut region_cell_counts = vec![Vec::new(); num_processes];

        for process in 0..num_processes {
            for region in 0..num_regions {
                let at = process * num_regions + region;
                if data_location[at] == 0 {
                    continue;
                }
                let count = cell_counts[at] as usize;
                process_list[region].push(process);
                cell_count_list[region].push(count);
                region_list[process].push(region);
                region_cell_counts[process].push(count);
            }
        }

        Self {
            num_processes,
            num_regions,
            data_location,
            process_list,
            cell_count_list,
            region_list,
            region_cell_counts,
        }
    }

    fn valid_region(&self, region: usize, query: &str) -> bool {
        let valid = region < self.num_regions;
        if !valid {
            log::warn!("{} - invalid region id {}", query, region);
        }
        valid
    }

    fn valid_process(&self, process: Rank, query: &str) -> bool {
        let valid = process < self.num_processes;
        if !valid {
            log::warn!("{} - invalid process id {}", query, process);
        }
        valid
    }

    /// Whether `process` has cells in `region`.
    pub fn has_data(&self, process: Rank, region: usize) -> bool {
        self.valid_process(process, "has data")
            && self.valid_region(region, "has data")
            && self.data_location[process * self.num_regions + region] != 0
    }

    /// The number of processes with cells in `region`.
    pub fn total_processes_in_region(&self, region: usize) -> usize {
        self.process_list_for_region(region).len()
    }

    /// The processes with cells in `region`, ascending.
    pub fn process_list_for_region(&self, region: usize) -> &[Rank] {
        if !self.valid_region(region, "process list for region") {
            return &[];
        }
        &self.process_list[region]
    }

    /// The cell counts of the processes in [`Self::process_list_for_region`], in the same order.
    pub fn processes_cell_count_for_region(&self, region: usize) -> &[usize] {
        if !self.valid_region(region, "processes cell count for region") {
            return &[];
        }
        &self.cell_count_list[region]
    }

    /// The number of cells `process` has in `region`.
    pub fn process_cell_count_for_region(&self, process: Rank, region: usize) -> usize {
        if !self.valid_process(process, "process cell count for region")
            || !self.valid_region(region, "process cell count for region")
        {
            return 0;
        }
        self.process_list[region]
            .iter()
            .position(|&p| p == process)
            .map_or(0, |i| self.cell_count_list[region][i])
    }

    /// The number of regions `process` has cells in.
    pub fn total_regions_for_process(&self, process: Rank) -> usize {
        self.region_list_for_process(process).len()
    }

    /// The regions `process` has cells in, ascending.
    pub fn region_list_for_process(&self, process: Rank) -> &[usize] {
        if !self.valid_process(process, "region list for process") {
            return &[];
        }
        &self.region_list[process]
    }

    /// The cell counts of the regions in [`Self::region_list_for_process`], in the same order.
    pub fn regions_cell_count_for_process(&self, process: Rank) -> &[usize] {
        if !self.valid_process(process, "regions cell count for process") {
            return &[];
        }
        &self.region_cell_counts[process]
    }
}

/// The global range of one field array.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayRange {
    /// The array's name in this process's datasets, `None` if this process does not have it.
    pub name: Option<String>,
    /// `[min, max]` over every process. `min > max` if no process has any values.
    pub range: [f64; 2],
}

/// Value ranges of the cell and point arrays over every process.
///
/// The arrays of all local datasets are numbered in order, so every process must list its
/// datasets, and their arrays, in the same order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldArrayRanges {
    cell: Vec<ArrayRange>,
    point: Vec<ArrayRange>,
}

fn reduce_ranges<C: Communicator>(
    world: &SubGroup<'_, C>,
    arrays: &[&FieldArray],
    count: usize,
) -> Result<Vec<ArrayRange>> {
    if count == 0 {
        return Ok(vec![]);
    }
    // minima, then negated maxima
    let mut local = vec![f64::INFINITY; 2 * count];
    for (i, array) in arrays.iter().enumerate() {
        if let Some([lo, hi]) = array.range() {
            local[i] = lo;
            local[count + i] = -hi;
        }
    }
    let global = world.all_reduce(&local, ReduceOp::Min)?;
    Ok((0..count)
        .map(|i| ArrayRange {
            name: arrays.get(i).map(|a| a.name.clone()),
            range: [global[i], -global[count + i]],
        })
        .collect())
}

fn lookup_by_name(ranges: &[ArrayRange], name: &str) -> Option<[f64; 2]> {
    // a name can appear once per dataset
    ranges
        .iter()
        .filter(|r| r.name.as_deref() == Some(name))
        .map(|r| r.range)
        .reduce(|[lo, hi], [l, h]| [lo.min(l), hi.max(h)])
}

impl FieldArrayRanges {
    /// Reduce the ranges of every cell and point array over all processes.
    ///
    /// Collective over all processes. A process with fewer arrays than others contributes
    /// nothing to the ones it lacks.
    pub fn create<C: Communicator, D: DataSet>(
        ctx: &ClusterContext<C>,
        datasets: &[D],
    ) -> Result<Self> {
        let world = ctx.world(tags::TABLES);
        let cell: Vec<&FieldArray> = datasets.iter().flat_map(|d| d.cell_arrays()).collect();
        let point: Vec<&FieldArray> = datasets.iter().flat_map(|d| d.point_arrays()).collect();

        let counts = world.all_reduce(&[cell.len() as u64, point.len() as u64], ReduceOp::Max)?;
        let ranges = Self {
            cell: reduce_ranges(&world, &cell, counts[0] as usize)?,
            point: reduce_ranges(&world, &point, counts[1] as usize)?,
        };
        log::debug!(
            "global ranges of {} cell and {} point arrays",
            ranges.cell.len(),
            ranges.point.len()
        );
        Ok(ranges)
    }

    /// The number of cell arrays.
    pub fn number_of_cell_arrays(&self) -> usize {
        self.cell.len()
    }

    /// The number of point arrays.
    pub fn number_of_point_arrays(&self) -> usize {
        self.point.len()
    }

    /// Every cell array, in order.
    pub fn cell_arrays(&self) -> &[ArrayRange] {
        &self.cell
    }

    /// Every point array, in order.
    pub fn point_arrays(&self) -> &[ArrayRange] {
        &self.point
    }

    /// The global range of cell array `index`.
    pub fn cell_array_global_range(&self, index: usize) -> Option<[f64; 2]> {
        let range = self.cell.get(index).map(|r| r.range);
        if range.is_none() {
            log::warn!("cell array global range - invalid array index {}", index);
        }
        range
    }

    /// The global range of point array `index`.
    pub fn point_array_global_range(&self, index: usize) -> Option<[f64; 2]> {
        let range = self.point.get(index).map(|r| r.range);
        if range.is_none() {
            log::warn!("point array global range - invalid array index {}", index);
        }
        range
    }

    /// The global range of every cell array called `name`, merged.
    pub fn cell_array_global_range_by_name(&self, name: &str) -> Option<[f64; 2]> {
        lookup_by_name(&self.cell, name)
    }

    /// The global range of every point array called `name`, merged.
    pub fn point_array_global_range_by_name(&self, name: &str) -> Option<[f64; 2]> {
        lookup_by_name(&self.point, name)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::comm::LocalCluster;
    use crate::dataset::PointCloud;

    #[test]
    fn lists_follow_presence() {
        // two processes, three regions
        let presence = vec![1, 0, 1, 1, 1, 0];
        let counts = [4, 0, 2, 3, 5, 0];
        let tables = ProcessRegionTables::from_counts(2, 3, presence, &counts);

        assert!(tables.has_data(0, 2));
        assert!(!tables.has_data(1, 2));
        assert!(!tables.has_data(2, 0));
        assert_eq!(tables.process_list_for_region(0), &[0, 1]);
        assert_eq!(tables.processes_cell_count_for_region(0), &[4, 3]);
        assert_eq!(tables.total_processes_in_region(2), 1);
        assert_eq!(tables.region_list_for_process(1), &[0, 1]);
        assert_eq!(tables.regions_cell_count_for_process(1), &[3, 5]);
        assert_eq!(tables.process_cell_count_for_region(1, 1), 5);
        assert_eq!(tables.process_cell_count_for_region(0, 1), 0);
        assert_eq!(tables.total_regions_for_process(0), 2);
    }

    #[test]
    fn invalid_queries_are_empty() {
        let tables = ProcessRegionTables::from_counts(1, 1, vec![1], &[7]);
        assert!(tables.process_list_for_region(5).is_empty());
        assert!(tables.region_list_for_process(5).is_empty());
        assert_eq!(tables.process_cell_count_for_region(0, 5), 0);
        assert_eq!(tables.total_regions_for_process(3), 0);
    }

    #[test]
    fn ranges_reduce_over_processes() {
        let out = LocalCluster::run(3, |comm| {
            let ctx = ClusterContext::new(comm).unwrap();
            let r = ctx.rank() as f64;
            let datasets = match ctx.rank() {
                // no arrays at all
                0 => vec![PointCloud::new(vec![])],
                _ => vec![
                    PointCloud::new(vec![[0.0; 3]])
                        .with_cell_array(FieldArray::new("temperature", vec![r, 10.0 * r]))
                        .with_point_array(FieldArray::new("speed", vec![-r])),
                    PointCloud::new(vec![[1.0; 3]])
                        .with_cell_array(FieldArray::new("temperature", vec![-5.0])),
                ],
            };
            FieldArrayRanges::create(&ctx, &datasets).unwrap()
        });

        assert_eq!(out[1].number_of_cell_arrays(), 2);
        assert_eq!(out[0].number_of_cell_arrays(), 2);
        assert_eq!(out[1].cell_array_global_range(0), Some([1.0, 20.0]));
        assert_eq!(out[1].cell_array_global_range(1), Some([-5.0, -5.0]));
        assert_eq!(
            out[2].cell_array_global_range_by_name("temperature"),
            Some([-5.0, 20.0])
        );
        assert_eq!(out[2].point_array_global_range_by_name("speed"), Some([-2.0, -1.0]));
        // rank 0 knows the ranges but not the names
        assert_eq!(out[0].cell_array_global_range(0), Some([1.0, 20.0]));
        assert_eq!(out[0].cell_array_global_range_by_name("temperature"), None);
        assert_eq!(out[0].point_array_global_range(3), None);
    }
}
