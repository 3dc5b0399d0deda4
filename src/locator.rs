//! The parallel k-d tree locator: builds the tree over the datasets of every process and
//! answers queries about its regions and the processes they are assigned to.

use std::collections::BTreeSet;
use std::time::Instant;

use crate::assignment::{RegionAssignment, RegionAssignmentMap};
use crate::buffer::{GlobalIndexTable, Point, PointBuffer};
use crate::comm::{tags, ClusterContext, Communicator, Rank};
use crate::config::BuildParameters;
use crate::dataset::{cell_point, rounded_center, DataSet};
use crate::error::{PKdTreeError, Result};
use crate::kdtree::builder::{breadth_first_divide, volume_bounds};
use crate::kdtree::complete::complete_tree;
use crate::kdtree::{Bounds, KdTree};
use crate::tables::{FieldArrayRanges, ProcessRegionTables};

/// A k-d tree built cooperatively by a set of processes, each contributing the cells of its own
/// datasets.
///
/// Building is collective: every process calls [`PKdTree::build_locator`] with its local data,
/// and afterwards every process holds the same tree. The regions of the tree are then assigned to
/// processes according to [`BuildParameters::region_assignment`].
///
/// ```
/// use pkdtree::comm::{ClusterContext, LocalCluster};
/// use pkdtree::{BuildParameters, PKdTree, PointCloud};
///
/// let regions = LocalCluster::run(2, |comm| {
///     let ctx = ClusterContext::new(comm).unwrap();
///     let offset = ctx.rank() as f64;
///     let points = (0..50).map(|i| [i as f64, offset, (i % 7) as f64]).collect();
///     let mut locator = PKdTree::new(BuildParameters::default().with_min_cells(10));
///     locator.build_locator(&ctx, &[PointCloud::new(points)]).unwrap();
///     locator.number_of_regions()
/// });
/// assert_eq!(regions[0], regions[1]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct PKdTree {
    params: BuildParameters,
    tree: Option<KdTree>,
    fudge_factor: f64,
    num_processes: usize,
    total_num_cells: usize,
    assignment: Option<RegionAssignmentMap>,
    tables: Option<ProcessRegionTables>,
    ranges: Option<FieldArrayRanges>,
}

impl PKdTree {
    /// A locator that will build with `params`.
    pub fn new(params: BuildParameters) -> Self {
        Self {
            params,
            ..Default::default()
        }
    }

    /// The build parameters. After a build these are the ones every process agreed on.
    pub fn parameters(&self) -> &BuildParameters {
        &self.params
    }

    /// Replace the build parameters. Takes effect at the next build.
    pub fn set_parameters(&mut self, params: BuildParameters) {
        self.params = params;
    }

    /// The tree, if one has been built.
    pub fn tree(&self) -> Option<&KdTree> {
        self.tree.as_ref()
    }

    /// The number of regions, 0 without a tree.
    pub fn number_of_regions(&self) -> usize {
        self.tree.as_ref().map_or(0, KdTree::number_of_regions)
    }

    /// The padding added to the sides of the volume that were not flat.
    pub fn fudge_factor(&self) -> f64 {
        self.fudge_factor
    }

    /// The number of cells over all processes in the last build.
    pub fn total_number_of_cells(&self) -> usize {
        self.total_num_cells
    }

    fn clear(&mut self) {
        self.tree = None;
        self.assignment = None;
        self.tables = None;
        self.ranges = None;
        self.fudge_factor = 0.0;
        self.total_num_cells = 0;
    }

    /// Build the tree over the cells of `datasets` on every process, then assign its regions.
    ///
    /// Collective over all processes. Any existing tree is discarded first; if the build fails
    /// every process is left without a tree. If only the region assignment fails the tree is
    /// kept and the assignment error is returned.
    pub fn build_locator<C: Communicator, D: DataSet>(
        &mut self,
        ctx: &ClusterContext<C>,
        datasets: &[D],
    ) -> Result<()> {
        self.clear();
        self.num_processes = ctx.size();

        let started = Instant::now();
        match self.build_tree(ctx, datasets) {
            Ok(tree) => self.tree = Some(tree),
            Err(err) => {
                log::warn!("could not build k-d tree: {}", err);
                self.clear();
                return Err(err);
            }
        }
        log::debug!("built k-d tree in {:?}", started.elapsed());

        self.update_region_assignment()
    }

    fn build_tree<C: Communicator, D: DataSet>(
        &mut self,
        ctx: &ClusterContext<C>,
        datasets: &[D],
    ) -> Result<KdTree> {
        let world = ctx.world(tags::BUILD);
        self.params = self.params.agree(&world)?;

        let started = Instant::now();
        let num_cells: usize = datasets.iter().map(DataSet::number_of_cells).sum();
        let mut centers: Vec<Point> = Vec::new();
        let reserved = centers.try_reserve_exact(num_cells);
        world.check_for_failure(reserved.is_err(), "build locator", "memory allocation")?;
        for data in datasets {
            centers.extend((0..data.number_of_cells()).map(|cell| cell_point(data, cell)));
        }

        // The volume must hold the centers as rounded for the build, not just the exact ones.
        let mut local = Bounds::EMPTY;
        for data in datasets {
            local.extend(&data.bounds());
        }
        for center in &centers {
            local.extend_point(center);
        }
        let (volume, fudge_factor) = volume_bounds(&world, &local)?;
        self.fudge_factor = fudge_factor;

        let table = GlobalIndexTable::build(&world, num_cells)?;
        self.total_num_cells = table.total_num_cells();
        let points = PointBuffer::new(centers, table.start_val(ctx.rank()));
        world.check_for_failure(points.is_err(), "build locator", "memory allocation")?;
        let mut points = points?;
        log::debug!(
            "{} cells over {} processes, set up in {:?}",
            table.total_num_cells(),
            ctx.size(),
            started.elapsed()
        );

        let started = Instant::now();
        let divided = breadth_first_divide(ctx, &self.params, &table, &mut points, volume);
        let vote = ctx.world(tags::DIVIDE_VOTE).check_for_failure(
            divided.is_err(),
            "breadth first divide",
            "memory allocation",
        );
        let mut tree = divided?;
        vote?;
        log::debug!("divided in {:?}", started.elapsed());

        let started = Instant::now();
        complete_tree(ctx, &mut tree)?;
        log::debug!("completed tree in {:?}", started.elapsed());
        Ok(tree)
    }

    /// Assign the regions of the current tree to processes with the current
    /// [`BuildParameters::region_assignment`], without rebuilding.
    ///
    /// Purely local: every process must be using the same assignment.
    pub fn update_region_assignment(&mut self) -> Result<()> {
        self.assignment = None;
        let Some(tree) = &self.tree else {
            log::warn!("update region assignment - no tree");
            return Err(PKdTreeError::NoTree);
        };
        let started = Instant::now();
        self.assignment = self
            .params
            .region_assignment
            .assign(tree, self.num_processes)?;
        log::debug!("assigned regions in {:?}", started.elapsed());
        Ok(())
    }

    /// Assign region `i` to process `map[i]`.
    pub fn assign_regions(&mut self, map: Vec<Rank>) -> Result<()> {
        self.params.region_assignment = RegionAssignment::UserDefined(map);
        self.update_region_assignment()
    }

    /// Assign region `i` to process `i % processes`.
    pub fn assign_regions_round_robin(&mut self) -> Result<()> {
        self.params.region_assignment = RegionAssignment::RoundRobin;
        self.update_region_assignment()
    }

    /// Assign runs of spatially adjacent regions to each process.
    pub fn assign_regions_contiguous(&mut self) -> Result<()> {
        self.params.region_assignment = RegionAssignment::Contiguous;
        self.update_region_assignment()
    }

    /// The current region assignment, `None` without a tree or with
    /// [`RegionAssignment::None`].
    pub fn assignment(&self) -> Option<&RegionAssignmentMap> {
        self.assignment.as_ref()
    }

    /// The process `region` is assigned to.
    pub fn process_assigned_to_region(&self, region: usize) -> Option<Rank> {
        self.assignment
            .as_ref()?
            .process_assigned_to_region(region)
    }

    /// The regions assigned to `process`, ascending. Empty if there is no assignment.
    pub fn region_assignment_list(&self, process: Rank) -> &[usize] {
        let list = self
            .assignment
            .as_ref()
            .and_then(|map| map.region_assignment_list(process));
        if list.is_none() {
            log::warn!("region assignment list - no regions assigned to process {}", process);
        }
        list.unwrap_or(&[])
    }

    /// Count the local cells of every region and share the counts. Collective.
    pub fn create_process_cell_count_data<C: Communicator, D: DataSet>(
        &mut self,
        ctx: &ClusterContext<C>,
        datasets: &[D],
    ) -> Result<()> {
        self.tables = None;
        let tree = self.tree.as_ref().ok_or(PKdTreeError::NoTree)?;
        self.tables = Some(ProcessRegionTables::create(ctx, tree, datasets)?);
        Ok(())
    }

    /// The process and region cell-count tables, once created.
    pub fn tables(&self) -> Option<&ProcessRegionTables> {
        self.tables.as_ref()
    }

    /// Reduce the value ranges of every field array over all processes. Collective.
    pub fn create_global_data_array_bounds<C: Communicator, D: DataSet>(
        &mut self,
        ctx: &ClusterContext<C>,
        datasets: &[D],
    ) -> Result<()> {
        self.ranges = Some(FieldArrayRanges::create(ctx, datasets)?);
        Ok(())
    }

    /// The global field-array ranges, once created.
    pub fn field_array_ranges(&self) -> Option<&FieldArrayRanges> {
        self.ranges.as_ref()
    }

    /// Every region, front to back along `direction`. Empty without a tree.
    pub fn view_order_all_regions_in_direction(&self, direction: [f64; 3]) -> Vec<usize> {
        self.tree
            .as_ref()
            .map(|tree| tree.view_order_all_regions_in_direction(direction))
            .unwrap_or_default()
    }

    /// Every region, front to back from `position`. Empty without a tree.
    pub fn view_order_all_regions_from_position(&self, position: [f64; 3]) -> Vec<usize> {
        self.tree
            .as_ref()
            .map(|tree| tree.view_order_all_regions_from_position(position))
            .unwrap_or_default()
    }

    /// Processes in the order their regions are first met along `direction`.
    pub fn view_order_all_processes_in_direction(&self, direction: [f64; 3]) -> Vec<Rank> {
        self.processes_in_order(self.view_order_all_regions_in_direction(direction))
    }

    /// Processes in the order their regions are first met from `position`.
    pub fn view_order_all_processes_from_position(&self, position: [f64; 3]) -> Vec<Rank> {
        self.processes_in_order(self.view_order_all_regions_from_position(position))
    }

    fn processes_in_order(&self, regions: Vec<usize>) -> Vec<Rank> {
        let Some(map) = &self.assignment else {
            log::warn!("view order processes - regions are not assigned");
            return vec![];
        };
        let mut seen = vec![false; map.number_of_processes()];
        let mut order = Vec::new();
        for region in regions {
            if let Some(p) = map.process_assigned_to_region(region) {
                if !seen[p] {
                    seen[p] = true;
                    order.push(p);
                }
            }
        }
        order
    }

    /// Processes whose assigned regions have `point` on their outer boundary.
    pub fn all_processes_bordering_on_point(&self, point: [f64; 3]) -> Vec<Rank> {
        let (Some(tree), Some(map)) = (&self.tree, &self.assignment) else {
            log::warn!("processes bordering on point - no tree or region assignment");
            return vec![];
        };
        (0..map.number_of_processes())
            .filter(|&p| {
                let regions: BTreeSet<usize> = map
                    .region_assignment_list(p)
                    .unwrap_or(&[])
                    .iter()
                    .copied()
                    .collect();
                tree.minimal_convex_subregions(&regions)
                    .iter()
                    .any(|b| b.on_boundary(&point))
            })
            .collect()
    }

    /// The cells of `data` whose centers lie in the regions assigned to `process`.
    pub fn cell_list_for_process_regions<D: DataSet>(&self, process: Rank, data: &D) -> Vec<usize> {
        let Some(tree) = &self.tree else {
            log::warn!("cell list for process regions - no tree");
            return vec![];
        };
        let regions = self.region_assignment_list(process);
        if regions.is_empty() {
            return vec![];
        }
        let mut mine = vec![false; tree.number_of_regions()];
        for &r in regions {
            mine[r] = true;
        }
        (0..data.number_of_cells())
            .filter(|&cell| {
                tree.region_containing_point(rounded_center(data, cell))
                    .is_some_and(|r| mine[r])
            })
            .collect()
    }
}
