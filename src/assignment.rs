//! Mapping regions to the processes responsible for them.

use crate::comm::Rank;
use crate::error::{PKdTreeError, Result};
use crate::kdtree::{KdTree, NodeId};

/// How the regions of a built tree are mapped to processes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RegionAssignment {
    /// Regions are not assigned.
    None,
    /// Subtrees are handed out so each process owns a run of spatially adjacent regions.
    #[default]
    Contiguous,
    /// Region `i` goes to process `i % processes`.
    RoundRobin,
    /// Region `i` goes to process `map[i]`.
    UserDefined(Vec<Rank>),
}

impl RegionAssignment {
    pub(crate) fn code(&self) -> u64 {
        match self {
            RegionAssignment::None => 0,
            RegionAssignment::Contiguous => 1,
            RegionAssignment::UserDefined(_) => 2,
            RegionAssignment::RoundRobin => 3,
        }
    }

    pub(crate) fn from_code(code: u64) -> Self {
        match code {
            1 => RegionAssignment::Contiguous,
            2 => RegionAssignment::UserDefined(vec![]),
            3 => RegionAssignment::RoundRobin,
            _ => RegionAssignment::None,
        }
    }

    /// Assign the regions of `tree` to `processes` processes. `None` for
    /// [`RegionAssignment::None`].
    pub fn assign(&self, tree: &KdTree, processes: usize) -> Result<Option<RegionAssignmentMap>> {
        let n = tree.number_of_regions();
        let map = match self {
            RegionAssignment::None => return Ok(None),
            RegionAssignment::Contiguous => RegionAssignmentMap::contiguous(tree, processes)?,
            RegionAssignment::RoundRobin => RegionAssignmentMap::round_robin(n, processes)?,
            RegionAssignment::UserDefined(map) => {
                RegionAssignmentMap::user_defined(map.clone(), n, processes)?
            }
        };
        log::debug!("assigned {} regions to {} processes", n, processes);
        Ok(Some(map))
    }
}

fn check_processes(regions: usize, processes: usize) -> Result<()> {
    if processes == 0 && regions > 0 {
        log::error!("no processes to assign {} regions to", regions);
        return Err(PKdTreeError::NoProcesses { regions });
    }
    Ok(())
}

/// Which process owns each region, and the inverse lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionAssignmentMap {
    /// Owner of each region.
    owners: Vec<Rank>,
    /// Regions of each process, ascending.
    process_regions: Vec<Vec<usize>>,
}

impl RegionAssignmentMap {
    fn from_owners(owners: Vec<Rank>, processes: usize) -> Self {
        let mut process_regions = vec![Vec::new(); processes];
        for (region, &p) in owners.iter().enumerate() {
            process_regions[p].push(region);
        }
        Self {
            owners,
            process_regions,
        }
    }

    /// Region `i` to process `i % processes`.
    pub fn round_robin(regions: usize, processes: usize) -> Result<Self> {
        check_processes(regions, processes)?;
        Ok(Self::from_owners(
            (0..regions).map(|i| i % processes).collect(),
            processes,
        ))
    }

    /// Region `i` to process `map[i]`. Every entry must be a valid process id and every region
    /// must be mapped.
    pub fn user_defined(map: Vec<Rank>, regions: usize, processes: usize) -> Result<Self> {
        if map.len() != regions {
            log::error!(
                "region assignment map has {} entries for {} regions",
                map.len(),
                regions
            );
            return Err(PKdTreeError::AssignmentLength {
                expected: regions,
                got: map.len(),
            });
        }
        if let Some(&bad) = map.iter().find(|&&p| p >= processes) {
            log::error!("invalid process id {} in region assignment map", bad);
            return Err(PKdTreeError::InvalidProcessId {
                process: bad,
                processes,
            });
        }
        Ok(Self::from_owners(map, processes))
    }

    /// Hand out whole subtrees so each process owns spatially adjacent regions.
    ///
    /// With more processes than regions this is round robin. Otherwise the nodes
    /// `floor(log2(processes))` levels down are walked left to right; while there are more nodes
    /// left than processes a node goes whole to one process, after that each node is split
    /// between two processes.
    pub fn contiguous(tree: &KdTree, processes: usize) -> Result<Self> {
        let regions = tree.number_of_regions();
        check_processes(regions, processes)?;
        if regions <= processes {
            return Self::round_robin(regions, processes);
        }

        let floor_log_p = processes.ilog2() as usize;
        let p = 1usize << floor_log_p;
        let nodes = tree.nodes_at_level(floor_log_p);
        let mut owners = vec![0; regions];

        let give = |owners: &mut [Rank], node: NodeId, process: Rank| {
            for region in tree.node(node).regions() {
                owners[region] = process.min(processes - 1);
            }
        };

        if p == processes {
            for (process, &node) in nodes.iter().enumerate() {
                give(&mut owners, node, process);
            }
        } else {
            let mut nodes_left = p << 1;
            let mut procs_left = processes;
            let mut proc_id = 0;
            for &node in &nodes {
                let children = tree.node(node).left().zip(tree.node(node).right());
                match children {
                    Some((left, right)) if nodes_left <= procs_left => {
                        give(&mut owners, left, proc_id);
                        give(&mut owners, right, proc_id + 1);
                        procs_left = procs_left.saturating_sub(2);
                        proc_id += 2;
                    }
                    Some(_) => {
                        give(&mut owners, node, proc_id);
                        procs_left = procs_left.saturating_sub(1);
                        proc_id += 1;
                    }
                    None => {
                        // a leaf cannot be split between two processes
                        give(&mut owners, node, proc_id);
                        let step = if nodes_left > procs_left { 1 } else { 2 };
                        procs_left = procs_left.saturating_sub(step);
                        proc_id += step;
                    }
                }
                nodes_left = nodes_left.saturating_sub(2);
            }
        }
        Ok(Self::from_owners(owners, processes))
    }

    /// The number of regions.
    pub fn number_of_regions(&self) -> usize {
        self.owners.len()
    }

    /// The number of processes.
    pub fn number_of_processes(&self) -> usize {
        self.process_regions.len()
    }

    /// The owner of `region`.
    pub fn process_assigned_to_region(&self, region: usize) -> Option<Rank> {
        self.owners.get(region).copied()
    }

    /// The regions owned by `process`, ascending.
    pub fn region_assignment_list(&self, process: Rank) -> Option<&[usize]> {
        self.process_regions.get(process).map(Vec::as_slice)
    }

    /// The number of regions owned by each process.
    pub fn number_of_regions_assigned(&self) -> Vec<usize> {
        self.process_regions.iter().map(Vec::len).collect()
    }

    /// The owner of every region, indexed by region.
    pub fn owners(&self) -> &[Rank] {
        &self.owners
    }
}
