use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::assignment::RegionAssignmentMap;
use crate::buffer::{GlobalIndexTable, Point, PointBuffer};
use crate::comm::{tags, ClusterContext, LocalCluster, LocalCommunicator};
use crate::config::{BuildParameters, ValidDirections};
use crate::error::{PKdTreeError, Result};
use crate::kdtree::builder::{breadth_first_divide, select_cut_direction, volume_bounds};
use crate::kdtree::complete::complete_tree;
use crate::kdtree::{Axis, Bounds, KdNode, KdTree};

/// A complete tree over the unit cube with `2^depth` equal regions, cut across x, y, z in turn.
pub(crate) fn balanced_tree(depth: usize) -> KdTree {
    let mut tree = KdTree::new(Bounds::new([0.0; 3], [1.0; 3]), 10 << depth);
    let mut level = vec![tree.root()];
    for l in 0..depth {
        let axis = Axis::ALL[l % 3];
        let mut next = Vec::with_capacity(level.len() * 2);
        for id in level {
            let node = tree.node(id);
            let bounds = node.bounds;
            let half = node.num_points / 2;
            let d = axis.index();
            let (left, right) = bounds.split(axis, (bounds.min[d] + bounds.max[d]) * 0.5);
            let children = tree
                .add_children(
                    id,
                    axis,
                    KdNode::new(left, left, half),
                    KdNode::new(right, right, half),
                )
                .unwrap();
            next.extend(children);
        }
        level = next;
    }
    tree.compact();
    tree
}

fn random_points(n: usize, seed: u64) -> Vec<Point> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| [rng.gen::<f32>() * 100.0, rng.gen::<f32>() * 100.0, rng.gen::<f32>() * 100.0])
        .collect()
}

fn build_rank(
    ctx: &ClusterContext<LocalCommunicator>,
    table: &GlobalIndexTable,
    points: &[Point],
    params: &BuildParameters,
) -> Result<KdTree> {
    let range = table.range(ctx.rank());
    let mine = points[range.clone()].to_vec();
    let mut local = Bounds::EMPTY;
    for p in &mine {
        local.extend_point(p);
    }
    let mut buffer = PointBuffer::new(mine, range.start)?;
    let (volume, _) = volume_bounds(&ctx.world(tags::BUILD), &local)?;
    let mut tree = breadth_first_divide(ctx, params, table, &mut buffer, volume)?;
    complete_tree(ctx, &mut tree)?;
    Ok(tree)
}

/// Build with `points` laid out over the ranks by `counts` and return every rank's tree.
fn build(counts: &[usize], points: &[Point], params: &BuildParameters) -> Vec<Result<KdTree>> {
    let table = GlobalIndexTable::from_counts(counts.to_vec());
    LocalCluster::run(counts.len(), |comm| {
        let ctx = ClusterContext::new(comm)?;
        build_rank(&ctx, &table, points, params)
    })
}

/// Every rank built the same tree.
fn agreed_tree(trees: Vec<Result<KdTree>>) -> KdTree {
    let trees: Vec<KdTree> = trees.into_iter().map(|t| t.unwrap()).collect();
    for tree in &trees[1..] {
        assert_eq!(tree, &trees[0]);
    }
    trees.into_iter().next().unwrap()
}

fn check_covers_points(tree: &KdTree, points: &[Point]) {
    let mut counts = vec![0; tree.number_of_regions()];
    for p in points {
        let center = [p[0] as f64, p[1] as f64, p[2] as f64];
        let region = tree.region_containing_point(center).unwrap();
        assert!(tree.region_bounds(region).unwrap().contains(&center));
        counts[region] += 1;
    }
    for (region, &count) in counts.iter().enumerate() {
        assert_eq!(tree.region(region).unwrap().num_points(), count);
    }
}

fn check_boundaries(tree: &KdTree) {
    for id in tree.preorder() {
        let node = tree.node(id);
        let (Some(l), Some(r)) = (node.left(), node.right()) else {
            continue;
        };
        let cut = node.cut().unwrap().index();
        let (left, right) = (tree.node(l).bounds(), tree.node(r).bounds());
        for d in 0..3 {
            assert_eq!(left.min[d].to_bits(), node.bounds().min[d].to_bits());
            assert_eq!(right.max[d].to_bits(), node.bounds().max[d].to_bits());
            if d == cut {
                assert_eq!(left.max[d].to_bits(), right.min[d].to_bits());
            } else {
                assert_eq!(left.max[d].to_bits(), node.bounds().max[d].to_bits());
                assert_eq!(right.min[d].to_bits(), node.bounds().min[d].to_bits());
            }
        }
    }
}

#[test]
fn cut_direction() {
    let data = Bounds::new([0.0; 3], [1.0, 3.0, 3.0]);
    assert_eq!(select_cut_direction(&data, ValidDirections::all()), Axis::Y);
    assert_eq!(select_cut_direction(&data, ValidDirections::X), Axis::X);
    assert_eq!(
        select_cut_direction(&data, ValidDirections::X | ValidDirections::Z),
        Axis::Z
    );
}

#[test]
fn volume_is_padded() {
    let out = LocalCluster::run(3, |comm| {
        let ctx = ClusterContext::new(comm).unwrap();
        let local = match ctx.rank() {
            0 => Bounds::new([0.0, 0.0, 5.0], [10.0, 2.0, 5.0]),
            1 => Bounds::EMPTY,
            _ => Bounds::new([-10.0, 1.0, 5.0], [0.0, 4.0, 5.0]),
        };
        volume_bounds(&ctx.world(tags::BUILD), &local).unwrap()
    });
    let (bounds, fudge) = out[0];
    assert_eq!(fudge, 0.2 * 1e-3);
    assert_eq!(bounds.min, [-10.0 - fudge, 0.0 - fudge, 5.0 - 0.2]);
    assert_eq!(bounds.max, [10.0 + fudge, 4.0 + fudge, 5.0 + 0.2]);
    assert!(out.iter().all(|o| *o == out[0]));
}

#[test]
fn partition_covers_every_point() {
    let points = random_points(600, 11);
    let params = BuildParameters::default().with_min_cells(10);
    for counts in [
        vec![600],
        vec![300, 300],
        vec![0, 350, 0, 250],
        vec![100, 20, 0, 180, 90, 60, 0, 150],
    ] {
        let tree = agreed_tree(build(&counts, &points, &params));
        check_covers_points(&tree, &points);
        assert_eq!(tree.node(tree.root()).num_points(), 600);
    }
}

#[test]
fn boundaries_are_bit_exact() {
    let points = random_points(800, 3);
    let params = BuildParameters::default().with_min_cells(20);
    let tree = agreed_tree(build(&[200, 200, 200, 200], &points, &params));
    check_boundaries(&tree);

    // the leaves tile the root box
    let volume = |b: &Bounds| (0..3).map(|d| b.max[d] - b.min[d]).product::<f64>();
    let total: f64 = (0..tree.number_of_regions())
        .map(|r| volume(&tree.region_bounds(r).unwrap()))
        .sum();
    assert!((total - volume(tree.bounds())).abs() < 1e-6 * volume(tree.bounds()));
}

#[test]
fn rebuild_is_identical() {
    let points = random_points(500, 5);
    let params = BuildParameters::default().with_min_cells(15);
    let counts = [125, 125, 125, 125];
    let table = GlobalIndexTable::from_counts(counts.to_vec());
    let out = LocalCluster::run(4, |comm| {
        let ctx = ClusterContext::new(comm).unwrap();
        let first = build_rank(&ctx, &table, &points, &params).unwrap();
        let second = build_rank(&ctx, &table, &points, &params).unwrap();
        (first, second)
    });
    for (first, second) in &out {
        assert_eq!(first, second);
    }
}

#[test]
fn thousand_points_on_four_ranks() {
    let points = random_points(1000, 42);
    let params = BuildParameters::default().with_min_cells(10);
    let tree = agreed_tree(build(&[250; 4], &points, &params));

    assert_eq!(tree.depth(), 6);
    assert_eq!(tree.number_of_regions(), 64);
    check_covers_points(&tree, &points);

    let map = RegionAssignmentMap::contiguous(&tree, 4).unwrap();
    for p in 0..4 {
        let regions = map.region_assignment_list(p).unwrap();
        assert_eq!(regions, &(p * 16..(p + 1) * 16).collect::<Vec<_>>()[..]);
    }

    let mut data = Bounds::EMPTY;
    for r in 0..64 {
        data.extend(&tree.region_data_bounds(r).unwrap());
    }
    assert!(data.min.iter().all(|&v| v >= 0.0));
    assert!(data.max.iter().all(|&v| v <= 100.0));
    let root = tree.bounds();
    for d in 0..3 {
        assert!(root.min[d] <= data.min[d] && data.max[d] <= root.max[d]);
    }
}

#[test]
fn identical_points_are_degenerate() {
    let points = vec![[3.0f32, 3.0, 3.0]; 40];
    let trees = build(&[10, 10, 10, 10], &points, &BuildParameters::default());
    for tree in trees {
        assert!(matches!(tree, Err(PKdTreeError::DegenerateVolume)));
    }
}

#[test]
fn coincident_points_on_one_axis() {
    // every point shares x, so every cut is across y or z
    let mut points = random_points(300, 8);
    for p in &mut points {
        p[0] = 1.0;
    }
    let params = BuildParameters::default().with_min_cells(10);
    let tree = agreed_tree(build(&[100, 100, 100], &points, &params));
    check_covers_points(&tree, &points);
    for id in tree.preorder() {
        assert_ne!(tree.node(id).cut(), Some(Axis::X));
    }
}

#[test]
fn two_points_on_four_ranks() {
    let points = vec![[1.0f32, 1.0, 1.0], [5.0, 6.0, 7.0]];
    let params = BuildParameters::default()
        .with_min_cells(0)
        .with_number_of_regions_or_less(4);
    let tree = agreed_tree(build(&[0, 1, 0, 1], &points, &params));

    assert_eq!(tree.depth(), 2);
    assert_eq!(tree.number_of_regions(), 4);
    let counts: Vec<usize> = (0..4).map(|r| tree.region(r).unwrap().num_points()).collect();
    assert_eq!(counts, vec![1, 0, 1, 0]);
    // the empty half keeps the data bounds of its sibling's point
    assert_eq!(
        tree.region_data_bounds(1),
        Some(Bounds::around_point(&points[0]))
    );
    assert_eq!(
        tree.region_data_bounds(3),
        Some(Bounds::around_point(&points[1]))
    );
    check_covers_points(&tree, &points);
}

#[test]
fn coincident_clusters_land_in_the_first_leaf() {
    // two clusters of identical points; below the first cut every axis is flat
    let mut points = vec![[0.0f32, 0.0, 0.0]; 100];
    points.extend(vec![[1.0f32, 1.0, 1.0]; 100]);
    let params = BuildParameters::default().with_min_cells(10);
    let tree = agreed_tree(build(&[50, 50, 50, 50], &points, &params));

    assert_eq!(tree.depth(), 4);
    assert_eq!(tree.number_of_regions(), 16);
    let stored: Vec<usize> = (0..16).map(|r| tree.region(r).unwrap().num_points()).collect();
    assert_eq!(
        stored,
        vec![13, 12, 13, 12, 13, 12, 13, 12, 13, 12, 13, 12, 13, 12, 13, 12]
    );

    // every cut below the root sits on the cluster's coordinate, and a point on a cut goes left
    let mut looked_up = vec![0; 16];
    for p in &points {
        let center = [p[0] as f64, p[1] as f64, p[2] as f64];
        looked_up[tree.region_containing_point(center).unwrap()] += 1;
    }
    let mut expected = vec![0; 16];
    expected[0] = 100;
    expected[8] = 100;
    assert_eq!(looked_up, expected);
    check_boundaries(&tree);
}
