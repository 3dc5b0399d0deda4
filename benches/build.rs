use criterion::{criterion_group, criterion_main, Criterion};
use pkdtree::comm::{ClusterContext, LocalCluster};
use pkdtree::{BuildParameters, PKdTree, PointCloud};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn load_data(ranks: usize, per_rank: usize) -> Vec<PointCloud> {
    let mut rng = StdRng::seed_from_u64(0);
    (0..ranks)
        .map(|_| {
            let points = (0..per_rank)
                .map(|_| [rng.gen::<f64>(), rng.gen::<f64>(), rng.gen::<f64>()])
                .collect();
            PointCloud::new(points)
        })
        .collect()
}

fn build(clouds: &[PointCloud], params: &BuildParameters) -> Vec<usize> {
    LocalCluster::run(clouds.len(), |comm| {
        let ctx = ClusterContext::new(comm).unwrap();
        let mut locator = PKdTree::new(params.clone());
        locator
            .build_locator(&ctx, std::slice::from_ref(&clouds[ctx.rank()]))
            .unwrap();
        locator.number_of_regions()
    })
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let params = BuildParameters::default();
    let clouds = load_data(4, 25_000);
    c.bench_function("build 4 ranks (100k cells)", |b| {
        b.iter(|| build(&clouds, &params))
    });

    let clouds = load_data(8, 12_500);
    c.bench_function("build 8 ranks (100k cells)", |b| {
        b.iter(|| build(&clouds, &params))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
