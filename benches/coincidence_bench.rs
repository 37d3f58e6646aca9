use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use mesh_decomposition::geometry::BarycenterIndex;
use mesh_decomposition::prelude::*;

fn random_points(n: usize, seed: u64) -> Vec<[f64; 3]> {
    let mut rng = SmallRng::seed_from_u64(seed);
    (0..n)
        .map(|_| [rng.r#gen::<f64>(), rng.r#gen::<f64>(), 0.0])
        .collect()
}

fn bench_index(c: &mut Criterion) {
    let mut group = c.benchmark_group("barycenter_index");
    for &n in &[1_000usize, 10_000, 100_000] {
        let points = random_points(n, 42);
        let queries: Vec<[f64; 3]> = points.iter().step_by(97).copied().collect();
        let index = BarycenterIndex::new(points.clone(), 1e-10);

        group.bench_with_input(BenchmarkId::new("build", n), &n, |b, _| {
            b.iter(|| black_box(BarycenterIndex::new(points.clone(), 1e-10)));
        });
        group.bench_with_input(BenchmarkId::new("find", n), &n, |b, _| {
            b.iter(|| {
                for &q in &queries {
                    black_box(index.find(q));
                }
            });
        });
    }
    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("map_and_number");
    group.sample_size(10);
    for &cells in &[16usize, 64] {
        let layout = GridPartition::split(cells, cells, 2, 2).with_triangles().with_shuffle(1);
        group.bench_with_input(BenchmarkId::new("nooverlap", cells), &layout, |b, layout| {
            b.iter(|| {
                run_ranks(layout.rank_count(), |comm| {
                    let pm = partitioned_grid(layout, comm.rank()).unwrap();
                    let mesh = std::sync::Arc::new(parking_lot::RwLock::new(pm.mesh));
                    let mut tracker = DomainTracker::new(&mesh, comm);
                    tracker
                        .discover_connectivity(pm.skin_region, &DiscoveryConfig::default())
                        .unwrap();
                    tracker.map_interfaces().unwrap();
                    tracker.create_global_node_numbers().unwrap();
                    black_box(tracker.get_global_node_numbers().unwrap().len())
                })
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_index, bench_pipeline);
criterion_main!(benches);
