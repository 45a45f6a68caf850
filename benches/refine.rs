use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use tet_amr::adapt::{MeshAdapter, derefine_eight_to_one};
use tet_amr::mesh::NodeId;
use tet_amr::mesh::edge::EdgeKey;

/// Topological strip of `n` tets: tet `i` spans nodes `i..i+4`, so every
/// consecutive pair shares a face.
fn tet_strip(n: usize) -> Vec<NodeId> {
    let mut tetinpoel = Vec::with_capacity(n * 4);
    for i in 0..n as NodeId {
        tetinpoel.extend_from_slice(&[i, i + 1, i + 2, i + 3]);
    }
    tetinpoel
}

fn bench_refine(c: &mut Criterion) {
    let mut group = c.benchmark_group("refine");

    for &n in &[64usize, 512, 2048] {
        let tetinpoel = tet_strip(n);

        group.bench_with_input(BenchmarkId::new("uniform", n), &n, |b, _| {
            b.iter(|| {
                let mut adapter = MeshAdapter::init(&tetinpoel, (n + 4) as NodeId).unwrap();
                adapter.uniform_refinement().unwrap();
                black_box(adapter.tet_store.num_active());
            });
        });

        group.bench_with_input(BenchmarkId::new("random_marks", n), &n, |b, _| {
            // fixed random criterion field; roughly one edge in ten crosses
            // the threshold, giving a mix of every transition
            let mut rng = SmallRng::seed_from_u64(42);
            let criteria: Vec<f64> = (0..n * 6).map(|_| rng.r#gen::<f64>()).collect();
            b.iter(|| {
                let mut adapter = MeshAdapter::init(&tetinpoel, (n + 4) as NodeId).unwrap();
                let keys: Vec<EdgeKey> = adapter.tet_store.edges.keys().copied().collect();
                for (slot, key) in keys.into_iter().enumerate() {
                    let value = criteria[slot % criteria.len()];
                    adapter.tet_store.edges.set_criterion(key, value).unwrap();
                }
                adapter.mark_refinement(0.9).unwrap();
                adapter.perform_refinement().unwrap();
                black_box(adapter.tet_store.num_active());
            });
        });

        group.bench_with_input(BenchmarkId::new("round_trip", n), &n, |b, _| {
            b.iter(|| {
                let mut adapter = MeshAdapter::init(&tetinpoel, (n + 4) as NodeId).unwrap();
                adapter.uniform_refinement().unwrap();
                for parent in 0..n as u64 {
                    derefine_eight_to_one(&mut adapter.tet_store, parent).unwrap();
                }
                black_box(adapter.tet_store.num_active());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_refine);
criterion_main!(benches);
