use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use kornia_articulation as ka;
use nalgebra::Vector3;
use rand::{rngs::StdRng, Rng, SeedableRng};

fn generate_dataset_with_seed(
    num_points: usize,
    outlier_ratio: f64,
    seed: u64,
) -> ka::CorrespondenceDataset {
    let mut rng = StdRng::seed_from_u64(seed);

    let body0 = ka::SimilarityTransform {
        rotation: ka::axis_angle_to_rotation_matrix(&Vector3::new(0.0, 0.0, 0.5)),
        scale: 1.5,
        translation: Vector3::new(0.2, -0.1, 0.3),
    };
    let body1 = ka::SimilarityTransform {
        rotation: body0.rotation * ka::axis_angle_to_rotation_matrix(&Vector3::new(0.0, 0.0, -0.8)),
        ..body0
    };

    let mut make_set = |transform: &ka::SimilarityTransform| {
        let source: Vec<_> = (0..num_points)
            .map(|_| {
                Vector3::new(
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-1.0..1.0),
                )
            })
            .collect();
        let target = source
            .iter()
            .map(|p| {
                let noise = Vector3::new(
                    rng.random_range(-1e-3..1e-3),
                    rng.random_range(-1e-3..1e-3),
                    rng.random_range(-1e-3..1e-3),
                );
                let outlier = if rng.random_bool(outlier_ratio) {
                    Vector3::new(rng.random_range(1.0..3.0), rng.random_range(-3.0..-1.0), 1.0)
                } else {
                    Vector3::zeros()
                };
                transform.transform_point(p) + noise + outlier
            })
            .collect();
        ka::CorrespondenceSet::new(source, target).unwrap()
    };

    let set0 = make_set(&body0);
    let set1 = make_set(&body1);
    ka::CorrespondenceDataset::new(set0, set1, Vector3::new(0.0, 0.0, 1.0)).unwrap()
}

fn bench_estimator(c: &mut Criterion) {
    let mut group = c.benchmark_group("articulation_estimator");
    let dataset = generate_dataset_with_seed(64, 0.0, 42);
    for refinement in [
        ka::RotationRefinement::LevenbergMarquardt,
        ka::RotationRefinement::Alternating,
    ] {
        let estimator =
            ka::JointTransformEstimator::new(ka::EstimatorParams::new().with_refinement(refinement));
        let mut rng = StdRng::seed_from_u64(0);
        group.bench_function(format!("{refinement:?}"), |b| {
            b.iter(|| {
                let res = estimator.estimate(&dataset, None, &mut rng).unwrap();
                std::hint::black_box(res);
            });
        });
    }
    group.finish();
}

fn bench_ransac(c: &mut Criterion) {
    let mut group = c.benchmark_group("articulation_ransac");
    group.sample_size(10);
    for &n in &[32usize, 128, 512] {
        let dataset = generate_dataset_with_seed(n, 0.2, 10_000);
        group.throughput(Throughput::Elements(n as u64));

        for parallel in [false, true] {
            let params = ka::RansacParams::default()
                .with_max_iterations(200)
                .with_inlier_threshold(0.01)
                .with_random_seed(7)
                .with_parallel(parallel);
            let name = if parallel { "parallel" } else { "sequential" };

            group.bench_with_input(BenchmarkId::new(name, n), &n, |b, _| {
                b.iter(|| {
                    let res = ka::ransac_fit_with_params(&dataset, &params).unwrap();
                    std::hint::black_box(res);
                });
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_estimator, bench_ransac);
criterion_main!(benches);
