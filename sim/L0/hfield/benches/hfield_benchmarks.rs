//! Benchmarks for height field construction, refit and queries.
//!
//! Run with: cargo bench -p sim-hfield

#![allow(
    missing_docs,
    clippy::cast_precision_loss,
    clippy::unwrap_used,
    clippy::ignored_unit_patterns
)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nalgebra::{DMatrix, Point3, UnitQuaternion, Vector3};
use rand::Rng;

use sim_hfield::{collide, collide_batch, CollisionRequest, ConvexShape, HeightField, Obb, Pose};

/// Rolling terrain over a 10 x 10 footprint.
fn generate_heights(samples: usize, phase: f64) -> DMatrix<f64> {
    DMatrix::from_fn(samples, samples, |r, c| {
        let u = r as f64 / samples as f64;
        let v = c as f64 / samples as f64;
        1.0 + 0.5 * (6.0 * u + phase).sin() * (4.0 * v).cos() + 0.1 * (20.0 * u * v).sin()
    })
}

fn generate_poses(count: usize) -> Vec<Pose> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| {
            Pose::from_position_rotation(
                Point3::new(
                    rng.gen_range(-4.5..4.5),
                    rng.gen_range(-4.5..4.5),
                    rng.gen_range(0.8..2.2),
                ),
                UnitQuaternion::from_euler_angles(
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                ),
            )
        })
        .collect()
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("hfield_build");

    for samples in [16, 64, 256] {
        let heights = generate_heights(samples, 0.0);
        group.throughput(Throughput::Elements(((samples - 1) * (samples - 1)) as u64));
        group.bench_with_input(
            BenchmarkId::new("aabb", format!("{samples}x{samples}")),
            &heights,
            |b, heights| {
                b.iter(|| black_box(HeightField::<sim_hfield::Aabb>::new(10.0, 10.0, heights.clone(), 0.0)));
            },
        );
    }

    group.finish();
}

fn bench_update_heights(c: &mut Criterion) {
    let mut group = c.benchmark_group("hfield_update");

    for samples in [64, 256] {
        let mut hf: HeightField = HeightField::new(10.0, 10.0, generate_heights(samples, 0.0), 0.0).unwrap();
        let frames = [generate_heights(samples, 0.5), generate_heights(samples, 1.0)];

        group.bench_function(BenchmarkId::new("refit", format!("{samples}x{samples}")), |b| {
            let mut i = 0;
            b.iter(|| {
                i ^= 1;
                hf.update_heights(frames[i].clone()).unwrap();
                black_box(hf.local_aabb())
            });
        });
    }

    group.finish();
}

fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("hfield_query");

    let heights = generate_heights(128, 0.0);
    let aabb_hf: HeightField = HeightField::new(10.0, 10.0, heights.clone(), 0.0).unwrap();
    let obb_hf: HeightField<Obb> = HeightField::new(10.0, 10.0, heights, 0.0).unwrap();
    let request = CollisionRequest::with_margin(0.01).with_max_contacts(8);

    let shapes = [
        ("sphere", ConvexShape::sphere(0.3)),
        ("box", ConvexShape::box_shape(Vector3::new(0.3, 0.2, 0.1))),
        ("capsule", ConvexShape::capsule(0.4, 0.1)),
    ];
    let poses = generate_poses(100);

    for (name, shape) in &shapes {
        group.bench_with_input(BenchmarkId::new("aabb", name), shape, |b, shape| {
            b.iter(|| {
                for pose in &poses {
                    black_box(collide(&aabb_hf, &Pose::identity(), shape, pose, &request).unwrap());
                }
            });
        });
        group.bench_with_input(BenchmarkId::new("obb", name), shape, |b, shape| {
            b.iter(|| {
                for pose in &poses {
                    black_box(collide(&obb_hf, &Pose::identity(), shape, pose, &request).unwrap());
                }
            });
        });
    }

    // Far above the terrain: pruned at the root.
    let far = Pose::from_xyz(0.0, 0.0, 10.0);
    group.bench_function("pruned_at_root", |b| {
        b.iter(|| {
            black_box(
                collide(&aabb_hf, &Pose::identity(), &shapes[0].1, &far, &CollisionRequest::default())
                    .unwrap(),
            )
        });
    });

    group.finish();
}

fn bench_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("hfield_batch");

    let hf: HeightField = HeightField::new(10.0, 10.0, generate_heights(128, 0.0), 0.0).unwrap();
    let shape = ConvexShape::sphere(0.3);
    let request = CollisionRequest::with_margin(0.01);

    for count in [100, 1000] {
        let poses = generate_poses(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("spheres", count), &poses, |b, poses| {
            b.iter(|| black_box(collide_batch(&hf, &Pose::identity(), &shape, poses, &request).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_build,
    bench_update_heights,
    bench_query,
    bench_batch,
);
criterion_main!(benches);
