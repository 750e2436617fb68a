// benches/pose_benchmarks.rs — hot-path benchmarks for the CPU reference
// stages. The GPU mirrors are profiled through Step::measure() inside the
// pipeline itself; these benches track the host-side costs (tree build,
// matching, per-hypothesis refinement) that bound the CPU fallback path.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use relpose::fast::{prefast_candidates, FastDetector, Point};
use relpose::hips::{build_descriptors, HipsConfig, HipsDescriptor};
use relpose::image::Image;
use relpose::pose::{estimate_pose, refine_hypothesis, RefineConfig, UvqUv};
use relpose::tree::{find_matches, HipsTree, TreeConfig};

fn noise_image(w: usize, h: usize, seed: u32) -> Image<u8> {
    let mut rng = seed;
    let pixels: Vec<u8> = (0..w * h)
        .map(|_| {
            rng = rng.wrapping_mul(1664525).wrapping_add(1013904223);
            (rng >> 24) as u8
        })
        .collect();
    Image::from_vec(w, h, pixels)
}

fn grid_corners(w: usize, h: usize, step: usize) -> Vec<Point> {
    let mut out = Vec::new();
    let mut y = 8;
    while y + 8 < h {
        let mut x = 8;
        while x + 8 < w {
            out.push(Point::new(x as i32, y as i32));
            x += step;
        }
        y += step;
    }
    out
}

fn synthetic_tuples(n: usize) -> Vec<UvqUv> {
    (0..n)
        .map(|i| {
            let u = ((i % 10) as f32 - 5.0) * 0.05;
            let v = ((i / 10) as f32 - 5.0) * 0.05;
            let q = 1.0 / (2.0 + 0.1 * (i % 7) as f32);
            UvqUv {
                u1: u,
                v1: v,
                q1: q,
                u2: u,
                v2: v,
            }
        })
        .collect()
}

fn bench_detection(c: &mut Criterion) {
    let img = noise_image(512, 256, 1);
    c.bench_function("prefast_512x256", |b| {
        b.iter(|| prefast_candidates(&img, 30))
    });

    let candidates = prefast_candidates(&img, 30);
    let det = FastDetector::new(30, 9);
    c.bench_function("fast_ring_512x256", |b| b.iter(|| det.detect(&img, &candidates)));
}

fn bench_descriptors(c: &mut Criterion) {
    let img = noise_image(512, 256, 2);
    let corners = grid_corners(512, 256, 16);
    for blend in [1usize, 5, 9] {
        c.bench_with_input(
            BenchmarkId::new("hips_blend", blend),
            &blend,
            |b, &blend| {
                b.iter(|| build_descriptors(&img, &corners, HipsConfig::new(blend)));
            },
        );
    }
}

fn bench_matching(c: &mut Criterion) {
    let img = noise_image(512, 256, 3);
    let corners = grid_corners(512, 256, 12);
    let refs: Vec<HipsDescriptor> = build_descriptors(&img, &corners, HipsConfig::new(5));
    let queries: Vec<HipsDescriptor> = build_descriptors(&img, &corners, HipsConfig::new(1));

    c.bench_function("tree_build_512", |b| {
        b.iter(|| HipsTree::build(&refs, TreeConfig::new(512, 5)))
    });

    let tree = HipsTree::build(&refs, TreeConfig::new(512, 5));
    c.bench_function("tree_find", |b| {
        b.iter(|| find_matches(&tree, &queries, 3, true))
    });
}

fn bench_refinement(c: &mut Criterion) {
    let tuples = synthetic_tuples(100);
    let triple = [tuples[0], tuples[37], tuples[85]];
    c.bench_function("refine_hypothesis_10it", |b| {
        b.iter(|| refine_hypothesis(&triple, 10, 0.01))
    });

    let config = RefineConfig {
        iterations: 10,
        hypotheses: 64,
        seed: 1,
        accept_bound: 0.01,
    };
    c.bench_function("estimate_pose_64hypo", |b| {
        b.iter(|| estimate_pose(&tuples, &config))
    });
}

criterion_group!(
    benches,
    bench_detection,
    bench_descriptors,
    bench_refinement,
    bench_matching
);
criterion_main!(benches);
