// pose.rs — Pose refinement and hypothesis scoring, CPU reference.
//
// The pose between two frames is estimated RANSAC-style: many random
// 3-point hypotheses are refined independently by Gauss-Newton and the one
// whose pose reprojects the most correspondences within an acceptance
// bound wins.
//
// COORDINATES
// ────────────
// A correspondence is a (u1, v1, q1) ↔ (u2, v2) tuple: normalized image
// coordinates in both frames plus inverse depth in the reference frame.
// The homogeneous point P = (u1, v1, 1, q1) equals the 3D point divided by
// its depth, so for a rigid pose M the prediction is simply
//
//   Y = M · P,   u' = Yx / Yz,   v' = Yy / Yz
//
// with no per-point division by q on the hot path.
//
// REFINEMENT
// ───────────
// Per hypothesis and iteration: assemble the weighted 6×6 normal equations
// from the 3-point subset linearized at the current pose, solve by
// Cholesky, and right-multiply the pose by the SE(3) exponential of the
// solution. A non-positive pivot (degenerate point configuration) yields a
// zero twist — exp(0) = I — so the hypothesis simply keeps its previous
// pose; it never faults the batch.
//
// Every function here has a GPU twin in gpu/pose.rs; the math is kept in
// plain loops (rather than nalgebra's richer operators) so the two read
// the same.

use log::warn;
use nalgebra::{Matrix4, Matrix6, Vector6};

use crate::fast::Point;
use crate::image::Image;
use crate::rng::XorShiftRng;

/// Sentinel observed coordinate marking an unusable tuple. Far outside the
/// normalized image plane, so such a tuple can never score and any
/// hypothesis built from it collapses to a hopeless residual.
pub const INVALID_UV: f32 = 1.0e30;

/// Pivot floor for the Cholesky decomposition.
const CHOLESKY_EPS: f32 = 1.0e-12;

/// Guard against projecting points at (or behind) the camera plane.
const MIN_DEPTH_Z: f32 = 1.0e-12;

/// One calibrated correspondence: reference ray (u1, v1) with inverse
/// depth q1, observed ray (u2, v2).
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct UvqUv {
    pub u1: f32,
    pub v1: f32,
    pub q1: f32,
    pub u2: f32,
    pub v2: f32,
}

impl UvqUv {
    /// The sentinel tuple produced for an out-of-range correspondence.
    pub fn invalid() -> Self {
        UvqUv {
            u1: 0.0,
            v1: 0.0,
            q1: 0.0,
            u2: INVALID_UV,
            v2: INVALID_UV,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.u2 < INVALID_UV && self.v2 < INVALID_UV
    }
}

/// Convert a correspondence list into calibrated tuples.
///
/// `matches` carries (reference index, query index) pairs; indices are
/// bounds-checked against the corner lists, and a failed check yields the
/// sentinel tuple in place (keeping the output index-aligned with
/// `matches`). The failure count is reported once, not per element —
/// approximate matching upstream makes occasional bad indices expected.
pub fn make_tuples(
    matches: &[Point],
    corners1: &[Point],
    corners2: &[Point],
    umap: &Image<f32>,
    vmap: &Image<f32>,
    qmap1: &Image<f32>,
) -> Vec<UvqUv> {
    let mut bad = 0usize;
    let tuples = matches
        .iter()
        .map(|m| {
            let (i1, i2) = (m.x, m.y);
            if i1 < 0 || i2 < 0 || i1 as usize >= corners1.len() || i2 as usize >= corners2.len()
            {
                bad += 1;
                return UvqUv::invalid();
            }
            let p1 = corners1[i1 as usize];
            let p2 = corners2[i2 as usize];
            let (x1, y1) = (p1.x as usize, p1.y as usize);
            let (x2, y2) = (p2.x as usize, p2.y as usize);
            UvqUv {
                u1: umap.get(x1, y1),
                v1: vmap.get(x1, y1),
                q1: qmap1.get(x1, y1),
                u2: umap.get(x2, y2),
                v2: vmap.get(x2, y2),
            }
        })
        .collect();
    if bad > 0 {
        warn!("{bad} of {} correspondences had out-of-range indices", matches.len());
    }
    tuples
}

// ---------------------------------------------------------------------------
// Hypothesis mixing
// ---------------------------------------------------------------------------

/// Draw `3 * hypotheses` tuple indices with replacement, independently per
/// hypothesis slot. Deterministic for a given seed. Empty pool → empty.
pub fn mix_triples(pool: usize, hypotheses: usize, seed: u64) -> Vec<u32> {
    if pool == 0 {
        return Vec::new();
    }
    let mut rng = XorShiftRng::new(seed);
    (0..hypotheses * 3)
        .map(|_| rng.next_index(pool) as u32)
        .collect()
}

// ---------------------------------------------------------------------------
// Gauss-Newton building blocks
// ---------------------------------------------------------------------------

/// Predict the observed ray for a tuple under a pose. Returns `None` when
/// the transformed point lies on or behind the camera plane.
#[inline]
pub fn predict(pose: &Matrix4<f32>, t: &UvqUv) -> Option<(f32, f32)> {
    let yx = pose[(0, 0)] * t.u1 + pose[(0, 1)] * t.v1 + pose[(0, 2)] + pose[(0, 3)] * t.q1;
    let yy = pose[(1, 0)] * t.u1 + pose[(1, 1)] * t.v1 + pose[(1, 2)] + pose[(1, 3)] * t.q1;
    let yz = pose[(2, 0)] * t.u1 + pose[(2, 1)] * t.v1 + pose[(2, 2)] + pose[(2, 3)] * t.q1;
    if yz.abs() < MIN_DEPTH_Z {
        return None;
    }
    Some((yx / yz, yy / yz))
}

/// Assemble the weighted normal equations (A, b) for one 3-point subset
/// linearized at `pose`. Residuals are down-weighted by a Cauchy factor
/// scaled to the acceptance bound, so a wildly wrong point (or a sentinel
/// tuple) cannot dominate the system.
pub fn assemble_normal_equations(
    triple: &[UvqUv; 3],
    pose: &Matrix4<f32>,
    accept_bound: f32,
) -> (Matrix6<f32>, Vector6<f32>) {
    let mut a = Matrix6::<f32>::zeros();
    let mut b = Vector6::<f32>::zeros();

    for t in triple {
        // Transformed point Y = M · (u1, v1, 1, q1).
        let p = [t.u1, t.v1, 1.0];
        let mut y = [0.0f32; 3];
        for r in 0..3 {
            y[r] = pose[(r, 0)] * p[0]
                + pose[(r, 1)] * p[1]
                + pose[(r, 2)] * p[2]
                + pose[(r, 3)] * t.q1;
        }
        if y[2].abs() < MIN_DEPTH_Z {
            continue;
        }

        let iz = 1.0 / y[2];
        let u = y[0] * iz;
        let v = y[1] * iz;
        let eu = t.u2 - u;
        let ev = t.v2 - v;

        // Projection Jacobian (2×3) at Y.
        let jp = [
            [iz, 0.0, -u * iz],
            [0.0, iz, -v * iz],
        ];

        // Right-multiplicative twist: dY/dδ = R · (dv · q + dw × p).
        // Translation columns k: R[:,k] · q; rotation columns k: R · (e_k × p).
        let mut j = [[0.0f32; 6]; 2];
        for k in 0..3 {
            // rc = R · e_k (k-th rotation column of the pose).
            let rc = [pose[(0, k)], pose[(1, k)], pose[(2, k)]];
            for row in 0..2 {
                j[row][k] =
                    (jp[row][0] * rc[0] + jp[row][1] * rc[1] + jp[row][2] * rc[2]) * t.q1;
            }
        }
        for k in 0..3 {
            // cr = e_k × p.
            let cr = match k {
                0 => [0.0, -p[2], p[1]],
                1 => [p[2], 0.0, -p[0]],
                _ => [-p[1], p[0], 0.0],
            };
            // rcr = R · cr.
            let mut rcr = [0.0f32; 3];
            for r in 0..3 {
                rcr[r] = pose[(r, 0)] * cr[0] + pose[(r, 1)] * cr[1] + pose[(r, 2)] * cr[2];
            }
            for row in 0..2 {
                j[row][3 + k] = jp[row][0] * rcr[0] + jp[row][1] * rcr[1] + jp[row][2] * rcr[2];
            }
        }

        let c2 = accept_bound * accept_bound;
        let w = c2 / (c2 + eu * eu + ev * ev);

        for row in 0..2 {
            let e = if row == 0 { eu } else { ev };
            for i in 0..6 {
                b[i] += w * j[row][i] * e;
                for kk in 0..6 {
                    a[(i, kk)] += w * j[row][i] * j[row][kk];
                }
            }
        }
    }

    (a, b)
}

/// Solve A x = b by Cholesky decomposition with forward/back substitution.
///
/// Returns `None` when a pivot is not positive (A not positive-definite,
/// e.g. a degenerate point configuration). Callers treat that as "no pose
/// update", never as a batch failure.
pub fn cholesky_solve6(a: &Matrix6<f32>, b: &Vector6<f32>) -> Option<Vector6<f32>> {
    // Lower-triangular factor, built column by column.
    let mut l = [[0.0f32; 6]; 6];
    for j in 0..6 {
        let mut d = a[(j, j)];
        for k in 0..j {
            d -= l[j][k] * l[j][k];
        }
        if d <= CHOLESKY_EPS {
            return None;
        }
        let dj = d.sqrt();
        l[j][j] = dj;
        for i in (j + 1)..6 {
            let mut s = a[(i, j)];
            for k in 0..j {
                s -= l[i][k] * l[j][k];
            }
            l[i][j] = s / dj;
        }
    }

    // Forward substitution: L z = b.
    let mut z = [0.0f32; 6];
    for i in 0..6 {
        let mut s = b[i];
        for k in 0..i {
            s -= l[i][k] * z[k];
        }
        z[i] = s / l[i][i];
    }

    // Back substitution: Lᵀ x = z.
    let mut x = Vector6::<f32>::zeros();
    for i in (0..6).rev() {
        let mut s = z[i];
        for k in (i + 1)..6 {
            s -= l[k][i] * x[k];
        }
        x[i] = s / l[i][i];
    }
    Some(x)
}

/// SE(3) exponential map: twist (v, w) → 4×4 rigid transform.
pub fn se3_exp(x: &Vector6<f32>) -> Matrix4<f32> {
    let v = [x[0], x[1], x[2]];
    let w = [x[3], x[4], x[5]];
    let th2 = w[0] * w[0] + w[1] * w[1] + w[2] * w[2];
    let th = th2.sqrt();

    // Rodrigues coefficients, series-expanded near zero.
    let (ca, cb, cc) = if th < 1.0e-4 {
        (
            1.0 - th2 / 6.0,
            0.5 - th2 / 24.0,
            1.0 / 6.0 - th2 / 120.0,
        )
    } else {
        let a = th.sin() / th;
        let b = (1.0 - th.cos()) / th2;
        ((a), (b), (1.0 - a) / th2)
    };

    // W = skew(w), W² accumulated explicitly.
    let wm = [
        [0.0, -w[2], w[1]],
        [w[2], 0.0, -w[0]],
        [-w[1], w[0], 0.0],
    ];
    let mut w2 = [[0.0f32; 3]; 3];
    for r in 0..3 {
        for c in 0..3 {
            for k in 0..3 {
                w2[r][c] += wm[r][k] * wm[k][c];
            }
        }
    }

    let mut m = Matrix4::<f32>::identity();
    for r in 0..3 {
        for c in 0..3 {
            let i = if r == c { 1.0 } else { 0.0 };
            m[(r, c)] = i + ca * wm[r][c] + cb * w2[r][c];
            // V shares W and W² with different coefficients.
        }
        let vr = [
            (if r == 0 { 1.0 } else { 0.0 }) + cb * wm[r][0] + cc * w2[r][0],
            (if r == 1 { 1.0 } else { 0.0 }) + cb * wm[r][1] + cc * w2[r][1],
            (if r == 2 { 1.0 } else { 0.0 }) + cb * wm[r][2] + cc * w2[r][2],
        ];
        m[(r, 3)] = vr[0] * v[0] + vr[1] * v[1] + vr[2] * v[2];
    }
    m
}

/// Refine one hypothesis from the identity pose: `iterations` rounds of
/// assemble → Cholesky → exponential update.
pub fn refine_hypothesis(
    triple: &[UvqUv; 3],
    iterations: usize,
    accept_bound: f32,
) -> Matrix4<f32> {
    let mut pose = Matrix4::<f32>::identity();
    for _ in 0..iterations {
        let (a, b) = assemble_normal_equations(triple, &pose, accept_bound);
        let x = cholesky_solve6(&a, &b).unwrap_or_else(Vector6::zeros);
        pose = pose * se3_exp(&x);
    }
    pose
}

/// Score a pose against the full tuple set: +1 per tuple whose reprojection
/// residual is within the acceptance bound.
pub fn score_pose(tuples: &[UvqUv], pose: &Matrix4<f32>, accept_bound: f32) -> f32 {
    let bound2 = accept_bound * accept_bound;
    let mut score = 0.0f32;
    for t in tuples {
        if let Some((u, v)) = predict(pose, t) {
            let du = t.u2 - u;
            let dv = t.v2 - v;
            if du * du + dv * dv < bound2 {
                score += 1.0;
            }
        }
    }
    score
}

/// Best hypothesis by strict `>` scan: on a tie the lower index wins.
pub fn best_hypothesis(scores: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &s) in scores.iter().enumerate() {
        match best {
            Some((_, bs)) if s > bs => best = Some((i, s)),
            None => best = Some((i, s)),
            _ => {}
        }
    }
    best
}

/// Replay pass: reproject every tuple under a single pose, yielding the
/// predicted (u, v) per correspondence for external consumption. Degenerate
/// projections yield the sentinel coordinate.
pub fn reproject(tuples: &[UvqUv], pose: &Matrix4<f32>) -> Vec<(f32, f32)> {
    tuples
        .iter()
        .map(|t| predict(pose, t).unwrap_or((INVALID_UV, INVALID_UV)))
        .collect()
}

// ---------------------------------------------------------------------------
// Full hypothesis search
// ---------------------------------------------------------------------------

/// Hypothesis-search parameters.
#[derive(Debug, Clone)]
pub struct RefineConfig {
    /// Gauss-Newton iterations per hypothesis.
    pub iterations: usize,
    /// Hypothesis pool size.
    pub hypotheses: usize,
    /// Seed for the triple-mixing generator.
    pub seed: u64,
    /// Reprojection residual acceptance bound (normalized coordinates).
    pub accept_bound: f32,
}

impl Default for RefineConfig {
    fn default() -> Self {
        RefineConfig {
            iterations: 10,
            hypotheses: 8192,
            seed: 1,
            accept_bound: 0.01,
        }
    }
}

/// The winning hypothesis of a pose search.
#[derive(Debug, Clone)]
pub struct PoseEstimate {
    /// Refined rigid transform from the reference frame to the query frame.
    pub pose: Matrix4<f32>,
    /// Consensus score of the winning hypothesis.
    pub score: f32,
    /// Index of the winning hypothesis in the pool.
    pub index: usize,
}

/// Run the full hypothesis search on the CPU.
///
/// An empty tuple list produces the identity pose with score 0 without
/// attempting any solve.
pub fn estimate_pose(tuples: &[UvqUv], config: &RefineConfig) -> PoseEstimate {
    if tuples.is_empty() || config.hypotheses == 0 {
        return PoseEstimate {
            pose: Matrix4::identity(),
            score: 0.0,
            index: 0,
        };
    }

    let indices = mix_triples(tuples.len(), config.hypotheses, config.seed);

    let mut scores = Vec::with_capacity(config.hypotheses);
    let mut poses = Vec::with_capacity(config.hypotheses);
    for h in 0..config.hypotheses {
        let triple = [
            tuples[indices[h * 3] as usize],
            tuples[indices[h * 3 + 1] as usize],
            tuples[indices[h * 3 + 2] as usize],
        ];
        let pose = refine_hypothesis(&triple, config.iterations, config.accept_bound);
        scores.push(score_pose(tuples, &pose, config.accept_bound));
        poses.push(pose);
    }

    // Scores are never empty here; unwrap is unreachable.
    let (index, score) = best_hypothesis(&scores).unwrap_or((0, 0.0));
    PoseEstimate {
        pose: poses[index],
        score,
        index,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Tuples for a grid of 3D points under a known frame-1 → frame-2 pose.
    fn synthetic_tuples(pose: &Matrix4<f32>, n: usize) -> Vec<UvqUv> {
        let side = (n as f32).sqrt().ceil() as usize;
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            let gx = (i % side) as f32;
            let gy = (i / side) as f32;
            // Points spread over the view frustum at varying depth.
            let x = (gx - side as f32 / 2.0) * 0.2;
            let y = (gy - side as f32 / 2.0) * 0.2;
            let z = 2.0 + 0.1 * ((i % 7) as f32);
            let u1 = x / z;
            let v1 = y / z;
            let q1 = 1.0 / z;

            let x2 = pose[(0, 0)] * x + pose[(0, 1)] * y + pose[(0, 2)] * z + pose[(0, 3)];
            let y2 = pose[(1, 0)] * x + pose[(1, 1)] * y + pose[(1, 2)] * z + pose[(1, 3)];
            let z2 = pose[(2, 0)] * x + pose[(2, 1)] * y + pose[(2, 2)] * z + pose[(2, 3)];
            out.push(UvqUv {
                u1,
                v1,
                q1,
                u2: x2 / z2,
                v2: y2 / z2,
            });
        }
        out
    }

    fn small_motion_pose() -> Matrix4<f32> {
        let mut x = Vector6::<f32>::zeros();
        x[0] = 0.02; // tx
        x[1] = -0.01; // ty
        x[2] = 0.03; // tz
        x[3] = 0.01; // wx
        x[4] = -0.02; // wy
        x[5] = 0.015; // wz
        se3_exp(&x)
    }

    fn max_abs_diff(a: &Matrix4<f32>, b: &Matrix4<f32>) -> f32 {
        let mut m = 0.0f32;
        for r in 0..4 {
            for c in 0..4 {
                m = m.max((a[(r, c)] - b[(r, c)]).abs());
            }
        }
        m
    }

    #[test]
    fn test_se3_exp_zero_is_identity() {
        let m = se3_exp(&Vector6::zeros());
        assert_eq!(max_abs_diff(&m, &Matrix4::identity()), 0.0);
    }

    #[test]
    fn test_se3_exp_pure_translation() {
        let mut x = Vector6::<f32>::zeros();
        x[0] = 0.5;
        x[1] = -0.25;
        x[2] = 1.0;
        let m = se3_exp(&x);
        let mut expect = Matrix4::<f32>::identity();
        expect[(0, 3)] = 0.5;
        expect[(1, 3)] = -0.25;
        expect[(2, 3)] = 1.0;
        assert!(max_abs_diff(&m, &expect) < 1e-6);
    }

    #[test]
    fn test_se3_exp_rotation_is_orthonormal() {
        let mut x = Vector6::<f32>::zeros();
        x[3] = 0.3;
        x[4] = -0.2;
        x[5] = 0.4;
        let m = se3_exp(&x);
        // RᵀR = I.
        for i in 0..3 {
            for j in 0..3 {
                let mut dot = 0.0f32;
                for k in 0..3 {
                    dot += m[(k, i)] * m[(k, j)];
                }
                let expect = if i == j { 1.0 } else { 0.0 };
                assert!((dot - expect).abs() < 1e-5, "RtR[{i}][{j}] = {dot}");
            }
        }
    }

    #[test]
    fn test_cholesky_solves_spd_system() {
        // A = Mᵀ M + I is symmetric positive definite for any M.
        let mut a = Matrix6::<f32>::zeros();
        for i in 0..6 {
            for j in 0..6 {
                let mut s = if i == j { 1.0 } else { 0.0 };
                for k in 0..6 {
                    let mi = ((i * 6 + k) as f32 * 0.37).sin();
                    let mj = ((j * 6 + k) as f32 * 0.37).sin();
                    s += mi * mj;
                }
                a[(i, j)] = s;
            }
        }
        let mut b = Vector6::<f32>::zeros();
        for i in 0..6 {
            b[i] = (i as f32) - 2.5;
        }
        let x = cholesky_solve6(&a, &b).expect("SPD system must decompose");
        // Check A x = b.
        for i in 0..6 {
            let mut s = 0.0f32;
            for j in 0..6 {
                s += a[(i, j)] * x[j];
            }
            assert!((s - b[i]).abs() < 1e-3, "row {i}: {s} vs {}", b[i]);
        }
    }

    #[test]
    fn test_cholesky_rejects_singular() {
        assert!(cholesky_solve6(&Matrix6::zeros(), &Vector6::zeros()).is_none());
        // Rank-deficient: identical rows.
        let mut a = Matrix6::<f32>::zeros();
        for i in 0..6 {
            for j in 0..6 {
                a[(i, j)] = 1.0;
            }
        }
        assert!(cholesky_solve6(&a, &Vector6::zeros()).is_none());
    }

    #[test]
    fn test_zero_residuals_give_zero_gradient() {
        let tuples = synthetic_tuples(&Matrix4::identity(), 9);
        let triple = [tuples[0], tuples[4], tuples[8]];
        let (_a, b) = assemble_normal_equations(&triple, &Matrix4::identity(), 0.01);
        for i in 0..6 {
            assert!(b[i].abs() < 1e-6, "b[{i}] = {}", b[i]);
        }
    }

    #[test]
    fn test_refine_recovers_small_motion() {
        let truth = small_motion_pose();
        let tuples = synthetic_tuples(&truth, 9);
        // A well-spread, non-collinear triple.
        let triple = [tuples[0], tuples[5], tuples[7]];
        let pose = refine_hypothesis(&triple, 10, 0.01);
        assert!(
            max_abs_diff(&pose, &truth) < 1e-3,
            "refined pose differs from truth by {}",
            max_abs_diff(&pose, &truth)
        );
    }

    #[test]
    fn test_degenerate_triple_stays_identity() {
        // Three identical points: the normal equations are rank-deficient,
        // every Cholesky attempt reports non-PD, and the pose must remain
        // exactly the identity — no NaN, no panic.
        let t = UvqUv {
            u1: 0.1,
            v1: 0.2,
            q1: 0.5,
            u2: 0.15,
            v2: 0.25,
        };
        let pose = refine_hypothesis(&[t, t, t], 10, 0.01);
        assert_eq!(max_abs_diff(&pose, &Matrix4::identity()), 0.0);
    }

    #[test]
    fn test_score_counts_inliers() {
        let tuples = synthetic_tuples(&Matrix4::identity(), 25);
        assert_eq!(score_pose(&tuples, &Matrix4::identity(), 0.01), 25.0);

        // A pose with a large translation misses every point.
        let mut x = Vector6::<f32>::zeros();
        x[0] = 5.0;
        let off = se3_exp(&x);
        assert_eq!(score_pose(&tuples, &off, 0.01), 0.0);
    }

    #[test]
    fn test_invalid_tuples_never_score() {
        let tuples = vec![UvqUv::invalid(); 10];
        assert_eq!(score_pose(&tuples, &Matrix4::identity(), 0.01), 0.0);
    }

    #[test]
    fn test_best_hypothesis_tie_breaks_low() {
        let scores = [3.0, 7.0, 7.0, 1.0];
        assert_eq!(best_hypothesis(&scores), Some((1, 7.0)));
        assert_eq!(best_hypothesis(&[]), None);
    }

    #[test]
    fn test_mix_is_deterministic_and_in_range() {
        let a = mix_triples(37, 100, 99);
        let b = mix_triples(37, 100, 99);
        assert_eq!(a, b);
        assert_eq!(a.len(), 300);
        assert!(a.iter().all(|&i| (i as usize) < 37));
        let c = mix_triples(37, 100, 100);
        assert_ne!(a, c, "different seeds should mix differently");
    }

    #[test]
    fn test_estimate_zero_motion_converges_to_identity() {
        let tuples = synthetic_tuples(&Matrix4::identity(), 100);
        let config = RefineConfig {
            iterations: 10,
            hypotheses: 64,
            seed: 5,
            accept_bound: 0.01,
        };
        let est = estimate_pose(&tuples, &config);
        assert_eq!(est.score, 100.0, "all correspondences should be inliers");
        assert!(
            max_abs_diff(&est.pose, &Matrix4::identity()) < 1e-4,
            "pose should converge to identity, diff {}",
            max_abs_diff(&est.pose, &Matrix4::identity())
        );
    }

    #[test]
    fn test_estimate_recovers_known_motion() {
        let truth = small_motion_pose();
        let tuples = synthetic_tuples(&truth, 64);
        let config = RefineConfig {
            iterations: 10,
            hypotheses: 64,
            seed: 11,
            accept_bound: 0.01,
        };
        let est = estimate_pose(&tuples, &config);
        assert!(est.score >= 60.0, "most tuples should be inliers, got {}", est.score);
        assert!(max_abs_diff(&est.pose, &truth) < 1e-2);
    }

    #[test]
    fn test_estimate_deterministic_for_seed() {
        let tuples = synthetic_tuples(&small_motion_pose(), 40);
        let config = RefineConfig {
            iterations: 5,
            hypotheses: 32,
            seed: 123,
            accept_bound: 0.01,
        };
        let a = estimate_pose(&tuples, &config);
        let b = estimate_pose(&tuples, &config);
        assert_eq!(a.index, b.index);
        assert_eq!(a.score, b.score);
        assert_eq!(max_abs_diff(&a.pose, &b.pose), 0.0);
    }

    #[test]
    fn test_estimate_empty_tuples() {
        let est = estimate_pose(&[], &RefineConfig::default());
        assert_eq!(est.score, 0.0);
        assert_eq!(est.index, 0);
        assert_eq!(max_abs_diff(&est.pose, &Matrix4::identity()), 0.0);
    }

    #[test]
    fn test_reproject_replays_predictions() {
        let truth = small_motion_pose();
        let tuples = synthetic_tuples(&truth, 16);
        let uvs = reproject(&tuples, &truth);
        assert_eq!(uvs.len(), 16);
        for (t, (u, v)) in tuples.iter().zip(&uvs) {
            assert!((t.u2 - u).abs() < 1e-5);
            assert!((t.v2 - v).abs() < 1e-5);
        }
    }
}
