// gpu/pose.rs — pose-refinement and hypothesis-scoring stages.
//
// The refinement sequence, per Gauss-Newton iteration:
//
//   PoseWlsStep   mixed tuples + poses → (A, b) per hypothesis
//   CholeskyStep  (A, b) → twist x (zero twist on a non-positive pivot)
//   Se3ExpStep    x → delta transform
//   MatMulStep    pose ← pose · delta
//
// bracketed by ToUvqUvStep / MixStep / MatIdentStep before and
// Se3ScoreStep / Se3Run1Step after. Every kernel mirrors its CPU
// counterpart in crate::pose; the mixing indices come from the same
// seeded generator, so a GPU run and a CPU run of the same inputs select
// the same hypothesis.

use std::cell::Cell;
use std::rc::Rc;

use log::warn;

use crate::fast::Point;
use crate::pose::{mix_triples, UvqUv};

use super::state::{CountState, Float2, MatrixState, PlaneState, State};
use super::step::{dispatch, group_count, uniform_buffer, Step};
use super::worker::{GpuError, Worker};

// ---------------------------------------------------------------------------
// ToUvqUvStep
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ToUvqUvParams {
    count: u32,
    width: u32,
    corners1_count: u32,
    corners2_count: u32,
}

/// Correspondences → calibrated ((u,v,q),(u,v)) tuples.
pub struct ToUvqUvStep {
    worker: Rc<Worker>,
    pipeline: Rc<wgpu::ComputePipeline>,
    bind_group: wgpu::BindGroup,
    params: wgpu::Buffer,
    umap: Rc<PlaneState>,
    corners1: Rc<State<Point>>,
    corners2: Rc<State<Point>>,
    matches: Rc<State<Point>>,
    tuples: Rc<State<UvqUv>>,
    bad: CountState,
}

impl ToUvqUvStep {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker: Rc<Worker>,
        umap: Rc<PlaneState>,
        vmap: Rc<PlaneState>,
        qmap1: Rc<PlaneState>,
        corners1: Rc<State<Point>>,
        corners2: Rc<State<Point>>,
        matches: Rc<State<Point>>,
        tuples: Rc<State<UvqUv>>,
    ) -> Result<Self, GpuError> {
        assert!(
            tuples.capacity() >= matches.capacity(),
            "tuple capacity must cover the match capacity"
        );
        let pipeline = worker.compile(
            "to_uvquv",
            include_str!("../shaders/to_uvquv.wgsl"),
            "to_uvquv",
        )?;
        let bad = CountState::new(&worker, "to_uvquv.bad");
        let params = uniform_buffer(&worker, "to_uvquv.params", 16);
        let bind_group = worker.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("to_uvquv"),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: umap.state().buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: vmap.state().buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: qmap1.state().buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: corners1.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: corners2.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: matches.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: tuples.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 7,
                    resource: bad.state().buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 8,
                    resource: params.as_entire_binding(),
                },
            ],
        });
        Ok(ToUvqUvStep {
            worker,
            pipeline,
            bind_group,
            params,
            umap,
            corners1,
            corners2,
            matches,
            tuples,
            bad,
        })
    }

    /// Report out-of-range correspondence indices, once, after a drain.
    pub fn report_bad_indices(&self) {
        let bad = self.bad.read_value(&self.worker);
        if bad > 0 {
            warn!(
                "{bad} of {} correspondences had out-of-range indices",
                self.matches.count()
            );
        }
    }
}

impl Step for ToUvqUvStep {
    fn name(&self) -> &'static str {
        "to_uvquv"
    }

    fn worker(&self) -> &Worker {
        &self.worker
    }

    fn execute(&self) {
        let n = self.matches.count();
        self.tuples.set_count(n);
        self.bad.write_value(&self.worker, 0);
        let p = ToUvqUvParams {
            count: n as u32,
            width: self.umap.width(),
            corners1_count: self.corners1.count() as u32,
            corners2_count: self.corners2.count() as u32,
        };
        self.worker
            .queue
            .write_buffer(&self.params, 0, bytemuck::bytes_of(&p));
        dispatch(
            &self.worker,
            "to_uvquv",
            &self.pipeline,
            &self.bind_group,
            group_count(n),
        );
    }
}

// ---------------------------------------------------------------------------
// MixStep
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct MixParams {
    hypotheses: u32,
    tuple_count: u32,
    _pad0: u32,
    _pad1: u32,
}

/// Gather random 3-point subsets into the hypothesis pool.
///
/// The index stream is drawn host-side from the seeded generator (3 per
/// hypothesis, with replacement, independent per slot) and uploaded; the
/// kernel only gathers. A fixed seed therefore reproduces the exact same
/// hypothesis pool on every run.
pub struct MixStep {
    worker: Rc<Worker>,
    pipeline: Rc<wgpu::ComputePipeline>,
    bind_group: wgpu::BindGroup,
    params: wgpu::Buffer,
    tuples: Rc<State<UvqUv>>,
    mixed: Rc<State<UvqUv>>,
    indices: State<u32>,
    hypotheses: usize,
    seed: u64,
    /// Pool size the current index stream was drawn for; regenerate when
    /// the tuple count changes.
    drawn_for: Cell<usize>,
}

impl MixStep {
    pub fn new(
        worker: Rc<Worker>,
        tuples: Rc<State<UvqUv>>,
        mixed: Rc<State<UvqUv>>,
        hypotheses: usize,
        seed: u64,
    ) -> Result<Self, GpuError> {
        assert!(
            mixed.capacity() >= hypotheses * 3,
            "mixed capacity must hold 3 tuples per hypothesis"
        );
        let pipeline =
            worker.compile("mix_uvquv", include_str!("../shaders/mix.wgsl"), "mix_uvquv")?;
        let indices = State::new(&worker, "mix.indices", hypotheses * 3);
        let params = uniform_buffer(&worker, "mix.params", 16);
        let bind_group = worker.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("mix_uvquv"),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: indices.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: tuples.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: mixed.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: params.as_entire_binding(),
                },
            ],
        });
        Ok(MixStep {
            worker,
            pipeline,
            bind_group,
            params,
            tuples,
            mixed,
            indices,
            hypotheses,
            seed,
            drawn_for: Cell::new(usize::MAX),
        })
    }
}

impl Step for MixStep {
    fn name(&self) -> &'static str {
        "mix_uvquv"
    }

    fn worker(&self) -> &Worker {
        &self.worker
    }

    fn execute(&self) {
        let pool = self.tuples.count();
        if pool == 0 {
            // Nothing to mix; downstream refinement and scoring run over an
            // empty pool and the search degrades to score 0.
            self.mixed.set_count(0);
            return;
        }
        if self.drawn_for.get() != pool {
            let stream = mix_triples(pool, self.hypotheses, self.seed);
            self.indices.write(&self.worker, &stream);
            self.drawn_for.set(pool);
        }
        self.mixed.set_count(self.hypotheses * 3);

        let p = MixParams {
            hypotheses: self.hypotheses as u32,
            tuple_count: pool as u32,
            _pad0: 0,
            _pad1: 0,
        };
        self.worker
            .queue
            .write_buffer(&self.params, 0, bytemuck::bytes_of(&p));
        dispatch(
            &self.worker,
            "mix_uvquv",
            &self.pipeline,
            &self.bind_group,
            group_count(self.hypotheses),
        );
    }
}

// ---------------------------------------------------------------------------
// Per-hypothesis batch steps (shared shape)
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct BatchParams {
    hypotheses: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct WlsParams {
    hypotheses: u32,
    _pad0: u32,
    _pad1: u32,
    accept_bound: f32,
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ScoreParams {
    hypotheses: u32,
    tuple_count: u32,
    _pad0: u32,
    accept_bound: f32,
}

/// Seed every hypothesis pose to the identity.
pub struct MatIdentStep {
    worker: Rc<Worker>,
    pipeline: Rc<wgpu::ComputePipeline>,
    bind_group: wgpu::BindGroup,
    params: wgpu::Buffer,
    hypotheses: usize,
}

impl MatIdentStep {
    pub fn new(worker: Rc<Worker>, mats: Rc<MatrixState<4, 4>>) -> Result<Self, GpuError> {
        let pipeline = worker.compile(
            "mat_ident",
            include_str!("../shaders/mat_ident.wgsl"),
            "mat_ident",
        )?;
        let params = uniform_buffer(&worker, "mat_ident.params", 16);
        let bind_group = worker.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("mat_ident"),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: mats.state().buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: params.as_entire_binding(),
                },
            ],
        });
        let hypotheses = mats.matrices();
        Ok(MatIdentStep {
            worker,
            pipeline,
            bind_group,
            params,
            hypotheses,
        })
    }
}

impl Step for MatIdentStep {
    fn name(&self) -> &'static str {
        "mat_ident"
    }

    fn worker(&self) -> &Worker {
        &self.worker
    }

    fn execute(&self) {
        let p = BatchParams {
            hypotheses: self.hypotheses as u32,
            _pad0: 0,
            _pad1: 0,
            _pad2: 0,
        };
        self.worker
            .queue
            .write_buffer(&self.params, 0, bytemuck::bytes_of(&p));
        dispatch(
            &self.worker,
            "mat_ident",
            &self.pipeline,
            &self.bind_group,
            group_count(self.hypotheses),
        );
    }
}

/// Assemble the per-hypothesis normal equations.
pub struct PoseWlsStep {
    worker: Rc<Worker>,
    pipeline: Rc<wgpu::ComputePipeline>,
    bind_group: wgpu::BindGroup,
    params: wgpu::Buffer,
    mixed: Rc<State<UvqUv>>,
    hypotheses: usize,
    accept_bound: f32,
}

impl PoseWlsStep {
    pub fn new(
        worker: Rc<Worker>,
        mixed: Rc<State<UvqUv>>,
        poses: Rc<MatrixState<4, 4>>,
        amats: Rc<MatrixState<6, 6>>,
        bvecs: Rc<MatrixState<6, 1>>,
        accept_bound: f32,
    ) -> Result<Self, GpuError> {
        let hypotheses = poses.matrices();
        assert_eq!(amats.matrices(), hypotheses, "A batch size mismatch");
        assert_eq!(bvecs.matrices(), hypotheses, "b batch size mismatch");
        let pipeline = worker.compile(
            "pose_wls",
            include_str!("../shaders/pose_wls.wgsl"),
            "pose_wls",
        )?;
        let params = uniform_buffer(&worker, "pose_wls.params", 16);
        let bind_group = worker.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("pose_wls"),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: mixed.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: poses.state().buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: amats.state().buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: bvecs.state().buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: params.as_entire_binding(),
                },
            ],
        });
        Ok(PoseWlsStep {
            worker,
            pipeline,
            bind_group,
            params,
            mixed,
            hypotheses,
            accept_bound,
        })
    }
}

impl Step for PoseWlsStep {
    fn name(&self) -> &'static str {
        "pose_wls"
    }

    fn worker(&self) -> &Worker {
        &self.worker
    }

    fn execute(&self) {
        // The mixed pool must hold exactly 3 tuples per hypothesis (an
        // empty pool means the mix stage saw zero correspondences; skip).
        let mixed = self.mixed.count();
        if mixed == 0 {
            return;
        }
        assert_eq!(
            mixed,
            self.hypotheses * 3,
            "mixed tuple count must pair with the hypothesis pool"
        );
        let p = WlsParams {
            hypotheses: self.hypotheses as u32,
            _pad0: 0,
            _pad1: 0,
            accept_bound: self.accept_bound,
        };
        self.worker
            .queue
            .write_buffer(&self.params, 0, bytemuck::bytes_of(&p));
        dispatch(
            &self.worker,
            "pose_wls",
            &self.pipeline,
            &self.bind_group,
            group_count(self.hypotheses),
        );
    }
}

/// Batched 6×6 Cholesky solve.
pub struct CholeskyStep {
    worker: Rc<Worker>,
    pipeline: Rc<wgpu::ComputePipeline>,
    bind_group: wgpu::BindGroup,
    params: wgpu::Buffer,
    mixed: Rc<State<UvqUv>>,
    hypotheses: usize,
}

impl CholeskyStep {
    pub fn new(
        worker: Rc<Worker>,
        mixed: Rc<State<UvqUv>>,
        amats: Rc<MatrixState<6, 6>>,
        bvecs: Rc<MatrixState<6, 1>>,
        xvecs: Rc<MatrixState<6, 1>>,
    ) -> Result<Self, GpuError> {
        let hypotheses = amats.matrices();
        assert_eq!(bvecs.matrices(), hypotheses, "b batch size mismatch");
        assert_eq!(xvecs.matrices(), hypotheses, "x batch size mismatch");
        let pipeline = worker.compile(
            "cholesky",
            include_str!("../shaders/cholesky.wgsl"),
            "cholesky",
        )?;
        let params = uniform_buffer(&worker, "cholesky.params", 16);
        let bind_group = worker.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("cholesky"),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: amats.state().buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: bvecs.state().buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: xvecs.state().buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: params.as_entire_binding(),
                },
            ],
        });
        Ok(CholeskyStep {
            worker,
            pipeline,
            bind_group,
            params,
            mixed,
            hypotheses,
        })
    }
}

impl Step for CholeskyStep {
    fn name(&self) -> &'static str {
        "cholesky"
    }

    fn worker(&self) -> &Worker {
        &self.worker
    }

    fn execute(&self) {
        if self.mixed.count() == 0 {
            return;
        }
        let p = BatchParams {
            hypotheses: self.hypotheses as u32,
            _pad0: 0,
            _pad1: 0,
            _pad2: 0,
        };
        self.worker
            .queue
            .write_buffer(&self.params, 0, bytemuck::bytes_of(&p));
        dispatch(
            &self.worker,
            "cholesky",
            &self.pipeline,
            &self.bind_group,
            group_count(self.hypotheses),
        );
    }
}

/// Batched SE(3) exponential map.
pub struct Se3ExpStep {
    worker: Rc<Worker>,
    pipeline: Rc<wgpu::ComputePipeline>,
    bind_group: wgpu::BindGroup,
    params: wgpu::Buffer,
    mixed: Rc<State<UvqUv>>,
    hypotheses: usize,
}

impl Se3ExpStep {
    pub fn new(
        worker: Rc<Worker>,
        mixed: Rc<State<UvqUv>>,
        xvecs: Rc<MatrixState<6, 1>>,
        deltas: Rc<MatrixState<4, 4>>,
    ) -> Result<Self, GpuError> {
        let hypotheses = xvecs.matrices();
        assert_eq!(deltas.matrices(), hypotheses, "delta batch size mismatch");
        let pipeline = worker.compile(
            "se3_exp",
            include_str!("../shaders/se3_exp.wgsl"),
            "se3_exp",
        )?;
        let params = uniform_buffer(&worker, "se3_exp.params", 16);
        let bind_group = worker.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("se3_exp"),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: xvecs.state().buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: deltas.state().buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: params.as_entire_binding(),
                },
            ],
        });
        Ok(Se3ExpStep {
            worker,
            pipeline,
            bind_group,
            params,
            mixed,
            hypotheses,
        })
    }
}

impl Step for Se3ExpStep {
    fn name(&self) -> &'static str {
        "se3_exp"
    }

    fn worker(&self) -> &Worker {
        &self.worker
    }

    fn execute(&self) {
        if self.mixed.count() == 0 {
            return;
        }
        let p = BatchParams {
            hypotheses: self.hypotheses as u32,
            _pad0: 0,
            _pad1: 0,
            _pad2: 0,
        };
        self.worker
            .queue
            .write_buffer(&self.params, 0, bytemuck::bytes_of(&p));
        dispatch(
            &self.worker,
            "se3_exp",
            &self.pipeline,
            &self.bind_group,
            group_count(self.hypotheses),
        );
    }
}

/// Right-multiply every pose by its delta.
pub struct MatMulStep {
    worker: Rc<Worker>,
    pipeline: Rc<wgpu::ComputePipeline>,
    bind_group: wgpu::BindGroup,
    params: wgpu::Buffer,
    mixed: Rc<State<UvqUv>>,
    hypotheses: usize,
}

impl MatMulStep {
    pub fn new(
        worker: Rc<Worker>,
        mixed: Rc<State<UvqUv>>,
        deltas: Rc<MatrixState<4, 4>>,
        poses: Rc<MatrixState<4, 4>>,
    ) -> Result<Self, GpuError> {
        let hypotheses = poses.matrices();
        assert_eq!(deltas.matrices(), hypotheses, "delta batch size mismatch");
        let pipeline = worker.compile(
            "mat_mul",
            include_str!("../shaders/mat_mul.wgsl"),
            "mat_mul",
        )?;
        let params = uniform_buffer(&worker, "mat_mul.params", 16);
        let bind_group = worker.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("mat_mul"),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: deltas.state().buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: poses.state().buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: params.as_entire_binding(),
                },
            ],
        });
        Ok(MatMulStep {
            worker,
            pipeline,
            bind_group,
            params,
            mixed,
            hypotheses,
        })
    }
}

impl Step for MatMulStep {
    fn name(&self) -> &'static str {
        "mat_mul"
    }

    fn worker(&self) -> &Worker {
        &self.worker
    }

    fn execute(&self) {
        if self.mixed.count() == 0 {
            return;
        }
        let p = BatchParams {
            hypotheses: self.hypotheses as u32,
            _pad0: 0,
            _pad1: 0,
            _pad2: 0,
        };
        self.worker
            .queue
            .write_buffer(&self.params, 0, bytemuck::bytes_of(&p));
        dispatch(
            &self.worker,
            "mat_mul",
            &self.pipeline,
            &self.bind_group,
            group_count(self.hypotheses),
        );
    }
}

/// Score every hypothesis against the full tuple set.
pub struct Se3ScoreStep {
    worker: Rc<Worker>,
    pipeline: Rc<wgpu::ComputePipeline>,
    bind_group: wgpu::BindGroup,
    params: wgpu::Buffer,
    tuples: Rc<State<UvqUv>>,
    scores: Rc<State<f32>>,
    hypotheses: usize,
    accept_bound: f32,
}

impl Se3ScoreStep {
    pub fn new(
        worker: Rc<Worker>,
        tuples: Rc<State<UvqUv>>,
        poses: Rc<MatrixState<4, 4>>,
        scores: Rc<State<f32>>,
        accept_bound: f32,
    ) -> Result<Self, GpuError> {
        let hypotheses = poses.matrices();
        assert!(
            scores.capacity() >= hypotheses,
            "score capacity must cover the hypothesis pool"
        );
        let pipeline = worker.compile(
            "se3_score",
            include_str!("../shaders/se3_score.wgsl"),
            "se3_score",
        )?;
        let params = uniform_buffer(&worker, "se3_score.params", 16);
        let bind_group = worker.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("se3_score"),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: tuples.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: poses.state().buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: scores.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: params.as_entire_binding(),
                },
            ],
        });
        Ok(Se3ScoreStep {
            worker,
            pipeline,
            bind_group,
            params,
            tuples,
            scores,
            hypotheses,
            accept_bound,
        })
    }
}

impl Step for Se3ScoreStep {
    fn name(&self) -> &'static str {
        "se3_score"
    }

    fn worker(&self) -> &Worker {
        &self.worker
    }

    fn execute(&self) {
        self.scores.set_count(self.hypotheses);
        let p = ScoreParams {
            hypotheses: self.hypotheses as u32,
            tuple_count: self.tuples.count() as u32,
            _pad0: 0,
            accept_bound: self.accept_bound,
        };
        self.worker
            .queue
            .write_buffer(&self.params, 0, bytemuck::bytes_of(&p));
        dispatch(
            &self.worker,
            "se3_score",
            &self.pipeline,
            &self.bind_group,
            group_count(self.hypotheses),
        );
    }
}

/// Replay the selected best hypothesis over every correspondence.
pub struct Se3Run1Step {
    worker: Rc<Worker>,
    pipeline: Rc<wgpu::ComputePipeline>,
    bind_group: wgpu::BindGroup,
    params: wgpu::Buffer,
    tuples: Rc<State<UvqUv>>,
    out_uvs: Rc<State<Float2>>,
}

impl Se3Run1Step {
    pub fn new(
        worker: Rc<Worker>,
        tuples: Rc<State<UvqUv>>,
        poses: Rc<MatrixState<4, 4>>,
        best: Rc<CountState>,
        out_uvs: Rc<State<Float2>>,
    ) -> Result<Self, GpuError> {
        assert!(
            out_uvs.capacity() >= tuples.capacity(),
            "replay output capacity must cover the tuple capacity"
        );
        let pipeline = worker.compile(
            "se3_run1",
            include_str!("../shaders/se3_run1.wgsl"),
            "se3_run1",
        )?;
        let params = uniform_buffer(&worker, "se3_run1.params", 16);
        let bind_group = worker.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("se3_run1"),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: tuples.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: poses.state().buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: best.state().buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: out_uvs.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: params.as_entire_binding(),
                },
            ],
        });
        Ok(Se3Run1Step {
            worker,
            pipeline,
            bind_group,
            params,
            tuples,
            out_uvs,
        })
    }
}

impl Step for Se3Run1Step {
    fn name(&self) -> &'static str {
        "se3_run1"
    }

    fn worker(&self) -> &Worker {
        &self.worker
    }

    fn execute(&self) {
        let n = self.tuples.count();
        self.out_uvs.set_count(n);
        let p = BatchParams {
            hypotheses: n as u32,
            _pad0: 0,
            _pad1: 0,
            _pad2: 0,
        };
        self.worker
            .queue
            .write_buffer(&self.params, 0, bytemuck::bytes_of(&p));
        dispatch(
            &self.worker,
            "se3_run1",
            &self.pipeline,
            &self.bind_group,
            group_count(n),
        );
    }
}
