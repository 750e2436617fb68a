// gpu/detect.rs — corner detection stages.
//
// Three compaction stages feed the descriptor builder:
//
//   PreFastStep   image → candidate list      (4-point cull, per pixel)
//   ClipDepthStep candidates → depth-valid    (q-plane lookup)
//   FastStep      candidates → corner list    (full 16-point ring test)
//
// All three append through a device atomic and resolve their output count
// after a drain. CPU references: fast::prefast_candidates,
// fast::clip_by_depth, fast::FastDetector.

use std::rc::Rc;

use crate::fast::Point;

use super::state::{CountState, ImageState, PlaneState, State};
use super::step::{dispatch, group_count, resolve_compacted, uniform_buffer, Step};
use super::worker::{GpuError, Worker};

// ---------------------------------------------------------------------------
// PreFastStep
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct PreFastParams {
    width: u32,
    height: u32,
    threshold: u32,
    _pad: u32,
}

/// Per-pixel candidate cull.
pub struct PreFastStep {
    worker: Rc<Worker>,
    pipeline: Rc<wgpu::ComputePipeline>,
    bind_group: wgpu::BindGroup,
    params: wgpu::Buffer,
    image: Rc<ImageState>,
    candidates: Rc<State<Point>>,
    counter: CountState,
    threshold: u32,
}

impl PreFastStep {
    pub fn new(
        worker: Rc<Worker>,
        image: Rc<ImageState>,
        candidates: Rc<State<Point>>,
        threshold: u8,
    ) -> Result<Self, GpuError> {
        let pipeline = worker.compile(
            "pre_fast",
            include_str!("../shaders/prefast.wgsl"),
            "pre_fast",
        )?;
        let counter = CountState::new(&worker, "pre_fast.counter");
        let params = uniform_buffer(&worker, "pre_fast.params", 16);
        let bind_group = worker.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("pre_fast"),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: image.state().buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: candidates.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: counter.state().buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: params.as_entire_binding(),
                },
            ],
        });
        Ok(PreFastStep {
            worker,
            pipeline,
            bind_group,
            params,
            image,
            candidates,
            counter,
            threshold: threshold as u32,
        })
    }

    /// Read the device counter into the candidate list's count.
    /// Valid only after a drain of the execute dispatch.
    pub fn resolve_count(&self) {
        resolve_compacted(&self.worker, "pre_fast", &self.counter, &self.candidates);
    }
}

impl Step for PreFastStep {
    fn name(&self) -> &'static str {
        "pre_fast"
    }

    fn worker(&self) -> &Worker {
        &self.worker
    }

    fn execute(&self) {
        let n = (self.image.width() * self.image.height()) as usize;
        self.counter.write_value(&self.worker, 0);
        let p = PreFastParams {
            width: self.image.width(),
            height: self.image.height(),
            threshold: self.threshold,
            _pad: 0,
        };
        self.worker
            .queue
            .write_buffer(&self.params, 0, bytemuck::bytes_of(&p));
        dispatch(
            &self.worker,
            "pre_fast",
            &self.pipeline,
            &self.bind_group,
            group_count(n),
        );
    }
}

// ---------------------------------------------------------------------------
// ClipDepthStep
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ClipDepthParams {
    count: u32,
    width: u32,
    _pad0: u32,
    _pad1: u32,
}

/// Drop candidates without a positive inverse depth.
pub struct ClipDepthStep {
    worker: Rc<Worker>,
    pipeline: Rc<wgpu::ComputePipeline>,
    bind_group: wgpu::BindGroup,
    params: wgpu::Buffer,
    qmap: Rc<PlaneState>,
    input: Rc<State<Point>>,
    output: Rc<State<Point>>,
    counter: CountState,
}

impl ClipDepthStep {
    pub fn new(
        worker: Rc<Worker>,
        qmap: Rc<PlaneState>,
        input: Rc<State<Point>>,
        output: Rc<State<Point>>,
    ) -> Result<Self, GpuError> {
        let pipeline = worker.compile(
            "clip_depth",
            include_str!("../shaders/clip_depth.wgsl"),
            "clip_depth",
        )?;
        let counter = CountState::new(&worker, "clip_depth.counter");
        let params = uniform_buffer(&worker, "clip_depth.params", 16);
        let bind_group = worker.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("clip_depth"),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: qmap.state().buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: input.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: output.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: counter.state().buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: params.as_entire_binding(),
                },
            ],
        });
        Ok(ClipDepthStep {
            worker,
            pipeline,
            bind_group,
            params,
            qmap,
            input,
            output,
            counter,
        })
    }

    pub fn resolve_count(&self) {
        resolve_compacted(&self.worker, "clip_depth", &self.counter, &self.output);
    }
}

impl Step for ClipDepthStep {
    fn name(&self) -> &'static str {
        "clip_depth"
    }

    fn worker(&self) -> &Worker {
        &self.worker
    }

    fn execute(&self) {
        let n = self.input.count();
        self.counter.write_value(&self.worker, 0);
        let p = ClipDepthParams {
            count: n as u32,
            width: self.qmap.width(),
            _pad0: 0,
            _pad1: 0,
        };
        self.worker
            .queue
            .write_buffer(&self.params, 0, bytemuck::bytes_of(&p));
        dispatch(
            &self.worker,
            "clip_depth",
            &self.pipeline,
            &self.bind_group,
            group_count(n),
        );
    }
}

// ---------------------------------------------------------------------------
// FastStep
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct FastParams {
    count: u32,
    width: u32,
    height: u32,
    threshold: u32,
    ring: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

/// Full FAST ring test producing the bounded corner list.
pub struct FastStep {
    worker: Rc<Worker>,
    pipeline: Rc<wgpu::ComputePipeline>,
    bind_group: wgpu::BindGroup,
    params: wgpu::Buffer,
    image: Rc<ImageState>,
    input: Rc<State<Point>>,
    output: Rc<State<Point>>,
    counter: CountState,
    threshold: u32,
    ring: u32,
}

impl FastStep {
    /// # Panics
    /// Panics if `ring` is not in [9, 16] (same contract as the CPU
    /// reference detector).
    pub fn new(
        worker: Rc<Worker>,
        image: Rc<ImageState>,
        input: Rc<State<Point>>,
        output: Rc<State<Point>>,
        threshold: u8,
        ring: usize,
    ) -> Result<Self, GpuError> {
        assert!((9..=16).contains(&ring), "ring must be 9..=16 (got {ring})");
        let pipeline = worker.compile(
            "fast_ring",
            include_str!("../shaders/fast.wgsl"),
            "fast_ring",
        )?;
        let counter = CountState::new(&worker, "fast.counter");
        let params = uniform_buffer(&worker, "fast.params", 32);
        let bind_group = worker.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("fast_ring"),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: image.state().buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: input.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: output.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: counter.state().buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: params.as_entire_binding(),
                },
            ],
        });
        Ok(FastStep {
            worker,
            pipeline,
            bind_group,
            params,
            image,
            input,
            output,
            counter,
            threshold: threshold as u32,
            ring: ring as u32,
        })
    }

    pub fn resolve_count(&self) {
        resolve_compacted(&self.worker, "fast_ring", &self.counter, &self.output);
    }
}

impl Step for FastStep {
    fn name(&self) -> &'static str {
        "fast_ring"
    }

    fn worker(&self) -> &Worker {
        &self.worker
    }

    fn execute(&self) {
        let n = self.input.count();
        self.counter.write_value(&self.worker, 0);
        let p = FastParams {
            count: n as u32,
            width: self.image.width(),
            height: self.image.height(),
            threshold: self.threshold,
            ring: self.ring,
            _pad0: 0,
            _pad1: 0,
            _pad2: 0,
        };
        self.worker
            .queue
            .write_buffer(&self.params, 0, bytemuck::bytes_of(&p));
        dispatch(
            &self.worker,
            "fast_ring",
            &self.pipeline,
            &self.bind_group,
            group_count(n),
        );
    }
}
