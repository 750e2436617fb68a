// gpu/hips.rs — descriptor construction and clipping stages.
//
// HipsBlendStep builds one 512-bit descriptor per corner. Its dispatch is
// grid-parallel with a fixed 64-wide workgroup, and the stage truncates
// the *effective* count down to a whole number of groups before dispatch,
// writing the truncated value as the descriptor list's count — the
// remainder corners are deliberately dropped, not padded or errored, so
// downstream stages simply see fewer valid entries.
//
// HipsClipStep zeroes descriptors whose popcount exceeds the bit budget,
// in place, keeping indices paired with the corner list.
//
// CPU references: hips::build_descriptors, hips::clip_descriptors.

use std::rc::Rc;

use crate::hips::HipsDescriptor;

use super::state::{ImageState, State};
use super::step::{aligned_count, dispatch, group_count, uniform_buffer, Step, GROUP_WIDTH};
use super::worker::{GpuError, Worker};

// ---------------------------------------------------------------------------
// HipsBlendStep
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct BlendParams {
    count: u32,
    width: u32,
    height: u32,
    blend: u32,
}

/// Build descriptors for a corner list (count truncated to /64).
pub struct HipsBlendStep {
    worker: Rc<Worker>,
    pipeline: Rc<wgpu::ComputePipeline>,
    bind_group: wgpu::BindGroup,
    params: wgpu::Buffer,
    image: Rc<ImageState>,
    corners: Rc<State<crate::fast::Point>>,
    hips: Rc<State<HipsDescriptor>>,
    blend: u32,
}

impl HipsBlendStep {
    /// # Panics
    /// Panics if `blend` is not 1, 5 or 9, or if the descriptor capacity
    /// cannot hold the corner capacity.
    pub fn new(
        worker: Rc<Worker>,
        image: Rc<ImageState>,
        corners: Rc<State<crate::fast::Point>>,
        hips: Rc<State<HipsDescriptor>>,
        blend: usize,
    ) -> Result<Self, GpuError> {
        assert!(
            matches!(blend, 1 | 5 | 9),
            "blend size must be 1, 5 or 9 (got {blend})"
        );
        assert!(
            hips.capacity() >= corners.capacity(),
            "descriptor capacity must cover the corner capacity"
        );
        let pipeline = worker.compile(
            "hips_blend",
            include_str!("../shaders/hips_blend.wgsl"),
            "hips_blend",
        )?;
        let params = uniform_buffer(&worker, "hips_blend.params", 16);
        let bind_group = worker.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("hips_blend"),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: image.state().buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: corners.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: hips.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: params.as_entire_binding(),
                },
            ],
        });
        Ok(HipsBlendStep {
            worker,
            pipeline,
            bind_group,
            params,
            image,
            corners,
            hips,
            blend: blend as u32,
        })
    }
}

impl Step for HipsBlendStep {
    fn name(&self) -> &'static str {
        "hips_blend"
    }

    fn worker(&self) -> &Worker {
        &self.worker
    }

    fn execute(&self) {
        // Truncate to a whole number of workgroups and dispatch exactly
        // that many groups; the truncated value is the output count.
        let n64 = aligned_count(self.corners.count());
        self.hips.set_count(n64);

        let p = BlendParams {
            count: n64 as u32,
            width: self.image.width(),
            height: self.image.height(),
            blend: self.blend,
        };
        self.worker
            .queue
            .write_buffer(&self.params, 0, bytemuck::bytes_of(&p));
        dispatch(
            &self.worker,
            "hips_blend",
            &self.pipeline,
            &self.bind_group,
            n64 as u32 / GROUP_WIDTH,
        );
    }
}

// ---------------------------------------------------------------------------
// HipsClipStep
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ClipParams {
    count: u32,
    max_bits: u32,
    _pad0: u32,
    _pad1: u32,
}

/// Zero descriptors over the bit budget (in place).
pub struct HipsClipStep {
    worker: Rc<Worker>,
    pipeline: Rc<wgpu::ComputePipeline>,
    bind_group: wgpu::BindGroup,
    params: wgpu::Buffer,
    hips: Rc<State<HipsDescriptor>>,
    max_bits: u32,
}

impl HipsClipStep {
    pub fn new(
        worker: Rc<Worker>,
        hips: Rc<State<HipsDescriptor>>,
        max_bits: u32,
    ) -> Result<Self, GpuError> {
        let pipeline = worker.compile(
            "hips_clip",
            include_str!("../shaders/hips_clip.wgsl"),
            "hips_clip",
        )?;
        let params = uniform_buffer(&worker, "hips_clip.params", 16);
        let bind_group = worker.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("hips_clip"),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: hips.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: params.as_entire_binding(),
                },
            ],
        });
        Ok(HipsClipStep {
            worker,
            pipeline,
            bind_group,
            params,
            hips,
            max_bits,
        })
    }
}

impl Step for HipsClipStep {
    fn name(&self) -> &'static str {
        "hips_clip"
    }

    fn worker(&self) -> &Worker {
        &self.worker
    }

    fn execute(&self) {
        let n = self.hips.count();
        let p = ClipParams {
            count: n as u32,
            max_bits: self.max_bits,
            _pad0: 0,
            _pad1: 0,
        };
        self.worker
            .queue
            .write_buffer(&self.params, 0, bytemuck::bytes_of(&p));
        dispatch(
            &self.worker,
            "hips_clip",
            &self.pipeline,
            &self.bind_group,
            group_count(n),
        );
    }
}
