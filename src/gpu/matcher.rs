// gpu/matcher.rs — descriptor-tree search stage.
//
// One thread per query descriptor walks the pre-built tree (uploaded by
// the driver from the host-side build in crate::tree) and appends at most
// one (reference index, query index) pair through the atomic match
// counter. CPU reference: tree::find_matches.

use std::rc::Rc;

use crate::fast::Point;
use crate::hips::{HipsDescriptor, ROTATIONS};

use super::state::{CountState, HipsTreeState, State};
use super::step::{dispatch, group_count, resolve_compacted, uniform_buffer, Step};
use super::worker::{GpuError, Worker};

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct FindParams {
    query_count: u32,
    pre_roots: u32,
    levels: u32,
    leaves: u32,
    max_error: u32,
    rotations: u32,
    _pad0: u32,
    _pad1: u32,
}

/// Approximate nearest-descriptor search against a reference tree.
pub struct TreeFindStep {
    worker: Rc<Worker>,
    pipeline: Rc<wgpu::ComputePipeline>,
    bind_group: wgpu::BindGroup,
    params: wgpu::Buffer,
    tree: Rc<HipsTreeState>,
    queries: Rc<State<HipsDescriptor>>,
    matches: Rc<State<Point>>,
    counter: CountState,
    max_error: u32,
    rotations: u32,
}

impl TreeFindStep {
    pub fn new(
        worker: Rc<Worker>,
        tree: Rc<HipsTreeState>,
        queries: Rc<State<HipsDescriptor>>,
        matches: Rc<State<Point>>,
        max_error: u32,
        rotate: bool,
    ) -> Result<Self, GpuError> {
        let pipeline = worker.compile(
            "tree_find",
            include_str!("../shaders/tree_find.wgsl"),
            "tree_find",
        )?;
        let counter = CountState::new(&worker, "tree_find.counter");
        let params = uniform_buffer(&worker, "tree_find.params", 32);
        let bind_group = worker.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("tree_find"),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: tree.cells().buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: tree.leaf_index().buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: queries.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: matches.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: counter.state().buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: params.as_entire_binding(),
                },
            ],
        });
        Ok(TreeFindStep {
            worker,
            pipeline,
            bind_group,
            params,
            tree,
            queries,
            matches,
            counter,
            max_error,
            rotations: if rotate { ROTATIONS } else { 1 },
        })
    }

    pub fn resolve_count(&self) {
        resolve_compacted(&self.worker, "tree_find", &self.counter, &self.matches);
    }
}

impl Step for TreeFindStep {
    fn name(&self) -> &'static str {
        "tree_find"
    }

    fn worker(&self) -> &Worker {
        &self.worker
    }

    fn execute(&self) {
        let n = self.queries.count();
        self.counter.write_value(&self.worker, 0);
        let p = FindParams {
            query_count: n as u32,
            pre_roots: (self.tree.leaves() >> self.tree.levels()) as u32,
            levels: self.tree.levels() as u32,
            leaves: self.tree.leaves() as u32,
            max_error: self.max_error,
            rotations: self.rotations,
            _pad0: 0,
            _pad1: 0,
        };
        self.worker
            .queue
            .write_buffer(&self.params, 0, bytemuck::bytes_of(&p));
        dispatch(
            &self.worker,
            "tree_find",
            &self.pipeline,
            &self.bind_group,
            group_count(n),
        );
    }
}
