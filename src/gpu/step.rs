// gpu/step.rs — the kernel-stage contract and shared dispatch plumbing.
//
// A Step is a unit of work bound to one compiled kernel and a fixed set of
// states. The bindings are fixed at construction (one bind group, created
// once); across executions only buffer contents, uniform values, counts
// and the dispatch size vary — never which buffers are bound.
//
// `execute()` enqueues a single dispatch and is non-blocking. `measure()`
// runs `execute()` N times, drains the queue and returns the elapsed wall
// time; the same code path serves correctness runs and profiling — there
// is no separate production path.
//
// SIDE-EFFECT CONTRACT
// ─────────────────────
// A step may only mutate the counts of its declared *output* states; input
// counts and contents are read-only. Count pairings a step relies on
// (e.g. descriptor list aligned with its corner list) are asserted at
// `execute()` entry.
//
// COUNT RESOLUTION
// ─────────────────
// Steps whose output size is known host-side (from input counts) write the
// output count inside `execute()`. Compaction steps count on the device
// through an atomic cell; their output count becomes valid only after a
// drain, via their `resolve_count()` — which clamps to capacity, because
// the kernel stops storing (but keeps counting) once the buffer is full.

use std::time::{Duration, Instant};

use super::worker::Worker;

/// Workgroup width of every 1D kernel dispatch in the pipeline.
pub const GROUP_WIDTH: u32 = 64;

/// A kernel-bound processing stage.
pub trait Step {
    /// Stage name for timing tables and logs.
    fn name(&self) -> &'static str;

    /// The worker whose queue this step dispatches on.
    fn worker(&self) -> &Worker;

    /// Enqueue one dispatch (non-blocking).
    fn execute(&self);

    /// Execute `reps` times (at least once), drain the queue, and return
    /// the elapsed wall time.
    fn measure(&self, reps: usize) -> Duration {
        let reps = reps.max(1);
        let start = Instant::now();
        for _ in 0..reps {
            self.execute();
        }
        self.worker().finish();
        start.elapsed()
    }
}

/// Truncate a count down to a whole number of workgroups. The grid-aligned
/// descriptor stage deliberately drops the remainder rather than padding
/// or erroring; downstream stages see the truncated count.
#[inline]
pub fn aligned_count(n: usize) -> usize {
    (n / GROUP_WIDTH as usize) * GROUP_WIDTH as usize
}

/// Number of workgroups covering `n` elements (ceiling division).
#[inline]
pub fn group_count(n: usize) -> u32 {
    (n as u32 + GROUP_WIDTH - 1) / GROUP_WIDTH
}

/// Create a uniform buffer for a step's parameter block, updated via
/// `queue.write_buffer` on every execution.
pub fn uniform_buffer(worker: &Worker, label: &str, size: usize) -> wgpu::Buffer {
    worker.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: size as u64,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// Encode and submit a single 1D compute dispatch.
pub fn dispatch(
    worker: &Worker,
    label: &'static str,
    pipeline: &wgpu::ComputePipeline,
    bind_group: &wgpu::BindGroup,
    groups: u32,
) {
    if groups == 0 {
        return;
    }
    let mut encoder = worker
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(label),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.dispatch_workgroups(groups, 1, 1);
    }
    worker.submit(encoder);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_count_truncates_to_group() {
        // For all n: output = (n / 64) * 64 and output <= n.
        for n in [0usize, 1, 63, 64, 65, 100, 127, 128, 1000, 2048] {
            let a = aligned_count(n);
            assert_eq!(a, (n / 64) * 64);
            assert!(a <= n);
            assert_eq!(a % 64, 0);
        }
    }

    #[test]
    fn test_group_count_covers() {
        assert_eq!(group_count(0), 0);
        assert_eq!(group_count(1), 1);
        assert_eq!(group_count(64), 1);
        assert_eq!(group_count(65), 2);
        // Every element is covered: groups * 64 >= n.
        for n in [1usize, 63, 64, 65, 8192] {
            assert!(group_count(n) as usize * 64 >= n);
        }
    }
}

/// Resolve a compaction stage's output count from its device counter.
/// Blocks (the counter read is itself a drain), clamps to capacity, and
/// logs when the kernel counted more elements than the buffer could hold.
pub fn resolve_compacted<T: bytemuck::Pod>(
    worker: &Worker,
    stage: &'static str,
    counter: &super::state::CountState,
    output: &super::state::State<T>,
) {
    let n = counter.read_value(worker) as usize;
    if n > output.capacity() {
        log::warn!(
            "{stage}: produced {n} elements, clamped to capacity {}",
            output.capacity()
        );
    }
    output.set_count(n.min(output.capacity()));
}
