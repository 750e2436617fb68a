// gpu/mod.rs — the accelerator pipeline.
//
// Layering, leaf to root:
//
//   worker   — device + in-order queue + kernel cache; blocking drain.
//   state    — typed device buffers with a logical count vs. fixed capacity.
//   step     — a compiled kernel bound to a fixed set of states;
//              execute() dispatches, measure() dispatches + drains + times.
//   detect / hips / matcher / pose — the kernel-bound stages.
//   pipeline — allocates every state for a frame pair, wires the stages in
//              their fixed dependency order and drives them to completion.
//
// Every stage mirrors a CPU reference implementation in the parent crate;
// the CPU versions are authoritative and the GPU integration tests compare
// against them.
//
// Concurrency model: one host thread, one in-order queue. Dispatches are
// asynchronous and FIFO on the device; the only blocking point is
// Worker::finish(), invoked where the host must observe a buffer count.

pub mod detect;
pub mod hips;
pub mod matcher;
pub mod pipeline;
pub mod pose;
pub mod state;
pub mod step;
pub mod worker;
