// relpose — relative 6-DoF pose estimation between RGB-D frame pairs.
//
// The heavy compute (corner detection, binary descriptors, tree matching,
// batched Gauss-Newton pose refinement, hypothesis scoring) runs on the GPU
// as a fixed, dependency-ordered sequence of compute dispatches — see the
// `gpu` module. The sibling CPU modules are the authoritative reference
// implementations: every GPU kernel is validated against them.
//
// Reference: Nikulin — "cvd-cl", GPU feature tracking and pose recovery
// for RGB-D (Kinect-class) sensors.

pub mod camera;
pub mod fast;
pub mod hips;
pub mod image;
pub mod pose;
pub mod rgbd;
pub mod rng;
pub mod tree;

pub mod gpu;
