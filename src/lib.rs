//! Multi-metric point cloud registration and trajectory evaluation.
//!
//! Facade crate re-exporting the workspace members:
//! - [`core`]: geometry primitives, point clouds, descriptors, robust losses
//! - [`registration`]: correspondence search, coarse global alignment,
//!   multi-metric linearized ICP (6DOF and heading-only 4DOF)
//! - [`eval`]: segment-wise trajectory drift metric

pub use mmreg_core as core;
pub use mmreg_eval as eval;
pub use mmreg_registration as registration;
