//! Point cloud registration.
//!
//! This crate provides the registration engine:
//! - correspondence search (geometric nearest-neighbor and descriptor-gated)
//! - coarse global alignment via graduated non-convexity (GNC)
//! - multi-metric linearized ICP with 6DOF and heading-only 4DOF modes
//! - a two-stage coarse-to-fine registration pipeline

pub mod registration;

pub use registration::coarse::{coarse_align, CoarseAlignment, CoarseConfig};
pub use registration::correspondence::{
    find_correspondences, match_descriptors, Correspondence, TargetIndex,
};
pub use registration::filtering::voxel_down_sample;
pub use registration::icp::{
    register_icp, register_icp_4dof, register_icp_4dof_global, CategoryFilter, IcpConfig,
    IcpResult, MetricChannels,
};
pub use registration::pipeline::{register_pair, RegistrationConfig, RegistrationReport};
