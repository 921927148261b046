//! Core types shared by the registration and evaluation crates:
//! rigid-transform geometry, point clouds with surface attributes,
//! binary descriptors, robust loss functions, and the common error type.

pub mod descriptor;
pub mod geometry;
pub mod point_cloud;
pub mod robust_loss;

pub use descriptor::{BinaryDescriptor, DescriptorSet};
pub use point_cloud::{PointCloud, SurfaceLabel};
pub use robust_loss::RobustLoss;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid parameter combination, rejected before any iteration runs.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Malformed or incompatible input data.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Too few correspondences survived gating for a rigid estimate.
    #[error("insufficient correspondences: found {found}, required {required}")]
    InsufficientCorrespondences { found: usize, required: usize },

    /// The linearized system left one or more parameters unconstrained.
    #[error("degenerate linear system: {0}")]
    DegenerateSystem(String),

    /// The coarse aligner could not certify a global estimate. Callers must
    /// not substitute the identity transform for this outcome.
    #[error("no reliable global estimate: {0}")]
    NoReliableEstimate(String),
}

pub type Result<T> = std::result::Result<T, Error>;
