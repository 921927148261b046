//! Trajectory drift evaluation.
//!
//! Compares an estimated pose sequence against a reference sequence with
//! segment-wise relative errors: for segments of fixed path lengths, the
//! relative motion of both sequences is compared and the residual rotation
//! and translation are normalized by segment length.

pub mod odometry_error;

pub use odometry_error::{
    compute_segment_errors, poses_from_f32, summarize, trajectory_distances, BucketStats,
    ErrorSummary, EvaluatorConfig, SegmentError,
};

pub use mmreg_core::{Error, Result};
