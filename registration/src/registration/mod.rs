//! Registration module
//!
//! Implements the registration stages:
//! - correspondence search (geometric and descriptor-gated)
//! - coarse global alignment (certifiable robust estimation, no RANSAC)
//! - multi-metric linearized ICP (point-to-point / point-to-plane /
//!   point-to-line), 6DOF and heading-only 4DOF
//! - voxel downsampling and the orchestration pipeline

pub mod coarse;
pub mod correspondence;
pub mod filtering;
pub mod icp;
pub mod pipeline;

pub use mmreg_core::{Error, Result};
