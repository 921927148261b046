//! Two-stage registration pipeline.
//!
//! Orchestrates downsampling, initialization and ICP refinement. The
//! initialization stage is explicit: a caller-supplied prior, the certified
//! coarse aligner, or the global 4DOF heading sweep. When every path is
//! disabled or fails, registration fails; the pipeline never silently falls
//! through to the identity transform.

use crate::registration::coarse::{coarse_align, CoarseAlignment, CoarseConfig};
use crate::registration::correspondence::match_descriptors;
use crate::registration::filtering::voxel_down_sample;
use crate::registration::icp::{
    register_icp, register_icp_4dof_global, IcpConfig, IcpResult,
};
use mmreg_core::descriptor::DescriptorSet;
use mmreg_core::{Error, PointCloud, Result};
use nalgebra::{Matrix4, Point3};

/// Pipeline configuration. Stage toggles are explicit booleans; the stage
/// configs nest unchanged.
#[derive(Debug, Clone)]
pub struct RegistrationConfig {
    /// Voxel size for target downsampling (non-positive disables).
    pub target_down_res: f32,
    /// Voxel size for source downsampling (non-positive disables).
    pub source_down_res: f32,
    /// Run the certified coarse aligner when descriptors are available.
    pub use_coarse: bool,
    /// Fall back to the exhaustive heading sweep when no prior and no
    /// usable coarse estimate exist.
    pub global_4dof: bool,
    pub heading_step_deg: f32,
    /// Cap on descriptor correspondences fed to the coarse aligner.
    pub correspondence_budget: usize,
    /// Best/second-best Hamming ratio for descriptor matching.
    pub descriptor_ratio: f32,
    pub coarse: CoarseConfig,
    pub icp: IcpConfig,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            target_down_res: 0.08,
            source_down_res: 0.08,
            use_coarse: true,
            global_4dof: false,
            heading_step_deg: 15.0,
            correspondence_budget: 1000,
            descriptor_ratio: 0.9,
            coarse: CoarseConfig::new(0.16),
            icp: IcpConfig::default(),
        }
    }
}

impl RegistrationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.correspondence_budget == 0 {
            return Err(Error::InvalidConfig(
                "correspondence_budget must be >= 1".into(),
            ));
        }
        if !(0.0 < self.descriptor_ratio && self.descriptor_ratio <= 1.0) {
            return Err(Error::InvalidConfig(
                "descriptor_ratio must be in (0, 1]".into(),
            ));
        }
        if self.heading_step_deg <= 0.0 || self.heading_step_deg > 360.0 {
            return Err(Error::InvalidConfig(
                "heading_step_deg must be in (0, 360]".into(),
            ));
        }
        self.icp.validate()
    }
}

/// Full pipeline outcome: the final transform plus per-stage reports.
#[derive(Debug, Clone)]
pub struct RegistrationReport {
    /// Final rigid transform mapping source into the target frame.
    pub transformation: Matrix4<f32>,
    /// Coarse stage outcome, when that stage ran.
    pub coarse: Option<CoarseAlignment>,
    pub icp: IcpResult,
}

impl RegistrationReport {
    /// Apply the final transform to a point.
    pub fn apply(&self, point: &Point3<f32>) -> Point3<f32> {
        self.transformation.transform_point(point)
    }
}

/// Register `source` onto `target`.
///
/// Initialization resolves in priority order:
/// 1. `prior`, when given;
/// 2. descriptor matching plus the coarse aligner, when `use_coarse` is set
///    and both descriptor sets are given;
/// 3. the global 4DOF heading sweep, when `global_4dof` is set.
///
/// With no viable path the call fails with [`Error::InvalidInput`]. Descriptor
/// indices refer to the full-resolution clouds; ICP refinement runs on the
/// downsampled clouds.
pub fn register_pair(
    target: &PointCloud,
    source: &PointCloud,
    prior: Option<&Matrix4<f32>>,
    descriptors: Option<(&DescriptorSet, &DescriptorSet)>,
    config: &RegistrationConfig,
) -> Result<RegistrationReport> {
    config.validate()?;
    if target.is_empty() || source.is_empty() {
        return Err(Error::InvalidInput("empty input cloud".into()));
    }

    let target_down = voxel_down_sample(target, config.target_down_res)?;
    let source_down = voxel_down_sample(source, config.source_down_res)?;
    log::debug!(
        "downsampled target {} -> {}, source {} -> {}",
        target.len(),
        target_down.len(),
        source.len(),
        source_down.len()
    );

    if let Some(init) = prior {
        log::info!("registering with caller-supplied prior");
        let icp = register_icp(&target_down, &source_down, init, &config.icp)?;
        if !icp.converged {
            log::warn!(
                "ICP did not converge within {} iterations (cost {:.6})",
                icp.iterations,
                icp.final_cost
            );
        }
        return Ok(RegistrationReport {
            transformation: icp.transformation,
            coarse: None,
            icp,
        });
    }

    if config.use_coarse {
        if let Some((target_desc, source_desc)) = descriptors {
            let matches = match_descriptors(
                target_desc,
                source_desc,
                config.correspondence_budget,
                config.descriptor_ratio,
            );
            log::debug!("descriptor matching kept {} correspondences", matches.len());
            match coarse_align(target, source, &matches, &config.coarse) {
                Ok(coarse) => {
                    log::info!(
                        "coarse alignment certified: {} inliers ({:.0}%), rmse {:.4}",
                        coarse.inlier_count,
                        coarse.confidence * 100.0,
                        coarse.rmse
                    );
                    let icp = register_icp(
                        &target_down,
                        &source_down,
                        &coarse.transformation,
                        &config.icp,
                    )?;
                    return Ok(RegistrationReport {
                        transformation: icp.transformation,
                        coarse: Some(coarse),
                        icp,
                    });
                }
                Err(e @ Error::NoReliableEstimate(_))
                | Err(e @ Error::InsufficientCorrespondences { .. }) => {
                    if !config.global_4dof {
                        return Err(e);
                    }
                    log::warn!("coarse alignment failed ({e}), trying heading sweep");
                }
                Err(e) => return Err(e),
            }
        } else if !config.global_4dof {
            return Err(Error::InvalidInput(
                "coarse stage enabled but no descriptors given and no prior \
                 or heading sweep available"
                    .into(),
            ));
        }
    }

    if config.global_4dof {
        log::info!(
            "running global 4DOF heading sweep ({} deg step)",
            config.heading_step_deg
        );
        let icp = register_icp_4dof_global(
            &target_down,
            &source_down,
            &config.icp,
            config.heading_step_deg,
        )?;
        if !icp.converged {
            return Err(Error::NoReliableEstimate(
                "heading sweep produced no converged candidate".into(),
            ));
        }
        return Ok(RegistrationReport {
            transformation: icp.transformation,
            coarse: None,
            icp,
        });
    }

    Err(Error::InvalidInput(
        "no initialization path: supply a prior, descriptors with use_coarse, \
         or enable global_4dof"
            .into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mmreg_core::descriptor::BinaryDescriptor;
    use mmreg_core::geometry::{inverse_rigid, make_rigid, translation_part};
    use nalgebra::{Matrix3, Vector3};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn scene(seed: u64, n: usize) -> PointCloud {
        let mut rng = StdRng::seed_from_u64(seed);
        PointCloud::new(
            (0..n)
                .map(|_| {
                    Point3::new(
                        rng.gen_range(-2.0..2.0),
                        rng.gen_range(-2.0..2.0),
                        rng.gen_range(-0.5..0.5),
                    )
                })
                .collect(),
        )
    }

    fn no_downsample() -> RegistrationConfig {
        RegistrationConfig {
            target_down_res: 0.0,
            source_down_res: 0.0,
            ..RegistrationConfig::default()
        }
    }

    #[test]
    fn test_prior_path_refines_to_truth() {
        let source = scene(1, 400);
        let yaw = 1f32.to_radians();
        let rotation = Matrix3::new(
            yaw.cos(),
            -yaw.sin(),
            0.0,
            yaw.sin(),
            yaw.cos(),
            0.0,
            0.0,
            0.0,
            1.0,
        );
        let truth = make_rigid(&rotation, &Vector3::new(0.03, -0.02, 0.01));
        let target = source.transformed(&truth);

        let report = register_pair(
            &target,
            &source,
            Some(&Matrix4::identity()),
            None,
            &no_downsample(),
        )
        .unwrap();
        assert!(report.coarse.is_none());
        let error = report.transformation * inverse_rigid(&truth);
        assert!(translation_part(&error).norm() < 0.01);
    }

    #[test]
    fn test_no_initialization_path_is_an_error() {
        let cloud = scene(2, 50);
        let config = RegistrationConfig {
            use_coarse: false,
            global_4dof: false,
            ..no_downsample()
        };
        let result = register_pair(&cloud, &cloud, None, None, &config);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_coarse_enabled_without_descriptors_is_an_error() {
        let cloud = scene(3, 50);
        let config = RegistrationConfig {
            global_4dof: false,
            ..no_downsample()
        };
        let result = register_pair(&cloud, &cloud, None, None, &config);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_descriptor_coarse_then_icp() {
        // Distinct descriptors per point give a perfect correspondence set,
        // so the coarse stage alone should land close to the truth.
        let source = scene(4, 120);
        let yaw = 20f32.to_radians();
        let rotation = Matrix3::new(
            yaw.cos(),
            -yaw.sin(),
            0.0,
            yaw.sin(),
            yaw.cos(),
            0.0,
            0.0,
            0.0,
            1.0,
        );
        let truth = make_rigid(&rotation, &Vector3::new(0.5, -0.3, 0.1));
        let target = source.transformed(&truth);

        let mut target_desc = DescriptorSet::new();
        let mut source_desc = DescriptorSet::new();
        for i in 0..source.len() {
            // 4 bytes encoding the index; pairwise Hamming distance >= 1.
            let bytes = (i as u32).to_le_bytes().to_vec();
            target_desc.push(i, BinaryDescriptor::new(bytes.clone()));
            source_desc.push(i, BinaryDescriptor::new(bytes));
        }

        let config = RegistrationConfig {
            coarse: CoarseConfig::new(0.05),
            ..no_downsample()
        };
        let report = register_pair(
            &target,
            &source,
            None,
            Some((&target_desc, &source_desc)),
            &config,
        )
        .unwrap();

        let coarse = report.coarse.as_ref().unwrap();
        assert!(coarse.inlier_count >= 100);
        let error = report.transformation * inverse_rigid(&truth);
        assert!(translation_part(&error).norm() < 0.05);
    }

    #[test]
    fn test_invalid_ratio_rejected_before_running() {
        let cloud = scene(5, 10);
        let config = RegistrationConfig {
            descriptor_ratio: 0.0,
            ..RegistrationConfig::default()
        };
        let result = register_pair(&cloud, &cloud, Some(&Matrix4::identity()), None, &config);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
