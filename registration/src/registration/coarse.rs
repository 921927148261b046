//! Coarse global alignment from outlier-laden correspondences.
//!
//! Robust estimation via graduated non-convexity (GNC): rotation and
//! translation are estimated by decoupled robust sub-problems and the result
//! is certified against a bounded-noise, bounded-outlier model. No random
//! sampling is involved, so the outcome is deterministic and degrades
//! predictably as the outlier fraction grows.
//!
//! Rotation is estimated from translation-invariant measurements (pairwise
//! difference vectors of the matched points), translation from the
//! per-correspondence translation votes left after fixing the rotation.

use crate::registration::correspondence::Correspondence;
use mmreg_core::geometry::make_rigid;
use mmreg_core::{Error, PointCloud, Result, RobustLoss};
use nalgebra::{Matrix3, Matrix4, Vector3};

/// Configuration for the coarse aligner.
#[derive(Debug, Clone)]
pub struct CoarseConfig {
    /// Characteristic measurement noise, derived from point spacing.
    pub noise_bound: f32,
    /// Outer GNC annealing steps.
    pub gnc_iterations: usize,
    /// Reweighted least-squares iterations per annealing step.
    pub inner_iterations: usize,
    /// Certification floor: minimum inlier count under `noise_bound`.
    pub min_inliers: usize,
    /// Certification floor: minimum inlier fraction under `noise_bound`.
    pub min_inlier_fraction: f32,
    /// Cap on pairwise rotation measurements (keeps the pair graph linear).
    pub max_pair_measurements: usize,
    /// Robust loss driven by the GNC schedule.
    pub loss: RobustLoss,
}

impl CoarseConfig {
    pub fn new(noise_bound: f32) -> Self {
        Self {
            noise_bound,
            gnc_iterations: 10,
            inner_iterations: 20,
            min_inliers: 10,
            min_inlier_fraction: 0.2,
            max_pair_measurements: 2000,
            loss: RobustLoss::TruncatedLeastSquares { c: noise_bound },
        }
    }
}

/// A certified coarse alignment: the transform plus its implicit
/// inlier/outlier partition summary.
#[derive(Debug, Clone)]
pub struct CoarseAlignment {
    pub transformation: Matrix4<f32>,
    pub inlier_count: usize,
    /// Certified inlier fraction of the input correspondences.
    pub confidence: f32,
    pub rmse: f32,
}

/// Estimate an initial rigid transform (target <- source) from matched point
/// pairs that may be dominated by outliers.
///
/// Fails with [`Error::NoReliableEstimate`] when the certification bound is
/// not met; callers must treat that as "no estimate", never as identity.
pub fn coarse_align(
    target: &PointCloud,
    source: &PointCloud,
    correspondences: &[Correspondence],
    config: &CoarseConfig,
) -> Result<CoarseAlignment> {
    let n = correspondences.len();
    if n < 3 {
        return Err(Error::InsufficientCorrespondences {
            found: n,
            required: 3,
        });
    }
    if config.noise_bound <= 0.0 {
        return Err(Error::InvalidConfig(
            "coarse noise bound must be positive".into(),
        ));
    }

    let src: Vec<Vector3<f32>> = correspondences
        .iter()
        .map(|c| source.points[c.source_idx].coords)
        .collect();
    let tgt: Vec<Vector3<f32>> = correspondences
        .iter()
        .map(|c| target.points[c.target_idx].coords)
        .collect();

    // Translation-invariant measurements: difference vectors over a sparse
    // pair graph (consecutive plus offset pairs, capped).
    let mut tims: Vec<(Vector3<f32>, Vector3<f32>)> = Vec::new();
    let mut stride = 1;
    'outer: while stride <= n / 2 {
        for i in 0..n {
            let j = (i + stride) % n;
            tims.push((src[j] - src[i], tgt[j] - tgt[i]));
            if tims.len() >= config.max_pair_measurements {
                break 'outer;
            }
        }
        stride += 1;
    }

    let rotation = estimate_rotation_gnc(&tims, config)?;
    let votes: Vec<Vector3<f32>> = src
        .iter()
        .zip(tgt.iter())
        .map(|(p, q)| q - rotation * p)
        .collect();
    let translation = estimate_translation_gnc(&votes, config);

    // Certification: inliers under the noise bound for the final estimate.
    let residual = |p: &Vector3<f32>, q: &Vector3<f32>| (q - (rotation * p + translation)).norm();
    let inliers: Vec<usize> = (0..n)
        .filter(|&i| residual(&src[i], &tgt[i]) <= config.noise_bound)
        .collect();
    let fraction = inliers.len() as f32 / n as f32;
    if inliers.len() < config.min_inliers || fraction < config.min_inlier_fraction {
        return Err(Error::NoReliableEstimate(format!(
            "{} of {} correspondences within noise bound {}",
            inliers.len(),
            n,
            config.noise_bound
        )));
    }

    // Polish: unit-weight Kabsch refit on the certified inliers.
    let weights = vec![1.0; inliers.len()];
    let (rotation, translation) = kabsch(
        &inliers.iter().map(|&i| src[i]).collect::<Vec<_>>(),
        &inliers.iter().map(|&i| tgt[i]).collect::<Vec<_>>(),
        &weights,
    )?;

    let rmse = (inliers
        .iter()
        .map(|&i| (tgt[i] - (rotation * src[i] + translation)).norm_squared())
        .sum::<f32>()
        / inliers.len() as f32)
        .sqrt();

    Ok(CoarseAlignment {
        transformation: make_rigid(&rotation, &translation),
        inlier_count: inliers.len(),
        confidence: fraction,
        rmse,
    })
}

/// GNC loop for the rotation sub-problem over translation-invariant
/// measurements. The noise bound is doubled because each measurement is the
/// difference of two noisy points.
fn estimate_rotation_gnc(
    tims: &[(Vector3<f32>, Vector3<f32>)],
    config: &CoarseConfig,
) -> Result<Matrix3<f32>> {
    let target_param = 2.0 * config.noise_bound;
    let mut loss = config.loss;
    let mut rotation = Matrix3::<f32>::identity();

    for gnc_iter in 0..config.gnc_iterations {
        let alpha = (gnc_iter as f32 + 1.0) / config.gnc_iterations as f32;
        loss.update_param(loss.schedule(target_param, alpha));

        for _ in 0..config.inner_iterations {
            let weights: Vec<f32> = tims
                .iter()
                .map(|(a, b)| loss.weight((b - rotation * a).norm()))
                .collect();
            let new_rotation = weighted_rotation_svd(tims, &weights)?;
            let delta = (new_rotation * rotation.transpose()).trace();
            rotation = new_rotation;
            // trace(R) = 3 at identity; stop once the update stalls.
            if (delta - 3.0).abs() < 1e-7 {
                break;
            }
        }
    }
    Ok(rotation)
}

/// GNC loop for the translation votes, seeded with the component-wise median.
fn estimate_translation_gnc(votes: &[Vector3<f32>], config: &CoarseConfig) -> Vector3<f32> {
    let mut translation = component_median(votes);
    let mut loss = config.loss;

    for gnc_iter in 0..config.gnc_iterations {
        let alpha = (gnc_iter as f32 + 1.0) / config.gnc_iterations as f32;
        loss.update_param(loss.schedule(config.noise_bound, alpha));

        for _ in 0..config.inner_iterations {
            let mut sum = Vector3::zeros();
            let mut total = 0.0;
            for v in votes {
                let w = loss.weight((v - translation).norm());
                sum += v * w;
                total += w;
            }
            if total < 1e-6 {
                break;
            }
            let next = sum / total;
            let moved = (next - translation).norm();
            translation = next;
            if moved < 1e-7 {
                break;
            }
        }
    }
    translation
}

fn component_median(votes: &[Vector3<f32>]) -> Vector3<f32> {
    let mut out = Vector3::zeros();
    for k in 0..3 {
        let mut column: Vec<f32> = votes.iter().map(|v| v[k]).collect();
        column.sort_by(f32::total_cmp);
        out[k] = column[column.len() / 2];
    }
    out
}

/// Weighted SVD rotation estimate over difference-vector pairs.
fn weighted_rotation_svd(
    tims: &[(Vector3<f32>, Vector3<f32>)],
    weights: &[f32],
) -> Result<Matrix3<f32>> {
    let mut covariance = Matrix3::<f32>::zeros();
    let mut total = 0.0;
    for ((a, b), &w) in tims.iter().zip(weights.iter()) {
        covariance += b * a.transpose() * w;
        total += w;
    }
    if total < 1e-6 {
        return Err(Error::NoReliableEstimate(
            "all rotation measurements rejected by the robust loss".into(),
        ));
    }
    svd_rotation(&covariance)
}

/// Weighted Kabsch: closed-form rigid estimate from matched vectors.
fn kabsch(
    src: &[Vector3<f32>],
    tgt: &[Vector3<f32>],
    weights: &[f32],
) -> Result<(Matrix3<f32>, Vector3<f32>)> {
    let total: f32 = weights.iter().sum();
    if total < 1e-6 || src.len() < 3 {
        return Err(Error::InsufficientCorrespondences {
            found: src.len(),
            required: 3,
        });
    }

    let mut src_centroid = Vector3::zeros();
    let mut tgt_centroid = Vector3::zeros();
    for ((p, q), &w) in src.iter().zip(tgt.iter()).zip(weights.iter()) {
        src_centroid += p * w;
        tgt_centroid += q * w;
    }
    src_centroid /= total;
    tgt_centroid /= total;

    let mut covariance = Matrix3::<f32>::zeros();
    for ((p, q), &w) in src.iter().zip(tgt.iter()).zip(weights.iter()) {
        covariance += (q - tgt_centroid) * (p - src_centroid).transpose() * w;
    }

    let rotation = svd_rotation(&covariance)?;
    let translation = tgt_centroid - rotation * src_centroid;
    Ok((rotation, translation))
}

fn svd_rotation(covariance: &Matrix3<f32>) -> Result<Matrix3<f32>> {
    let svd = covariance.svd(true, true);
    let (u, v_t) = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => {
            return Err(Error::DegenerateSystem(
                "SVD of the correspondence covariance failed".into(),
            ))
        }
    };
    let mut rotation = u * v_t;
    if rotation.determinant() < 0.0 {
        let mut u_corrected = u;
        u_corrected.set_column(2, &(u.column(2) * -1.0));
        rotation = u_corrected * v_t;
    }
    Ok(rotation)
}
