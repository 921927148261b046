//! Segment-wise relative pose error.
//!
//! For every evaluation start frame and every configured segment length, the
//! segment end frame is the first frame strictly farther than that along the
//! reference path. The error transform is `est_rel^-1 * ref_rel` where `*_rel` is the
//! relative motion across the segment; its rotation angle and translation
//! norm, divided by the segment length, give drift per unit traveled.
//!
//! Evaluation runs in `f64` regardless of the registration pipeline's
//! precision; [`poses_from_f32`] widens estimated trajectories.

use mmreg_core::{Error, Result};
use nalgebra::Matrix4;
use rayon::prelude::*;
use std::fmt;

/// Drift of one trajectory segment.
#[derive(Debug, Clone, Copy)]
pub struct SegmentError {
    /// Start frame of the segment.
    pub first_frame: usize,
    /// Rotation drift, radians per unit length.
    pub rotation_error: f64,
    /// Translation drift, fraction of segment length.
    pub translation_error: f64,
    /// Reference path length of the segment.
    pub length: f64,
    /// Index into [`EvaluatorConfig::segment_lengths`].
    pub length_bucket: usize,
    /// Mean speed over the segment, path length per second.
    pub speed: f64,
}

#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// Segment lengths to evaluate, in trajectory units.
    pub segment_lengths: Vec<f64>,
    /// Evaluate every `frame_stride`-th frame as a segment start.
    pub frame_stride: usize,
    /// Seconds between consecutive frames, used for the speed estimate.
    pub frame_interval: f64,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            segment_lengths: (1..=8).map(|i| i as f64 * 100.0).collect(),
            frame_stride: 10,
            frame_interval: 0.1,
        }
    }
}

impl EvaluatorConfig {
    fn validate(&self) -> Result<()> {
        if self.segment_lengths.is_empty() {
            return Err(Error::InvalidConfig("segment_lengths is empty".into()));
        }
        if self.segment_lengths.iter().any(|&l| l <= 0.0) {
            return Err(Error::InvalidConfig(
                "segment lengths must be positive".into(),
            ));
        }
        if self.frame_stride == 0 {
            return Err(Error::InvalidConfig("frame_stride must be >= 1".into()));
        }
        if self.frame_interval <= 0.0 {
            return Err(Error::InvalidConfig(
                "frame_interval must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Cumulative path length at each frame of a pose sequence.
pub fn trajectory_distances(poses: &[Matrix4<f64>]) -> Vec<f64> {
    let mut distances = Vec::with_capacity(poses.len());
    let mut total = 0.0;
    distances.push(0.0);
    for window in poses.windows(2) {
        let a = window[0].fixed_view::<3, 1>(0, 3);
        let b = window[1].fixed_view::<3, 1>(0, 3);
        total += (b - a).norm();
        distances.push(total);
    }
    distances
}

/// Widen an `f32` pose sequence for evaluation.
pub fn poses_from_f32(poses: &[nalgebra::Matrix4<f32>]) -> Vec<Matrix4<f64>> {
    poses.iter().map(|p| p.cast::<f64>()).collect()
}

fn inverse_rigid(t: &Matrix4<f64>) -> Matrix4<f64> {
    let rotation = t.fixed_view::<3, 3>(0, 0).transpose();
    let translation = -rotation * t.fixed_view::<3, 1>(0, 3);
    let mut inv = Matrix4::identity();
    inv.fixed_view_mut::<3, 3>(0, 0).copy_from(&rotation);
    inv.fixed_view_mut::<3, 1>(0, 3).copy_from(&translation);
    inv
}

fn rotation_error(pose_error: &Matrix4<f64>) -> f64 {
    let trace = pose_error[(0, 0)] + pose_error[(1, 1)] + pose_error[(2, 2)];
    (0.5 * (trace - 1.0)).clamp(-1.0, 1.0).acos()
}

fn translation_error(pose_error: &Matrix4<f64>) -> f64 {
    pose_error.fixed_view::<3, 1>(0, 3).norm()
}

/// First frame more than `length` farther along the path than `first_frame`,
/// or `None` when the trajectory ends before that.
fn segment_end_frame(distances: &[f64], first_frame: usize, length: f64) -> Option<usize> {
    let start = distances[first_frame];
    distances[first_frame..]
        .iter()
        .position(|&d| d > start + length)
        .map(|offset| first_frame + offset)
}

/// Compute segment-wise drift of `estimated` against `reference`.
///
/// Both sequences hold absolute poses in a common frame, index-aligned; a
/// length mismatch is an error. An empty result is valid and means the
/// trajectory is shorter than every configured segment length.
pub fn compute_segment_errors(
    reference: &[Matrix4<f64>],
    estimated: &[Matrix4<f64>],
    config: &EvaluatorConfig,
) -> Result<Vec<SegmentError>> {
    config.validate()?;
    if reference.len() != estimated.len() {
        return Err(Error::InvalidInput(format!(
            "reference has {} poses, estimate has {}",
            reference.len(),
            estimated.len()
        )));
    }
    if reference.len() < 2 {
        return Err(Error::InvalidInput(
            "at least two poses are required".into(),
        ));
    }

    let distances = trajectory_distances(reference);

    let errors: Vec<SegmentError> = (0..reference.len())
        .step_by(config.frame_stride)
        .collect::<Vec<_>>()
        .par_iter()
        .flat_map_iter(|&first_frame| {
            let distances = &distances;
            config
                .segment_lengths
                .iter()
                .enumerate()
                .filter_map(move |(bucket, &length)| {
                    let last_frame = segment_end_frame(distances, first_frame, length)?;

                    let ref_rel =
                        inverse_rigid(&reference[first_frame]) * reference[last_frame];
                    let est_rel =
                        inverse_rigid(&estimated[first_frame]) * estimated[last_frame];
                    let pose_error = inverse_rigid(&est_rel) * ref_rel;

                    // Inclusive frame count over the segment.
                    let frames = (last_frame - first_frame + 1) as f64;
                    let speed = length / (config.frame_interval * frames);

                    Some(SegmentError {
                        first_frame,
                        rotation_error: rotation_error(&pose_error) / length,
                        translation_error: translation_error(&pose_error) / length,
                        length,
                        length_bucket: bucket,
                        speed,
                    })
                })
        })
        .collect();

    log::debug!(
        "evaluated {} segments over {} frames",
        errors.len(),
        reference.len()
    );
    Ok(errors)
}

/// Mean drift of the segments that fell into one length bucket.
#[derive(Debug, Clone, Copy)]
pub struct BucketStats {
    pub length: f64,
    /// Mean translation drift, fraction of segment length.
    pub translation_error: f64,
    /// Mean rotation drift, radians per unit length.
    pub rotation_error: f64,
    pub count: usize,
}

/// Aggregate drift over all segments plus per-length-bucket breakdown.
/// Buckets align with [`EvaluatorConfig::segment_lengths`]; a bucket with no
/// samples is `None`.
#[derive(Debug, Clone)]
pub struct ErrorSummary {
    /// Mean translation drift over all segments, fraction of length.
    pub overall_translation: f64,
    /// Mean rotation drift over all segments, radians per unit length.
    pub overall_rotation: f64,
    pub buckets: Vec<Option<BucketStats>>,
}

/// Summarize segment errors. `None` when there are no segments at all.
pub fn summarize(errors: &[SegmentError], config: &EvaluatorConfig) -> Option<ErrorSummary> {
    if errors.is_empty() {
        return None;
    }

    let n = errors.len() as f64;
    let overall_translation = errors.iter().map(|e| e.translation_error).sum::<f64>() / n;
    let overall_rotation = errors.iter().map(|e| e.rotation_error).sum::<f64>() / n;

    let buckets = config
        .segment_lengths
        .iter()
        .enumerate()
        .map(|(bucket, &length)| {
            let members: Vec<&SegmentError> = errors
                .iter()
                .filter(|e| e.length_bucket == bucket)
                .collect();
            if members.is_empty() {
                return None;
            }
            let count = members.len();
            let m = count as f64;
            Some(BucketStats {
                length,
                translation_error: members.iter().map(|e| e.translation_error).sum::<f64>() / m,
                rotation_error: members.iter().map(|e| e.rotation_error).sum::<f64>() / m,
                count,
            })
        })
        .collect();

    Some(ErrorSummary {
        overall_translation,
        overall_rotation,
        buckets,
    })
}

impl fmt::Display for ErrorSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "overall: ATE {:.4} %, ARE {:.6} deg/unit",
            self.overall_translation * 100.0,
            self.overall_rotation.to_degrees()
        )?;
        writeln!(f, "{:>10} {:>10} {:>14} {:>10}", "length", "ATE %", "ARE deg/unit", "count")?;
        for bucket in &self.buckets {
            match bucket {
                Some(b) => writeln!(
                    f,
                    "{:>10.1} {:>10.4} {:>14.6} {:>10}",
                    b.length,
                    b.translation_error * 100.0,
                    b.rotation_error.to_degrees(),
                    b.count
                )?,
                None => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Matrix3, Vector3};

    fn pose(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Matrix4<f64> {
        let mut t = Matrix4::identity();
        t.fixed_view_mut::<3, 3>(0, 0).copy_from(&rotation);
        t.fixed_view_mut::<3, 1>(0, 3).copy_from(&translation);
        t
    }

    /// Straight line along x, unit spacing.
    fn straight_line(n: usize) -> Vec<Matrix4<f64>> {
        (0..n)
            .map(|i| pose(Matrix3::identity(), Vector3::new(i as f64, 0.0, 0.0)))
            .collect()
    }

    fn short_config() -> EvaluatorConfig {
        EvaluatorConfig {
            segment_lengths: vec![5.0],
            frame_stride: 1,
            frame_interval: 0.1,
        }
    }

    #[test]
    fn test_identical_trajectories_have_zero_drift() {
        let poses = straight_line(20);
        let errors = compute_segment_errors(&poses, &poses, &short_config()).unwrap();
        assert!(!errors.is_empty());
        for e in &errors {
            assert!(e.translation_error.abs() < 1e-12);
            assert!(e.rotation_error.abs() < 1e-9);
        }
        let summary = summarize(&errors, &short_config()).unwrap();
        assert!(summary.overall_translation < 1e-12);
    }

    #[test]
    fn test_scaled_estimate_has_expected_translation_drift() {
        // Estimate travels 10% too far. With the strict path-length bound a
        // 5-unit segment at unit spacing spans 6 units of reference travel,
        // so the relative translation differs by 0.6, i.e. 0.12 per unit.
        let reference = straight_line(20);
        let estimated: Vec<Matrix4<f64>> = (0..20)
            .map(|i| pose(Matrix3::identity(), Vector3::new(i as f64 * 1.1, 0.0, 0.0)))
            .collect();
        let errors = compute_segment_errors(&reference, &estimated, &short_config()).unwrap();
        for e in &errors {
            assert!((e.translation_error - 0.12).abs() < 1e-9);
            assert!(e.rotation_error.abs() < 1e-9);
        }
    }

    #[test]
    fn test_half_turn_rotation_error() {
        // Three poses at unit spacing; the estimate ends rotated 180 degrees
        // about z. The 1-unit segment ends at the first frame strictly past
        // it (frame 2); rotation drift is pi radians over that unit.
        let reference = straight_line(3);
        let half_turn = Matrix3::new(-1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, 1.0);
        let estimated = vec![
            reference[0],
            reference[1],
            pose(half_turn, Vector3::new(2.0, 0.0, 0.0)),
        ];
        let config = EvaluatorConfig {
            segment_lengths: vec![1.0],
            frame_stride: 1,
            frame_interval: 0.1,
        };
        let errors = compute_segment_errors(&reference, &estimated, &config).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].first_frame, 0);
        assert!((errors[0].rotation_error - std::f64::consts::PI).abs() < 1e-9);
    }

    #[test]
    fn test_trajectory_shorter_than_bucket_leaves_it_empty() {
        let poses = straight_line(10); // 9 units long
        let config = EvaluatorConfig {
            segment_lengths: vec![5.0, 100.0],
            frame_stride: 1,
            frame_interval: 0.1,
        };
        let errors = compute_segment_errors(&poses, &poses, &config).unwrap();
        assert!(errors.iter().all(|e| e.length_bucket == 0));
        let summary = summarize(&errors, &config).unwrap();
        assert!(summary.buckets[0].is_some());
        assert!(summary.buckets[1].is_none());
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        // Pure function of its inputs: two runs agree sample for sample.
        let reference = straight_line(15);
        let estimated: Vec<Matrix4<f64>> = (0..15)
            .map(|i| pose(Matrix3::identity(), Vector3::new(i as f64 * 1.02, 0.01, 0.0)))
            .collect();
        let a = compute_segment_errors(&reference, &estimated, &short_config()).unwrap();
        let b = compute_segment_errors(&reference, &estimated, &short_config()).unwrap();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.first_frame, y.first_frame);
            assert_eq!(x.translation_error, y.translation_error);
            assert_eq!(x.rotation_error, y.rotation_error);
        }
    }

    #[test]
    fn test_summarize_empty_is_none() {
        assert!(summarize(&[], &short_config()).is_none());
    }

    #[test]
    fn test_length_mismatch_is_an_error() {
        let a = straight_line(10);
        let b = straight_line(9);
        let result = compute_segment_errors(&a, &b, &short_config());
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_speed_estimate() {
        // Unit spacing: a 5-unit segment starting at frame 0 ends at frame 6
        // (first frame strictly past 5 units), an inclusive span of 7 frames
        // at 0.1 s each, so speed = 5 / 0.7.
        let poses = straight_line(20);
        let errors = compute_segment_errors(&poses, &poses, &short_config()).unwrap();
        for e in &errors {
            assert!((e.speed - 5.0 / 0.7).abs() < 1e-9);
        }
    }

    #[test]
    fn test_frame_stride_skips_start_frames() {
        let poses = straight_line(20);
        let config = EvaluatorConfig {
            segment_lengths: vec![5.0],
            frame_stride: 10,
            frame_interval: 0.1,
        };
        let errors = compute_segment_errors(&poses, &poses, &config).unwrap();
        // Start frames 0 and 10 both fit a 5-unit segment in a 19-unit path
        // (end frames 6 and 16 under the strict path-length bound).
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.first_frame == 0));
        assert!(errors.iter().any(|e| e.first_frame == 10));
    }

    #[test]
    fn test_poses_from_f32_widens() {
        let poses32 = vec![nalgebra::Matrix4::<f32>::identity()];
        let poses64 = poses_from_f32(&poses32);
        assert_eq!(poses64.len(), 1);
        assert!((poses64[0] - Matrix4::identity()).norm() < 1e-12);
    }
}
