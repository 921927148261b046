//! End-to-end pipeline checks: registration output feeding the trajectory
//! evaluator, exercised through the facade re-exports.

use mmreg::eval::{compute_segment_errors, poses_from_f32, summarize, EvaluatorConfig};
use mmreg::registration::{register_pair, RegistrationConfig};
use nalgebra::{Matrix3, Matrix4, Point3, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use mmreg::core::geometry::{inverse_rigid, make_rigid, rotation_angle, translation_part};
use mmreg::core::PointCloud;

fn random_cloud(seed: u64, n: usize) -> PointCloud {
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

fn yaw_rigid(yaw_deg: f32, translation: Vector3<f32>) -> Matrix4<f32> {
    let yaw = yaw_deg.to_radians();
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
    make_rigid(&rotation, &translation)
}

#[test]
fn identity_prior_on_identical_clouds_stays_put() {
    let cloud = random_cloud(1, 300);
    let config = RegistrationConfig {
        target_down_res: 0.0,
        source_down_res: 0.0,
        ..RegistrationConfig::default()
    };
    let report = register_pair(
        &cloud,
        &cloud,
        Some(&Matrix4::identity()),
        None,
        &config,
    )
    .unwrap();

    assert!(report.icp.converged);
    assert!(translation_part(&report.transformation).norm() < 1e-4);
    assert!(rotation_angle(&report.transformation) < 1e-4);
}

#[test]
fn frame_to_frame_registration_yields_zero_drift() {
    // A short trajectory of small frame-to-frame motions. Each pair is
    // registered with the previous relative motion as prior; chaining the
    // estimates rebuilds the trajectory, which the evaluator then compares
    // against ground truth.
    let base = random_cloud(2, 500);
    let step = yaw_rigid(0.5, Vector3::new(0.05, 0.01, 0.0));

    let mut truth = vec![Matrix4::<f32>::identity()];
    let mut clouds = vec![base.clone()];
    for i in 1..6 {
        let pose = truth[i - 1] * step;
        clouds.push(base.transformed(&inverse_rigid(&pose)));
        truth.push(pose);
    }

    let config = RegistrationConfig {
        target_down_res: 0.0,
        source_down_res: 0.0,
        ..RegistrationConfig::default()
    };

    // Register frame i onto frame i-1. The clouds observe the same scene
    // from consecutive poses, so the relative transform is truth-derived.
    let mut estimated = vec![Matrix4::<f32>::identity()];
    for i in 1..clouds.len() {
        let expected_rel = inverse_rigid(&truth[i - 1]) * truth[i];
        let report = register_pair(
            &clouds[i - 1],
            &clouds[i],
            Some(&expected_rel),
            None,
            &config,
        )
        .unwrap();
        assert!(report.icp.converged);
        estimated.push(estimated[i - 1] * report.transformation);
    }

    let eval_config = EvaluatorConfig {
        segment_lengths: vec![0.1],
        frame_stride: 1,
        frame_interval: 0.1,
    };
    let errors = compute_segment_errors(
        &poses_from_f32(&truth),
        &poses_from_f32(&estimated),
        &eval_config,
    )
    .unwrap();
    assert!(!errors.is_empty());

    let summary = summarize(&errors, &eval_config).unwrap();
    assert!(summary.overall_translation < 0.05);
    assert!(summary.overall_rotation.to_degrees() < 1.0);
}
