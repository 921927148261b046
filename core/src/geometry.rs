//! Rigid transform helpers over 4x4 homogeneous matrices.
//!
//! All registration code works on `Matrix4<f32>` transforms whose upper-left
//! 3x3 block is a rotation. Repeated composition drifts off SO(3), so
//! [`reorthonormalize`] is applied after every ICP update.

use nalgebra::{Matrix3, Matrix4, Point3, Vector3, Vector6};

/// Skew-symmetric (cross product) matrix of `v`.
pub fn skew_symmetric(v: &Vector3<f32>) -> Matrix3<f32> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Exponential map from se(3) to SE(3).
///
/// Twist layout: `[tx, ty, tz, wx, wy, wz]` (translation first). Uses the
/// left Jacobian so that large-angle increments stay exact.
pub fn exp_se3(delta: &Vector6<f32>) -> Matrix4<f32> {
    let v = Vector3::new(delta[0], delta[1], delta[2]);
    let omega = Vector3::new(delta[3], delta[4], delta[5]);

    let theta = omega.norm();

    let (rotation, translation) = if theta < 1e-6 {
        (Matrix3::identity(), v)
    } else {
        let k = omega / theta;
        let k_cross = skew_symmetric(&k);
        let k_cross_sq = k_cross * k_cross;
        let rotation =
            Matrix3::identity() + k_cross * theta.sin() + k_cross_sq * (1.0 - theta.cos());
        let left_jacobian = Matrix3::identity()
            + k_cross * ((1.0 - theta.cos()) / theta)
            + k_cross_sq * ((theta - theta.sin()) / (theta * theta));
        (rotation, left_jacobian * v)
    };

    make_rigid(&rotation, &translation)
}

/// Assemble a homogeneous transform from a rotation and a translation.
pub fn make_rigid(rotation: &Matrix3<f32>, translation: &Vector3<f32>) -> Matrix4<f32> {
    let mut m = Matrix4::identity();
    m.fixed_view_mut::<3, 3>(0, 0).copy_from(rotation);
    m.fixed_view_mut::<3, 1>(0, 3).copy_from(translation);
    m
}

pub fn rotation_part(m: &Matrix4<f32>) -> Matrix3<f32> {
    m.fixed_view::<3, 3>(0, 0).into()
}

pub fn translation_part(m: &Matrix4<f32>) -> Vector3<f32> {
    m.fixed_view::<3, 1>(0, 3).into()
}

/// Inverse of a rigid transform: transpose the rotation, rotate-negate the
/// translation. Cheaper and better conditioned than a general 4x4 inverse.
pub fn inverse_rigid(m: &Matrix4<f32>) -> Matrix4<f32> {
    let r_inv = rotation_part(m).transpose();
    let t_inv = -r_inv * translation_part(m);
    make_rigid(&r_inv, &t_inv)
}

/// Project the rotation block back onto SO(3) via SVD (`R = U * V^T`, with a
/// determinant fix), leaving the translation untouched.
pub fn reorthonormalize(m: &mut Matrix4<f32>) {
    let svd = rotation_part(m).svd(true, true);
    if let (Some(u), Some(v_t)) = (svd.u, svd.v_t) {
        let mut rotation = u * v_t;
        if rotation.determinant() < 0.0 {
            let mut u_corrected = u;
            u_corrected.set_column(2, &(u.column(2) * -1.0));
            rotation = u_corrected * v_t;
        }
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&rotation);
    }
}

/// Rotation magnitude of a rigid transform, in radians:
/// `acos(clamp(0.5 * (trace(R) - 1), -1, 1))`.
pub fn rotation_angle(m: &Matrix4<f32>) -> f32 {
    let r = rotation_part(m);
    let d = 0.5 * (r.trace() - 1.0);
    d.clamp(-1.0, 1.0).acos()
}

/// Heading rotation of `yaw` radians about the vertical axis through
/// `center`. Seed transform for the 4DOF heading sweep.
pub fn yaw_rotation_about(center: &Point3<f32>, yaw: f32) -> Matrix4<f32> {
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
    let translation = center.coords - rotation * center.coords;
    make_rigid(&rotation, &translation)
}
