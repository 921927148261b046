use crate::geometry::{rotation_part, translation_part};
use nalgebra::{Matrix4, Point3, Vector3};

/// Local surface category of a point, produced by an external feature
/// extractor. Read-only input to residual weighting; never mutated here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SurfaceLabel {
    #[default]
    Unclassified,
    /// Locally planar; `normals` holds the tangent-plane normal.
    Planar,
    /// Locally linear; `normals` holds the principal direction.
    Edge,
    /// Locally isotropic neighborhood.
    Spherical,
}

/// An ordered set of 3D points with optional per-point attributes.
///
/// Point order is irrelevant for registration but attribute vectors are
/// index-aligned with `points`, so constructors validate lengths.
#[derive(Debug, Clone, Default)]
pub struct PointCloud {
    pub points: Vec<Point3<f32>>,
    /// Plane normal for planar points, principal direction for edge points.
    pub normals: Option<Vec<Vector3<f32>>>,
    pub labels: Option<Vec<SurfaceLabel>>,
}

impl PointCloud {
    pub fn new(points: Vec<Point3<f32>>) -> Self {
        Self {
            points,
            normals: None,
            labels: None,
        }
    }

    pub fn with_normals(mut self, normals: Vec<Vector3<f32>>) -> crate::Result<Self> {
        if normals.len() == self.points.len() {
            self.normals = Some(normals);
            Ok(self)
        } else {
            Err(crate::Error::InvalidInput(format!(
                "normal count {} does not match point count {}",
                normals.len(),
                self.points.len()
            )))
        }
    }

    pub fn with_labels(mut self, labels: Vec<SurfaceLabel>) -> crate::Result<Self> {
        if labels.len() == self.points.len() {
            self.labels = Some(labels);
            Ok(self)
        } else {
            Err(crate::Error::InvalidInput(format!(
                "label count {} does not match point count {}",
                labels.len(),
                self.points.len()
            )))
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Surface label of point `i` (`Unclassified` when the cloud is unlabeled).
    pub fn label(&self, i: usize) -> SurfaceLabel {
        self.labels
            .as_ref()
            .map_or(SurfaceLabel::Unclassified, |l| l[i])
    }

    /// Apply a rigid transform to every point, producing a new cloud.
    /// Normals are rotated; labels carry over unchanged.
    pub fn transformed(&self, transform: &Matrix4<f32>) -> PointCloud {
        let rotation = rotation_part(transform);
        let translation = translation_part(transform);
        PointCloud {
            points: self
                .points
                .iter()
                .map(|p| Point3::from(rotation * p.coords + translation))
                .collect(),
            normals: self
                .normals
                .as_ref()
                .map(|ns| ns.iter().map(|n| rotation * n).collect()),
            labels: self.labels.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{exp_se3, inverse_rigid};
    use nalgebra::Vector6;

    #[test]
    fn test_attribute_length_validation() {
        let cloud = PointCloud::new(vec![Point3::origin(), Point3::new(1.0, 0.0, 0.0)]);
        assert!(cloud.clone().with_normals(vec![Vector3::z()]).is_err());
        assert!(cloud
            .with_labels(vec![SurfaceLabel::Planar, SurfaceLabel::Edge])
            .is_ok());
    }

    #[test]
    fn test_transformed_roundtrip() {
        let cloud = PointCloud::new(vec![
            Point3::new(1.0, 2.0, 3.0),
            Point3::new(-0.5, 0.0, 1.5),
        ])
        .with_normals(vec![Vector3::z(), Vector3::x()])
        .unwrap();

        let t = exp_se3(&Vector6::new(0.1, -0.2, 0.3, 0.2, -0.1, 0.4));
        let back = cloud.transformed(&t).transformed(&inverse_rigid(&t));

        for (a, b) in cloud.points.iter().zip(back.points.iter()) {
            assert!((a - b).norm() < 1e-5);
        }
        let (orig_n, back_n) = (cloud.normals.unwrap(), back.normals.unwrap());
        for (a, b) in orig_n.iter().zip(back_n.iter()) {
            assert!((a - b).norm() < 1e-5);
        }
    }

    #[test]
    fn test_default_label_is_unclassified() {
        let cloud = PointCloud::new(vec![Point3::origin()]);
        assert_eq!(cloud.label(0), SurfaceLabel::Unclassified);
    }
}
