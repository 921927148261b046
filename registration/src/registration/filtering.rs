//! Cloud preprocessing filters.

use mmreg_core::{PointCloud, Result, SurfaceLabel};
use nalgebra::{Point3, Vector3};

/// Voxel-grid downsampling: bucket points into cubic voxels of `voxel_size`
/// and replace each occupied voxel by the centroid of its members.
///
/// Normals are averaged and renormalized; labels resolve by majority vote
/// within the voxel. A non-positive `voxel_size` returns the input unchanged.
pub fn voxel_down_sample(cloud: &PointCloud, voxel_size: f32) -> Result<PointCloud> {
    if voxel_size <= 0.0 || cloud.is_empty() {
        return Ok(cloud.clone());
    }

    let inv = 1.0 / voxel_size;
    let key = |p: &Point3<f32>| -> (i64, i64, i64) {
        (
            (p.x * inv).floor() as i64,
            (p.y * inv).floor() as i64,
            (p.z * inv).floor() as i64,
        )
    };

    // Sort indices by voxel key, then sweep contiguous runs.
    let mut order: Vec<usize> = (0..cloud.len()).collect();
    order.sort_unstable_by_key(|&i| key(&cloud.points[i]));

    let mut points = Vec::new();
    let mut normals = cloud.normals.as_ref().map(|_| Vec::new());
    let mut labels = cloud.labels.as_ref().map(|_| Vec::new());

    let mut run_start = 0;
    while run_start < order.len() {
        let run_key = key(&cloud.points[order[run_start]]);
        let mut run_end = run_start + 1;
        while run_end < order.len() && key(&cloud.points[order[run_end]]) == run_key {
            run_end += 1;
        }
        let run = &order[run_start..run_end];
        let count = run.len() as f32;

        let centroid = run
            .iter()
            .map(|&i| cloud.points[i].coords)
            .sum::<Vector3<f32>>()
            / count;
        points.push(Point3::from(centroid));

        if let (Some(out), Some(src)) = (normals.as_mut(), cloud.normals.as_ref()) {
            let mean = run.iter().map(|&i| src[i]).sum::<Vector3<f32>>() / count;
            let norm = mean.norm();
            // Opposing normals can cancel; fall back to the first member.
            out.push(if norm > 1e-6 {
                mean / norm
            } else {
                src[run[0]]
            });
        }

        if let Some(out) = labels.as_mut() {
            let mut votes = [0usize; 4];
            for &i in run {
                votes[cloud.label(i) as usize] += 1;
            }
            let winner = votes
                .iter()
                .enumerate()
                .max_by_key(|&(_, &v)| v)
                .map(|(l, _)| l)
                .unwrap_or(0);
            out.push(match winner {
                1 => SurfaceLabel::Planar,
                2 => SurfaceLabel::Edge,
                3 => SurfaceLabel::Spherical,
                _ => SurfaceLabel::Unclassified,
            });
        }

        run_start = run_end;
    }

    let mut result = PointCloud::new(points);
    if let Some(normals) = normals {
        result = result.with_normals(normals)?;
    }
    if let Some(labels) = labels {
        result = result.with_labels(labels)?;
    }
    Ok(result)
}
