//! Multi-metric linearized ICP.
//!
//! Each iteration rebuilds gated correspondences, linearizes the enabled
//! residual channels about the current transform (small-angle rotation),
//! solves the weighted normal equations for an incremental update, composes
//! it and shrinks the distance gate. Three residual channels:
//!
//! - point-to-point: Euclidean distance to the matched target point
//! - point-to-plane: signed distance to the target point's tangent plane
//! - point-to-line: distance to the target point's principal direction
//!
//! Supports an unconstrained 6DOF update and a heading-only 4DOF update
//! (3 translation + yaw), plus an exhaustive heading sweep for global
//! 4DOF search when no prior is available.

use crate::registration::correspondence::{find_correspondences, TargetIndex};
use mmreg_core::geometry::{exp_se3, reorthonormalize, skew_symmetric, yaw_rotation_about};
use mmreg_core::{Error, PointCloud, Result, SurfaceLabel};
use nalgebra::{
    Matrix4, Matrix6, Point3, RowVector6, Vector3, Vector4, Vector6,
};
use rayon::prelude::*;

/// Residual channel selection and weights. `Some(weight)` enables a channel.
///
/// Replaces the positional flag strings of older pipelines with named fields,
/// so a disabled channel is visible at the call site.
#[derive(Debug, Clone, Copy)]
pub struct MetricChannels {
    pub point_to_point: Option<f32>,
    pub point_to_plane: Option<f32>,
    pub point_to_line: Option<f32>,
}

impl Default for MetricChannels {
    fn default() -> Self {
        Self {
            point_to_point: Some(1.0),
            point_to_plane: Some(1.0),
            point_to_line: Some(1.0),
        }
    }
}

impl MetricChannels {
    pub fn point_to_plane_only() -> Self {
        Self {
            point_to_point: None,
            point_to_plane: Some(1.0),
            point_to_line: None,
        }
    }

    pub fn point_to_point_only() -> Self {
        Self {
            point_to_point: Some(1.0),
            point_to_plane: None,
            point_to_line: None,
        }
    }

    fn validate(&self) -> Result<()> {
        let channels = [
            self.point_to_point,
            self.point_to_plane,
            self.point_to_line,
        ];
        if channels.iter().all(Option::is_none) {
            return Err(Error::InvalidConfig(
                "no residual channel enabled".into(),
            ));
        }
        if channels.iter().flatten().any(|&w| w <= 0.0 || !w.is_finite()) {
            return Err(Error::InvalidConfig(
                "residual channel weights must be positive and finite".into(),
            ));
        }
        Ok(())
    }
}

/// Which point categories participate in matching, independent of the
/// residual metric selection.
#[derive(Debug, Clone, Copy)]
pub struct CategoryFilter {
    pub planar: bool,
    pub edge: bool,
    pub spherical: bool,
    pub unclassified: bool,
}

impl Default for CategoryFilter {
    fn default() -> Self {
        Self {
            planar: true,
            edge: true,
            spherical: true,
            unclassified: true,
        }
    }
}

impl CategoryFilter {
    fn validate(&self) -> Result<()> {
        if !(self.planar || self.edge || self.spherical || self.unclassified) {
            return Err(Error::InvalidConfig(
                "no point category enabled".into(),
            ));
        }
        Ok(())
    }

    fn allows(&self, label: SurfaceLabel) -> bool {
        match label {
            SurfaceLabel::Planar => self.planar,
            SurfaceLabel::Edge => self.edge,
            SurfaceLabel::Spherical => self.spherical,
            SurfaceLabel::Unclassified => self.unclassified,
        }
    }
}

/// ICP configuration. Defaults mirror the values proven out on terrestrial
/// and mobile LiDAR pairs.
#[derive(Debug, Clone)]
pub struct IcpConfig {
    pub max_iterations: usize,
    /// Convergence threshold on the translation increment magnitude.
    pub converge_translation: f32,
    /// Convergence threshold on the rotation increment, degrees.
    pub converge_rotation_deg: f32,
    /// Initial correspondence distance gate.
    pub dist_gate_init: f32,
    /// Gate floor the shrink schedule never goes below.
    pub dist_gate_min: f32,
    /// Per-iteration gate divisor (> 1 shrinks the gate each iteration).
    pub dist_gate_shrink: f32,
    pub metrics: MetricChannels,
    pub categories: CategoryFilter,
    /// Minimum gated correspondences for a usable rigid estimate.
    pub min_correspondences: usize,
}

impl Default for IcpConfig {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            converge_translation: 0.001,
            converge_rotation_deg: 0.01,
            dist_gate_init: 2.0,
            dist_gate_min: 0.3,
            dist_gate_shrink: 1.1,
            metrics: MetricChannels::default(),
            categories: CategoryFilter::default(),
            min_correspondences: 10,
        }
    }
}

impl IcpConfig {
    pub fn validate(&self) -> Result<()> {
        self.metrics.validate()?;
        self.categories.validate()?;
        if self.max_iterations == 0 {
            return Err(Error::InvalidConfig("max_iterations must be >= 1".into()));
        }
        if self.dist_gate_init <= 0.0 || self.dist_gate_min <= 0.0 {
            return Err(Error::InvalidConfig(
                "correspondence distance gates must be positive".into(),
            ));
        }
        if self.dist_gate_shrink < 1.0 {
            return Err(Error::InvalidConfig(
                "dist_gate_shrink must be >= 1.0".into(),
            ));
        }
        if self.min_correspondences < 3 {
            return Err(Error::InvalidConfig(
                "min_correspondences must be >= 3".into(),
            ));
        }
        Ok(())
    }
}

/// Outcome of one ICP attempt. Non-convergence is reported, not an error:
/// `transformation` always holds the last estimate.
#[derive(Debug, Clone)]
pub struct IcpResult {
    pub transformation: Matrix4<f32>,
    pub converged: bool,
    pub iterations: usize,
    /// Mean weighted squared residual of the last iteration.
    pub final_cost: f32,
    pub correspondence_count: usize,
    pub final_gate: f32,
}

enum ResidualKind {
    PointToPoint,
    PointToPlane,
    PointToLine,
}

/// One residual channel: a target index over the participating target
/// points, the participating source points, the target attribute vectors and
/// the channel weight.
struct Channel {
    kind: ResidualKind,
    index: TargetIndex,
    source: Vec<(usize, Point3<f32>)>,
    weight: f32,
}

/// Partition both clouds into residual channels.
///
/// Labeled clouds route planar points to the point-to-plane channel, edge
/// points to point-to-line and the rest to point-to-point. Unlabeled clouds
/// fall back to point-to-plane over all points when normals exist (else
/// point-to-point), matching plain single-metric ICP.
fn build_channels(
    target: &PointCloud,
    source: &PointCloud,
    config: &IcpConfig,
) -> Result<Vec<Channel>> {
    let labeled = target.labels.is_some();
    let has_normals = target.normals.is_some();

    let target_of = |pred: &dyn Fn(usize) -> bool| -> Vec<(usize, Point3<f32>)> {
        (0..target.len())
            .filter(|&i| config.categories.allows(target.label(i)) && pred(i))
            .map(|i| (i, target.points[i]))
            .collect()
    };
    let source_of = |pred: &dyn Fn(usize) -> bool| -> Vec<(usize, Point3<f32>)> {
        (0..source.len())
            .filter(|&i| config.categories.allows(source.label(i)) && pred(i))
            .map(|i| (i, source.points[i]))
            .collect()
    };

    let mut channels = Vec::new();

    if labeled {
        if let Some(weight) = config.metrics.point_to_plane {
            if has_normals {
                let tgt = target_of(&|i| target.label(i) == SurfaceLabel::Planar);
                let src = source_of(&|i| source.label(i) == SurfaceLabel::Planar);
                if !tgt.is_empty() && !src.is_empty() {
                    channels.push(Channel {
                        kind: ResidualKind::PointToPlane,
                        index: TargetIndex::build(tgt),
                        source: src,
                        weight,
                    });
                }
            }
        }
        if let Some(weight) = config.metrics.point_to_line {
            if has_normals {
                let tgt = target_of(&|i| target.label(i) == SurfaceLabel::Edge);
                let src = source_of(&|i| source.label(i) == SurfaceLabel::Edge);
                if !tgt.is_empty() && !src.is_empty() {
                    channels.push(Channel {
                        kind: ResidualKind::PointToLine,
                        index: TargetIndex::build(tgt),
                        source: src,
                        weight,
                    });
                }
            }
        }
        if let Some(weight) = config.metrics.point_to_point {
            let rest = |cloud: &PointCloud, i: usize| {
                matches!(
                    cloud.label(i),
                    SurfaceLabel::Spherical | SurfaceLabel::Unclassified
                )
            };
            let tgt = target_of(&|i| rest(target, i));
            let src = source_of(&|i| rest(source, i));
            if !tgt.is_empty() && !src.is_empty() {
                channels.push(Channel {
                    kind: ResidualKind::PointToPoint,
                    index: TargetIndex::build(tgt),
                    source: src,
                    weight,
                });
            }
        }
    } else if has_normals && config.metrics.point_to_plane.is_some() {
        let weight = config.metrics.point_to_plane.unwrap_or(1.0);
        channels.push(Channel {
            kind: ResidualKind::PointToPlane,
            index: TargetIndex::build(target.points.iter().copied().enumerate()),
            source: source.points.iter().copied().enumerate().collect(),
            weight,
        });
    } else if let Some(weight) = config.metrics.point_to_point {
        channels.push(Channel {
            kind: ResidualKind::PointToPoint,
            index: TargetIndex::build(target.points.iter().copied().enumerate()),
            source: source.points.iter().copied().enumerate().collect(),
            weight,
        });
    }

    if channels.is_empty() {
        return Err(Error::InvalidInput(
            "no enabled residual channel has usable points (check labels, \
             normals and category filters)"
                .into(),
        ));
    }
    Ok(channels)
}

#[derive(Clone, Copy)]
enum Dof {
    Six,
    FourYaw,
}

/// Linearized rows of one correspondence, accumulated into the 6x6 normal
/// equations. Twist layout matches [`exp_se3`]: translation first, rotation
/// last.
#[derive(Clone, Copy)]
struct Accumulator {
    ata: Matrix6<f32>,
    atb: Vector6<f32>,
    cost: f32,
    count: usize,
}

impl Accumulator {
    fn zero() -> Self {
        Self {
            ata: Matrix6::zeros(),
            atb: Vector6::zeros(),
            cost: 0.0,
            count: 0,
        }
    }

    fn add_row(&mut self, row: RowVector6<f32>, residual: f32, weight: f32) {
        self.ata += row.transpose() * row * weight;
        self.atb += row.transpose() * residual * weight;
        self.cost += weight * residual * residual;
    }

    fn merge(mut self, other: Self) -> Self {
        self.ata += other.ata;
        self.atb += other.atb;
        self.cost += other.cost;
        self.count += other.count;
        self
    }
}

fn row6(translation: Vector3<f32>, rotation: Vector3<f32>) -> RowVector6<f32> {
    RowVector6::new(
        translation.x,
        translation.y,
        translation.z,
        rotation.x,
        rotation.y,
        rotation.z,
    )
}

/// Shared 6DOF / 4DOF iteration loop.
fn run_icp(
    target: &PointCloud,
    channels: &[Channel],
    init: &Matrix4<f32>,
    config: &IcpConfig,
    dof: Dof,
) -> Result<IcpResult> {
    let mut transform = *init;
    let mut gate = config.dist_gate_init;
    let converge_rot = config.converge_rotation_deg.to_radians();

    let mut converged = false;
    let mut iterations = 0;
    let mut final_cost = f32::INFINITY;
    let mut correspondence_count = 0;

    for iter in 0..config.max_iterations {
        iterations = iter + 1;

        let mut acc = Accumulator::zero();
        for channel in channels {
            let corr = find_correspondences(&channel.index, &channel.source, &transform, gate);
            let channel_acc = corr
                .par_iter()
                .fold(Accumulator::zero, |mut acc, c| {
                    let Some(point) = channel.source_point(c.source_idx) else {
                        return acc;
                    };
                    let moved = transform.transform_point(&point);
                    let anchor = target.points[c.target_idx];
                    let q = moved.coords;
                    let diff = moved - anchor;
                    match channel.kind {
                        ResidualKind::PointToPoint => {
                            let rot_jac = -skew_symmetric(&q);
                            for k in 0..3 {
                                let mut trans = Vector3::zeros();
                                trans[k] = 1.0;
                                let rot = Vector3::new(
                                    rot_jac[(k, 0)],
                                    rot_jac[(k, 1)],
                                    rot_jac[(k, 2)],
                                );
                                acc.add_row(row6(trans, rot), diff[k], channel.weight);
                            }
                        }
                        ResidualKind::PointToPlane => {
                            let normal = target_normal(target, c.target_idx);
                            let residual = diff.dot(&normal);
                            acc.add_row(
                                row6(normal, q.cross(&normal)),
                                residual,
                                channel.weight,
                            );
                        }
                        ResidualKind::PointToLine => {
                            let direction = target_normal(target, c.target_idx);
                            // Project onto the complement of the line direction.
                            let projector =
                                nalgebra::Matrix3::identity() - direction * direction.transpose();
                            let residual_vec = projector * diff;
                            let rot_jac = projector * (-skew_symmetric(&q));
                            for k in 0..3 {
                                let trans = Vector3::new(
                                    projector[(k, 0)],
                                    projector[(k, 1)],
                                    projector[(k, 2)],
                                );
                                let rot = Vector3::new(
                                    rot_jac[(k, 0)],
                                    rot_jac[(k, 1)],
                                    rot_jac[(k, 2)],
                                );
                                acc.add_row(row6(trans, rot), residual_vec[k], channel.weight);
                            }
                        }
                    }
                    acc.count += 1;
                    acc
                })
                .reduce(Accumulator::zero, Accumulator::merge);
            acc = acc.merge(channel_acc);
        }

        correspondence_count = acc.count;
        if acc.count < config.min_correspondences {
            if iter == 0 {
                return Err(Error::InsufficientCorrespondences {
                    found: acc.count,
                    required: config.min_correspondences,
                });
            }
            // The shrinking gate emptied the match set: stop, non-converged.
            break;
        }
        final_cost = acc.cost / acc.count as f32;

        let delta = solve_increment(&acc.ata, &acc.atb, dof)?;
        let update = exp_se3(&delta);
        transform = update * transform;
        reorthonormalize(&mut transform);

        gate = (gate / config.dist_gate_shrink).max(config.dist_gate_min);

        let trans_mag = delta.fixed_rows::<3>(0).norm();
        let rot_mag = delta.fixed_rows::<3>(3).norm();
        if trans_mag < config.converge_translation && rot_mag < converge_rot {
            converged = true;
            break;
        }
    }

    Ok(IcpResult {
        transformation: transform,
        converged,
        iterations,
        final_cost,
        correspondence_count,
        final_gate: gate,
    })
}

impl Channel {
    /// Source entries keep their original cloud indices and are stored in
    /// index order, so binary search recovers the point.
    fn source_point(&self, source_idx: usize) -> Option<Point3<f32>> {
        self.source
            .binary_search_by_key(&source_idx, |&(i, _)| i)
            .ok()
            .map(|pos| self.source[pos].1)
    }
}

fn target_normal(target: &PointCloud, idx: usize) -> Vector3<f32> {
    target
        .normals
        .as_ref()
        .map(|n| n[idx])
        .unwrap_or_else(Vector3::z)
}

/// Solve the normal equations for the increment. In 4DOF mode only the
/// translation components and the heading (rotation about z) are free; the
/// reduced 4x4 system is extracted from the full 6x6 accumulation.
fn solve_increment(ata: &Matrix6<f32>, atb: &Vector6<f32>, dof: Dof) -> Result<Vector6<f32>> {
    match dof {
        Dof::Six => {
            let chol = ata.cholesky().ok_or_else(|| {
                Error::DegenerateSystem(
                    "6DOF normal equations are singular (unconstrained parameter)".into(),
                )
            })?;
            Ok(-chol.solve(atb))
        }
        Dof::FourYaw => {
            // Free parameters: tx, ty, tz, yaw (twist components 0,1,2,5).
            let idx = [0usize, 1, 2, 5];
            let mut a = nalgebra::Matrix4::<f32>::zeros();
            let mut b = Vector4::<f32>::zeros();
            for (r, &ir) in idx.iter().enumerate() {
                b[r] = atb[ir];
                for (c, &ic) in idx.iter().enumerate() {
                    a[(r, c)] = ata[(ir, ic)];
                }
            }
            let chol = a.cholesky().ok_or_else(|| {
                Error::DegenerateSystem(
                    "4DOF normal equations are singular (unconstrained parameter)".into(),
                )
            })?;
            let x = -chol.solve(&b);
            Ok(Vector6::new(x[0], x[1], x[2], 0.0, 0.0, x[3]))
        }
    }
}

/// Refine `init` with full 6DOF multi-metric ICP.
pub fn register_icp(
    target: &PointCloud,
    source: &PointCloud,
    init: &Matrix4<f32>,
    config: &IcpConfig,
) -> Result<IcpResult> {
    config.validate()?;
    let channels = build_channels(target, source, config)?;
    run_icp(target, &channels, init, config, Dof::Six)
}

/// Refine `init` with heading-only 4DOF ICP (translation + yaw). Use when
/// roll/pitch are already trusted, e.g. from leveled sensor mounting.
pub fn register_icp_4dof(
    target: &PointCloud,
    source: &PointCloud,
    init: &Matrix4<f32>,
    config: &IcpConfig,
) -> Result<IcpResult> {
    config.validate()?;
    let channels = build_channels(target, source, config)?;
    run_icp(target, &channels, init, config, Dof::FourYaw)
}

/// Global 4DOF search: run the 4DOF inner loop from every candidate heading
/// on a fixed step and keep the best outcome. Converged candidates are
/// preferred; among those, the lowest residual cost wins.
///
/// Heading seeds rotate about the source centroid so that a pure heading
/// error does not masquerade as a large translation offset.
pub fn register_icp_4dof_global(
    target: &PointCloud,
    source: &PointCloud,
    config: &IcpConfig,
    heading_step_deg: f32,
) -> Result<IcpResult> {
    config.validate()?;
    if heading_step_deg <= 0.0 || heading_step_deg > 360.0 {
        return Err(Error::InvalidConfig(
            "heading_step_deg must be in (0, 360]".into(),
        ));
    }
    if source.is_empty() {
        return Err(Error::InvalidInput("source cloud is empty".into()));
    }

    let channels = build_channels(target, source, config)?;
    let centroid = Point3::from(
        source.points.iter().map(|p| p.coords).sum::<Vector3<f32>>() / source.len() as f32,
    );

    let steps = (360.0 / heading_step_deg).round().max(1.0) as usize;
    let candidates: Vec<Result<IcpResult>> = (0..steps)
        .into_par_iter()
        .map(|k| {
            let yaw = (k as f32) * heading_step_deg.to_radians();
            let seed = yaw_rotation_about(&centroid, yaw);
            run_icp(target, &channels, &seed, config, Dof::FourYaw)
        })
        .collect();

    let mut best: Option<IcpResult> = None;
    let mut first_err: Option<Error> = None;
    for candidate in candidates {
        match candidate {
            Ok(result) => {
                let better = match &best {
                    None => true,
                    Some(b) => {
                        (result.converged && !b.converged)
                            || (result.converged == b.converged
                                && result.final_cost < b.final_cost)
                    }
                };
                if better {
                    best = Some(result);
                }
            }
            Err(e) => {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
    }

    best.ok_or_else(|| {
        first_err.unwrap_or_else(|| {
            Error::NoReliableEstimate("no heading candidate produced an estimate".into())
        })
    })
}
