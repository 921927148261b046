//! Correspondence search between two point sets.
//!
//! Correspondences are rebuilt fresh each ICP iteration as a pure function of
//! `(target index, source points, transform, gate)`; nothing is persisted
//! across iterations.

use mmreg_core::descriptor::DescriptorSet;
use nalgebra::{Matrix4, Point3};
use rayon::prelude::*;
use rstar::{PointDistance, RTree, RTreeObject, AABB};

/// A matched pair of point indices plus the match distance
/// (Euclidean for geometric matches, Hamming for descriptor matches).
#[derive(Debug, Clone, Copy)]
pub struct Correspondence {
    pub target_idx: usize,
    pub source_idx: usize,
    pub dist: f32,
}

struct IndexedPoint(usize, Point3<f32>);

impl RTreeObject for IndexedPoint {
    type Envelope = AABB<[f32; 3]>;
    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.1.x, self.1.y, self.1.z])
    }
}

impl PointDistance for IndexedPoint {
    fn distance_2(&self, point: &[f32; 3]) -> f32 {
        let dx = self.1.x - point[0];
        let dy = self.1.y - point[1];
        let dz = self.1.z - point[2];
        dx * dx + dy * dy + dz * dz
    }
}

/// R-tree over a subset of target points, keyed by their original indices.
/// Built once per registration attempt (per channel), queried every iteration.
pub struct TargetIndex {
    tree: RTree<IndexedPoint>,
    len: usize,
}

impl TargetIndex {
    pub fn build(points: impl IntoIterator<Item = (usize, Point3<f32>)>) -> Self {
        let wrappers: Vec<IndexedPoint> = points
            .into_iter()
            .map(|(i, p)| IndexedPoint(i, p))
            .collect();
        let len = wrappers.len();
        Self {
            tree: RTree::bulk_load(wrappers),
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Nearest target point to `query`: `(original index, distance)`.
    pub fn nearest(&self, query: &Point3<f32>) -> Option<(usize, f32)> {
        let q = [query.x, query.y, query.z];
        self.tree
            .nearest_neighbor(&q)
            .map(|obj| (obj.0, obj.distance_2(&q).sqrt()))
    }
}

/// Geometric nearest-neighbor mode: match each source point (under the
/// current transform) to its nearest target point, rejecting pairs farther
/// than `gate`. Parallel over source points; no input is mutated.
pub fn find_correspondences(
    index: &TargetIndex,
    source: &[(usize, Point3<f32>)],
    transform: &Matrix4<f32>,
    gate: f32,
) -> Vec<Correspondence> {
    source
        .par_iter()
        .filter_map(|&(source_idx, point)| {
            let moved = transform.transform_point(&point);
            index.nearest(&moved).and_then(|(target_idx, dist)| {
                (dist <= gate).then_some(Correspondence {
                    target_idx,
                    source_idx,
                    dist,
                })
            })
        })
        .collect()
}

/// Descriptor-gated mode for the coarse stage: for each source descriptor,
/// find its best and second-best target match by Hamming distance, keep it
/// only if it passes the ratio test, then rank all survivors by distance and
/// keep the top `budget`. Returned indices refer to the clouds the
/// descriptors were extracted from.
pub fn match_descriptors(
    target: &DescriptorSet,
    source: &DescriptorSet,
    budget: usize,
    ratio: f32,
) -> Vec<Correspondence> {
    if target.is_empty() || source.is_empty() {
        return Vec::new();
    }

    let mut matches: Vec<Correspondence> = source
        .descriptors
        .par_iter()
        .enumerate()
        .filter_map(|(s, desc)| {
            let mut best = u32::MAX;
            let mut second = u32::MAX;
            let mut best_t = 0;
            for (t, cand) in target.descriptors.iter().enumerate() {
                let d = desc.hamming_distance(cand);
                if d < best {
                    second = best;
                    best = d;
                    best_t = t;
                } else if d < second {
                    second = d;
                }
            }
            let accept = second == u32::MAX || (best as f32) < ratio * (second as f32);
            accept.then_some(Correspondence {
                target_idx: target.indices[best_t],
                source_idx: source.indices[s],
                dist: best as f32,
            })
        })
        .collect();

    matches.sort_by(|a, b| a.dist.total_cmp(&b.dist));
    matches.truncate(budget);
    matches
}
