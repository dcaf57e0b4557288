//! Initial pose candidates from bounding boxes and discrete yaw angles.

use log::debug;
use nalgebra::{convert, Scalar, Unit, Vector3};
use pcr_common::{point_cloud::PointCloud, pose::Pose, Real};
use pcr_search::GridIndex;
use rayon::prelude::*;

/// A candidate initial pose.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CoarseSeed<T: Scalar> {
    pub pose: Pose<T>,
    /// Higher is better; `1` when no pre-scoring ran.
    pub score: T,
    /// Position of the generating angle in the caller's yaw list.
    pub index: usize,
    pub yaw_degrees: T,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct CoarseParams {
    /// Rank the seeds by the mean squared nearest distance of about this
    /// many model points. `None` or `Some(0)` keeps the yaw list order.
    pub prescore_samples: Option<usize>,
    /// Keep at most this many seeds, best first.
    pub max_seeds: Option<usize>,
}

/// Proposes seeds that rotate the model about `up` through its bounding box
/// center, then move that center onto the scan's.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct CoarsePoseEstimator {
    pub params: CoarseParams,
}

impl CoarsePoseEstimator {
    pub fn new(params: CoarseParams) -> Self {
        CoarsePoseEstimator { params }
    }

    /// One seed per yaw angle (degrees), or none if either cloud has no
    /// finite bound.
    pub fn seeds<T: Real>(
        &self,
        model: &PointCloud<T>,
        scan: &PointCloud<T>,
        up: &Unit<Vector3<T>>,
        yaw_degrees: &[T],
    ) -> Vec<CoarseSeed<T>> {
        let (model_center, scan_center) = match (model.bound(), scan.bound()) {
            (Some(m), Some(s)) if m.is_finite() && s.is_finite() => (m.center(), s.center()),
            _ => return Vec::new(),
        };

        let to_radians = T::pi() / convert(180.0);
        let mut seeds = { yaw_degrees.iter().enumerate() }
            .map(|(index, &yaw)| CoarseSeed {
                pose: Pose::yaw_about(up, yaw * to_radians, &model_center, &scan_center),
                score: T::one(),
                index,
                yaw_degrees: yaw,
            })
            .collect::<Vec<_>>();

        if let Some(samples) = self.params.prescore_samples.filter(|&s| s > 0) {
            prescore(&mut seeds, model, scan, samples);
            // Stable: equal scores keep the caller's order.
            seeds.sort_by(|a, b| {
                { b.score.partial_cmp(&a.score) }.unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        if let Some(max_seeds) = self.params.max_seeds {
            seeds.truncate(max_seeds);
        }

        debug!(
            "Coarse: {} seeds, yaw {:?}",
            seeds.len(),
            { seeds.iter() }
                .map(|seed| seed.yaw_degrees)
                .collect::<Vec<_>>()
        );
        seeds
    }
}

/// Scores each seed by `1 / (1 + mean(min(d², cap²)) / cap²)` over a strided
/// sample of the model, with `cap` four scan voxels.
fn prescore<T: Real>(
    seeds: &mut [CoarseSeed<T>],
    model: &PointCloud<T>,
    scan: &PointCloud<T>,
    samples: usize,
) {
    let cap = scan.voxel_size() * convert(4.0);
    if model.is_empty() || scan.is_empty() || !(cap > T::zero() && cap.is_finite()) {
        return;
    }
    let cap_sq = cap * cap;
    let grid = GridIndex::new(scan.points(), cap);
    let stride = (model.len() / samples).max(1);
    let sample = model.iter().step_by(stride).collect::<Vec<_>>();
    let count = convert::<f64, T>(sample.len() as f64);

    seeds.par_iter_mut().for_each(|seed| {
        let total = sample.iter().fold(T::zero(), |acc, point| {
            let moved = seed.pose.transform_point(point);
            let d_sq = match grid.nearest(&moved) {
                Some((_, d_sq)) if d_sq < cap_sq => d_sq,
                _ => cap_sq,
            };
            acc + d_sq
        });
        seed.score = T::one() / (T::one() + total / count / cap_sq);
    });
}
