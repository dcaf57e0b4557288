//! Trimmed, Huber-weighted point-to-plane ICP over a pair of voxel pyramids.
//!
//! Each iteration matches every transformed model point to its nearest scan
//! point, keeps the matches with the smallest plane residuals, and takes one
//! Gauss-Newton step on the weighted residuals:
//!
//! ```text
//! r = n · (R p + t − s)        J = [ (R p + t) × n , n ]
//! (Σ w J Jᵀ) x = −Σ w J r      x = [ω, v]
//! ```
//!
//! The step is left-composed onto the pose as `(I + [ω]ₓ, v)` and the
//! rotation is re-orthonormalized.

use std::fmt;

use log::{debug, trace, warn};
use nalgebra::{convert, Matrix6, Scalar, Vector3, Vector6};
use pcr_common::{point_cloud::PointCloud, pose::Pose, Real};
use pcr_search::GridIndex;
use rayon::prelude::*;

use crate::{
    cancel::CancelToken, coarse::CoarseSeed, error::IcpFailure, robust::RobustKernel,
    solve::solve6, RegistrationError, Result,
};

/// Per-level refinement settings.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct IcpParams<T: Scalar> {
    pub max_iterations: usize,
    /// Matches farther apart than this are rejected.
    pub max_correspondence_distance: T,
    /// Matches whose normals meet at `|cos θ|` below this are rejected.
    pub min_normal_dot: T,
    /// The fraction of matches with the smallest residuals that enter the
    /// solve, in `(0, 1]`.
    pub trim_fraction: T,
    /// Residuals beyond this are down-weighted. A non-finite value turns
    /// the reweighting off.
    pub huber_delta: T,
}

impl<T: Real> IcpParams<T> {
    #[inline]
    pub fn kernel(&self) -> RobustKernel<T> {
        if self.huber_delta.is_finite() {
            RobustKernel::Huber(self.huber_delta)
        } else {
            RobustKernel::None
        }
    }
}

/// Why a level stopped iterating.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum LevelStatus {
    /// The RMSE changed by less than a thousandth of the voxel size.
    Converged,
    MaxIterations,
    /// The normal equations were singular; the last valid pose was kept.
    Degenerate,
    /// No model point found an acceptable match; the pose was kept.
    NoCorrespondences,
    Cancelled,
}

impl fmt::Display for LevelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LevelStatus::Converged => "converged",
            LevelStatus::MaxIterations => "iteration budget exhausted",
            LevelStatus::Degenerate => "degenerate",
            LevelStatus::NoCorrespondences => "no correspondences",
            LevelStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LevelReport<T: Scalar> {
    pub voxel_size: T,
    /// Updates applied to the pose. The iteration that stops a level as
    /// degenerate, unmatched or cancelled applies none and isn't counted.
    pub iterations: usize,
    /// Point-to-plane RMSE over the kept matches after the last update.
    pub rmse: Option<T>,
    /// Matches kept in the last solve.
    pub correspondences: usize,
    pub status: LevelStatus,
}

/// A scan level together with the index its matches are looked up in.
#[derive(Debug, Clone)]
pub struct ScanLevel<'a, T: Scalar> {
    cloud: &'a PointCloud<T>,
    grid: GridIndex<'a, T>,
}

impl<'a, T: Real> ScanLevel<'a, T> {
    /// # Panics
    ///
    /// Panics if `cell_size` is not a positive finite number.
    pub fn new(cloud: &'a PointCloud<T>, cell_size: T) -> Self {
        ScanLevel {
            cloud,
            grid: GridIndex::new(cloud.points(), cell_size),
        }
    }

    #[inline]
    pub fn cloud(&self) -> &'a PointCloud<T> {
        self.cloud
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
struct Correspondence<T: Scalar> {
    model_index: usize,
    target: Vector3<T>,
    normal: Vector3<T>,
    residual: T,
}

fn correspondences<T: Real>(
    model: &PointCloud<T>,
    scan: &ScanLevel<T>,
    pose: &Pose<T>,
    params: &IcpParams<T>,
) -> Vec<Correspondence<T>> {
    let max_sq = params.max_correspondence_distance * params.max_correspondence_distance;

    { model.points().par_iter().enumerate() }
        .filter_map(|(model_index, point)| {
            let moved = pose.transform_point(point);
            let (scan_index, d_sq) = scan.grid.nearest(&moved)?;
            if d_sq > max_sq {
                return None;
            }
            let target = scan.cloud[scan_index];

            let scan_normal = scan.cloud.normal(scan_index).copied();
            let model_normal = model.normal(model_index).map(|n| pose.transform_vector(n));
            if let (Some(ns), Some(nm)) = (&scan_normal, &model_normal) {
                if ns.dot(nm).abs() < params.min_normal_dot {
                    return None;
                }
            }

            let offset = moved - target;
            let normal = { scan_normal.or(model_normal) }
                .or_else(|| offset.try_normalize(T::default_epsilon()))
                .unwrap_or(*scan.cloud.up());

            Some(Correspondence {
                model_index,
                target,
                normal,
                residual: normal.dot(&offset),
            })
        })
        .collect()
}

/// Keeps the `ceil(len · fraction)` matches (at least one) with the smallest
/// absolute residuals. Ties keep the lower model index.
fn trim<T: Real>(matches: &mut Vec<Correspondence<T>>, fraction: T) {
    let len = matches.len();
    let keep = { (convert::<f64, T>(len as f64) * fraction).ceil().to_usize() }
        .unwrap_or(len)
        .clamp(1, len.max(1));

    matches.sort_by(|a, b| {
        { a.residual.abs().partial_cmp(&b.residual.abs()) }
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.model_index.cmp(&b.model_index))
    });
    matches.truncate(keep);
}

fn rmse<T: Real>(residuals: impl Iterator<Item = T>) -> Option<T> {
    let (sum, num) = residuals.fold((T::zero(), 0usize), |(sum, num), r| (sum + r * r, num + 1));
    (num > 0).then(|| (sum / convert::<f64, T>(num as f64)).sqrt())
}

fn residual_after<T: Real>(model: &PointCloud<T>, pose: &Pose<T>, c: &Correspondence<T>) -> T {
    c.normal.dot(&(pose.transform_point(&model[c.model_index]) - c.target))
}

/// Refines `initial` against one pyramid level.
///
/// Anomalies never escape as errors: a singular system or an empty match set
/// stops the level and keeps the last valid pose, as reported in the
/// returned [`LevelReport`].
pub fn icp_level<T: Real>(
    model: &PointCloud<T>,
    scan: &ScanLevel<T>,
    initial: &Pose<T>,
    params: &IcpParams<T>,
    cancel: Option<&CancelToken>,
) -> (Pose<T>, LevelReport<T>) {
    let voxel_size = scan.cloud.voxel_size();
    let tolerance = voxel_size * convert(1e-3);
    let kernel = params.kernel();

    let mut pose = *initial;
    let mut report = LevelReport {
        voxel_size,
        iterations: 0,
        rmse: None,
        correspondences: 0,
        status: LevelStatus::MaxIterations,
    };

    for iteration in 0..params.max_iterations {
        if cancel.map_or(false, CancelToken::is_cancelled) {
            report.status = LevelStatus::Cancelled;
            break;
        }

        let mut matches = correspondences(model, scan, &pose, params);
        if matches.is_empty() {
            warn!(
                "ICP: no correspondences at voxel size {:?}, iteration {}",
                voxel_size, iteration
            );
            report.status = LevelStatus::NoCorrespondences;
            break;
        }
        trim(&mut matches, params.trim_fraction);

        let mut a = Matrix6::<T>::zeros();
        let mut b = Vector6::<T>::zeros();
        for c in &matches {
            let point = pose.transform_point(&model[c.model_index]);
            let mut j = Vector6::zeros();
            j.fixed_rows_mut::<3>(0).copy_from(&point.cross(&c.normal));
            j.fixed_rows_mut::<3>(3).copy_from(&c.normal);

            let w = kernel.weight(c.residual);
            a += j * j.transpose() * w;
            b += j * (w * c.residual);
        }

        let step = match solve6(&a, &-b) {
            Some(step) => step,
            None => {
                warn!(
                    "ICP: degenerate system at voxel size {:?}, iteration {}; keeping the last pose",
                    voxel_size, iteration
                );
                report.status = LevelStatus::Degenerate;
                break;
            }
        };

        let before = rmse(matches.iter().map(|c| c.residual));
        pose = pose.apply_twist(&step);
        let after = rmse(matches.iter().map(|c| residual_after(model, &pose, c)));

        report.iterations += 1;
        report.rmse = after;
        report.correspondences = matches.len();
        trace!(
            "ICP: voxel {:?}, iteration {}, {} matches, rmse {:?} -> {:?}, |step| {:?}",
            voxel_size,
            iteration,
            matches.len(),
            before,
            after,
            step.norm()
        );

        if let (Some(before), Some(after)) = (before, after) {
            if (before - after).abs() < tolerance {
                report.status = LevelStatus::Converged;
                break;
            }
        }
    }

    (pose, report)
}

/// How well a pose overlays the finest model level onto the finest scan
/// level.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Evaluation<T: Scalar> {
    /// Model points whose nearest scan point is within the inlier distance.
    pub inliers: usize,
    pub total: usize,
    /// Point-to-point RMSE over the inliers.
    pub rmse: Option<T>,
}

impl<T: Real> Evaluation<T> {
    pub fn inlier_fraction(&self) -> T {
        if self.total == 0 {
            T::zero()
        } else {
            convert::<f64, T>(self.inliers as f64) / convert(self.total as f64)
        }
    }
}

pub fn evaluate<T: Real>(
    model: &PointCloud<T>,
    scan: &ScanLevel<T>,
    pose: &Pose<T>,
    max_distance: T,
) -> Evaluation<T> {
    let distances = { model.points().par_iter() }
        .map(|point| {
            { scan.grid.nearest_within(&pose.transform_point(point), max_distance) }
                .map(|(_, d_sq)| d_sq)
        })
        .collect::<Vec<_>>();

    let inliers = distances.iter().flatten().count();
    let rmse = (inliers > 0).then(|| {
        let sum = distances.iter().flatten().fold(T::zero(), |acc, &d_sq| acc + d_sq);
        (sum / convert(inliers as f64)).sqrt()
    });
    Evaluation {
        inliers,
        total: model.len(),
        rmse,
    }
}

/// The refinement of one seed through every level.
#[derive(Debug, Clone, PartialEq)]
pub struct SeedOutcome<T: Scalar> {
    pub seed: CoarseSeed<T>,
    pub pose: Pose<T>,
    pub levels: Vec<LevelReport<T>>,
    pub evaluation: Evaluation<T>,
}

impl<T: Scalar> SeedOutcome<T> {
    pub fn iterations(&self) -> usize {
        self.levels.iter().map(|level| level.iterations).sum()
    }
}

fn refine_seed<T: Real>(
    model_pyramid: &[PointCloud<T>],
    scan_levels: &[ScanLevel<T>],
    evaluation: &ScanLevel<T>,
    inlier_distance: T,
    seed: &CoarseSeed<T>,
    params: &[IcpParams<T>],
    cancel: Option<&CancelToken>,
) -> Option<SeedOutcome<T>> {
    let mut pose = seed.pose;
    let mut levels = Vec::with_capacity(params.len());

    for ((model, scan), params) in model_pyramid.iter().zip(scan_levels).zip(params) {
        if cancel.map_or(false, CancelToken::is_cancelled) {
            return None;
        }
        let (refined, report) = icp_level(model, scan, &pose, params, cancel);
        debug!(
            "ICP: seed {} at voxel size {:?}: {} after {} iterations, rmse {:?}, {} matches",
            seed.index, report.voxel_size, report.status, report.iterations, report.rmse,
            report.correspondences
        );
        if report.status == LevelStatus::Cancelled {
            return None;
        }
        pose = refined;
        levels.push(report);
    }

    let finest = model_pyramid.get(levels.len().checked_sub(1)?)?;
    Some(SeedOutcome {
        seed: *seed,
        pose,
        evaluation: evaluate(finest, evaluation, &pose, inlier_distance),
        levels,
    })
}

/// Refines every seed through the pyramids, coarse to fine, and returns the
/// one whose final point-to-point RMSE is lowest. Ties go to the earlier
/// seed.
///
/// Seeds are refined in parallel. Seeds whose pose matches no model point at
/// the finest level are discarded; if all are, this fails with
/// [`IcpFailure::NoCorrespondences`].
pub fn refine<T: Real>(
    model_pyramid: &[PointCloud<T>],
    scan_pyramid: &[PointCloud<T>],
    seeds: &[CoarseSeed<T>],
    params: &[IcpParams<T>],
    cancel: Option<&CancelToken>,
) -> Result<SeedOutcome<T>> {
    let depth = model_pyramid.len().min(scan_pyramid.len()).min(params.len());
    if depth == 0 {
        return Err(RegistrationError::invalid_request("no pyramid level to refine"));
    }
    if seeds.is_empty() {
        return Err(RegistrationError::IcpFailed(IcpFailure::NoSeeds));
    }
    let valid = |d: T| d > T::zero() && d.is_finite();
    if let Some(p) = { params[..depth].iter() }.find(|p| !valid(p.max_correspondence_distance)) {
        return Err(RegistrationError::invalid_request(format!(
            "invalid correspondence distance {:?}",
            p.max_correspondence_distance
        )));
    }

    let scan_levels = { scan_pyramid[..depth].iter().zip(params) }
        .map(|(cloud, params)| ScanLevel::new(cloud, params.max_correspondence_distance))
        .collect::<Vec<_>>();

    let finest = &scan_pyramid[depth - 1];
    let inlier_distance = finest.voxel_size() * convert(3.0);
    if !valid(inlier_distance) {
        return Err(RegistrationError::invalid_request(format!(
            "invalid finest voxel size {:?}",
            finest.voxel_size()
        )));
    }
    let evaluation = ScanLevel::new(finest, inlier_distance);

    let outcomes = { seeds.par_iter() }
        .map(|seed| {
            refine_seed(
                &model_pyramid[..depth],
                &scan_levels,
                &evaluation,
                inlier_distance,
                seed,
                &params[..depth],
                cancel,
            )
        })
        .collect::<Option<Vec<_>>>();
    let outcomes = match outcomes {
        Some(outcomes) if !cancel.map_or(false, CancelToken::is_cancelled) => outcomes,
        _ => return Err(RegistrationError::Cancelled),
    };

    let best = { outcomes.into_iter() }
        .filter(|outcome| outcome.evaluation.inliers > 0)
        .fold(None::<SeedOutcome<T>>, |best, outcome| match best {
            Some(best) if !(outcome.evaluation.rmse < best.evaluation.rmse) => Some(best),
            _ => Some(outcome),
        });

    best.ok_or_else(|| {
        warn!("ICP: no seed matched any model point at the finest level");
        RegistrationError::IcpFailed(IcpFailure::NoCorrespondences)
    })
}
