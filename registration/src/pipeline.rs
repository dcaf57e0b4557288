use std::time::SystemTime;

use log::info;
use nalgebra::{convert, Scalar, Unit, Vector3};
use pcr_common::{
    eigen::{Jacobi, SymmetricEigen3},
    pose::Pose,
    Real,
};

use crate::{
    cancel::CancelToken,
    coarse::{CoarseParams, CoarsePoseEstimator},
    error::{CloudRole, IcpFailure, RegistrationError, Result},
    icp::{refine, IcpParams, LevelReport},
    pyramid::{PreprocessParams, PyramidBuilder},
};

/// How the per-level ICP settings follow from the level's voxel size.
///
/// The normal gate tightens and the iteration budget shrinks linearly from
/// the coarsest level to the finest.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LevelSchedule<T: Scalar> {
    pub correspondence_factor: T,
    pub huber_factor: T,
    /// Coarsest, finest.
    pub normal_dot: (T, T),
    /// Coarsest, finest.
    pub iterations: (usize, usize),
}

impl<T: Real> Default for LevelSchedule<T> {
    fn default() -> Self {
        LevelSchedule {
            correspondence_factor: convert(4.0),
            huber_factor: convert(2.0),
            normal_dot: (convert(0.75), convert(0.85)),
            iterations: (20, 12),
        }
    }
}

impl<T: Real> LevelSchedule<T> {
    /// The settings of level `level` out of `levels`, coarse first.
    pub fn params(&self, voxel_size: T, level: usize, levels: usize, trim_fraction: T) -> IcpParams<T> {
        let t = if levels > 1 {
            level as f64 / (levels - 1) as f64
        } else {
            0.
        };
        let (first, last) = self.iterations;
        let iterations = first as f64 + (last as f64 - first as f64) * t;
        let (coarse_dot, fine_dot) = self.normal_dot;

        IcpParams {
            max_iterations: iterations.round().max(0.) as usize,
            max_correspondence_distance: voxel_size * self.correspondence_factor,
            min_normal_dot: coarse_dot + (fine_dot - coarse_dot) * convert(t),
            trim_fraction,
            huber_delta: voxel_size * self.huber_factor,
        }
    }
}

/// Everything one registration needs.
///
/// Built with [`RegistrationRequest::new`] and refined with the `with_*`
/// methods; the defaults are a `[8, 4, 2]` cm pyramid, yaw seeds every
/// 90 degrees, a trim fraction of 0.7 and +Z up.
#[derive(Debug, Clone)]
pub struct RegistrationRequest<'a, T: Scalar> {
    pub model_points: &'a [Vector3<T>],
    pub scan_points: &'a [Vector3<T>],
    /// Parallel to `scan_points`.
    pub scan_confidence: Option<&'a [T]>,
    pub min_confidence: Option<T>,
    pub up: Vector3<T>,
    /// Coarse to fine, in meters.
    pub voxel_pyramid: Vec<T>,
    pub seed_yaw_degrees: Vec<T>,
    pub trim_fraction: T,
    /// Accepted scan point distances from `sensor_origin`.
    pub scan_range: Option<(T, T)>,
    pub sensor_origin: Vector3<T>,
    pub schedule: LevelSchedule<T>,
    pub coarse: CoarseParams,
    pub cancel: Option<CancelToken>,
}

impl<'a, T: Real> RegistrationRequest<'a, T> {
    pub fn new(model_points: &'a [Vector3<T>], scan_points: &'a [Vector3<T>]) -> Self {
        RegistrationRequest {
            model_points,
            scan_points,
            scan_confidence: None,
            min_confidence: None,
            up: Vector3::z(),
            voxel_pyramid: vec![convert(0.08), convert(0.04), convert(0.02)],
            seed_yaw_degrees: vec![T::zero(), convert(90.0), convert(180.0), convert(270.0)],
            trim_fraction: convert(0.7),
            scan_range: PreprocessParams::<T>::scan(Vec::new()).range,
            sensor_origin: Vector3::zeros(),
            schedule: LevelSchedule::default(),
            coarse: CoarseParams::default(),
            cancel: None,
        }
    }

    pub fn with_up(self, up: Vector3<T>) -> Self {
        RegistrationRequest { up, ..self }
    }

    pub fn with_voxel_pyramid(self, voxel_pyramid: Vec<T>) -> Self {
        RegistrationRequest {
            voxel_pyramid,
            ..self
        }
    }

    pub fn with_seed_yaw_degrees(self, seed_yaw_degrees: Vec<T>) -> Self {
        RegistrationRequest {
            seed_yaw_degrees,
            ..self
        }
    }

    pub fn with_trim_fraction(self, trim_fraction: T) -> Self {
        RegistrationRequest {
            trim_fraction,
            ..self
        }
    }

    pub fn with_scan_range(self, scan_range: Option<(T, T)>) -> Self {
        RegistrationRequest { scan_range, ..self }
    }

    pub fn with_sensor_origin(self, sensor_origin: Vector3<T>) -> Self {
        RegistrationRequest {
            sensor_origin,
            ..self
        }
    }

    pub fn with_scan_confidence(self, confidence: &'a [T], min_confidence: T) -> Self {
        RegistrationRequest {
            scan_confidence: Some(confidence),
            min_confidence: Some(min_confidence),
            ..self
        }
    }

    pub fn with_schedule(self, schedule: LevelSchedule<T>) -> Self {
        RegistrationRequest { schedule, ..self }
    }

    pub fn with_coarse(self, coarse: CoarseParams) -> Self {
        RegistrationRequest { coarse, ..self }
    }

    pub fn with_cancel(self, cancel: CancelToken) -> Self {
        RegistrationRequest {
            cancel: Some(cancel),
            ..self
        }
    }

    /// Checks the tunables, returning the normalized up axis.
    fn validate(&self) -> Result<Unit<Vector3<T>>> {
        if self.voxel_pyramid.is_empty() {
            return Err(RegistrationError::invalid_request("empty voxel pyramid"));
        }
        if let Some(voxel) = { self.voxel_pyramid.iter() }.find(|v| !(**v > T::zero() && v.is_finite())) {
            return Err(RegistrationError::invalid_request(format!(
                "voxel size {:?} is not positive",
                voxel
            )));
        }
        // Search radii reach four voxels or the correspondence distance.
        let reach = self.schedule.correspondence_factor.max(convert(4.0));
        if let Some(voxel) = { self.voxel_pyramid.iter() }.find(|&&v| !(v * reach).is_finite()) {
            return Err(RegistrationError::invalid_request(format!(
                "voxel size {:?} is too large",
                voxel
            )));
        }
        if self.voxel_pyramid.windows(2).any(|w| w[1] > w[0]) {
            return Err(RegistrationError::invalid_request(
                "voxel sizes must go from coarse to fine",
            ));
        }
        if !(self.trim_fraction > T::zero() && self.trim_fraction <= T::one()) {
            return Err(RegistrationError::invalid_request(format!(
                "trim fraction {:?} is outside (0, 1]",
                self.trim_fraction
            )));
        }
        if self.seed_yaw_degrees.iter().any(|yaw| !yaw.is_finite()) {
            return Err(RegistrationError::invalid_request("non-finite yaw seed"));
        }
        if let Some(confidence) = self.scan_confidence {
            if confidence.len() != self.scan_points.len() {
                return Err(RegistrationError::invalid_request(format!(
                    "{} confidence values for {} scan points",
                    confidence.len(),
                    self.scan_points.len()
                )));
            }
        }
        if let Some((min, max)) = self.scan_range {
            if !(T::zero() <= min && min <= max) {
                return Err(RegistrationError::invalid_request(format!(
                    "invalid scan range {:?}..{:?}",
                    min, max
                )));
            }
        }

        { Unit::try_new(self.up, T::default_epsilon()) }
            .filter(|up| up.iter().all(|x| x.is_finite()))
            .ok_or_else(|| RegistrationError::invalid_request("the up vector must be non-zero"))
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RegistrationMetrics<T: Scalar> {
    /// Share of the finest model points with a scan point within three
    /// finest voxels.
    pub inlier_fraction: T,
    /// Point-to-point RMSE over those inliers.
    pub rmse_meters: T,
    /// Pose updates applied to the winning seed, over all levels. An
    /// iteration that ends its level without an update is not counted.
    pub iterations: usize,
    pub voxel_size: T,
    pub timestamp: SystemTime,
    /// Position of the winning seed in the request's yaw list.
    pub seed_index: usize,
    pub correspondences: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationOutput<T: Scalar> {
    /// Maps model coordinates into the scan frame.
    pub pose: Pose<T>,
    pub metrics: RegistrationMetrics<T>,
    /// The winning seed's levels, coarse first.
    pub levels: Vec<LevelReport<T>>,
}

/// The registration pipeline. Stateless apart from the choice of
/// eigensolver; one instance may serve concurrent calls.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Registration<E = Jacobi> {
    solver: E,
}

impl Registration {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<E> Registration<E> {
    pub fn with_solver<F>(self, solver: F) -> Registration<F> {
        Registration { solver }
    }
}

impl<E> Registration<E> {
    pub fn register<T>(&self, request: &RegistrationRequest<T>) -> Result<RegistrationOutput<T>>
    where
        T: Real,
        E: SymmetricEigen3<T> + Clone + Sync,
    {
        let up = request.validate()?;
        let up_vector = up.into_inner();
        let cancel = request.cancel.as_ref();
        let check_cancel = || match cancel {
            Some(token) if token.is_cancelled() => Err(RegistrationError::Cancelled),
            _ => Ok(()),
        };
        let voxel_f64 = |voxel: T| voxel.to_f64().unwrap_or(f64::NAN);

        let scan_params = PreprocessParams::scan(request.voxel_pyramid.clone())
            .with_range(request.scan_range)
            .with_sensor_origin(request.sensor_origin)
            .with_min_confidence(request.min_confidence);
        let scan_pyramid = { PyramidBuilder::new(scan_params) }
            .with_solver(self.solver.clone())
            .build(request.scan_points, request.scan_confidence, &up_vector);
        check_cancel()?;

        let model_params = PreprocessParams::model(request.voxel_pyramid.clone());
        let model_pyramid = { PyramidBuilder::new(model_params) }
            .with_solver(self.solver.clone())
            .build(request.model_points, None, &up_vector);
        check_cancel()?;

        let coarsest = request.voxel_pyramid[0];
        for (pyramid, cloud) in [(&scan_pyramid, CloudRole::Scan), (&model_pyramid, CloudRole::Model)] {
            if pyramid.first().map_or(true, |level| level.is_empty()) {
                return Err(RegistrationError::InsufficientPoints {
                    cloud,
                    level_voxel: voxel_f64(coarsest),
                });
            }
        }

        let seeds = CoarsePoseEstimator::new(request.coarse).seeds(
            &model_pyramid[0],
            &scan_pyramid[0],
            &up,
            &request.seed_yaw_degrees,
        );
        if seeds.is_empty() {
            return Err(RegistrationError::IcpFailed(IcpFailure::NoSeeds));
        }

        let levels = request.voxel_pyramid.len();
        let params = { request.voxel_pyramid.iter().enumerate() }
            .map(|(level, &voxel)| {
                request.schedule.params(voxel, level, levels, request.trim_fraction)
            })
            .collect::<Vec<_>>();

        let outcome = refine(&model_pyramid, &scan_pyramid, &seeds, &params, cancel)?;

        let metrics = RegistrationMetrics {
            inlier_fraction: outcome.evaluation.inlier_fraction(),
            rmse_meters: outcome.evaluation.rmse.unwrap_or_else(T::zero),
            iterations: outcome.iterations(),
            voxel_size: request.voxel_pyramid[levels - 1],
            timestamp: SystemTime::now(),
            seed_index: outcome.seed.index,
            correspondences: outcome.evaluation.inliers,
        };
        info!(
            "Registration: {} seeds, winner {} (yaw {:?}), rmse {:?} m, inliers {:?}, {} iterations",
            seeds.len(),
            metrics.seed_index,
            outcome.seed.yaw_degrees,
            metrics.rmse_meters,
            metrics.inlier_fraction,
            metrics.iterations
        );

        Ok(RegistrationOutput {
            pose: outcome.pose,
            metrics,
            levels: outcome.levels,
        })
    }
}

/// Registers with the default eigensolver.
pub fn register<T: Real>(request: &RegistrationRequest<T>) -> Result<RegistrationOutput<T>> {
    Registration::new().register(request)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::vector;
    use pcr_common::eigen::NalgebraEigen;

    use super::*;
    use crate::{icp::LevelStatus, testing};

    fn yaw_degrees(pose: &Pose<f64>) -> f64 {
        pose.angle_about(&Vector3::z_axis()).to_degrees()
    }

    /// Distance between two angles modulo `period`, in degrees.
    fn angle_error(a: f64, b: f64, period: f64) -> f64 {
        let d = (a - b).rem_euclid(period);
        d.min(period - d)
    }

    #[test]
    fn test_schedule() {
        let schedule = LevelSchedule::<f64>::default();
        let levels = [0.08, 0.04, 0.02]
            .iter()
            .enumerate()
            .map(|(i, &v)| schedule.params(v, i, 3, 0.7))
            .collect::<Vec<_>>();

        assert_eq!(
            levels.iter().map(|p| p.max_iterations).collect::<Vec<_>>(),
            vec![20, 16, 12]
        );
        assert_relative_eq!(levels[0].min_normal_dot, 0.75);
        assert_relative_eq!(levels[1].min_normal_dot, 0.8);
        assert_relative_eq!(levels[2].min_normal_dot, 0.85);
        assert_relative_eq!(levels[2].max_correspondence_distance, 0.08);
        assert_relative_eq!(levels[2].huber_delta, 0.04);
        assert_eq!(levels[1].trim_fraction, 0.7);

        let single = schedule.params(0.05, 0, 1, 1.);
        assert_eq!(single.max_iterations, 20);
        assert_relative_eq!(single.min_normal_dot, 0.75);
    }

    #[test]
    fn test_identity_round_trip() {
        let cloud = testing::box_surface(&vector![1.2, 0.8, 0.5], 0.02);
        let request = RegistrationRequest::new(&cloud, &cloud)
            .with_voxel_pyramid(vec![0.08, 0.04])
            .with_seed_yaw_degrees(vec![0.])
            .with_scan_range(None);
        let output = register(&request).unwrap();

        assert!(testing::max_deviation(&output.pose, &Pose::identity(), &cloud) < 1e-6);
        assert!(output.metrics.rmse_meters < 1e-6);
        assert_eq!(output.metrics.inlier_fraction, 1.);
        assert_eq!(output.metrics.voxel_size, 0.04);
        assert_eq!(output.levels.len(), 2);
        assert!(output.levels.iter().all(|l| l.status == LevelStatus::Converged));
    }

    #[test]
    fn test_known_transform_with_noise() {
        let model = testing::box_surface(&vector![1.2, 0.8, 0.5], 0.02);
        let truth = testing::yaw_pose(8., &vector![0.2, -0.1, 0.05]);
        let mut scan = testing::transform(&model, &truth);
        testing::add_noise(&mut scan, 0.0015, 42);

        let request = RegistrationRequest::new(&model, &scan)
            .with_voxel_pyramid(vec![0.08, 0.04])
            .with_seed_yaw_degrees(vec![0.])
            .with_scan_range(None);
        let output = register(&request).unwrap();

        assert!(testing::max_deviation(&output.pose, &truth, &model) < 1e-2);
        assert!(output.metrics.inlier_fraction > 0.8);
        assert!(output.pose.is_rigid(1e-9));
        assert_eq!(
            output.metrics.iterations,
            output.levels.iter().map(|l| l.iterations).sum::<usize>()
        );
    }

    #[test]
    fn test_rotated_translated_cube() {
        let model = testing::unit_cube();
        assert!(model.len() >= 10_000);
        let truth = testing::yaw_pose(15., &vector![0.5, 0., 0.]);
        let scan = testing::transform(&model, &truth);

        let request = RegistrationRequest::new(&model, &scan)
            .with_voxel_pyramid(vec![0.1, 0.05])
            .with_scan_range(None);
        let output = register(&request).unwrap();

        // The cube looks the same every quarter turn.
        assert!(angle_error(yaw_degrees(&output.pose), 15., 90.) < 2.);
        assert!((output.pose.translation - vector![0.5, 0., 0.]).norm() < 1e-2);
        assert!(output.metrics.seed_index < 4);
        assert!(output.metrics.inlier_fraction > 0.95);
    }

    #[test]
    fn test_partial_occlusion() {
        let model = testing::unit_cube();
        let truth = testing::yaw_pose(10., &vector![0.2, 0.1, 0.]);
        let scan = testing::transform(&model, &truth);
        let occluded = { model.iter().zip(&scan) }
            .filter(|(p, _)| p.x < 0.5 - 1e-9)
            .map(|(_, q)| *q)
            .collect::<Vec<_>>();
        assert!(occluded.len() < scan.len() * 6 / 7);

        let register_with = |scan: &[Vector3<f64>]| {
            let request = RegistrationRequest::new(&model, scan)
                .with_voxel_pyramid(vec![0.1, 0.05])
                .with_seed_yaw_degrees(vec![0.])
                .with_scan_range(None);
            register(&request).unwrap()
        };
        let full = register_with(&scan);
        let partial = register_with(&occluded);

        assert!(angle_error(yaw_degrees(&partial.pose), 10., 360.) < 2.);
        assert!((partial.pose.translation - truth.translation).norm() < 1e-2);

        // The hidden face only counts near its borders with the visible ones.
        let fraction = partial.metrics.inlier_fraction;
        assert!(0.85 < fraction && fraction < 0.97, "inlier fraction {}", fraction);
        assert!(fraction < full.metrics.inlier_fraction);
        assert!(partial.metrics.rmse_meters < 0.05);
        assert!(partial.metrics.rmse_meters < 3. * full.metrics.rmse_meters);
    }

    #[test]
    fn test_empty_input() {
        let cloud = testing::box_surface(&vector![1., 1., 1.], 0.05);
        let err = register(&RegistrationRequest::new(&cloud, &[])).unwrap_err();
        assert_eq!(
            err,
            RegistrationError::InsufficientPoints {
                cloud: CloudRole::Scan,
                level_voxel: 0.08
            }
        );

        let err = register(&RegistrationRequest::new(&[], &cloud).with_scan_range(None)).unwrap_err();
        assert!(matches!(
            err,
            RegistrationError::InsufficientPoints {
                cloud: CloudRole::Model,
                ..
            }
        ));

        // Everything beyond the default five meter range.
        let far = testing::transform(&cloud, &Pose::from_translation(vector![10., 0., 0.]));
        let err = register(&RegistrationRequest::new(&cloud, &far)).unwrap_err();
        assert!(matches!(err, RegistrationError::InsufficientPoints { .. }));
    }

    #[test]
    fn test_single_seed() {
        let model = testing::box_surface(&vector![1.2, 0.8, 0.5], 0.02);
        let truth = testing::yaw_pose(5., &vector![0.1, 0., 0.]);
        let scan = testing::transform(&model, &truth);

        let request = RegistrationRequest::new(&model, &scan)
            .with_voxel_pyramid(vec![0.08, 0.04])
            .with_scan_range(None);
        let one = register(&request.clone().with_seed_yaw_degrees(vec![0.])).unwrap();
        let twice = register(&request.with_seed_yaw_degrees(vec![0., 0.])).unwrap();

        assert_eq!(one.metrics.seed_index, 0);
        assert_eq!(twice.metrics.seed_index, 0);
        assert_eq!(one.pose, twice.pose);
        assert_eq!(one.levels, twice.levels);
        assert_eq!(one.metrics.rmse_meters, twice.metrics.rmse_meters);
        assert!(testing::max_deviation(&one.pose, &truth, &model) < 1e-2);
    }

    #[test]
    fn test_solver_choice() {
        let model = testing::box_surface(&vector![1.2, 0.8, 0.5], 0.02);
        let truth = testing::yaw_pose(-4., &vector![0., 0.1, 0.]);
        let scan = testing::transform(&model, &truth);
        let request = RegistrationRequest::new(&model, &scan)
            .with_voxel_pyramid(vec![0.08, 0.04])
            .with_seed_yaw_degrees(vec![0.])
            .with_scan_range(None);

        let output = Registration::new()
            .with_solver(NalgebraEigen)
            .register(&request)
            .unwrap();
        assert!(testing::max_deviation(&output.pose, &truth, &model) < 1e-2);
    }

    #[test]
    fn test_confidence_and_prescoring() {
        let model = testing::box_surface(&vector![1.2, 0.8, 0.5], 0.02);
        let truth = testing::yaw_pose(92., &vector![0., 0., 1.]);
        let mut scan = testing::transform(&model, &truth);
        let mut confidence = vec![1.; scan.len()];
        // Low-confidence junk that must not reach the pyramid.
        scan.extend((0..500).map(|i| vector![3., i as f64 * 0.01, 0.]));
        confidence.extend(std::iter::repeat(0.1).take(500));

        let request = RegistrationRequest::new(&model, &scan)
            .with_voxel_pyramid(vec![0.08, 0.04])
            .with_scan_confidence(&confidence, 0.5)
            .with_coarse(CoarseParams {
                prescore_samples: Some(300),
                max_seeds: Some(2),
            });
        let output = register(&request).unwrap();

        // The box is symmetric under a half turn, so 90 and 270 both fit.
        assert!(output.metrics.seed_index == 1 || output.metrics.seed_index == 3);
        assert!(angle_error(yaw_degrees(&output.pose), 92., 180.) < 2.);
        assert!(output.metrics.inlier_fraction > 0.9);
    }

    #[test]
    fn test_invalid_requests() {
        let cloud = testing::box_surface(&vector![1., 1., 1.], 0.1);
        let base = RegistrationRequest::new(&cloud, &cloud).with_scan_range(None);
        let invalid = |request: RegistrationRequest<f64>| {
            matches!(register(&request), Err(RegistrationError::InvalidRequest(_)))
        };

        assert!(invalid(base.clone().with_voxel_pyramid(Vec::new())));
        assert!(invalid(base.clone().with_voxel_pyramid(vec![0.1, -0.05])));
        assert!(invalid(base.clone().with_voxel_pyramid(vec![0.05, 0.1])));
        assert!(invalid(base.clone().with_trim_fraction(0.)));
        assert!(invalid(base.clone().with_trim_fraction(1.5)));
        assert!(invalid(base.clone().with_up(Vector3::zeros())));
        assert!(invalid(base.clone().with_seed_yaw_degrees(vec![f64::NAN])));
        assert!(invalid(base.clone().with_scan_range(Some((2., 1.)))));
        assert!(invalid(base.clone().with_voxel_pyramid(vec![1e308])));

        // Half a confidence signal must not silently drop half the scan.
        let confidence = vec![1.; cloud.len() / 2];
        assert!(invalid(base.clone().with_scan_confidence(&confidence, 0.5)));

        assert_eq!(
            register(&base.clone().with_seed_yaw_degrees(Vec::new())).unwrap_err(),
            RegistrationError::IcpFailed(IcpFailure::NoSeeds)
        );
    }

    #[test]
    fn test_cancelled() {
        let cloud = testing::box_surface(&vector![1., 1., 1.], 0.05);
        let token = CancelToken::new();
        token.cancel();
        let request = RegistrationRequest::new(&cloud, &cloud)
            .with_scan_range(None)
            .with_cancel(token);
        assert_eq!(register(&request).unwrap_err(), RegistrationError::Cancelled);
    }
}
