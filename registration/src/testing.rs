//! Synthetic geometry shared by the tests.

use nalgebra::Vector3;
use pcr_common::pose::Pose;
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// Samples the six faces of an axis-aligned box centered at the origin on a
/// regular grid. Edge points are shared by adjacent faces.
pub fn box_surface(size: &Vector3<f64>, spacing: f64) -> Vec<Vector3<f64>> {
    let half = size / 2.;
    let steps = size.map(|s| ((s / spacing).round() as usize).max(1));

    let mut points = Vec::new();
    for axis in 0..3 {
        let (b, c) = ((axis + 1) % 3, (axis + 2) % 3);
        for sign in [-1., 1.] {
            for i in 0..=steps[b] {
                for j in 0..=steps[c] {
                    let mut p = Vector3::zeros();
                    p[axis] = sign * half[axis];
                    p[b] = -half[b] + i as f64 * size[b] / steps[b] as f64;
                    p[c] = -half[c] + j as f64 * size[c] / steps[c] as f64;
                    points.push(p);
                }
            }
        }
    }
    points
}

/// The unit cube surface, about ten thousand points.
pub fn unit_cube() -> Vec<Vector3<f64>> {
    box_surface(&Vector3::repeat(1.), 0.025)
}

/// A flat square in the `z = 0` plane.
pub fn plane(half: f64, spacing: f64) -> Vec<Vector3<f64>> {
    let steps = (2. * half / spacing).round() as i64;
    let mut points = Vec::new();
    for i in 0..=steps {
        for j in 0..=steps {
            points.push(Vector3::new(
                -half + i as f64 * spacing,
                -half + j as f64 * spacing,
                0.,
            ));
        }
    }
    points
}

/// A rotation about +Z by `degrees` followed by `translation`.
pub fn yaw_pose(degrees: f64, translation: &Vector3<f64>) -> Pose<f64> {
    Pose::yaw_about(
        &Vector3::z_axis(),
        degrees * std::f64::consts::PI / 180.,
        &Vector3::zeros(),
        translation,
    )
}

pub fn transform(points: &[Vector3<f64>], pose: &Pose<f64>) -> Vec<Vector3<f64>> {
    points.iter().map(|p| pose.transform_point(p)).collect()
}

/// Adds isotropic Gaussian noise with a fixed seed.
pub fn add_noise(points: &mut [Vector3<f64>], sigma: f64, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0., sigma).unwrap();
    for p in points {
        *p += Vector3::from_fn(|_, _| normal.sample(&mut rng));
    }
}

/// The largest displacement between two poses over `points`.
pub fn max_deviation(a: &Pose<f64>, b: &Pose<f64>, points: &[Vector3<f64>]) -> f64 {
    { points.iter() }
        .map(|p| (a.transform_point(p) - b.transform_point(p)).norm())
        .fold(0., f64::max)
}
