use nalgebra::{convert, Matrix3, SVector, Vector3};

use crate::Real;

/// Computes the centroid and the normalized covariance matrix of `points` in
/// a single pass.
///
/// The sums are taken relative to the first point to keep the cancellation
/// error of `E[x²] - E[x]²` small for clouds far from the origin.
#[allow(clippy::type_complexity)]
pub fn centroid_and_cov_matrix<'a, T, I>(points: I) -> (Option<(Vector3<T>, Matrix3<T>)>, usize)
where
    T: Real,
    I: IntoIterator<Item = &'a Vector3<T>>,
{
    let mut iter = points.into_iter().peekable();
    let c = match iter.peek() {
        Some(&&p) => p,
        None => return (None, 0),
    };

    let (acc, num) = iter.fold((SVector::<T, 9>::zeros(), 0), |(mut acc, num), v| {
        let d = v - c;

        acc[0] += d.x * d.x;
        acc[1] += d.x * d.y;
        acc[2] += d.x * d.z;
        acc[3] += d.y * d.y;
        acc[4] += d.y * d.z;
        acc[5] += d.z * d.z;
        acc[6] += d.x;
        acc[7] += d.y;
        acc[8] += d.z;

        (acc, num + 1)
    });

    let a = acc / convert::<_, T>(num as f64);
    let centroid = Vector3::new(a[6] + c.x, a[7] + c.y, a[8] + c.z);

    let xx = a[0] - a[6] * a[6];
    let xy = a[1] - a[6] * a[7];
    let xz = a[2] - a[6] * a[8];
    let yy = a[3] - a[7] * a[7];
    let yz = a[4] - a[7] * a[8];
    let zz = a[5] - a[8] * a[8];
    let cov_matrix = Matrix3::new(xx, xy, xz, xy, yy, yz, xz, yz, zz);

    (Some((centroid, cov_matrix)), num)
}
