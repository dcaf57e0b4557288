use nalgebra::{Matrix6, Vector6};
use pcr_common::Real;

/// Solves `a · x = b` by Gaussian elimination with partial pivoting.
///
/// Returns `None` when a pivot is negligible next to the largest diagonal
/// entry of `a`, i.e. when some motion is unconstrained.
pub fn solve6<T: Real>(a: &Matrix6<T>, b: &Vector6<T>) -> Option<Vector6<T>> {
    let scale = { (0..6).map(|i| a[(i, i)].abs()) }
        .fold(T::zero(), |max, v| if v > max { v } else { max });
    if !(scale > T::zero()) || !scale.is_finite() {
        return None;
    }
    let threshold = T::default_epsilon().sqrt() * scale;

    let mut a = *a;
    let mut b = *b;
    for col in 0..6 {
        let pivot_row = (col..6)
            .max_by(|&r1, &r2| {
                { a[(r1, col)].abs() }
                    .partial_cmp(&a[(r2, col)].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);
        if !(a[(pivot_row, col)].abs() >= threshold) {
            return None;
        }
        if pivot_row != col {
            a.swap_rows(pivot_row, col);
            b.swap_rows(pivot_row, col);
        }

        let pivot = a[(col, col)];
        for row in col + 1..6 {
            let factor = a[(row, col)] / pivot;
            if factor == T::zero() {
                continue;
            }
            for k in col..6 {
                let v = a[(col, k)];
                a[(row, k)] -= factor * v;
            }
            let v = b[col];
            b[row] -= factor * v;
        }
    }

    let mut x = Vector6::zeros();
    for row in (0..6).rev() {
        let mut sum = b[row];
        for k in row + 1..6 {
            sum -= a[(row, k)] * x[k];
        }
        x[row] = sum / a[(row, row)];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}
