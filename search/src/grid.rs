use std::collections::HashMap;

use nalgebra::{convert, Scalar, Vector3};
use pcr_common::{
    search::{Search, SearchType},
    Real,
};

use crate::result::{KnnResultSet, RadiusResultSet, ResultSet};

/// Integer bucket coordinates: `floor(coordinate / cell_size)` per axis.
pub type CellKey = [i64; 3];

/// A bucketed neighbor index over a borrowed point slice.
///
/// [`GridIndex::nearest`] only looks at the 3×3×3 block of buckets around the
/// query, so it is approximate: a point more than one cell away is never
/// returned even if the block is empty. The k-nearest and radius queries grow
/// their window until the answer is exact.
///
/// Points with non-finite coordinates are never indexed. Once built, the
/// index is immutable and may be shared between threads.
#[derive(Debug, Clone)]
pub struct GridIndex<'a, T: Scalar> {
    points: &'a [Vector3<T>],
    cell_size: T,
    cells: HashMap<CellKey, Vec<usize>>,
    key_range: Option<(CellKey, CellKey)>,
}

impl<'a, T: Real> GridIndex<'a, T> {
    /// # Panics
    ///
    /// Panics if `cell_size` is not a positive finite number.
    pub fn new(points: &'a [Vector3<T>], cell_size: T) -> Self {
        assert!(
            cell_size > T::zero() && cell_size.is_finite(),
            "The cell size must be positive and finite"
        );

        let mut cells = HashMap::<CellKey, Vec<usize>>::new();
        let mut key_range: Option<(CellKey, CellKey)> = None;
        for (index, point) in points.iter().enumerate() {
            let key = match cell_key(point, cell_size) {
                Some(key) => key,
                None => continue,
            };
            cells.entry(key).or_default().push(index);

            let (min, max) = key_range.get_or_insert((key, key));
            for axis in 0..3 {
                min[axis] = min[axis].min(key[axis]);
                max[axis] = max[axis].max(key[axis]);
            }
        }

        GridIndex {
            points,
            cell_size,
            cells,
            key_range,
        }
    }

    #[inline]
    pub fn cell_size(&self) -> T {
        self.cell_size
    }

    /// The bucket `point` falls in, or `None` for non-finite coordinates or
    /// keys that don't fit in an `i64`.
    #[inline]
    pub fn key(&self, point: &Vector3<T>) -> Option<CellKey> {
        cell_key(point, self.cell_size)
    }

    /// The number of indexed (finite) points.
    pub fn len(&self) -> usize {
        self.cells.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// The closest point among the 27 buckets around `pivot`, as
    /// `(index, squared distance)`. Equal distances resolve to the lower index.
    pub fn nearest(&self, pivot: &Vector3<T>) -> Option<(usize, T)> {
        let center = self.key(pivot)?;
        let mut best: Option<(usize, T)> = None;
        for ring in 0..2 {
            self.for_each_in_ring(&center, ring, |bucket| {
                for &index in bucket {
                    let distance = (self.points[index] - pivot).norm_squared();
                    best = match best {
                        Some((b, d)) if d < distance || (d == distance && b < index) => {
                            Some((b, d))
                        }
                        _ => Some((index, distance)),
                    };
                }
            });
        }
        best
    }

    /// Like [`GridIndex::nearest`], but rejects a match farther than
    /// `max_distance` (not squared).
    pub fn nearest_within(&self, pivot: &Vector3<T>, max_distance: T) -> Option<(usize, T)> {
        { self.nearest(pivot) }.filter(|&(_, distance)| distance <= max_distance * max_distance)
    }

    /// The exact `num` nearest points, sorted by ascending squared distance.
    pub fn knn_search(&self, pivot: &Vector3<T>, num: usize, result: &mut Vec<(usize, T)>) {
        result.clear();
        let center = match self.key(pivot) {
            Some(center) if num > 0 => center,
            _ => return,
        };

        let mut set = KnnResultSet::new(num);
        let max_ring = self.max_ring(&center);
        for ring in 0..=max_ring {
            if self.window_exceeds_cells(ring) {
                set.clear();
                self.push_all(pivot, &mut set);
                break;
            }
            self.for_each_in_ring(&center, ring, |bucket| self.push_bucket(pivot, bucket, &mut set));

            // Everything outside the scanned block is at least `ring` cells away.
            let covered = self.cell_size * convert::<f64, T>(ring as f64);
            if matches!(set.max_key(), Some(&max) if max < covered * covered) {
                break;
            }
        }

        result.extend(set.into_sorted_vec().into_iter().map(|(d, i)| (i, d)));
    }

    /// Every point strictly closer than `radius` (not squared), sorted by
    /// ascending squared distance.
    pub fn radius_search(&self, pivot: &Vector3<T>, radius: T, result: &mut Vec<(usize, T)>) {
        result.clear();
        let center = match self.key(pivot) {
            Some(center) if radius > T::zero() => center,
            _ => return,
        };

        let mut set = RadiusResultSet::new(radius * radius);
        let rings = (radius / self.cell_size).ceil().to_i64().unwrap_or(i64::MAX);
        if self.window_exceeds_cells(rings) {
            self.push_all(pivot, &mut set);
        } else {
            for ring in 0..=rings.min(self.max_ring(&center)) {
                self.for_each_in_ring(&center, ring, |bucket| {
                    self.push_bucket(pivot, bucket, &mut set)
                });
            }
        }

        result.extend(set.into_sorted_vec().into_iter().map(|(d, i)| (i, d)));
    }

    fn push_bucket<R>(&self, pivot: &Vector3<T>, bucket: &[usize], set: &mut R)
    where
        R: ResultSet<Key = T, Value = usize>,
    {
        for &index in bucket {
            set.push((self.points[index] - pivot).norm_squared(), index);
        }
    }

    fn push_all<R>(&self, pivot: &Vector3<T>, set: &mut R)
    where
        R: ResultSet<Key = T, Value = usize>,
    {
        for bucket in self.cells.values() {
            self.push_bucket(pivot, bucket, set);
        }
    }

    /// The ring past which no bucket exists.
    fn max_ring(&self, center: &CellKey) -> i64 {
        match &self.key_range {
            Some((min, max)) => (0..3)
                .map(|axis| {
                    let low = center[axis].saturating_sub(min[axis]);
                    let high = max[axis].saturating_sub(center[axis]);
                    low.max(high).max(0)
                })
                .max()
                .unwrap_or(0),
            None => 0,
        }
    }

    /// Whether a cubic window of `ring` cells around a key visits more buckets
    /// than a full scan of the occupied ones.
    fn window_exceeds_cells(&self, ring: i64) -> bool {
        let side = (ring as i128).saturating_mul(2).saturating_add(1);
        side.saturating_mul(side).saturating_mul(side) > self.cells.len() as i128
    }

    /// Visits the occupied buckets whose Chebyshev distance to `center` is
    /// exactly `ring`.
    fn for_each_in_ring<F>(&self, center: &CellKey, ring: i64, mut f: F)
    where
        F: FnMut(&[usize]),
    {
        let mut visit = |dx: i64, dy: i64, dz: i64| {
            let key = match (
                center[0].checked_add(dx),
                center[1].checked_add(dy),
                center[2].checked_add(dz),
            ) {
                (Some(x), Some(y), Some(z)) => [x, y, z],
                _ => return,
            };
            if let Some(bucket) = self.cells.get(&key) {
                f(bucket);
            }
        };

        if ring == 0 {
            visit(0, 0, 0);
            return;
        }
        for dx in -ring..=ring {
            for dy in -ring..=ring {
                if dx.abs() == ring || dy.abs() == ring {
                    for dz in -ring..=ring {
                        visit(dx, dy, dz);
                    }
                } else {
                    visit(dx, dy, -ring);
                    visit(dx, dy, ring);
                }
            }
        }
    }
}

fn cell_key<T: Real>(point: &Vector3<T>, cell_size: T) -> Option<CellKey> {
    let x = (point.x / cell_size).floor().to_i64()?;
    let y = (point.y / cell_size).floor().to_i64()?;
    let z = (point.z / cell_size).floor().to_i64()?;
    Some([x, y, z])
}

impl<'a, T: Real> Search<T> for GridIndex<'a, T> {
    fn points(&self) -> &[Vector3<T>] {
        self.points
    }

    fn nearest(&self, pivot: &Vector3<T>) -> Option<(usize, T)> {
        GridIndex::nearest(self, pivot)
    }

    fn search(&self, pivot: &Vector3<T>, ty: SearchType<T>, result: &mut Vec<(usize, T)>) {
        match ty {
            SearchType::Knn(num) => self.knn_search(pivot, num, result),
            SearchType::Radius(radius) => self.radius_search(pivot, radius, result),
        }
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::vector;

    use super::*;

    fn lattice() -> Vec<Vector3<f64>> {
        let mut points = Vec::new();
        for i in 0..9 {
            for j in 0..7 {
                for k in 0..5 {
                    let jitter = ((i * 31 + j * 17 + k * 7) % 11) as f64 * 0.003;
                    points.push(vector![
                        i as f64 * 0.13 - 0.5 + jitter,
                        j as f64 * 0.11 - 0.3 - jitter,
                        k as f64 * 0.17 + 0.2 * jitter
                    ]);
                }
            }
        }
        points
    }

    fn brute_force(points: &[Vector3<f64>], pivot: &Vector3<f64>) -> Vec<(usize, f64)> {
        let mut all = { points.iter().enumerate() }
            .map(|(i, p)| (i, (p - pivot).norm_squared()))
            .collect::<Vec<_>>();
        all.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap().then(a.0.cmp(&b.0)));
        all
    }

    #[test]
    fn test_nearest_matches_brute_force() {
        let points = lattice();
        let grid = GridIndex::new(&points, 0.2);
        assert_eq!(grid.len(), points.len());

        for pivot in [
            vector![0., 0., 0.],
            vector![0.31, -0.07, 0.44],
            vector![-0.45, 0.3, 0.69],
        ] {
            let expected = brute_force(&points, &pivot)[0];
            assert_eq!(grid.nearest(&pivot), Some(expected));
        }
    }

    #[test]
    fn test_nearest_is_window_limited() {
        let points = vec![vector![0.05, 0.05, 0.05], vector![1.05, 0.05, 0.05]];
        let grid = GridIndex::new(&points, 0.1);

        assert_eq!(grid.nearest(&vector![0.15, 0.05, 0.05]).map(|(i, _)| i), Some(0));
        assert_eq!(grid.nearest(&vector![0.55, 0.05, 0.05]), None);
        assert!(grid.nearest_within(&vector![0.15, 0.05, 0.05], 0.05).is_none());
        assert!(grid.nearest_within(&vector![0.15, 0.05, 0.05], 0.11).is_some());
    }

    #[test]
    fn test_knn_and_radius_are_exact() {
        let points = lattice();
        let grid = GridIndex::new(&points, 0.1);
        let mut result = Vec::new();

        for pivot in [vector![0.12, 0.01, 0.3], vector![3., -2., 1.]] {
            let expected = brute_force(&points, &pivot);

            grid.knn_search(&pivot, 10, &mut result);
            assert_eq!(result, expected[..10]);

            grid.search(&pivot, SearchType::Radius(0.25), &mut result);
            let within = { expected.iter().copied() }
                .filter(|&(_, d)| d < 0.25 * 0.25)
                .collect::<Vec<_>>();
            assert_eq!(result, within);
        }

        grid.knn_search(&vector![0., 0., 0.], 10_000, &mut result);
        assert_eq!(result.len(), points.len());
    }

    #[test]
    fn test_non_finite() {
        let points = vec![vector![f64::NAN, 0., 0.], vector![0., 0., 0.], vector![1e300, 0., 0.]];
        let grid = GridIndex::new(&points, 1e-300);
        assert_eq!(grid.len(), 1);
        assert_eq!(grid.nearest(&vector![0., 0., 0.]), Some((1, 0.)));
        assert_eq!(grid.nearest(&vector![f64::INFINITY, 0., 0.]), None);

        let empty = GridIndex::<f64>::new(&[], 1.);
        assert!(empty.is_empty());
        assert_eq!(empty.nearest(&vector![0., 0., 0.]), None);
    }
}
