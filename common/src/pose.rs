use nalgebra::{Matrix3, Matrix4, Point3, Scalar, Unit, Vector3, Vector6};

use crate::Real;

/// Something that maps coordinates between frames.
///
/// `so3` applies only the rotational part (for directions such as normals),
/// `se3` the full rigid motion (for positions).
pub trait Transform<T: Scalar> {
    fn so3(&self, from: &Vector3<T>) -> Vector3<T>;

    fn se3(&self, from: &Vector3<T>) -> Vector3<T>;
}

impl<T: Real> Transform<T> for Matrix4<T> {
    fn so3(&self, from: &Vector3<T>) -> Vector3<T> {
        self.fixed_view::<3, 3>(0, 0) * from
    }

    fn se3(&self, from: &Vector3<T>) -> Vector3<T> {
        self.transform_point(&Point3::from(*from)).coords
    }
}

/// A rigid transform mapping model-local coordinates into the scan frame:
/// `p ↦ rotation · p + translation`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Pose<T: Scalar> {
    pub rotation: Matrix3<T>,
    pub translation: Vector3<T>,
}

impl<T: Real> Default for Pose<T> {
    fn default() -> Self {
        Self::identity()
    }
}

impl<T: Real> Pose<T> {
    #[inline]
    pub fn identity() -> Self {
        Pose {
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
        }
    }

    #[inline]
    pub fn from_parts(rotation: Matrix3<T>, translation: Vector3<T>) -> Self {
        Pose {
            rotation,
            translation,
        }
    }

    #[inline]
    pub fn from_translation(translation: Vector3<T>) -> Self {
        Pose {
            rotation: Matrix3::identity(),
            translation,
        }
    }

    /// Rotates by `angle` (radians) about `axis` through `pivot`, then moves
    /// `pivot` onto `target`.
    pub fn yaw_about(
        axis: &Unit<Vector3<T>>,
        angle: T,
        pivot: &Vector3<T>,
        target: &Vector3<T>,
    ) -> Self {
        let rotation = *nalgebra::Rotation3::from_axis_angle(axis, angle).matrix();
        Pose {
            rotation,
            translation: target - rotation * pivot,
        }
    }

    /// `self ∘ other`: the result applies `other` first.
    pub fn compose(&self, other: &Self) -> Self {
        Pose {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    /// The inverse of a rigid transform; the rotation block is assumed
    /// orthonormal.
    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.transpose();
        Pose {
            rotation,
            translation: -(rotation * self.translation),
        }
    }

    #[inline]
    pub fn transform_point(&self, point: &Vector3<T>) -> Vector3<T> {
        self.rotation * point + self.translation
    }

    #[inline]
    pub fn transform_vector(&self, vector: &Vector3<T>) -> Vector3<T> {
        self.rotation * vector
    }

    /// Left-composes the small-angle motion `[ω, v]` onto `self`.
    ///
    /// The rotational part is linearized as `I + [ω]ₓ`, so the result is
    /// projected back onto SO(3) afterwards.
    pub fn apply_twist(&self, twist: &Vector6<T>) -> Self {
        let omega = twist.fixed_rows::<3>(0).into_owned();
        let delta = Pose {
            rotation: Matrix3::identity() + skew(&omega),
            translation: twist.fixed_rows::<3>(3).into_owned(),
        };
        delta.compose(self).orthonormalized()
    }

    /// Replaces the rotation block by its closest rotation (the orthonormal
    /// factor of its polar decomposition).
    pub fn orthonormalized(&self) -> Self {
        if !self.rotation.iter().all(|x| x.is_finite()) {
            return *self;
        }
        let svd = self.rotation.svd(true, true);
        let (mut u, v_t) = match (svd.u, svd.v_t) {
            (Some(u), Some(v_t)) => (u, v_t),
            _ => return *self,
        };
        if (u * v_t).determinant() < T::zero() {
            u.column_mut(2).neg_mut();
        }
        Pose {
            rotation: u * v_t,
            translation: self.translation,
        }
    }

    /// Whether the rotation block is orthonormal with determinant +1 within
    /// `epsilon`.
    pub fn is_rigid(&self, epsilon: T) -> bool {
        let gram = self.rotation.transpose() * self.rotation - Matrix3::identity();
        gram.iter().all(|x| x.abs() <= epsilon)
            && (self.rotation.determinant() - T::one()).abs() <= epsilon
    }

    /// The signed rotation angle about `axis`, measured on a direction
    /// perpendicular to it, in `(-π, π]`.
    pub fn angle_about(&self, axis: &Unit<Vector3<T>>) -> T {
        let seed = if axis.x.abs() < nalgebra::convert(0.9) {
            Vector3::x()
        } else {
            Vector3::y()
        };
        let a = (seed - axis.into_inner() * axis.dot(&seed)).normalize();
        let r = self.rotation * a;
        let r = r - axis.into_inner() * axis.dot(&r);
        let b = axis.cross(&a);
        r.dot(&b).atan2(r.dot(&a))
    }

    pub fn to_homogeneous(&self) -> Matrix4<T> {
        let mut matrix = Matrix4::identity();
        matrix.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.rotation);
        matrix.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        matrix
    }
}

impl<T: Real> Transform<T> for Pose<T> {
    #[inline]
    fn so3(&self, from: &Vector3<T>) -> Vector3<T> {
        self.transform_vector(from)
    }

    #[inline]
    fn se3(&self, from: &Vector3<T>) -> Vector3<T> {
        self.transform_point(from)
    }
}

/// The cross-product matrix: `skew(a) · b == a × b`.
pub fn skew<T: Real>(v: &Vector3<T>) -> Matrix3<T> {
    Matrix3::new(
        T::zero(),
        -v.z,
        v.y,
        v.z,
        T::zero(),
        -v.x,
        -v.y,
        v.x,
        T::zero(),
    )
}
