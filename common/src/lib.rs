pub mod eigen;
pub mod feature;
pub mod filter;
pub mod point_cloud;
pub mod pose;
pub mod search;

use nalgebra::RealField;
use num::ToPrimitive;

/// The scalar type every numerical routine of the workspace is generic over.
///
/// Both `f32` and `f64` qualify.
pub trait Real: RealField + Copy + ToPrimitive + Send + Sync {}
impl<T: RealField + Copy + ToPrimitive + Send + Sync> Real for T {}
