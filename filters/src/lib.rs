mod range;
mod voxel_grid;

pub use self::{
    range::{ConfidenceFilter, RangeFilter},
    voxel_grid::VoxelGrid,
};
