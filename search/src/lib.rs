mod grid;
mod result;

pub use self::{
    grid::{CellKey, GridIndex},
    result::{KnnResultSet, RadiusResultSet, ResultSet},
};
