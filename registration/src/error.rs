//! Failures surfaced by [`register`](crate::register).
//!
//! Anomalies inside one refinement (a singular system, an empty level) are
//! recovered locally and never show up here.

use std::fmt;

use thiserror::Error;

/// Which of the two inputs a failure refers to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CloudRole {
    Model,
    Scan,
}

impl fmt::Display for CloudRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloudRole::Model => f.write_str("model"),
            CloudRole::Scan => f.write_str("scan"),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum IcpFailure {
    /// The bounds of the coarsest clouds yielded no initial pose.
    NoSeeds,
    /// No candidate pose matched any model point to the scan.
    NoCorrespondences,
}

impl fmt::Display for IcpFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IcpFailure::NoSeeds => f.write_str("no coarse seed could be generated"),
            IcpFailure::NoCorrespondences => {
                f.write_str("no seed produced any correspondence")
            }
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistrationError {
    /// The cloud is empty after filtering at the coarsest level.
    #[error("Insufficient points: the {cloud} cloud is empty at voxel size {level_voxel}")]
    InsufficientPoints { cloud: CloudRole, level_voxel: f64 },

    #[error("ICP failed: {0}")]
    IcpFailed(IcpFailure),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Registration cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, RegistrationError>;

impl RegistrationError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }
}
