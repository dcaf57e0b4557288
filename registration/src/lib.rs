//! Rigid registration of a reference model onto a captured scan.
//!
//! Both clouds are reduced to voxel pyramids with per-point normals
//! ([`pyramid`]), a handful of initial poses is proposed from their bounds
//! ([`coarse`]), and each one is refined level by level with trimmed,
//! Huber-weighted point-to-plane ICP ([`icp`]). [`Registration::register`]
//! keeps the candidate with the lowest final residual.

mod cancel;
pub mod coarse;
mod error;
pub mod icp;
mod pipeline;
pub mod pyramid;
mod robust;
mod solve;
#[cfg(test)]
mod testing;

pub use self::{
    cancel::CancelToken,
    error::{CloudRole, IcpFailure, RegistrationError, Result},
    pipeline::{
        register, LevelSchedule, Registration, RegistrationMetrics, RegistrationOutput,
        RegistrationRequest,
    },
    robust::RobustKernel,
};
