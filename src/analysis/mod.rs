//! Numeric core of the CWSI analysis.
//!
//! Everything here except [`environment`] is synchronous and free of I/O;
//! [`crate::scheduler`] feeds it data and persists what it returns.

pub mod baseline;
pub mod canopy;
pub mod cwsi;
pub mod environment;
pub mod status;

pub use baseline::Baselines;
pub use environment::{
    vpd_kpa, Ambient, EnvironmentQuery, EnvironmentalAssessment, EnvironmentalDataProvider,
    SuitabilitySource,
};
