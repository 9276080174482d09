//! Crop Water Stress Index (CWSI) analysis engine.
//!
//! Field devices report ambient conditions and thermal-camera frames for plants
//! grouped per crop into CONTROL, STRESS and MONITORED roles. The engine turns
//! that telemetry into a per-plant stress index and health status:
//!
//! - [`analysis`] – the numeric core (suitability gate, baselines, canopy
//!   temperature, CWSI, status transitions)
//! - [`scheduler`] – the recurring per-crop analysis cycle
//! - [`audit`] – the nightly anomaly and missing-mask checks
//! - [`store`], [`weather`], [`alerts`] – the seams to storage, the weather
//!   provider and alert delivery
//!
//! The binary in `main.rs` wires these to Postgres, an HTTP weather API and a
//! webhook, and exposes a health endpoint through [`routes`].

pub mod alerts;
pub mod analysis;
pub mod audit;
pub mod clock;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod models;
pub mod routes;
pub mod scheduler;
pub mod schema;
pub mod store;
pub mod weather;

pub use config::Config;
pub use models::{
    AnalysisResult, Crop, CwsiThresholds, EnvironmentalReading, ExperimentalGroup, Plant,
    PlantStatus, ThermalCapture,
};
pub use scheduler::{AnalysisScheduler, CropOutcome, EngineServices};
