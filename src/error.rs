//! Error types for the analysis engine.
//!
//! Expected failure paths (weather outages, missing baseline data, undeliverable
//! alerts) are modelled as values so the scheduler can degrade instead of
//! aborting; only persistence failures roll a crop cycle back.

use thiserror::Error;

use crate::models::{ExperimentalGroup, PlantStatus};

/// Failures of the storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to decode stored value '{field}': {reason}")]
    Decode { field: &'static str, reason: String },

    #[error("Plant {0} not found")]
    PlantNotFound(i64),

    /// The stored status no longer matches the one the change was computed from.
    #[error("Plant {plant_id} status changed concurrently (expected {expected})")]
    StatusConflict { plant_id: i64, expected: PlantStatus },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Failures of the weather provider.
#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("Weather API key is not configured")]
    MissingApiKey,

    #[error("Weather request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Malformed weather response: {0}")]
    Malformed(String),
}

/// Failure to hand an alert to the delivery channel.
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Alert delivery failed: {0}")]
    Delivery(String),

    #[error("Alert request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Baselines could not be derived from the reference plants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BaselineError {
    #[error("Insufficient {0} captures to compute a baseline")]
    InsufficientData(ExperimentalGroup),
}
