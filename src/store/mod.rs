//! Storage interfaces consumed by the engine.
//!
//! The engine never talks to a database directly; it goes through these
//! traits so that the Postgres implementation ([`postgres::PgStore`]) and the
//! in-memory one ([`memory::MemoryStore`]) are interchangeable.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{AnalysisResult, Crop, CycleCommit, Plant, PlantRawData, PlantStatus, StatusChange};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

// ---

/// Crop and plant metadata.
#[async_trait]
pub trait PlantsStore: Send + Sync {
    async fn get_crops(&self) -> Result<Vec<Crop>, StoreError>;

    async fn get_plants_for_crop(&self, crop_id: i64) -> Result<Vec<Plant>, StoreError>;

    /// Unconditional status write for manual overrides by external tooling.
    /// The engine's own transitions go through [`Self::record_status_change`]
    /// and [`AnalysisResultsStore::commit_cycle`] instead.
    async fn update_status(&self, plant_id: i64, status: PlantStatus) -> Result<(), StoreError>;

    /// Apply a status change and its history entry as one unit of work.
    ///
    /// The write is compare-and-set: it fails with
    /// [`StoreError::StatusConflict`] when the stored status is no longer
    /// `change.old_status`.
    async fn record_status_change(&self, change: &StatusChange) -> Result<(), StoreError>;
}

/// Raw telemetry produced by device ingestion.
#[async_trait]
pub trait ReadingsStore: Send + Sync {
    /// Readings and captures per plant with `from <= timestamp <= to`.
    ///
    /// Every requested plant id is present in the returned map, possibly with
    /// empty lists.
    async fn get_raw_data_for_analysis(
        &self,
        plant_ids: &[i64],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<HashMap<i64, PlantRawData>, StoreError>;
}

/// Append-only analysis audit trail.
#[async_trait]
pub trait AnalysisResultsStore: Send + Sync {
    /// Append a single result outside a cycle commit, for backfills and
    /// external tooling. The scheduler always writes through `commit_cycle`.
    async fn append(&self, result: &AnalysisResult) -> Result<(), StoreError>;

    /// Write a crop cycle's results, status updates and history entries
    /// atomically: either everything lands or nothing does. Status updates are
    /// compare-and-set as in [`PlantsStore::record_status_change`], so a plant
    /// changed by another writer since it was read rolls the whole cycle back.
    async fn commit_cycle(&self, commit: &CycleCommit) -> Result<(), StoreError>;
}
