//! Postgres-backed implementation of the storage traits.
//!
//! Column layout is created by [`crate::schema::create_schema`].

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{AnalysisResultsStore, PlantsStore, ReadingsStore};
use crate::error::StoreError;
use crate::models::{
    decode_thermal_mask, AnalysisResult, Crop, CwsiThresholds, CycleCommit, EnvironmentalReading,
    ExperimentalGroup, Plant, PlantRawData, PlantStatus, StatusChange, ThermalCapture,
};

// ---

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CropRow {
    id: i64,
    name: String,
    city: String,
    utc_offset_minutes: i32,
    window_start_hour: i32,
    window_end_hour: i32,
    cwsi_incipient: f64,
    cwsi_critical: f64,
    light_threshold: f64,
}

#[derive(Debug, sqlx::FromRow)]
struct PlantRow {
    id: i64,
    crop_id: i64,
    name: String,
    experimental_group: String,
    status: String,
    thermal_mask: Option<String>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct ReadingRow {
    device_id: String,
    plant_id: Option<i64>,
    timestamp: DateTime<Utc>,
    temperature: f64,
    humidity: f64,
    extra_data: Option<serde_json::Value>,
}

#[derive(Debug, sqlx::FromRow)]
struct CaptureRow {
    device_id: String,
    plant_id: Option<i64>,
    timestamp: DateTime<Utc>,
    temperatures: Option<String>,
    min_temp: f64,
    max_temp: f64,
    avg_temp: f64,
}

fn hour(value: i32, field: &'static str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Decode {
        field,
        reason: format!("negative hour {value}"),
    })
}

impl TryFrom<CropRow> for Crop {
    type Error = StoreError;

    fn try_from(row: CropRow) -> Result<Self, Self::Error> {
        Ok(Crop {
            id: row.id,
            name: row.name,
            city: row.city,
            utc_offset_minutes: row.utc_offset_minutes,
            window_start_hour: hour(row.window_start_hour, "crops.window_start_hour")?,
            window_end_hour: hour(row.window_end_hour, "crops.window_end_hour")?,
            thresholds: CwsiThresholds {
                incipient: row.cwsi_incipient,
                critical: row.cwsi_critical,
            },
            light_threshold: row.light_threshold,
        })
    }
}

impl TryFrom<PlantRow> for Plant {
    type Error = StoreError;

    fn try_from(row: PlantRow) -> Result<Self, Self::Error> {
        // ---
        let group = row
            .experimental_group
            .parse::<ExperimentalGroup>()
            .map_err(|reason| StoreError::Decode {
                field: "plants.experimental_group",
                reason,
            })?;
        let status = row.status.parse::<PlantStatus>().map_err(|reason| StoreError::Decode {
            field: "plants.status",
            reason,
        })?;

        let thermal_mask = row.thermal_mask.as_deref().and_then(|raw| {
            let decoded = decode_thermal_mask(raw);
            if decoded.is_none() {
                tracing::warn!(plant_id = row.id, "Ignoring undecodable thermal mask");
            }
            decoded
        });

        Ok(Plant {
            id: row.id,
            crop_id: row.crop_id,
            name: row.name,
            group,
            status,
            thermal_mask,
            updated_at: row.updated_at,
        })
    }
}

impl From<ReadingRow> for EnvironmentalReading {
    fn from(row: ReadingRow) -> Self {
        EnvironmentalReading {
            device_id: row.device_id,
            plant_id: row.plant_id,
            timestamp: row.timestamp,
            temperature_c: row.temperature,
            humidity: row.humidity,
            extra_data: row.extra_data.unwrap_or(serde_json::Value::Null),
        }
    }
}

impl From<CaptureRow> for ThermalCapture {
    fn from(row: CaptureRow) -> Self {
        ThermalCapture {
            device_id: row.device_id,
            plant_id: row.plant_id,
            timestamp: row.timestamp,
            temperatures: row.temperatures,
            min_temp: row.min_temp,
            max_temp: row.max_temp,
            avg_temp: row.avg_temp,
        }
    }
}

async fn insert_result(
    tx: &mut Transaction<'_, Postgres>,
    result: &AnalysisResult,
) -> Result<(), sqlx::Error> {
    // ---
    sqlx::query(
        r#"
        INSERT INTO analysis_results (
            id, plant_id, timestamp, cwsi, status,
            canopy_temp, ambient_temp, vpd, baseline_wet, baseline_dry
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(result.id)
    .bind(result.plant_id)
    .bind(result.timestamp)
    .bind(result.cwsi)
    .bind(result.status.as_str())
    .bind(result.canopy_temp_c)
    .bind(result.ambient_temp_c)
    .bind(result.vpd_kpa)
    .bind(result.baseline_wet_c)
    .bind(result.baseline_dry_c)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Compare-and-set the plant's status from `old_status` and log the change.
async fn apply_status_change(
    tx: &mut Transaction<'_, Postgres>,
    change: &StatusChange,
) -> Result<(), StoreError> {
    // ---
    let updated = sqlx::query(
        "UPDATE plants SET status = $1, updated_at = $2 WHERE id = $3 AND status = $4",
    )
    .bind(change.new_status.as_str())
    .bind(change.changed_at)
    .bind(change.plant_id)
    .bind(change.old_status.as_str())
    .execute(&mut **tx)
    .await?;

    if updated.rows_affected() == 0 {
        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM plants WHERE id = $1")
            .bind(change.plant_id)
            .fetch_optional(&mut **tx)
            .await?;
        return Err(match exists {
            Some(_) => StoreError::StatusConflict {
                plant_id: change.plant_id,
                expected: change.old_status,
            },
            None => StoreError::PlantNotFound(change.plant_id),
        });
    }

    sqlx::query(
        r#"
        INSERT INTO plant_status_history (
            id, plant_id, old_status, new_status, reason, cwsi, changed_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(change.plant_id)
    .bind(change.old_status.as_str())
    .bind(change.new_status.as_str())
    .bind(&change.reason)
    .bind(change.cwsi)
    .bind(change.changed_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl PlantsStore for PgStore {
    async fn get_crops(&self) -> Result<Vec<Crop>, StoreError> {
        // ---
        let rows: Vec<CropRow> = sqlx::query_as(
            r#"
            SELECT id, name, city, utc_offset_minutes, window_start_hour, window_end_hour,
                   cwsi_incipient, cwsi_critical, light_threshold
            FROM crops
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Crop::try_from).collect()
    }

    async fn get_plants_for_crop(&self, crop_id: i64) -> Result<Vec<Plant>, StoreError> {
        // ---
        let rows: Vec<PlantRow> = sqlx::query_as(
            r#"
            SELECT id, crop_id, name, experimental_group, status, thermal_mask, updated_at
            FROM plants
            WHERE crop_id = $1
            ORDER BY id
            "#,
        )
        .bind(crop_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Plant::try_from).collect()
    }

    async fn update_status(&self, plant_id: i64, status: PlantStatus) -> Result<(), StoreError> {
        // ---
        let updated = sqlx::query("UPDATE plants SET status = $1, updated_at = NOW() WHERE id = $2")
            .bind(status.as_str())
            .bind(plant_id)
            .execute(&self.pool)
            .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::PlantNotFound(plant_id));
        }
        Ok(())
    }

    async fn record_status_change(&self, change: &StatusChange) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        apply_status_change(&mut tx, change).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl ReadingsStore for PgStore {
    async fn get_raw_data_for_analysis(
        &self,
        plant_ids: &[i64],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<HashMap<i64, PlantRawData>, StoreError> {
        // ---
        let mut data: HashMap<i64, PlantRawData> = plant_ids
            .iter()
            .map(|id| (*id, PlantRawData::default()))
            .collect();

        if plant_ids.is_empty() {
            return Ok(data);
        }

        let readings: Vec<ReadingRow> = sqlx::query_as(
            r#"
            SELECT device_id, plant_id, timestamp, temperature, humidity, extra_data
            FROM environmental_readings
            WHERE plant_id = ANY($1) AND timestamp BETWEEN $2 AND $3
            ORDER BY timestamp
            "#,
        )
        .bind(plant_ids)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        let captures: Vec<CaptureRow> = sqlx::query_as(
            r#"
            SELECT device_id, plant_id, timestamp, temperatures, min_temp, max_temp, avg_temp
            FROM thermal_captures
            WHERE plant_id = ANY($1) AND timestamp BETWEEN $2 AND $3
            ORDER BY timestamp
            "#,
        )
        .bind(plant_ids)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        tracing::debug!(
            plants = plant_ids.len(),
            readings = readings.len(),
            captures = captures.len(),
            "Loaded raw data for analysis"
        );

        for row in readings {
            if let Some(entry) = row.plant_id.and_then(|id| data.get_mut(&id)) {
                entry.environmental_readings.push(row.into());
            }
        }
        for row in captures {
            if let Some(entry) = row.plant_id.and_then(|id| data.get_mut(&id)) {
                entry.thermal_captures.push(row.into());
            }
        }
        Ok(data)
    }
}

#[async_trait]
impl AnalysisResultsStore for PgStore {
    async fn append(&self, result: &AnalysisResult) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        insert_result(&mut tx, result).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn commit_cycle(&self, commit: &CycleCommit) -> Result<(), StoreError> {
        // ---
        // Dropping the transaction on any early return rolls everything back.
        let mut tx = self.pool.begin().await?;

        for result in &commit.results {
            insert_result(&mut tx, result).await?;
        }
        for change in &commit.status_changes {
            apply_status_change(&mut tx, change).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
