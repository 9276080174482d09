//! Database schema management for `cwsi-engine`.
//!
//! Ensures required tables and indexes exist before the workers start.
//! Applied once on startup from `main.rs`.

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create or update the database schema (idempotent).
///
/// Crops, plants and raw telemetry are normally owned by the ingestion and
/// admin services; they are created here too so a fresh database is usable.
/// `analysis_results` and `plant_status_history` are written only by the engine.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS crops (
            id                 BIGSERIAL PRIMARY KEY,
            name               TEXT             NOT NULL,
            city               TEXT             NOT NULL,
            utc_offset_minutes INTEGER          NOT NULL DEFAULT 0,
            window_start_hour  INTEGER          NOT NULL DEFAULT 6,
            window_end_hour    INTEGER          NOT NULL DEFAULT 18,
            cwsi_incipient     DOUBLE PRECISION NOT NULL DEFAULT 0.3,
            cwsi_critical      DOUBLE PRECISION NOT NULL DEFAULT 0.6,
            light_threshold    DOUBLE PRECISION NOT NULL DEFAULT 500.0,
            CHECK (cwsi_incipient < cwsi_critical)
        );
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS plants (
            id                 BIGSERIAL PRIMARY KEY,
            crop_id            BIGINT      NOT NULL REFERENCES crops (id),
            name               TEXT        NOT NULL,
            experimental_group TEXT        NOT NULL,
            status             TEXT        NOT NULL DEFAULT 'OPTIMAL',
            thermal_mask       TEXT,
            updated_at         TIMESTAMPTZ NOT NULL DEFAULT NOW()
        );
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS environmental_readings (
            id          BIGSERIAL PRIMARY KEY,
            device_id   TEXT             NOT NULL,
            plant_id    BIGINT,
            timestamp   TIMESTAMPTZ      NOT NULL,
            temperature DOUBLE PRECISION NOT NULL,
            humidity    DOUBLE PRECISION NOT NULL,
            extra_data  JSONB
        );
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS thermal_captures (
            id           BIGSERIAL PRIMARY KEY,
            device_id    TEXT             NOT NULL,
            plant_id     BIGINT,
            timestamp    TIMESTAMPTZ      NOT NULL,
            temperatures TEXT,
            min_temp     DOUBLE PRECISION NOT NULL,
            max_temp     DOUBLE PRECISION NOT NULL,
            avg_temp     DOUBLE PRECISION NOT NULL
        );
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS analysis_results (
            id           UUID PRIMARY KEY,
            plant_id     BIGINT           NOT NULL REFERENCES plants (id),
            timestamp    TIMESTAMPTZ      NOT NULL,
            cwsi         DOUBLE PRECISION NOT NULL,
            status       TEXT             NOT NULL,
            canopy_temp  DOUBLE PRECISION NOT NULL,
            ambient_temp DOUBLE PRECISION NOT NULL,
            vpd          DOUBLE PRECISION NOT NULL,
            baseline_wet DOUBLE PRECISION NOT NULL,
            baseline_dry DOUBLE PRECISION NOT NULL
        );
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS plant_status_history (
            id         UUID PRIMARY KEY,
            plant_id   BIGINT      NOT NULL REFERENCES plants (id),
            old_status TEXT        NOT NULL,
            new_status TEXT        NOT NULL,
            reason     TEXT        NOT NULL,
            cwsi       DOUBLE PRECISION,
            changed_at TIMESTAMPTZ NOT NULL
        );
        "#,
        r#"
        CREATE INDEX IF NOT EXISTS idx_plants_crop_id
            ON plants (crop_id);
        "#,
        r#"
        CREATE INDEX IF NOT EXISTS idx_environmental_readings_plant_ts
            ON environmental_readings (plant_id, timestamp);
        "#,
        r#"
        CREATE INDEX IF NOT EXISTS idx_thermal_captures_plant_ts
            ON thermal_captures (plant_id, timestamp);
        "#,
        r#"
        CREATE INDEX IF NOT EXISTS idx_analysis_results_plant_ts
            ON analysis_results (plant_id, timestamp);
        "#,
    ];

    for statement in statements {
        sqlx::query(statement).execute(&mut *tx).await?;
    }

    tx.commit().await?;
    Ok(())
}
