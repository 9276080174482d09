//! Nightly audit of monitored plants.
//!
//! Two checks run once per local day at a fixed hour:
//!
//! - **Thermal anomaly**: at night a healthy canopy should not be much warmer
//!   than the air around it. Each environmental reading is paired with the
//!   nearest capture of the same plant (within five minutes); four consecutive
//!   pairs with `canopy - air > delta` move the plant to UNKNOWN and raise one
//!   alert. Unpaired or normal samples reset the streak.
//! - **Missing masks**: all monitored plants without a thermal mask are listed
//!   in a single alert.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Timelike, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::analysis::canopy;
use crate::error::StoreError;
use crate::models::{ExperimentalGroup, Plant, PlantRawData, PlantStatus, StatusChange};
use crate::scheduler::EngineServices;

// ---

/// Consecutive anomalous samples needed to flag a plant.
pub const ANOMALY_STREAK: u32 = 4;

/// Maximum distance between a reading and the capture it is paired with.
pub const PAIRING_TOLERANCE_SECS: i64 = 5 * 60;

pub const ANOMALY_REASON: &str = "overnight_thermal_anomaly";

#[derive(Debug, Clone)]
pub struct AuditSettings {
    /// Local hour at which the audit runs.
    pub hour: u32,
    pub utc_offset_minutes: i32,
    /// Length of the overnight window ending at the audit time.
    pub lookback: chrono::Duration,
    /// Canopy minus air temperature above which a sample is anomalous.
    pub delta_threshold_c: f64,
}

impl AuditSettings {
    fn offset(&self) -> FixedOffset {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or(Utc.fix())
    }
}

/// What one audit run found.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditReport {
    /// Plants moved to UNKNOWN by this run.
    pub anomalies: Vec<i64>,
    /// Monitored plants still lacking a thermal mask.
    pub masks_needed: Vec<String>,
}

/// Scan one plant's overnight data. Returns true once the streak trips.
pub fn detect_anomaly(plant: &Plant, data: &PlantRawData, delta_threshold_c: f64) -> bool {
    // ---
    let mut readings: Vec<_> = data.environmental_readings.iter().collect();
    readings.sort_by_key(|r| r.timestamp);

    let mut streak = 0u32;
    for reading in readings {
        let paired = data
            .thermal_captures
            .iter()
            .map(|c| (c, (c.timestamp - reading.timestamp).num_seconds().abs()))
            .filter(|(_, gap)| *gap <= PAIRING_TOLERANCE_SECS)
            .min_by_key(|(_, gap)| *gap)
            .map(|(c, _)| c);

        let anomalous = paired
            .and_then(|capture| canopy::resolve(plant, Some(capture)))
            .is_some_and(|canopy_temp| canopy_temp - reading.temperature_c > delta_threshold_c);

        if anomalous {
            streak += 1;
            if streak >= ANOMALY_STREAK {
                return true;
            }
        } else {
            streak = 0;
        }
    }
    false
}

pub struct NightlyAudit {
    services: EngineServices,
    settings: AuditSettings,
    last_run: Mutex<Option<NaiveDate>>,
}

impl NightlyAudit {
    pub fn new(services: EngineServices, settings: AuditSettings) -> Self {
        Self {
            services,
            settings,
            last_run: Mutex::new(None),
        }
    }

    /// Poll every `poll` until `shutdown` flips, running the audit when due.
    pub async fn run(self, poll: Duration, mut shutdown: watch::Receiver<bool>) {
        // ---
        let mut ticker = tokio::time::interval(poll);
        info!(
            hour = self.settings.hour,
            utc_offset_minutes = self.settings.utc_offset_minutes,
            "nightly audit started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_if_due().await {
                        error!("nightly audit failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("nightly audit stopping");
                        return;
                    }
                }
            }
        }
    }

    /// Run the audit if the local audit hour has come and today's run has
    /// not happened yet. Returns `None` when nothing was due.
    pub async fn run_if_due(&self) -> Result<Option<AuditReport>, StoreError> {
        // ---
        let now = self.services.clock.now();
        let local = now.with_timezone(&self.settings.offset());
        if local.hour() != self.settings.hour {
            return Ok(None);
        }

        let today = local.date_naive();
        {
            let last_run = self.last_run.lock().unwrap_or_else(|e| e.into_inner());
            if *last_run == Some(today) {
                return Ok(None);
            }
        }

        let report = self.run_audit(now).await?;
        *self.last_run.lock().unwrap_or_else(|e| e.into_inner()) = Some(today);
        Ok(Some(report))
    }

    /// Run both checks over every crop for the window ending at `now`.
    pub async fn run_audit(&self, now: DateTime<Utc>) -> Result<AuditReport, StoreError> {
        // ---
        let mut report = AuditReport::default();
        let crops = self.services.plants.get_crops().await?;

        for crop in &crops {
            let monitored: Vec<Plant> = self
                .services
                .plants
                .get_plants_for_crop(crop.id)
                .await?
                .into_iter()
                .filter(|p| p.group == ExperimentalGroup::Monitored)
                .collect();
            if monitored.is_empty() {
                continue;
            }

            report.masks_needed.extend(
                monitored
                    .iter()
                    .filter(|p| !p.has_mask())
                    .map(|p| p.name.clone()),
            );

            let ids: Vec<i64> = monitored.iter().map(|p| p.id).collect();
            let raw = self
                .services
                .readings
                .get_raw_data_for_analysis(&ids, now - self.settings.lookback, now)
                .await?;

            for plant in &monitored {
                let Some(data) = raw.get(&plant.id) else {
                    continue;
                };
                if !detect_anomaly(plant, data, self.settings.delta_threshold_c) {
                    continue;
                }
                if plant.status == PlantStatus::Unknown {
                    debug!(plant_id = plant.id, "anomaly persists, already UNKNOWN");
                    continue;
                }
                if self.flag_unknown(plant, now).await {
                    report.anomalies.push(plant.id);
                }
            }
        }

        if !report.masks_needed.is_empty() {
            info!(count = report.masks_needed.len(), "monitored plants without thermal mask");
            if let Err(e) = self
                .services
                .alerts
                .notify_masks_needed(&report.masks_needed)
                .await
            {
                warn!("masks-needed alert not delivered: {}", e);
            }
        }

        self.services.heartbeat.audit(now);
        info!(
            anomalies = report.anomalies.len(),
            masks_needed = report.masks_needed.len(),
            "nightly audit finished"
        );
        Ok(report)
    }

    /// Move `plant` to UNKNOWN and alert. Returns false if the change could not
    /// be stored, in which case no alert is sent and the next run retries.
    async fn flag_unknown(&self, plant: &Plant, now: DateTime<Utc>) -> bool {
        // ---
        let change = StatusChange {
            plant_id: plant.id,
            old_status: plant.status,
            new_status: PlantStatus::Unknown,
            reason: ANOMALY_REASON.to_string(),
            cwsi: None,
            changed_at: now,
        };

        if let Err(e) = self.services.plants.record_status_change(&change).await {
            error!(plant_id = plant.id, "failed to store anomaly status: {}", e);
            return false;
        }

        warn!(plant_id = plant.id, old = %plant.status, "overnight thermal anomaly, status UNKNOWN");
        if let Err(e) = self.services.alerts.notify_anomaly(plant.id).await {
            warn!(plant_id = plant.id, "anomaly alert not delivered: {}", e);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::{EnvironmentalReading, ThermalCapture};
    use chrono::TimeZone;

    fn plant() -> Plant {
        Plant {
            id: 9,
            crop_id: 1,
            name: "vine-9".to_string(),
            group: ExperimentalGroup::Monitored,
            status: PlantStatus::Optimal,
            thermal_mask: None,
            updated_at: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        }
    }

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 1, 0, 0).unwrap() + chrono::Duration::minutes(minute)
    }

    /// One (air, canopy) sample per entry, fifteen minutes apart; the capture
    /// trails its reading by `lag` minutes.
    fn night(samples: &[(f64, f64)], lag: i64) -> PlantRawData {
        let mut data = PlantRawData::default();
        for (i, (air, canopy)) in samples.iter().enumerate() {
            let minute = i as i64 * 15;
            data.environmental_readings.push(EnvironmentalReading {
                device_id: "env".to_string(),
                plant_id: Some(9),
                timestamp: at(minute),
                temperature_c: *air,
                humidity: 80.0,
                extra_data: serde_json::Value::Null,
            });
            data.thermal_captures.push(ThermalCapture {
                device_id: "cam".to_string(),
                plant_id: Some(9),
                timestamp: at(minute + lag),
                temperatures: None,
                min_temp: *canopy - 1.0,
                max_temp: *canopy + 1.0,
                avg_temp: *canopy,
            });
        }
        data
    }

    #[test]
    fn test_four_consecutive_trip() {
        // ---
        let hot = (12.0, 15.0);
        let data = night(&[hot, hot, hot, hot], 1);
        assert!(detect_anomaly(&plant(), &data, 2.0));
    }

    #[test]
    fn test_three_are_not_enough() {
        // ---
        let hot = (12.0, 15.0);
        let data = night(&[hot, hot, hot], 1);
        assert!(!detect_anomaly(&plant(), &data, 2.0));
    }

    #[test]
    fn test_normal_sample_resets_streak() {
        // ---
        let hot = (12.0, 15.0);
        let cool = (12.0, 11.5);
        let data = night(&[hot, hot, hot, cool, hot, hot, hot], 1);
        assert!(!detect_anomaly(&plant(), &data, 2.0));

        // Delta equal to the threshold is not anomalous.
        let edge = (12.0, 14.0);
        let data = night(&[hot, hot, edge, hot, hot], 1);
        assert!(!detect_anomaly(&plant(), &data, 2.0));
    }

    #[test]
    fn test_unpaired_sample_resets_streak() {
        // ---
        let hot = (12.0, 15.0);
        let mut data = night(&[hot, hot, hot, hot], 1);
        // Third reading (minute 30) is left without a capture within 5 minutes.
        data.thermal_captures[2].timestamp = at(37);
        assert!(!detect_anomaly(&plant(), &data, 2.0));

        data.thermal_captures[2].timestamp = at(34);
        assert!(detect_anomaly(&plant(), &data, 2.0));
    }

    #[test]
    fn test_captures_beyond_tolerance_never_pair() {
        // ---
        let hot = (12.0, 15.0);
        let data = night(&[hot, hot, hot, hot, hot], 6);
        assert!(!detect_anomaly(&plant(), &data, 2.0));
    }
}
