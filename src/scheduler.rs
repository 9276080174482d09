//! Recurring CWSI analysis over every crop.
//!
//! Each tick walks the crops one after another. For a crop inside its local
//! analysis window with a complete experimental setup, the cycle is:
//!
//! 1. load the window's readings and captures for all of the crop's plants
//! 2. gate on environmental suitability (weather, then light sensor) and
//!    settle the ambient conditions (sensor reading, then weather report)
//! 3. derive the wet/dry baselines from CONTROL and STRESS plants
//! 4. for each MONITORED plant: canopy temperature -> CWSI -> next status
//! 5. dispatch one alert per status transition
//! 6. commit results, status updates and history rows as one unit of work
//!
//! Alerts go out before the commit. If the commit then fails, the stored
//! status is unchanged and the next tick recomputes and alerts again; if it
//! succeeds, a replay of the same cycle finds the stored status already equal
//! to the computed one and stays silent.
//!
//! Status writes are compare-and-set against the status read at the start of
//! the cycle. If another writer (the nightly audit) changed a plant meanwhile,
//! the whole commit is rolled back and the next tick starts from the new status.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::alerts::{AlertCoalescer, AlertDispatcher, ALERT_DISPATCH_FAILURE};
use crate::analysis::{
    baseline, canopy, cwsi, status, Ambient, EnvironmentQuery, EnvironmentalDataProvider,
};
use crate::clock::Clock;
use crate::error::{BaselineError, StoreError};
use crate::heartbeat::Heartbeat;
use crate::models::{
    AnalysisResult, Crop, CycleCommit, EnvironmentalReading, ExperimentalGroup, Plant,
    PlantRawData, PlantStatus, StatusChange, ThermalCapture,
};
use crate::store::{AnalysisResultsStore, PlantsStore, ReadingsStore};

// ---

pub const ANALYSIS_REASON: &str = "cwsi_analysis";

/// External collaborators shared by the scheduler and the nightly audit.
#[derive(Clone)]
pub struct EngineServices {
    pub plants: Arc<dyn PlantsStore>,
    pub readings: Arc<dyn ReadingsStore>,
    pub results: Arc<dyn AnalysisResultsStore>,
    pub alerts: Arc<dyn AlertDispatcher>,
    pub clock: Arc<dyn Clock>,
    pub coalescer: Arc<AlertCoalescer>,
    pub heartbeat: Arc<Heartbeat>,
}

/// What happened to one crop during a tick.
#[derive(Debug, Clone, PartialEq)]
pub enum CropOutcome {
    OutsideWindow,
    InvalidConfiguration(String),
    Unsuitable,
    InsufficientBaseline(BaselineError),
    Completed { results: usize, transitions: usize },
    StoreFailed(String),
}

impl CropOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// True when `hour` lies in the half-open local window `[start, end)`.
///
/// A window whose start is after its end wraps past midnight; equal bounds
/// describe an empty window.
pub fn in_window(start: u32, end: u32, hour: u32) -> bool {
    if start <= end {
        hour >= start && hour < end
    } else {
        hour >= start || hour < end
    }
}

/// Check that a crop can be analysed at all.
pub fn validate_configuration(crop: &Crop, plants: &[Plant]) -> Result<(), String> {
    // ---
    if crop.local_offset().is_none() {
        return Err(offset_out_of_range(crop));
    }
    if !crop.thresholds.is_valid() {
        return Err(format!(
            "CWSI thresholds must satisfy incipient < critical (got {} / {})",
            crop.thresholds.incipient, crop.thresholds.critical
        ));
    }
    if crop.window_start_hour > 23 || crop.window_end_hour > 24 {
        return Err(format!(
            "analysis window {}..{} is not a valid hour range",
            crop.window_start_hour, crop.window_end_hour
        ));
    }

    let missing: Vec<&str> = [
        ExperimentalGroup::Control,
        ExperimentalGroup::Stress,
        ExperimentalGroup::Monitored,
    ]
    .into_iter()
    .filter(|group| !plants.iter().any(|p| p.group == *group))
    .map(|group| group.as_str())
    .collect();

    if !missing.is_empty() {
        return Err(format!("no plants in group(s) {}", missing.join(", ")));
    }
    Ok(())
}

fn offset_out_of_range(crop: &Crop) -> String {
    format!(
        "UTC offset of {} minutes is outside (-1440, 1440)",
        crop.utc_offset_minutes
    )
}

/// Earliest environmental reading across the crop's plants.
fn representative_reading(raw: &HashMap<i64, PlantRawData>) -> Option<&EnvironmentalReading> {
    raw.values()
        .flat_map(|d| d.environmental_readings.iter())
        .min_by_key(|r| (r.timestamp, r.plant_id))
}

/// Every capture in the window taken of a plant in `group`.
fn group_captures<'a>(
    plants: &'a [Plant],
    raw: &'a HashMap<i64, PlantRawData>,
    group: ExperimentalGroup,
) -> impl Iterator<Item = &'a ThermalCapture> + 'a {
    plants
        .iter()
        .filter(move |p| p.group == group)
        .filter_map(move |p| raw.get(&p.id))
        .flat_map(|d| d.thermal_captures.iter())
}

pub struct AnalysisScheduler {
    services: EngineServices,
    environment: EnvironmentalDataProvider,
    interval: Duration,
}

impl AnalysisScheduler {
    pub fn new(
        services: EngineServices,
        environment: EnvironmentalDataProvider,
        interval: Duration,
    ) -> Self {
        Self {
            services,
            environment,
            interval,
        }
    }

    /// Tick until `shutdown` flips to true. A tick in progress always runs to
    /// completion; its writes are a single commit per crop.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        // ---
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(interval_sec = self.interval.as_secs(), "analysis scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_tick().await {
                        error!("analysis tick failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("analysis scheduler stopping");
                        return;
                    }
                }
            }
        }
    }

    /// One pass over every crop, followed by any due failure summaries.
    pub async fn run_tick(&self) -> Result<Vec<(i64, CropOutcome)>, StoreError> {
        // ---
        let now = self.services.clock.now();
        let crops = self.services.plants.get_crops().await?;
        debug!(crops = crops.len(), "analysis tick");

        let mut outcomes = Vec::with_capacity(crops.len());
        for crop in &crops {
            let outcome = self.analyze_crop(crop, now).await;
            debug!(crop_id = crop.id, ?outcome, "crop cycle finished");
            outcomes.push((crop.id, outcome));
        }

        self.flush_failure_summaries(now).await;

        let completed = outcomes.iter().filter(|(_, o)| o.is_completed()).count() as u64;
        self.services.heartbeat.tick(now, completed);
        Ok(outcomes)
    }

    /// Run one crop's cycle at `now`.
    pub async fn analyze_crop(&self, crop: &Crop, now: DateTime<Utc>) -> CropOutcome {
        // ---
        let Some(offset) = crop.local_offset() else {
            let reason = offset_out_of_range(crop);
            info!(crop_id = crop.id, crop = %crop.name, "skipping crop: {}", reason);
            return CropOutcome::InvalidConfiguration(reason);
        };
        let local_hour = now.with_timezone(&offset).hour();
        if !in_window(crop.window_start_hour, crop.window_end_hour, local_hour) {
            debug!(crop_id = crop.id, local_hour, "outside analysis window");
            return CropOutcome::OutsideWindow;
        }

        let plants = match self.services.plants.get_plants_for_crop(crop.id).await {
            Ok(plants) => plants,
            Err(e) => {
                error!(crop_id = crop.id, "failed to load plants: {}", e);
                return CropOutcome::StoreFailed(e.to_string());
            }
        };

        if let Err(reason) = validate_configuration(crop, &plants) {
            info!(crop_id = crop.id, crop = %crop.name, "skipping crop: {}", reason);
            return CropOutcome::InvalidConfiguration(reason);
        }

        let window = chrono::Duration::from_std(self.interval).unwrap_or(chrono::Duration::minutes(30));
        let plant_ids: Vec<i64> = plants.iter().map(|p| p.id).collect();
        let raw = match self
            .services
            .readings
            .get_raw_data_for_analysis(&plant_ids, now - window, now)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                error!(crop_id = crop.id, "failed to load readings: {}", e);
                return CropOutcome::StoreFailed(e.to_string());
            }
        };

        let reading = representative_reading(&raw);
        if reading.is_none() {
            debug!(crop_id = crop.id, "no environmental readings in window, using weather for ambient");
        }

        let assessment = self
            .environment
            .evaluate(
                &EnvironmentQuery {
                    city: &crop.city,
                    light_intensity: reading.and_then(|r| r.light_intensity()),
                    light_threshold: crop.light_threshold,
                    ambient: reading.map(|r| Ambient {
                        temp_c: r.temperature_c,
                        humidity_pct: r.humidity,
                    }),
                },
                now,
            )
            .await;

        if !assessment.is_suitable {
            info!(
                crop_id = crop.id,
                source = ?assessment.source,
                condition = ?assessment.condition_text,
                "conditions not suitable for analysis"
            );
            return CropOutcome::Unsuitable;
        }
        let (Some(ambient), Some(vpd_kpa)) = (assessment.ambient, assessment.vpd_kpa) else {
            info!(crop_id = crop.id, "no ambient temperature from sensors or weather");
            return CropOutcome::Unsuitable;
        };
        if assessment.weather_is_night == Some(true) {
            warn!(crop_id = crop.id, "weather provider reports night inside the analysis window");
        }

        let baselines = match baseline::compute(
            group_captures(&plants, &raw, ExperimentalGroup::Control),
            group_captures(&plants, &raw, ExperimentalGroup::Stress),
        ) {
            Ok(b) => b,
            Err(e) => {
                info!(crop_id = crop.id, "skipping crop: {}", e);
                return CropOutcome::InsufficientBaseline(e);
            }
        };

        let mut commit = CycleCommit::default();
        for plant in plants.iter().filter(|p| p.group == ExperimentalGroup::Monitored) {
            let data = raw.get(&plant.id);
            let Some(canopy_temp) = canopy::resolve(plant, data.and_then(|d| d.latest_capture())) else {
                debug!(plant_id = plant.id, "no thermal capture in window, skipping plant");
                continue;
            };

            let index = cwsi::compute(canopy_temp, baselines.t_wet, baselines.t_dry);
            let next = status::next(index, &crop.thresholds, plant.status);
            let ambient_temp_c = data
                .and_then(|d| d.latest_reading())
                .map_or(ambient.temp_c, |r| r.temperature_c);

            commit.results.push(AnalysisResult {
                id: Uuid::new_v4(),
                plant_id: plant.id,
                timestamp: now,
                cwsi: index,
                status: next,
                canopy_temp_c: canopy_temp,
                ambient_temp_c,
                vpd_kpa,
                baseline_wet_c: baselines.t_wet,
                baseline_dry_c: baselines.t_dry,
            });

            if next != plant.status {
                info!(
                    plant_id = plant.id,
                    old = %plant.status,
                    new = %next,
                    cwsi = index,
                    "plant status changed"
                );
                self.dispatch_status_alert(plant, next, index, now).await;
                commit.status_changes.push(StatusChange {
                    plant_id: plant.id,
                    old_status: plant.status,
                    new_status: next,
                    reason: ANALYSIS_REASON.to_string(),
                    cwsi: Some(index),
                    changed_at: now,
                });
            }
        }

        let results = commit.results.len();
        let transitions = commit.status_changes.len();
        if commit.is_empty() {
            info!(crop_id = crop.id, "no monitored plant had a capture in window");
            return CropOutcome::Completed { results, transitions };
        }

        match self.services.results.commit_cycle(&commit).await {
            Ok(()) => {}
            Err(e @ StoreError::StatusConflict { .. }) => {
                warn!(crop_id = crop.id, "status changed concurrently, will retry next tick: {}", e);
                return CropOutcome::StoreFailed(e.to_string());
            }
            Err(e) => {
                error!(crop_id = crop.id, "cycle commit failed, will retry next tick: {}", e);
                return CropOutcome::StoreFailed(e.to_string());
            }
        }

        info!(
            crop_id = crop.id,
            t_wet = baselines.t_wet,
            t_dry = baselines.t_dry,
            vpd = vpd_kpa,
            results,
            transitions,
            "crop cycle committed"
        );
        CropOutcome::Completed { results, transitions }
    }

    async fn dispatch_status_alert(
        &self,
        plant: &Plant,
        next: PlantStatus,
        index: f64,
        now: DateTime<Utc>,
    ) {
        // ---
        if let Err(e) = self
            .services
            .alerts
            .notify_status_change(plant.id, plant.status, next, index)
            .await
        {
            warn!(plant_id = plant.id, "status alert not delivered: {}", e);
            self.services.coalescer.record(ALERT_DISPATCH_FAILURE, now);
        }
    }

    async fn flush_failure_summaries(&self, now: DateTime<Utc>) {
        // ---
        for summary in self.services.coalescer.drain_due(now) {
            info!(
                alert_type = %summary.alert_type,
                count = summary.count,
                "sending failure summary"
            );
            if let Err(e) = self.services.alerts.notify_failure_summary(&summary).await {
                warn!(alert_type = %summary.alert_type, "failure summary not delivered: {}", e);
            }
        }
    }
}
