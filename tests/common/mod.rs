//! Shared fixtures for the engine integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

use cwsi_engine::alerts::{AlertCoalescer, AlertDispatcher, AlertGroupSummary};
use cwsi_engine::analysis::EnvironmentalDataProvider;
use cwsi_engine::clock::ManualClock;
use cwsi_engine::error::{AlertError, WeatherError};
use cwsi_engine::heartbeat::Heartbeat;
use cwsi_engine::models::MaskPoint;
use cwsi_engine::store::MemoryStore;
use cwsi_engine::weather::{WeatherProvider, WeatherReport};
use cwsi_engine::{
    AnalysisScheduler, Crop, CwsiThresholds, EngineServices, EnvironmentalReading,
    ExperimentalGroup, Plant, PlantStatus, ThermalCapture,
};

// ---

pub const CROP_ID: i64 = 1;
pub const CONTROL_A: i64 = 10;
pub const CONTROL_B: i64 = 11;
pub const STRESS_A: i64 = 20;
pub const STRESS_B: i64 = 21;
pub const MONITORED: i64 = 30;

pub const INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Conditions reported by [`StubWeather`]; distinct from the sensor readings.
pub const WEATHER_TEMP_C: f64 = 31.0;
pub const WEATHER_HUMIDITY_PCT: f64 = 40.0;

/// 2025-06-01 at `hour:minute` UTC.
pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, hour, minute, 0).unwrap()
}

/// Weather stub returning a fixed condition, or failing when `None`.
pub struct StubWeather {
    condition: Mutex<Option<String>>,
    pub calls: AtomicUsize,
}

impl StubWeather {
    pub fn new(condition: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            condition: Mutex::new(condition.map(str::to_string)),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl WeatherProvider for StubWeather {
    async fn get_current(&self, _city: &str) -> Result<WeatherReport, WeatherError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.condition.lock().unwrap().clone() {
            Some(condition_text) => Ok(WeatherReport {
                temp_c: WEATHER_TEMP_C,
                humidity_pct: WEATHER_HUMIDITY_PCT,
                is_night: false,
                condition_text,
            }),
            None => Err(WeatherError::Malformed("stub outage".to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SentAlert {
    StatusChange {
        plant_id: i64,
        old: PlantStatus,
        new: PlantStatus,
        cwsi: f64,
    },
    Anomaly(i64),
    MasksNeeded(Vec<String>),
    Summary(AlertGroupSummary),
}

/// Dispatcher recording every alert; can be told to fail deliveries.
#[derive(Default)]
pub struct RecordingAlerts {
    sent: Mutex<Vec<SentAlert>>,
    fail: AtomicBool,
}

impl RecordingAlerts {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentAlert> {
        self.sent.lock().unwrap().clone()
    }

    pub fn status_changes(&self) -> Vec<SentAlert> {
        self.sent()
            .into_iter()
            .filter(|a| matches!(a, SentAlert::StatusChange { .. }))
            .collect()
    }

    fn push(&self, alert: SentAlert) -> Result<(), AlertError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AlertError::Delivery("stub failure".to_string()));
        }
        self.sent.lock().unwrap().push(alert);
        Ok(())
    }
}

#[async_trait]
impl AlertDispatcher for RecordingAlerts {
    async fn notify_status_change(
        &self,
        plant_id: i64,
        old_status: PlantStatus,
        new_status: PlantStatus,
        cwsi: f64,
    ) -> Result<(), AlertError> {
        self.push(SentAlert::StatusChange {
            plant_id,
            old: old_status,
            new: new_status,
            cwsi,
        })
    }

    async fn notify_anomaly(&self, plant_id: i64) -> Result<(), AlertError> {
        self.push(SentAlert::Anomaly(plant_id))
    }

    async fn notify_masks_needed(&self, plant_names: &[String]) -> Result<(), AlertError> {
        self.push(SentAlert::MasksNeeded(plant_names.to_vec()))
    }

    async fn notify_failure_summary(&self, summary: &AlertGroupSummary) -> Result<(), AlertError> {
        self.push(SentAlert::Summary(summary.clone()))
    }
}

pub fn crop() -> Crop {
    Crop {
        id: CROP_ID,
        name: "greenhouse tomatoes".to_string(),
        city: "Sevilla".to_string(),
        utc_offset_minutes: 0,
        window_start_hour: 6,
        window_end_hour: 18,
        thresholds: CwsiThresholds {
            incipient: 0.3,
            critical: 0.6,
        },
        light_threshold: 500.0,
    }
}

pub fn plant(id: i64, group: ExperimentalGroup) -> Plant {
    Plant {
        id,
        crop_id: CROP_ID,
        name: format!("plant-{id}"),
        group,
        status: PlantStatus::Optimal,
        thermal_mask: Some(vec![MaskPoint { x: 0, y: 0 }]),
        updated_at: at(0, 0),
    }
}

pub fn reading(plant_id: i64, timestamp: DateTime<Utc>, light: Option<f64>) -> EnvironmentalReading {
    EnvironmentalReading {
        device_id: format!("env-{plant_id}"),
        plant_id: Some(plant_id),
        timestamp,
        temperature_c: 25.0,
        humidity: 60.0,
        extra_data: match light {
            Some(lux) => json!({ "light_intensity": lux }),
            None => json!({}),
        },
    }
}

/// Capture whose per-cell frame is uniform at `avg`.
pub fn capture(plant_id: i64, timestamp: DateTime<Utc>, avg: f64) -> ThermalCapture {
    let cells = vec![avg; 32 * 24];
    ThermalCapture {
        device_id: format!("cam-{plant_id}"),
        plant_id: Some(plant_id),
        timestamp,
        temperatures: Some(serde_json::to_string(&cells).unwrap()),
        min_temp: avg,
        max_temp: avg,
        avg_temp: avg,
    }
}

/// Capture with a frame average of 20.0 but hot cells at (0,0) = 26.0 and
/// (1,0) = 28.0.
pub fn hotspot_capture(plant_id: i64, timestamp: DateTime<Utc>) -> ThermalCapture {
    let mut cells = vec![20.0; 32 * 24];
    cells[0] = 26.0;
    cells[1] = 28.0;
    ThermalCapture {
        device_id: format!("cam-{plant_id}"),
        plant_id: Some(plant_id),
        timestamp,
        temperatures: Some(serde_json::to_string(&cells).unwrap()),
        min_temp: 20.0,
        max_temp: 28.0,
        avg_temp: 20.0,
    }
}

/// The crop from the reference scenario: CONTROL mean 22.0, STRESS max 30.0
/// and one MONITORED plant at `monitored_canopy`, all captured at `when`.
pub fn seed_scenario(store: &MemoryStore, when: DateTime<Utc>, monitored_canopy: f64) {
    seed_plants(store);
    seed_window(store, when, monitored_canopy, Some(800.0));
}

pub fn seed_plants(store: &MemoryStore) {
    store.add_crop(crop());
    for (id, group) in [
        (CONTROL_A, ExperimentalGroup::Control),
        (CONTROL_B, ExperimentalGroup::Control),
        (STRESS_A, ExperimentalGroup::Stress),
        (STRESS_B, ExperimentalGroup::Stress),
        (MONITORED, ExperimentalGroup::Monitored),
    ] {
        store.add_plant(plant(id, group));
    }
}

/// One environmental reading plus one capture per plant, all at `when`.
pub fn seed_window(
    store: &MemoryStore,
    when: DateTime<Utc>,
    monitored_canopy: f64,
    light: Option<f64>,
) {
    store.add_reading(reading(CONTROL_A, when, light));
    store.add_capture(capture(CONTROL_A, when, 21.0));
    store.add_capture(capture(CONTROL_B, when, 23.0));
    store.add_capture(capture(STRESS_A, when, 28.0));
    store.add_capture(capture(STRESS_B, when, 30.0));
    store.add_capture(capture(MONITORED, when, monitored_canopy));
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub alerts: Arc<RecordingAlerts>,
    pub weather: Arc<StubWeather>,
    pub clock: Arc<ManualClock>,
    pub coalescer: Arc<AlertCoalescer>,
    pub heartbeat: Arc<Heartbeat>,
}

impl Harness {
    pub fn new(now: DateTime<Utc>, condition: Option<&str>) -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            alerts: RecordingAlerts::new(),
            weather: StubWeather::new(condition),
            clock: Arc::new(ManualClock::new(now)),
            coalescer: Arc::new(AlertCoalescer::new(Duration::from_secs(3600))),
            heartbeat: Arc::new(Heartbeat::new()),
        }
    }

    pub fn services(&self) -> EngineServices {
        EngineServices {
            plants: self.store.clone(),
            readings: self.store.clone(),
            results: self.store.clone(),
            alerts: self.alerts.clone(),
            clock: self.clock.clone(),
            coalescer: Arc::clone(&self.coalescer),
            heartbeat: Arc::clone(&self.heartbeat),
        }
    }

    pub fn scheduler(&self) -> AnalysisScheduler {
        self.scheduler_with(self.services())
    }

    /// Scheduler over `services`, sharing this harness's weather and coalescer.
    pub fn scheduler_with(&self, services: EngineServices) -> AnalysisScheduler {
        let environment =
            EnvironmentalDataProvider::new(self.weather.clone(), Duration::from_secs(30 * 60))
                .with_coalescer(Arc::clone(&self.coalescer));
        AnalysisScheduler::new(services, environment, INTERVAL)
    }
}
