//! Go/no-go signal for analysis from weather and on-device light sensors.
//!
//! A clear-sky weather report is enough on its own. When the sky is not clear,
//! or the weather lookup fails for any reason, the crop's light sensor decides;
//! a missing light reading means "not suitable".
//!
//! Ambient temperature and humidity come from the crop's sensor reading when
//! one exists, otherwise from the weather report.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::Serialize;

use crate::alerts::{AlertCoalescer, WEATHER_FAILURE};
use crate::weather::{WeatherProvider, WeatherReport};

// ---

/// Condition keywords (lower case) that mark a clear sky.
const CLEAR_SKY_KEYWORDS: [&str; 4] = ["sunny", "clear", "despejado", "soleado"];

/// Upper bound on distinct cities held in the weather cache.
const WEATHER_CACHE_CAPACITY: u64 = 1_000;

/// Vapor pressure deficit in kPa (Magnus-Tetens).
///
/// `temp_c` in °C, `humidity_pct` as relative humidity in percent; humidity is
/// clamped to `[0, 100]`.
pub fn vpd_kpa(temp_c: f64, humidity_pct: f64) -> f64 {
    // ---
    let svp = 0.6108 * ((17.27 * temp_c) / (temp_c + 237.3)).exp();
    let avp = svp * humidity_pct.clamp(0.0, 100.0) / 100.0;
    svp - avp
}

/// True when `condition` contains a clear-sky keyword (case-insensitive).
pub fn is_clear_sky(condition: &str) -> bool {
    let condition = condition.to_lowercase();
    CLEAR_SKY_KEYWORDS.iter().any(|k| condition.contains(k))
}

/// Where the suitability decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuitabilitySource {
    Weather,
    LightSensor,
}

/// Air temperature and relative humidity around the crop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Ambient {
    pub temp_c: f64,
    pub humidity_pct: f64,
}

impl Ambient {
    pub fn vpd_kpa(&self) -> f64 {
        vpd_kpa(self.temp_c, self.humidity_pct)
    }
}

/// Inputs for one evaluation.
#[derive(Debug, Clone)]
pub struct EnvironmentQuery<'a> {
    pub city: &'a str,
    pub light_intensity: Option<f64>,
    pub light_threshold: f64,
    /// Conditions from the crop's representative sensor reading, if any.
    pub ambient: Option<Ambient>,
}

/// Outcome of an evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentalAssessment {
    pub is_suitable: bool,
    /// Sensor conditions when available, else the weather report's.
    pub ambient: Option<Ambient>,
    /// VPD of `ambient`; `None` only when neither source had data.
    pub vpd_kpa: Option<f64>,
    pub source: SuitabilitySource,
    pub condition_text: Option<String>,
    pub weather_is_night: Option<bool>,
    /// Set when the weather lookup failed and the light sensor decided.
    pub weather_error: Option<String>,
}

/// Weather plus light-sensor fusion with a read-through weather cache.
pub struct EnvironmentalDataProvider {
    weather: Arc<dyn WeatherProvider>,
    cache: Cache<String, WeatherReport>,
    coalescer: Option<Arc<AlertCoalescer>>,
}

impl EnvironmentalDataProvider {
    /// Cached reports expire `ttl` after they were fetched.
    pub fn new(weather: Arc<dyn WeatherProvider>, ttl: Duration) -> Self {
        Self {
            weather,
            cache: Cache::builder()
                .max_capacity(WEATHER_CACHE_CAPACITY)
                .time_to_live(ttl)
                .build(),
            coalescer: None,
        }
    }

    /// Count weather failures in `coalescer` so they surface as a summary alert.
    pub fn with_coalescer(mut self, coalescer: Arc<AlertCoalescer>) -> Self {
        self.coalescer = Some(coalescer);
        self
    }

    /// Decide whether conditions allow a CWSI analysis right now.
    ///
    /// Never fails: weather problems are reported through
    /// [`EnvironmentalAssessment::weather_error`].
    pub async fn evaluate(
        &self,
        query: &EnvironmentQuery<'_>,
        now: DateTime<Utc>,
    ) -> EnvironmentalAssessment {
        // ---
        let (report, weather_error) = match self.current_weather(query.city).await {
            Ok(report) => (Some(report), None),
            Err(e) => {
                tracing::warn!(city = query.city, "Weather lookup failed, using light sensor: {}", e);
                if let Some(coalescer) = &self.coalescer {
                    coalescer.record(WEATHER_FAILURE, now);
                }
                (None, Some(e))
            }
        };

        let ambient = query.ambient.or_else(|| {
            report.as_ref().map(|r| Ambient {
                temp_c: r.temp_c,
                humidity_pct: r.humidity_pct,
            })
        });
        let vpd_kpa = ambient.map(|a| a.vpd_kpa());
        let weather_is_night = report.as_ref().map(|r| r.is_night);
        let condition_text = report.map(|r| r.condition_text);

        if condition_text.as_deref().is_some_and(is_clear_sky) {
            return EnvironmentalAssessment {
                is_suitable: true,
                ambient,
                vpd_kpa,
                source: SuitabilitySource::Weather,
                condition_text,
                weather_is_night,
                weather_error,
            };
        }

        let is_suitable = query
            .light_intensity
            .is_some_and(|lux| lux >= query.light_threshold);

        tracing::debug!(
            city = query.city,
            condition = ?condition_text,
            light = ?query.light_intensity,
            threshold = query.light_threshold,
            is_suitable,
            "Suitability decided by light sensor"
        );

        EnvironmentalAssessment {
            is_suitable,
            ambient,
            vpd_kpa,
            source: SuitabilitySource::LightSensor,
            condition_text,
            weather_is_night,
            weather_error,
        }
    }

    async fn current_weather(&self, city: &str) -> Result<WeatherReport, String> {
        // ---
        let key = normalize_city(city);
        if key.is_empty() {
            return Err("crop has no city configured".to_string());
        }

        if let Some(report) = self.cache.get(&key).await {
            tracing::debug!(city = %key, "Weather cache hit");
            return Ok(report);
        }

        // Failed lookups are not cached; the next cycle asks again.
        let report = self.weather.get_current(city).await.map_err(|e| e.to_string())?;
        self.cache.insert(key, report.clone()).await;
        Ok(report)
    }
}

/// Cache key for a city query: trimmed, lower case, single-spaced.
fn normalize_city(city: &str) -> String {
    city.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
