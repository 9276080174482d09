//! Data models for crops, plants, raw telemetry and analysis output.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---

/// Width of the thermal camera grid, in cells.
pub const THERMAL_GRID_WIDTH: usize = 32;

/// Height of the thermal camera grid, in cells.
pub const THERMAL_GRID_HEIGHT: usize = 24;

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Role a plant plays in a crop's experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExperimentalGroup {
    // ---
    /// Well-watered reference plants, source of the wet baseline.
    Control,
    /// Deliberately stressed reference plants, source of the dry baseline.
    Stress,
    /// Plants under analysis.
    Monitored,
}

/// Health status of a monitored plant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlantStatus {
    // ---
    Optimal,
    MildStress,
    SevereStress,
    Recovering,
    Unknown,
}

impl ExperimentalGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Control => "CONTROL",
            Self::Stress => "STRESS",
            Self::Monitored => "MONITORED",
        }
    }
}

impl PlantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Optimal => "OPTIMAL",
            Self::MildStress => "MILD_STRESS",
            Self::SevereStress => "SEVERE_STRESS",
            Self::Recovering => "RECOVERING",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// True for the two stressed states that trigger recovery hysteresis.
    pub fn is_stressed(&self) -> bool {
        matches!(self, Self::MildStress | Self::SevereStress)
    }
}

impl fmt::Display for ExperimentalGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for PlantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExperimentalGroup {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CONTROL" => Ok(Self::Control),
            "STRESS" => Ok(Self::Stress),
            "MONITORED" => Ok(Self::Monitored),
            other => Err(format!("unknown experimental group '{other}'")),
        }
    }
}

impl FromStr for PlantStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OPTIMAL" => Ok(Self::Optimal),
            "MILD_STRESS" => Ok(Self::MildStress),
            "SEVERE_STRESS" => Ok(Self::SevereStress),
            "RECOVERING" => Ok(Self::Recovering),
            "UNKNOWN" => Ok(Self::Unknown),
            other => Err(format!("unknown plant status '{other}'")),
        }
    }
}

/// CWSI cut-offs for a crop. Valid only when `incipient < critical`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CwsiThresholds {
    pub incipient: f64,
    pub critical: f64,
}

impl CwsiThresholds {
    pub fn is_valid(&self) -> bool {
        self.incipient.is_finite() && self.critical.is_finite() && self.incipient < self.critical
    }
}

/// A crop and the parameters that drive its analysis cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Crop {
    // ---
    pub id: i64,
    pub name: String,
    /// City query handed to the weather provider.
    pub city: String,
    /// Offset of the crop's local clock from UTC, in minutes.
    pub utc_offset_minutes: i32,
    /// First local hour (inclusive) in which analysis may run.
    pub window_start_hour: u32,
    /// Local hour (exclusive) at which the analysis window closes.
    pub window_end_hour: u32,
    pub thresholds: CwsiThresholds,
    /// Minimum light intensity accepted when the weather lookup is inconclusive.
    pub light_threshold: f64,
}

impl Crop {
    /// Fixed offset for the crop's local time, `None` unless strictly within a day.
    pub fn local_offset(&self) -> Option<FixedOffset> {
        if self.utc_offset_minutes.unsigned_abs() >= MINUTES_PER_DAY {
            return None;
        }
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
    }
}

/// One pixel of a thermal mask, in grid coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskPoint {
    pub x: i32,
    pub y: i32,
}

/// A plant registered under a crop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plant {
    // ---
    pub id: i64,
    pub crop_id: i64,
    pub name: String,
    pub group: ExperimentalGroup,
    pub status: PlantStatus,
    /// Canopy pixels selected by the user; `None` when no mask was drawn or
    /// the stored mask could not be decoded.
    pub thermal_mask: Option<Vec<MaskPoint>>,
    pub updated_at: DateTime<Utc>,
}

impl Plant {
    pub fn has_mask(&self) -> bool {
        self.thermal_mask.as_ref().is_some_and(|m| !m.is_empty())
    }
}

/// Decode a stored thermal mask.
///
/// Accepts either `[{"x":1,"y":2}, ...]` or `[[1,2], ...]`. Anything else is
/// treated as "no mask" so that a corrupt mask never fails a cycle.
pub fn decode_thermal_mask(raw: &str) -> Option<Vec<MaskPoint>> {
    // ---
    if let Ok(points) = serde_json::from_str::<Vec<MaskPoint>>(raw) {
        return Some(points);
    }
    serde_json::from_str::<Vec<[i32; 2]>>(raw)
        .ok()
        .map(|pairs| pairs.into_iter().map(|[x, y]| MaskPoint { x, y }).collect())
}

/// Ambient reading from a field device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentalReading {
    // ---
    pub device_id: String,
    pub plant_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub temperature_c: f64,
    pub humidity: f64,
    /// Free-form device payload (`light_intensity`, `is_night`, ...).
    pub extra_data: serde_json::Value,
}

impl EnvironmentalReading {
    /// Light intensity reported by the device, if any.
    pub fn light_intensity(&self) -> Option<f64> {
        // ---
        let value = self.extra_data.get("light_intensity")?;
        match value {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .filter(|v| v.is_finite())
    }
}

/// A frame from a thermal camera.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThermalCapture {
    // ---
    pub device_id: String,
    pub plant_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    /// Row-major per-cell temperatures serialized as a JSON array.
    pub temperatures: Option<String>,
    pub min_temp: f64,
    pub max_temp: f64,
    pub avg_temp: f64,
}

impl ThermalCapture {
    /// Decode the per-cell temperature array. `None` when absent or malformed.
    pub fn cells(&self) -> Option<Vec<f64>> {
        let raw = self.temperatures.as_deref()?;
        serde_json::from_str::<Vec<f64>>(raw)
            .ok()
            .filter(|cells| !cells.is_empty())
    }
}

/// Raw telemetry fetched for one plant over an analysis window.
#[derive(Debug, Clone, Default)]
pub struct PlantRawData {
    pub environmental_readings: Vec<EnvironmentalReading>,
    pub thermal_captures: Vec<ThermalCapture>,
}

impl PlantRawData {
    pub fn latest_capture(&self) -> Option<&ThermalCapture> {
        self.thermal_captures.iter().max_by_key(|c| c.timestamp)
    }

    pub fn latest_reading(&self) -> Option<&EnvironmentalReading> {
        self.environmental_readings.iter().max_by_key(|r| r.timestamp)
    }
}

/// One row of the analysis audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResult {
    // ---
    pub id: Uuid,
    pub plant_id: i64,
    pub timestamp: DateTime<Utc>,
    pub cwsi: f64,
    pub status: PlantStatus,
    pub canopy_temp_c: f64,
    pub ambient_temp_c: f64,
    pub vpd_kpa: f64,
    pub baseline_wet_c: f64,
    pub baseline_dry_c: f64,
}

/// Status change applied to a plant, together with its history entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusChange {
    pub plant_id: i64,
    pub old_status: PlantStatus,
    pub new_status: PlantStatus,
    pub reason: String,
    pub cwsi: Option<f64>,
    pub changed_at: DateTime<Utc>,
}

/// Everything one crop's cycle writes, applied as a single unit of work.
#[derive(Debug, Clone, Default)]
pub struct CycleCommit {
    pub results: Vec<AnalysisResult>,
    pub status_changes: Vec<StatusChange>,
}

impl CycleCommit {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty() && self.status_changes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn reading_with_extra(extra: serde_json::Value) -> EnvironmentalReading {
        // ---
        EnvironmentalReading {
            device_id: "env-1".to_string(),
            plant_id: Some(1),
            timestamp: Utc.with_ymd_and_hms(2025, 3, 26, 10, 0, 0).unwrap(),
            temperature_c: 25.0,
            humidity: 60.0,
            extra_data: extra,
        }
    }

    #[test]
    fn test_status_round_trip_names() {
        // ---
        for status in [
            PlantStatus::Optimal,
            PlantStatus::MildStress,
            PlantStatus::SevereStress,
            PlantStatus::Recovering,
            PlantStatus::Unknown,
        ] {
            assert_eq!(status.as_str().parse::<PlantStatus>().unwrap(), status);
        }
        assert_eq!("monitored".parse::<ExperimentalGroup>().unwrap(), ExperimentalGroup::Monitored);
        assert!("WILTED".parse::<PlantStatus>().is_err());
    }

    #[test]
    fn test_thresholds_must_increase() {
        // ---
        assert!(CwsiThresholds { incipient: 0.3, critical: 0.6 }.is_valid());
        assert!(!CwsiThresholds { incipient: 0.6, critical: 0.6 }.is_valid());
        assert!(!CwsiThresholds { incipient: 0.7, critical: 0.6 }.is_valid());
        assert!(!CwsiThresholds { incipient: f64::NAN, critical: 0.6 }.is_valid());
    }

    #[test]
    fn test_light_intensity_accepts_numbers_and_strings() {
        // ---
        assert_eq!(reading_with_extra(json!({"light_intensity": 820.5})).light_intensity(), Some(820.5));
        assert_eq!(reading_with_extra(json!({"light_intensity": "400"})).light_intensity(), Some(400.0));
        assert_eq!(reading_with_extra(json!({"light_intensity": true})).light_intensity(), None);
        assert_eq!(reading_with_extra(json!({})).light_intensity(), None);
        assert_eq!(reading_with_extra(json!(null)).light_intensity(), None);
    }

    #[test]
    fn test_decode_mask_formats() {
        // ---
        let objects = decode_thermal_mask(r#"[{"x":0,"y":0},{"x":1,"y":0}]"#).unwrap();
        let pairs = decode_thermal_mask("[[0,0],[1,0]]").unwrap();
        assert_eq!(objects, pairs);
        assert_eq!(decode_thermal_mask("not a mask"), None);
    }

    #[test]
    fn test_capture_cells_malformed_is_none() {
        // ---
        let mut capture = ThermalCapture {
            device_id: "cam-1".to_string(),
            plant_id: Some(1),
            timestamp: Utc.with_ymd_and_hms(2025, 3, 26, 10, 0, 0).unwrap(),
            temperatures: Some("[21.5, 22.5]".to_string()),
            min_temp: 21.5,
            max_temp: 22.5,
            avg_temp: 22.0,
        };
        assert_eq!(capture.cells(), Some(vec![21.5, 22.5]));

        capture.temperatures = Some("{broken".to_string());
        assert_eq!(capture.cells(), None);

        capture.temperatures = None;
        assert_eq!(capture.cells(), None);
    }

    #[test]
    fn test_local_offset() {
        // ---
        let crop = Crop {
            id: 1,
            name: "tomato".to_string(),
            city: "Madrid".to_string(),
            utc_offset_minutes: 120,
            window_start_hour: 6,
            window_end_hour: 18,
            thresholds: CwsiThresholds { incipient: 0.3, critical: 0.6 },
            light_threshold: 500.0,
        };
        assert_eq!(crop.local_offset().unwrap().local_minus_utc(), 7200);

        let mut west = crop.clone();
        west.utc_offset_minutes = -300;
        assert_eq!(west.local_offset().unwrap().local_minus_utc(), -18_000);
    }

    #[test]
    fn test_local_offset_out_of_range_is_none() {
        // ---
        let mut crop = Crop {
            id: 1,
            name: "tomato".to_string(),
            city: "Madrid".to_string(),
            utc_offset_minutes: 40_000_000,
            window_start_hour: 6,
            window_end_hour: 18,
            thresholds: CwsiThresholds { incipient: 0.3, critical: 0.6 },
            light_threshold: 500.0,
        };
        assert_eq!(crop.local_offset(), None);

        crop.utc_offset_minutes = i32::MIN;
        assert_eq!(crop.local_offset(), None);

        crop.utc_offset_minutes = 1440;
        assert_eq!(crop.local_offset(), None);

        crop.utc_offset_minutes = -1439;
        assert!(crop.local_offset().is_some());
    }
}
