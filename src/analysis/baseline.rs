//! Wet and dry canopy-temperature baselines from the reference plants.

use serde::Serialize;

use crate::error::BaselineError;
use crate::models::{ExperimentalGroup, ThermalCapture};

// ---

/// Empirical envelope used to normalise canopy temperatures.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Baselines {
    /// Mean canopy temperature of the CONTROL captures.
    pub t_wet: f64,
    /// Hottest canopy temperature among the STRESS captures.
    pub t_dry: f64,
}

/// Compute baselines from the window's CONTROL and STRESS captures.
///
/// Reference plants never use masks, so each capture contributes its frame
/// average. Non-positive and non-finite averages are discarded first.
pub fn compute<'a, C, S>(control: C, stress: S) -> Result<Baselines, BaselineError>
where
    C: IntoIterator<Item = &'a ThermalCapture>,
    S: IntoIterator<Item = &'a ThermalCapture>,
{
    // ---
    let control = valid_temperatures(control);
    if control.is_empty() {
        return Err(BaselineError::InsufficientData(ExperimentalGroup::Control));
    }

    let t_dry = valid_temperatures(stress)
        .into_iter()
        .fold(None, |max: Option<f64>, t| Some(max.map_or(t, |m| m.max(t))))
        .ok_or(BaselineError::InsufficientData(ExperimentalGroup::Stress))?;

    let t_wet = control.iter().sum::<f64>() / control.len() as f64;

    Ok(Baselines { t_wet, t_dry })
}

fn valid_temperatures<'a, I>(captures: I) -> Vec<f64>
where
    I: IntoIterator<Item = &'a ThermalCapture>,
{
    captures
        .into_iter()
        .map(|c| c.avg_temp)
        .filter(|t| t.is_finite() && *t > 0.0)
        .collect()
}
