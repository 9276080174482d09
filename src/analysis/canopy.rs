//! Representative canopy temperature for a monitored plant.

use crate::models::{MaskPoint, Plant, ThermalCapture, THERMAL_GRID_HEIGHT, THERMAL_GRID_WIDTH};

// ---

/// Canopy temperature of `plant` from its latest capture.
///
/// Uses the mean of the masked cells when the plant has a mask and the capture
/// carries per-cell data; otherwise, or when the mask selects nothing usable,
/// the capture's precomputed frame average. `None` only when there is no
/// capture at all.
pub fn resolve(plant: &Plant, latest_capture: Option<&ThermalCapture>) -> Option<f64> {
    // ---
    let capture = latest_capture?;

    let mask = match plant.thermal_mask.as_deref() {
        Some(mask) if !mask.is_empty() => mask,
        _ => return Some(capture.avg_temp),
    };

    let Some(cells) = capture.cells() else {
        return Some(capture.avg_temp);
    };

    match masked_mean(mask, &cells) {
        Some(mean) => Some(mean),
        None => {
            tracing::debug!(
                plant_id = plant.id,
                "Mask selected no usable cells, using frame average"
            );
            Some(capture.avg_temp)
        }
    }
}

/// Mean of the cells selected by `mask`.
///
/// Coordinates outside the 32x24 grid or past the end of `cells` are skipped.
/// A selected cell holding a non-finite value invalidates the whole mask.
fn masked_mean(mask: &[MaskPoint], cells: &[f64]) -> Option<f64> {
    // ---
    let mut sum = 0.0;
    let mut count = 0usize;

    for point in mask {
        let Some(index) = flat_index(point) else {
            continue;
        };
        let Some(&value) = cells.get(index) else {
            continue;
        };
        if !value.is_finite() {
            return None;
        }
        sum += value;
        count += 1;
    }

    (count > 0).then(|| sum / count as f64)
}

fn flat_index(point: &MaskPoint) -> Option<usize> {
    let x = usize::try_from(point.x).ok().filter(|x| *x < THERMAL_GRID_WIDTH)?;
    let y = usize::try_from(point.y).ok().filter(|y| *y < THERMAL_GRID_HEIGHT)?;
    Some(y * THERMAL_GRID_WIDTH + x)
}
