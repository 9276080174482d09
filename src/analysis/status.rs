//! Plant status transitions driven by CWSI.
//!
//! ```text
//!  OPTIMAL ──[cwsi > incipient]──▶ MILD_STRESS ──[cwsi > critical]──▶ SEVERE_STRESS
//!     ▲                                 │                                  │
//!     │                          [cwsi <= incipient]                [cwsi <= incipient]
//!     │                                 ▼                                  │
//!     └────[cwsi <= incipient]──── RECOVERING ◀────────────────────────────┘
//! ```
//!
//! A stressed plant whose index drops back to the optimal band spends one
//! cycle in RECOVERING before returning to OPTIMAL. UNKNOWN is only entered
//! by the overnight anomaly audit; from UNKNOWN the next cycle simply
//! reclassifies the plant.

use crate::models::{CwsiThresholds, PlantStatus};

// ---

/// Status implied by `cwsi` alone, ignoring history.
pub fn classify(cwsi: f64, thresholds: &CwsiThresholds) -> PlantStatus {
    if cwsi > thresholds.critical {
        PlantStatus::SevereStress
    } else if cwsi > thresholds.incipient {
        PlantStatus::MildStress
    } else {
        PlantStatus::Optimal
    }
}

/// Next status for a plant given this cycle's index and its stored status.
pub fn next(cwsi: f64, thresholds: &CwsiThresholds, previous: PlantStatus) -> PlantStatus {
    // ---
    let raw = classify(cwsi, thresholds);
    match (previous, raw) {
        (prev, PlantStatus::Optimal) if prev.is_stressed() => PlantStatus::Recovering,
        (PlantStatus::Recovering, PlantStatus::Optimal) => PlantStatus::Optimal,
        _ => raw,
    }
}
