//! In-memory store used by the test suite and for local dry runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{AnalysisResultsStore, PlantsStore, ReadingsStore};
use crate::error::StoreError;
use crate::models::{
    AnalysisResult, Crop, CycleCommit, EnvironmentalReading, MaskPoint, Plant, PlantRawData,
    PlantStatus, StatusChange, ThermalCapture,
};

// ---

#[derive(Debug, Default)]
struct Inner {
    crops: BTreeMap<i64, Crop>,
    plants: BTreeMap<i64, Plant>,
    readings: Vec<EnvironmentalReading>,
    captures: Vec<ThermalCapture>,
    results: Vec<AnalysisResult>,
    history: Vec<StatusChange>,
}

/// Store keeping everything behind a single mutex.
///
/// Status changes are compare-and-set against their `old_status`.
/// `commit_cycle` validates the whole unit of work before touching state, and
/// can be told to fail so rollback behaviour can be exercised.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    fail_commits: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_crop(&self, crop: Crop) {
        self.lock().crops.insert(crop.id, crop);
    }

    pub fn add_plant(&self, plant: Plant) {
        self.lock().plants.insert(plant.id, plant);
    }

    pub fn remove_plant(&self, plant_id: i64) {
        self.lock().plants.remove(&plant_id);
    }

    pub fn add_reading(&self, reading: EnvironmentalReading) {
        self.lock().readings.push(reading);
    }

    pub fn add_capture(&self, capture: ThermalCapture) {
        self.lock().captures.push(capture);
    }

    pub fn set_mask(&self, plant_id: i64, mask: Option<Vec<MaskPoint>>) {
        if let Some(plant) = self.lock().plants.get_mut(&plant_id) {
            plant.thermal_mask = mask;
        }
    }

    /// Make every subsequent `commit_cycle` fail until switched off again.
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub fn plant(&self, plant_id: i64) -> Option<Plant> {
        self.lock().plants.get(&plant_id).cloned()
    }

    pub fn results(&self) -> Vec<AnalysisResult> {
        self.lock().results.clone()
    }

    pub fn history(&self) -> Vec<StatusChange> {
        self.lock().history.clone()
    }
}

/// Fail unless the plant exists and still holds `change.old_status`.
fn check_status(inner: &Inner, change: &StatusChange) -> Result<(), StoreError> {
    // ---
    let plant = inner
        .plants
        .get(&change.plant_id)
        .ok_or(StoreError::PlantNotFound(change.plant_id))?;
    if plant.status != change.old_status {
        return Err(StoreError::StatusConflict {
            plant_id: change.plant_id,
            expected: change.old_status,
        });
    }
    Ok(())
}

fn apply_status(inner: &mut Inner, change: &StatusChange) -> Result<(), StoreError> {
    // ---
    check_status(inner, change)?;
    let plant = inner
        .plants
        .get_mut(&change.plant_id)
        .ok_or(StoreError::PlantNotFound(change.plant_id))?;
    plant.status = change.new_status;
    plant.updated_at = change.changed_at;
    inner.history.push(change.clone());
    Ok(())
}

#[async_trait]
impl PlantsStore for MemoryStore {
    async fn get_crops(&self) -> Result<Vec<Crop>, StoreError> {
        Ok(self.lock().crops.values().cloned().collect())
    }

    async fn get_plants_for_crop(&self, crop_id: i64) -> Result<Vec<Plant>, StoreError> {
        Ok(self
            .lock()
            .plants
            .values()
            .filter(|p| p.crop_id == crop_id)
            .cloned()
            .collect())
    }

    async fn update_status(&self, plant_id: i64, status: PlantStatus) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let plant = inner
            .plants
            .get_mut(&plant_id)
            .ok_or(StoreError::PlantNotFound(plant_id))?;
        plant.status = status;
        Ok(())
    }

    async fn record_status_change(&self, change: &StatusChange) -> Result<(), StoreError> {
        let mut inner = self.lock();
        apply_status(&mut inner, change)
    }
}

#[async_trait]
impl ReadingsStore for MemoryStore {
    async fn get_raw_data_for_analysis(
        &self,
        plant_ids: &[i64],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<HashMap<i64, PlantRawData>, StoreError> {
        // ---
        let inner = self.lock();
        let mut data: HashMap<i64, PlantRawData> = plant_ids
            .iter()
            .map(|id| (*id, PlantRawData::default()))
            .collect();

        let in_window = |ts: &DateTime<Utc>| *ts >= from && *ts <= to;

        for reading in inner.readings.iter().filter(|r| in_window(&r.timestamp)) {
            if let Some(entry) = reading.plant_id.and_then(|id| data.get_mut(&id)) {
                entry.environmental_readings.push(reading.clone());
            }
        }
        for capture in inner.captures.iter().filter(|c| in_window(&c.timestamp)) {
            if let Some(entry) = capture.plant_id.and_then(|id| data.get_mut(&id)) {
                entry.thermal_captures.push(capture.clone());
            }
        }
        for entry in data.values_mut() {
            entry.environmental_readings.sort_by_key(|r| r.timestamp);
            entry.thermal_captures.sort_by_key(|c| c.timestamp);
        }
        Ok(data)
    }
}

#[async_trait]
impl AnalysisResultsStore for MemoryStore {
    async fn append(&self, result: &AnalysisResult) -> Result<(), StoreError> {
        self.lock().results.push(result.clone());
        Ok(())
    }

    async fn commit_cycle(&self, commit: &CycleCommit) -> Result<(), StoreError> {
        // ---
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("commit rejected".to_string()));
        }

        let mut inner = self.lock();
        for change in &commit.status_changes {
            check_status(&inner, change)?;
        }

        inner.results.extend(commit.results.iter().cloned());
        for change in &commit.status_changes {
            apply_status(&mut inner, change)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::ExperimentalGroup;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap()
    }

    fn store_with_plant(id: i64) -> MemoryStore {
        let store = MemoryStore::new();
        store.add_plant(Plant {
            id,
            crop_id: 1,
            name: format!("plant-{id}"),
            group: ExperimentalGroup::Monitored,
            status: PlantStatus::Optimal,
            thermal_mask: None,
            updated_at: now(),
        });
        store
    }

    fn result(plant_id: i64) -> AnalysisResult {
        AnalysisResult {
            id: Uuid::new_v4(),
            plant_id,
            timestamp: now(),
            cwsi: 0.4,
            status: PlantStatus::MildStress,
            canopy_temp_c: 25.2,
            ambient_temp_c: 24.0,
            vpd_kpa: 1.2,
            baseline_wet_c: 22.0,
            baseline_dry_c: 30.0,
        }
    }

    fn change(plant_id: i64) -> StatusChange {
        StatusChange {
            plant_id,
            old_status: PlantStatus::Optimal,
            new_status: PlantStatus::MildStress,
            reason: "test".to_string(),
            cwsi: Some(0.4),
            changed_at: now(),
        }
    }

    #[tokio::test]
    async fn test_update_status_and_append() {
        // ---
        let store = store_with_plant(7);
        store.update_status(7, PlantStatus::Recovering).await.unwrap();
        assert_eq!(store.plant(7).unwrap().status, PlantStatus::Recovering);
        assert!(matches!(
            store.update_status(8, PlantStatus::Optimal).await,
            Err(StoreError::PlantNotFound(8))
        ));

        store.append(&result(7)).await.unwrap();
        assert_eq!(store.results().len(), 1);
    }

    #[tokio::test]
    async fn test_commit_cycle_is_all_or_nothing() {
        // ---
        let store = store_with_plant(7);
        let commit = CycleCommit {
            results: vec![result(7), result(8)],
            status_changes: vec![change(7), change(8)],
        };

        assert!(store.commit_cycle(&commit).await.is_err());
        assert!(store.results().is_empty());
        assert!(store.history().is_empty());
        assert_eq!(store.plant(7).unwrap().status, PlantStatus::Optimal);

        let commit = CycleCommit {
            results: vec![result(7)],
            status_changes: vec![change(7)],
        };
        store.commit_cycle(&commit).await.unwrap();
        assert_eq!(store.results().len(), 1);
        assert_eq!(store.history().len(), 1);
        assert_eq!(store.plant(7).unwrap().status, PlantStatus::MildStress);
    }

    #[tokio::test]
    async fn test_stale_status_change_conflicts() {
        // ---
        let store = store_with_plant(7);
        store.update_status(7, PlantStatus::Unknown).await.unwrap();

        let commit = CycleCommit {
            results: vec![result(7)],
            status_changes: vec![change(7)],
        };
        assert!(matches!(
            store.commit_cycle(&commit).await,
            Err(StoreError::StatusConflict {
                plant_id: 7,
                expected: PlantStatus::Optimal
            })
        ));
        assert!(store.results().is_empty());
        assert_eq!(store.plant(7).unwrap().status, PlantStatus::Unknown);

        assert!(matches!(
            store.record_status_change(&change(7)).await,
            Err(StoreError::StatusConflict { .. })
        ));
        assert!(store.history().is_empty());
    }

    #[tokio::test]
    async fn test_raw_data_has_entry_for_every_plant() {
        // ---
        let store = store_with_plant(7);
        store.add_reading(EnvironmentalReading {
            device_id: "env".to_string(),
            plant_id: Some(7),
            timestamp: now(),
            temperature_c: 24.0,
            humidity: 55.0,
            extra_data: serde_json::Value::Null,
        });

        let from = now() - chrono::Duration::minutes(30);
        let data = store.get_raw_data_for_analysis(&[7, 9], from, now()).await.unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[&7].environmental_readings.len(), 1);
        assert!(data[&9].environmental_readings.is_empty());

        let later = store
            .get_raw_data_for_analysis(&[7], now() + chrono::Duration::minutes(1), now() + chrono::Duration::minutes(31))
            .await
            .unwrap();
        assert!(later[&7].environmental_readings.is_empty());
    }
}
