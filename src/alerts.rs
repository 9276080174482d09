//! Alert delivery and coalescing of repeated failure signals.
//!
//! Status transitions, anomalies and missing masks are sent one alert per
//! event through an [`AlertDispatcher`]. External failures (weather outages,
//! undeliverable alerts) are counted in an [`AlertCoalescer`] and sent as a
//! single summary once their window has elapsed.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::AlertError;
use crate::models::PlantStatus;

// ---

pub const WEATHER_FAILURE: &str = "weather_api_failure";
pub const ALERT_DISPATCH_FAILURE: &str = "alert_dispatch_failure";

/// Summary of a coalesced failure group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertGroupSummary {
    pub alert_type: String,
    pub count: u64,
    pub first_seen: DateTime<Utc>,
}

/// Outbound alert channel.
#[async_trait]
pub trait AlertDispatcher: Send + Sync {
    async fn notify_status_change(
        &self,
        plant_id: i64,
        old_status: PlantStatus,
        new_status: PlantStatus,
        cwsi: f64,
    ) -> Result<(), AlertError>;

    async fn notify_anomaly(&self, plant_id: i64) -> Result<(), AlertError>;

    async fn notify_masks_needed(&self, plant_names: &[String]) -> Result<(), AlertError>;

    async fn notify_failure_summary(&self, summary: &AlertGroupSummary) -> Result<(), AlertError>;
}

/// Dispatcher that only writes alerts to the log.
#[derive(Debug, Clone, Default)]
pub struct LogAlertDispatcher;

#[async_trait]
impl AlertDispatcher for LogAlertDispatcher {
    async fn notify_status_change(
        &self,
        plant_id: i64,
        old_status: PlantStatus,
        new_status: PlantStatus,
        cwsi: f64,
    ) -> Result<(), AlertError> {
        tracing::warn!(plant_id, %old_status, %new_status, cwsi, "ALERT status change");
        Ok(())
    }

    async fn notify_anomaly(&self, plant_id: i64) -> Result<(), AlertError> {
        tracing::warn!(plant_id, "ALERT overnight thermal anomaly");
        Ok(())
    }

    async fn notify_masks_needed(&self, plant_names: &[String]) -> Result<(), AlertError> {
        tracing::warn!(count = plant_names.len(), plants = ?plant_names, "ALERT thermal masks needed");
        Ok(())
    }

    async fn notify_failure_summary(&self, summary: &AlertGroupSummary) -> Result<(), AlertError> {
        tracing::warn!(
            alert_type = %summary.alert_type,
            count = summary.count,
            first_seen = %summary.first_seen,
            "ALERT repeated failures"
        );
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum WebhookPayload<'a> {
    StatusChange {
        plant_id: i64,
        old_status: PlantStatus,
        new_status: PlantStatus,
        cwsi: f64,
    },
    Anomaly {
        plant_id: i64,
    },
    MasksNeeded {
        plants: &'a [String],
    },
    FailureSummary {
        alert_type: &'a str,
        count: u64,
        first_seen: DateTime<Utc>,
    },
}

/// Dispatcher posting JSON alerts to a webhook.
#[derive(Debug, Clone)]
pub struct WebhookAlertDispatcher {
    client: reqwest::Client,
    url: String,
}

impl WebhookAlertDispatcher {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    async fn post(&self, payload: &WebhookPayload<'_>) -> Result<(), AlertError> {
        // ---
        let response = self.client.post(&self.url).json(payload).send().await?;
        if !response.status().is_success() {
            return Err(AlertError::Delivery(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl AlertDispatcher for WebhookAlertDispatcher {
    async fn notify_status_change(
        &self,
        plant_id: i64,
        old_status: PlantStatus,
        new_status: PlantStatus,
        cwsi: f64,
    ) -> Result<(), AlertError> {
        self.post(&WebhookPayload::StatusChange {
            plant_id,
            old_status,
            new_status,
            cwsi,
        })
        .await
    }

    async fn notify_anomaly(&self, plant_id: i64) -> Result<(), AlertError> {
        self.post(&WebhookPayload::Anomaly { plant_id }).await
    }

    async fn notify_masks_needed(&self, plant_names: &[String]) -> Result<(), AlertError> {
        self.post(&WebhookPayload::MasksNeeded { plants: plant_names }).await
    }

    async fn notify_failure_summary(&self, summary: &AlertGroupSummary) -> Result<(), AlertError> {
        self.post(&WebhookPayload::FailureSummary {
            alert_type: &summary.alert_type,
            count: summary.count,
            first_seen: summary.first_seen,
        })
        .await
    }
}

/// Running state of one coalesced alert type.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertGroupState {
    pub count: u64,
    pub first_seen: DateTime<Utc>,
}

/// Short-lived cache folding repeated failure signals into periodic summaries.
///
/// Every access goes through one mutex, so a record racing a drain either
/// lands in the drained summary or opens the next group; no increment is lost.
#[derive(Debug)]
pub struct AlertCoalescer {
    window: chrono::Duration,
    groups: Mutex<HashMap<String, AlertGroupState>>,
}

impl AlertCoalescer {
    pub fn new(window: Duration) -> Self {
        Self {
            window: chrono::Duration::from_std(window).unwrap_or(chrono::Duration::hours(1)),
            groups: Mutex::new(HashMap::new()),
        }
    }

    /// Count one occurrence of `alert_type`, opening a group if none is active.
    /// Returns the running count.
    pub fn record(&self, alert_type: &str, now: DateTime<Utc>) -> u64 {
        // ---
        let mut groups = self.groups.lock().unwrap_or_else(|e| e.into_inner());
        let state = groups
            .entry(alert_type.to_string())
            .or_insert(AlertGroupState {
                count: 0,
                first_seen: now,
            });
        state.count += 1;
        state.count
    }

    /// Remove and return every group whose window has elapsed.
    pub fn drain_due(&self, now: DateTime<Utc>) -> Vec<AlertGroupSummary> {
        // ---
        let mut groups = self.groups.lock().unwrap_or_else(|e| e.into_inner());
        let due: Vec<String> = groups
            .iter()
            .filter(|(_, state)| now - state.first_seen >= self.window)
            .map(|(alert_type, _)| alert_type.clone())
            .collect();

        let mut summaries: Vec<AlertGroupSummary> = due
            .into_iter()
            .filter_map(|alert_type| {
                groups.remove(&alert_type).map(|state| AlertGroupSummary {
                    alert_type,
                    count: state.count,
                    first_seen: state.first_seen,
                })
            })
            .collect();
        summaries.sort_by(|a, b| a.alert_type.cmp(&b.alert_type));
        summaries
    }

    pub fn pending(&self, alert_type: &str) -> Option<AlertGroupState> {
        let groups = self.groups.lock().unwrap_or_else(|e| e.into_inner());
        groups.get(alert_type).cloned()
    }
}
