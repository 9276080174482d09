//! Liveness information shared between the workers and the health endpoint.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

// ---

/// Snapshot served by `GET /health`.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct HeartbeatSnapshot {
    pub last_tick: Option<DateTime<Utc>>,
    pub last_audit: Option<DateTime<Utc>>,
    pub cycles_completed: u64,
}

#[derive(Debug, Default)]
pub struct Heartbeat {
    inner: Mutex<HeartbeatSnapshot>,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished scheduler tick and how many crop cycles it committed.
    pub fn tick(&self, at: DateTime<Utc>, cycles: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.last_tick = Some(at);
        inner.cycles_completed += cycles;
    }

    pub fn audit(&self, at: DateTime<Utc>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.last_audit = Some(at);
    }

    pub fn snapshot(&self) -> HeartbeatSnapshot {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
