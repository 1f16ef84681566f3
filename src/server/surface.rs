// src/server/surface.rs
//
// Read-only views of the measurement store handed to consumers.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};

use crate::io::types::{LinkStatus, SharedState};
use crate::store::MeasurementStore;

// ============================================================================
// Records
// ============================================================================

/// Flat snapshot record served by the snapshot and stream endpoints.
/// Absent measurements serialize as zeros.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRecord {
    pub distance_cm: u16,
    pub signal_strength: u16,
    /// Rounded to one decimal place
    pub temperature_c: f64,
    pub captured_at_millis: u64,
    pub status: LinkStatus,
}

impl From<SharedState> for SnapshotRecord {
    fn from(state: SharedState) -> Self {
        match state.measurement {
            Some(m) => SnapshotRecord {
                distance_cm: m.distance_cm,
                signal_strength: m.signal_strength,
                temperature_c: round_tenth(m.temperature_c),
                captured_at_millis: m.captured_at_millis,
                status: state.status,
            },
            None => SnapshotRecord {
                distance_cm: 0,
                signal_strength: 0,
                temperature_c: 0.0,
                captured_at_millis: 0,
                status: state.status,
            },
        }
    }
}

fn round_tenth(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// Lightweight health record
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecord {
    pub link_connected: bool,
    pub port: String,
    pub baud_rate: u32,
}

// ============================================================================
// Delivery Surface
// ============================================================================

/// Port and baud rate the reader was configured with, for health reporting
#[derive(Clone, Debug)]
pub struct LinkInfo {
    pub port: String,
    pub baud_rate: u32,
}

/// Consumer-facing access to the store. Cheap to clone; every connection
/// gets its own copy.
#[derive(Clone)]
pub struct DeliverySurface {
    store: Arc<MeasurementStore>,
    link: LinkInfo,
    stream_interval: Duration,
    /// Live `Subscription`s across all clones
    subscribers: Arc<AtomicUsize>,
}

impl DeliverySurface {
    pub fn new(store: Arc<MeasurementStore>, link: LinkInfo, stream_interval: Duration) -> Self {
        Self {
            store,
            link,
            stream_interval,
            subscribers: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn snapshot(&self) -> SnapshotRecord {
        SnapshotRecord::from(self.store.read())
    }

    pub fn health(&self) -> HealthRecord {
        HealthRecord {
            link_connected: self.store.status() == LinkStatus::Connected,
            port: self.link.port.clone(),
            baud_rate: self.link.baud_rate,
        }
    }

    /// Start a feed of snapshots at the configured cadence.
    /// Must be called inside a tokio runtime.
    pub fn subscribe(&self) -> Subscription {
        let mut interval = tokio::time::interval(self.stream_interval);
        // A slow consumer gets the current value late, never a burst of stale ones
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.subscribers.fetch_add(1, Ordering::SeqCst);
        Subscription {
            store: self.store.clone(),
            interval,
            subscribers: self.subscribers.clone(),
        }
    }

    /// Subscriptions not yet dropped
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::SeqCst)
    }
}

/// Endless feed of full snapshots. The first one is immediate.
pub struct Subscription {
    store: Arc<MeasurementStore>,
    interval: Interval,
    subscribers: Arc<AtomicUsize>,
}

impl Subscription {
    /// Wait for the next tick and read the store. Cancel-safe.
    pub async fn next(&mut self) -> SnapshotRecord {
        self.interval.tick().await;
        SnapshotRecord::from(self.store.read())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.subscribers.fetch_sub(1, Ordering::SeqCst);
    }
}
