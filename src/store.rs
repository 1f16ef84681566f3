// src/store.rs
//
// Single-slot register holding the latest measurement and link status.
// One writer (the serial reader), any number of readers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::io::types::{LinkStatus, Measurement, SharedState};

/// Latest-value cell shared by the reader task and every consumer.
///
/// The lock is held only to copy a `SharedState` in or out, never across
/// I/O or an await point. The measurement and status live under the same
/// lock so a reader can never pair an old measurement with a newer status.
#[derive(Debug, Default)]
pub struct MeasurementStore {
    state: Mutex<SharedState>,
    writes: AtomicU64,
}

impl MeasurementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the measurement and mark the link connected.
    pub fn write(&self, measurement: Measurement) {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        guard.measurement = Some(measurement);
        guard.status = LinkStatus::Connected;
        drop(guard);
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Update the link status, keeping the last measurement.
    pub fn set_status(&self, status: LinkStatus) {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        guard.status = status;
    }

    /// Consistent copy of the current state.
    pub fn read(&self) -> SharedState {
        // SharedState is Copy, a poisoned lock still holds a whole value
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> LinkStatus {
        self.read().status
    }

    /// Number of measurements written since start
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}
