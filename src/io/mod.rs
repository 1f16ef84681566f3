// src/io/mod.rs
//
// Sensor I/O: wire types, link errors and the serial reader.

pub mod error;
pub mod serial;
pub mod types;

use std::time::{SystemTime, UNIX_EPOCH};

pub use error::IoError;
pub use types::{LinkStatus, Measurement, SharedState};

/// Host UNIX time in milliseconds
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
