// src/io/types.rs
//
// Measurement and link state shared between the serial reader and consumers.

use serde::Serialize;

// ============================================================================
// Measurement
// ============================================================================

/// Nominal maximum range of the TF-Luna in centimeters
const NOMINAL_MAX_RANGE_CM: u16 = 800;

/// Distances beyond this are still published but logged as suspect
const SUSPECT_RANGE_CM: u32 = NOMINAL_MAX_RANGE_CM as u32 * 10;

/// One decoded sensor frame.
///
/// Only built by the frame decoder from a frame whose header matched, so a
/// value of this type always corresponds to a complete 9-byte frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Measurement {
    pub distance_cm: u16,
    pub signal_strength: u16,
    pub temperature_c: f64,
    /// Host UNIX time in milliseconds at decode time
    pub captured_at_millis: u64,
}

impl Measurement {
    /// Whether the distance is outside anything the sensor can plausibly report
    pub fn is_suspect(&self) -> bool {
        u32::from(self.distance_cm) > SUSPECT_RANGE_CM
    }
}

// ============================================================================
// Link Status
// ============================================================================

/// Serial link state as seen by consumers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    #[default]
    Disconnected,
    Connected,
    /// Sticky for the reader instance that set it
    Error,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Disconnected => "disconnected",
            LinkStatus::Connected => "connected",
            LinkStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Shared State
// ============================================================================

/// Point-in-time copy of the latest measurement and link status
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SharedState {
    pub measurement: Option<Measurement>,
    pub status: LinkStatus,
}
