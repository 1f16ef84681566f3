// src/io/error.rs
//
// Typed errors for the serial link. These never reach HTTP consumers; the
// reader folds them into `LinkStatus` and a log line.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IoError {
    #[error("{device}: failed to open: {message}")]
    Connection { device: String, message: String },

    #[error("{device}: read failed: {message}")]
    Read { device: String, message: String },

    #[error("{device}: link disconnected")]
    Disconnected { device: String },
}

impl IoError {
    pub fn connection(device: &str, message: impl Into<String>) -> Self {
        IoError::Connection {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn read(device: &str, message: impl Into<String>) -> Self {
        IoError::Read {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn disconnected(device: &str) -> Self {
        IoError::Disconnected {
            device: device.to_string(),
        }
    }

    /// Fatal link error: device-gone kinds become `Disconnected`, the rest `Read`.
    pub fn from_link(device: &str, e: &std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::UnexpectedEof => IoError::disconnected(device),
            _ => IoError::read(device, e.to_string()),
        }
    }

    /// Whether a link error means the device is gone. Everything else
    /// (timeouts, parity and framing errors) is a dropped read.
    /// `Other` covers EIO, which Linux reports after a USB unplug.
    pub fn is_link_gone(kind: std::io::ErrorKind) -> bool {
        matches!(
            kind,
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::NotConnected
                | std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::PermissionDenied
                | std::io::ErrorKind::Other
        )
    }
}

impl From<IoError> for String {
    fn from(e: IoError) -> Self {
        e.to_string()
    }
}
