// src/settings.rs
//
// Process-level settings. Loaded once at startup from TOML, then overridden
// by command-line flags. Nothing here is hot-reloadable.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::io::serial::framer::ChecksumPolicy;
use crate::io::serial::reader::ReaderConfig;
use crate::io::serial::Parity;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to read {}: {}", .path.display(), .source)]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {}", .path.display(), .source)]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SerialSettings {
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct DecoderSettings {
    /// Reassemble frames torn across reads (off: torn reads are dropped)
    #[serde(default)]
    pub carry_frames: bool,
    /// Reject frames whose byte 8 is not the Sum8 of bytes 0..=7
    #[serde(default)]
    pub verify_checksum: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HttpSettings {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_stream_interval_ms")]
    pub stream_interval_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct LoggingSettings {
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub log_frames: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct BridgeSettings {
    #[serde(default)]
    pub serial: SerialSettings,
    #[serde(default)]
    pub decoder: DecoderSettings,
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

fn default_port() -> String {
    if cfg!(target_os = "windows") {
        "COM9".to_string()
    } else {
        "/dev/ttyUSB0".to_string()
    }
}
fn default_baud_rate() -> u32 {
    115200 // TF-Luna factory default
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}
fn default_poll_interval_ms() -> u64 {
    10
}
fn default_read_timeout_ms() -> u64 {
    1000
}
fn default_bind() -> String {
    "0.0.0.0:5000".to_string()
}
fn default_stream_interval_ms() -> u64 {
    100
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: Parity::default(),
            poll_interval_ms: default_poll_interval_ms(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            stream_interval_ms: default_stream_interval_ms(),
        }
    }
}

impl BridgeSettings {
    /// Parse settings from TOML text. Missing keys take their defaults.
    pub fn from_toml(text: &str, origin: &Path) -> Result<Self, SettingsError> {
        toml::from_str(text).map_err(|source| SettingsError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Load from an explicit path, or from the per-user default location if a
    /// file exists there, or fall back to built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), SettingsError> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => match default_settings_path() {
                Some(p) if p.is_file() => p,
                _ => return Ok((Self::default(), None)),
            },
        };

        let text = std::fs::read_to_string(&path).map_err(|source| SettingsError::Read {
            path: path.clone(),
            source,
        })?;
        let settings = Self::from_toml(&text, &path)?;
        Ok((settings, Some(path)))
    }

    /// Serial reader configuration derived from these settings
    pub fn reader_config(&self) -> ReaderConfig {
        let mut config = ReaderConfig::new(self.serial.port.clone(), self.serial.baud_rate);
        config.data_bits = self.serial.data_bits;
        config.stop_bits = self.serial.stop_bits;
        config.parity = self.serial.parity;
        config.poll_interval = Duration::from_millis(self.serial.poll_interval_ms.max(1));
        config.read_timeout = Duration::from_millis(self.serial.read_timeout_ms.max(1));
        config.carry_frames = self.decoder.carry_frames;
        config.checksum = if self.decoder.verify_checksum {
            ChecksumPolicy::Sum8
        } else {
            ChecksumPolicy::Ignore
        };
        config.log_frames = self.logging.log_frames;
        config
    }

    pub fn stream_interval(&self) -> Duration {
        Duration::from_millis(self.http.stream_interval_ms.max(1))
    }
}

/// `<config dir>/tfluna-bridge/settings.toml`
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tfluna-bridge").join("settings.toml"))
}
