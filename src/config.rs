//! Rig configuration using Figment
//!
//! Configuration is loaded in three layers, later layers winning:
//! 1. Built-in defaults (`RigConfig::default()`)
//! 2. A TOML file (default `config/rig.toml`)
//! 3. Environment variables prefixed with `RIG_DAQ_`, `__` separating sections
//!
//! # Example
//! ```no_run
//! use rig_daq::config::RigConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // RIG_DAQ_SERIAL__PORT=/dev/ttyACM0 overrides the file
//! let config = RigConfig::load()?;
//! config.validate()?;
//! println!("Rig: {}", config.application.name);
//! # Ok(())
//! # }
//! ```

use crate::error::{RigError, RigResult};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level rig configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RigConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Microcontroller serial link
    pub serial: SerialConfig,
    /// Laser driver mode, re-sent to the device on every connect
    pub laser: DeviceConfig,
    /// Photometer scaling used by laser power polls
    pub photometer: PhotometerConfig,
    /// Gas valve assignments
    pub gases: Vec<GasValve>,
    /// Olfactometer odor assignments
    pub odors: Vec<OdorValve>,
    /// Recording control and log naming
    pub recording: RecordingConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

/// Serial link configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyACM0", "COM11"). `None` runs disconnected.
    pub port: Option<String>,
    /// Communication speed
    pub baud_rate: u32,
    /// Upper bound on the wait for a command acknowledgment
    pub ack_timeout_ms: u64,
}

impl SerialConfig {
    /// Acknowledgment timeout as a `Duration`
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

/// Laser driver modes understood by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaserMode {
    /// Sigmoidal command-voltage ramp
    Sigmoidal,
    /// On/off drive
    Binary,
}

impl LaserMode {
    /// Opcode byte for the mode
    pub fn code(self) -> u8 {
        match self {
            LaserMode::Sigmoidal => b'S',
            LaserMode::Binary => b'B',
        }
    }

    /// Inverse of [`LaserMode::code`]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            b'S' => Some(LaserMode::Sigmoidal),
            b'B' => Some(LaserMode::Binary),
            _ => None,
        }
    }
}

/// Device-side laser state.
///
/// The microcontroller keeps this in RAM only, so the rig owns it and sends it
/// again whenever the link (re)connects.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Drive mode
    pub mode: LaserMode,
    /// Analog pin the photometer is wired to
    pub power_meter_pin: u8,
    /// Command voltage (0-1) output while the laser is idle
    pub null_voltage: f64,
}

impl DeviceConfig {
    /// Null voltage as sent on the wire. Binary mode always idles at zero.
    pub fn null_voltage_u8(&self) -> u8 {
        match self.mode {
            LaserMode::Binary => 0,
            LaserMode::Sigmoidal => (255.0 * self.null_voltage.clamp(0.0, 1.0)) as u8,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            mode: LaserMode::Sigmoidal,
            power_meter_pin: 16,
            null_voltage: 0.4,
        }
    }
}

/// Photometer ADC scaling
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhotometerConfig {
    /// Full-scale ADC count (13 bit)
    pub adc_range: f64,
    /// ADC reference voltage
    pub v_ref: f64,
    /// Light meter full-scale power in milliwatts
    pub max_milliwattage: f64,
}

impl Default for PhotometerConfig {
    fn default() -> Self {
        Self {
            adc_range: 8191.0,
            v_ref: 3.3,
            max_milliwattage: 310.0,
        }
    }
}

/// A gas line and the valve that selects it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasValve {
    /// Valve index on the controller
    pub valve: u8,
    /// Gas name, e.g. "O2"
    pub name: String,
}

/// An odor and the olfactometer valve (1-8) that presents it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OdorValve {
    /// Odor name; "blank" is the resting odor
    pub name: String,
    /// Olfactometer valve, 1-based
    pub valve: u8,
}

/// Which recording backend drives acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordControlKind {
    /// Digital line on the controller
    Ttl,
    /// Acquisition software remote-command API
    Remote,
}

/// Recording control and log naming
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Backend selection
    pub control: RecordControlKind,
    /// Address of the acquisition software's command server
    pub remote_addr: String,
    /// Timeout for remote commands
    pub remote_timeout_ms: u64,
    /// Fallback directory for log tables when no gate directory is known
    pub data_dir: PathBuf,
    /// Prefix of the log table file name
    pub log_prefix: String,
    /// Default probe settle time
    pub settle_secs: f64,
    /// Gas restored by `stop_recording` when asked to reset
    pub reset_gas: String,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            control: RecordControlKind::Remote,
            remote_addr: "127.0.0.1:4142".to_string(),
            remote_timeout_ms: 5000,
            data_dir: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("rig_data"),
            log_prefix: "_cibbrig_log.table".to_string(),
            settle_secs: 15.0 * 60.0,
            reset_gas: "O2".to_string(),
        }
    }
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            application: ApplicationConfig {
                name: "rig_daq".to_string(),
                log_level: "info".to_string(),
            },
            serial: SerialConfig {
                port: None,
                baud_rate: 115_200,
                ack_timeout_ms: 5000,
            },
            laser: DeviceConfig::default(),
            photometer: PhotometerConfig::default(),
            gases: default_gases(),
            odors: Vec::new(),
            recording: RecordingConfig::default(),
        }
    }
}

fn default_gases() -> Vec<GasValve> {
    ["O2", "room air", "hypercapnia", "hypoxia", "N2"]
        .iter()
        .enumerate()
        .map(|(valve, name)| GasValve {
            valve: valve as u8,
            name: (*name).to_string(),
        })
        .collect()
}

impl RigConfig {
    /// Load configuration from config/rig.toml and environment variables
    ///
    /// Environment variables override the file with prefix RIG_DAQ_.
    /// Example: RIG_DAQ_APPLICATION__LOG_LEVEL=debug
    pub fn load() -> RigResult<Self> {
        Self::load_from("config/rig.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> RigResult<Self> {
        let config = Figment::from(Serialized::defaults(RigConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("RIG_DAQ_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> RigResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(RigError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.serial.baud_rate == 0 {
            return Err(RigError::Configuration("baud_rate must be > 0".into()));
        }
        if self.serial.ack_timeout_ms == 0 {
            return Err(RigError::Configuration("ack_timeout_ms must be > 0".into()));
        }

        if !(0.0..=1.0).contains(&self.laser.null_voltage) {
            return Err(RigError::Configuration(format!(
                "Invalid null_voltage {}. Must be 0-1",
                self.laser.null_voltage
            )));
        }

        let mut valves = std::collections::HashSet::new();
        for gas in &self.gases {
            if !valves.insert(gas.valve) {
                return Err(RigError::Configuration(format!(
                    "Duplicate gas valve: {}",
                    gas.valve
                )));
            }
        }

        for odor in &self.odors {
            if !(1..=8).contains(&odor.valve) {
                return Err(RigError::Configuration(format!(
                    "Odor '{}' uses valve {}. Olfactometer valves are 1-8",
                    odor.name, odor.valve
                )));
            }
        }

        if self.recording.settle_secs < 0.0 {
            return Err(RigError::Configuration("settle_secs must be >= 0".into()));
        }

        Ok(())
    }

    /// Valve that selects `gas`
    pub fn valve_for_gas(&self, gas: &str) -> RigResult<u8> {
        self.gases
            .iter()
            .find(|g| g.name == gas)
            .map(|g| g.valve)
            .ok_or_else(|| RigError::GasNotConfigured {
                gas: gas.to_string(),
                available: self
                    .gases
                    .iter()
                    .map(|g| g.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    /// Gas selected by `valve`, if any
    pub fn gas_for_valve(&self, valve: u8) -> Option<&str> {
        self.gases
            .iter()
            .find(|g| g.valve == valve)
            .map(|g| g.name.as_str())
    }

    /// Olfactometer valve that presents `odor`
    pub fn valve_for_odor(&self, odor: &str) -> RigResult<u8> {
        self.odors
            .iter()
            .find(|o| o.name == odor)
            .map(|o| o.valve)
            .ok_or_else(|| RigError::OdorNotConfigured(odor.to_string()))
    }
}
