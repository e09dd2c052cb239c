//! Laser amplitude quantization and light-power calibration.
//!
//! Amplitudes are normalized command voltages in `[0, 1]`. The firmware takes them
//! as an integer percentage. A [`CalibrationTable`] relates command voltage to the
//! light power measured at the fiber tip and interpolates in either direction.

use crate::config::PhotometerConfig;
use crate::error::{RigError, RigResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Clamp `amplitude` to `[0, 1]` and convert to device units `0..=100`.
///
/// Out-of-range input is corrected, not rejected, and the correction is reported.
pub fn quantize(amplitude: f64) -> u8 {
    let clamped = if amplitude.is_nan() {
        warn!("Amplitude is NaN. Using 0");
        0.0
    } else if amplitude > 1.0 {
        warn!(amplitude, "Amplitude above 1. Clamping to 1");
        1.0
    } else if amplitude < 0.0 {
        warn!(amplitude, "Amplitude below 0. Clamping to 0");
        0.0
    } else {
        amplitude
    };
    (clamped * 100.0) as u8
}

/// Command voltage to light power mapping for one fiber/laser pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationTable {
    /// Command voltages, ascending
    pub command_voltage: Vec<f64>,
    /// Light power (mW) at each command voltage
    pub light_power: Vec<f64>,
    /// Fiber description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fiber: Option<String>,
    /// Laser wavelength
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wavelength: Option<String>,
    /// When the table was measured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration_date: Option<String>,
}

impl CalibrationTable {
    /// Build a table, checking the arrays pair up and voltages are sorted
    pub fn new(command_voltage: Vec<f64>, light_power: Vec<f64>) -> RigResult<Self> {
        let table = Self {
            command_voltage,
            light_power,
            fiber: None,
            wavelength: None,
            calibration_date: None,
        };
        table.validate()?;
        Ok(table)
    }

    /// Check the table invariants
    pub fn validate(&self) -> RigResult<()> {
        if self.command_voltage.is_empty() {
            return Err(RigError::InvalidCalibration("table is empty".into()));
        }
        if self.command_voltage.len() != self.light_power.len() {
            return Err(RigError::InvalidCalibration(format!(
                "{} voltages but {} power readings",
                self.command_voltage.len(),
                self.light_power.len()
            )));
        }
        if self
            .command_voltage
            .iter()
            .chain(self.light_power.iter())
            .any(|v| !v.is_finite())
        {
            return Err(RigError::InvalidCalibration("non-finite entry".into()));
        }
        if self.command_voltage.windows(2).any(|w| w[0] > w[1]) {
            return Err(RigError::InvalidCalibration(
                "command voltages must be ascending".into(),
            ));
        }
        Ok(())
    }

    /// Read a table from JSON
    pub fn load(path: impl AsRef<Path>) -> RigResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let table: Self = serde_json::from_str(&text)?;
        table.validate()?;
        Ok(table)
    }

    /// Write the table as JSON
    pub fn save(&self, path: impl AsRef<Path>) -> RigResult<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), text)?;
        Ok(())
    }

    /// Light power produced by a command voltage
    pub fn volts_to_power(&self, volts: f64) -> f64 {
        interpolate(volts, &self.command_voltage, &self.light_power)
    }

    /// Command voltage needed for a light power
    pub fn power_to_volts(&self, power: f64) -> f64 {
        let mut pairs: Vec<(f64, f64)> = self
            .light_power
            .iter()
            .copied()
            .zip(self.command_voltage.iter().copied())
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (xs, ys): (Vec<f64>, Vec<f64>) = pairs.into_iter().unzip();
        interpolate(power, &xs, &ys)
    }
}

/// Power for `volts`, or `None` with a warning when no table is loaded
pub fn power_for(table: Option<&CalibrationTable>, volts: f64) -> Option<f64> {
    match table {
        Some(table) => Some(table.volts_to_power(volts)),
        None => {
            warn!("No calibration data. Light power unavailable");
            None
        }
    }
}

/// Command voltage for `milliwatts`, or `None` with a warning when no table is loaded
pub fn volts_for(table: Option<&CalibrationTable>, milliwatts: f64) -> Option<f64> {
    match table {
        Some(table) => Some(table.power_to_volts(milliwatts)),
        None => {
            warn!("No calibration data. Cannot convert power to command voltage");
            None
        }
    }
}

/// Piecewise-linear interpolation over ascending `xs`, clamped at both ends.
fn interpolate(x: f64, xs: &[f64], ys: &[f64]) -> f64 {
    let (Some(&first_x), Some(&last_x)) = (xs.first(), xs.last()) else {
        return f64::NAN;
    };
    if x <= first_x {
        return ys[0];
    }
    if x >= last_x {
        return ys[ys.len() - 1];
    }
    // First index with xs[i] > x; x is strictly inside so 1 <= i < len
    let i = xs.partition_point(|&v| v <= x);
    let (x0, x1) = (xs[i - 1], xs[i]);
    let (y0, y1) = (ys[i - 1], ys[i]);
    if x1 == x0 {
        return y1;
    }
    y0 + (x - x0) * (y1 - y0) / (x1 - x0)
}

/// One photometer reading in every unit the rig reports
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerReading {
    /// ADC counts
    pub raw: u16,
    /// Photometer output voltage
    pub volts: f64,
    /// Light power
    pub milliwatts: f64,
}

impl PowerReading {
    /// Convert a raw ADC reading
    pub fn from_raw(raw: u16, photometer: &PhotometerConfig) -> Self {
        let volts = f64::from(raw) / photometer.adc_range * photometer.v_ref;
        let milliwatts = volts / 2.0 * photometer.max_milliwattage;
        Self {
            raw,
            volts,
            milliwatts,
        }
    }
}

/// Amplitude steps for an auto-calibration sweep: `lo, lo+step, ...` below `hi`
pub fn sweep_amplitudes(lo: f64, hi: f64, step: f64) -> RigResult<Vec<f64>> {
    if step.is_nan() || step <= 0.0 || !lo.is_finite() || !hi.is_finite() || lo < 0.0 || hi > 1.0 + 1e-9 {
        return Err(RigError::InvalidStimulation(format!(
            "sweep [{}, {}) step {} is not a valid amplitude range",
            lo, hi, step
        )));
    }
    let n = ((hi - lo) / step - 1e-9).ceil().max(0.0) as usize;
    Ok((0..n).map(|i| lo + i as f64 * step).collect())
}
