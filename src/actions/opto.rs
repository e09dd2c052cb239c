//! Optogenetic stimulation and laser photometry.

use super::stim::PhasicSpec;
use crate::amplitude::{quantize, sweep_amplitudes, CalibrationTable, PowerReading};
use crate::error::RigResult;
use crate::pipeline::{Action, CallOptions, Timing};
use crate::protocol::{fit_u8, ms_u16, ms_u8, Command};
use crate::record::{Category, Outcome};
use crate::rig::Rig;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, instrument};

/// Single light pulse
#[derive(Debug, Clone, Deserialize)]
pub struct RunPulse {
    /// Pulse width, seconds
    pub duration: f64,
    /// Normalized amplitude
    pub amplitude: f64,
}

#[async_trait]
impl Action for RunPulse {
    fn timing(&self) -> Timing {
        Timing::Event
    }

    async fn perform(&self, rig: &mut Rig) -> RigResult<Outcome> {
        let duration_ms = ms_u16("duration", self.duration)?;
        rig.send(&Command::Pulse {
            duration_ms,
            amplitude: quantize(self.amplitude),
        })
        .await?;
        Ok(Outcome::new("opto_pulse", Category::Opto)
            .param("amplitude", self.amplitude)
            .param("duration", self.duration))
    }
}

/// Pulse train run by the firmware
#[derive(Debug, Clone, Deserialize)]
pub struct RunTrain {
    /// Train length, seconds
    pub duration: f64,
    /// Pulse rate, Hz
    pub frequency: f64,
    /// Normalized amplitude
    pub amplitude: f64,
    /// Pulse width, seconds
    pub pulse_duration: f64,
}

#[async_trait]
impl Action for RunTrain {
    fn timing(&self) -> Timing {
        Timing::Interval
    }

    async fn perform(&self, rig: &mut Rig) -> RigResult<Outcome> {
        let command = Command::Train {
            duration_ms: ms_u16("duration", self.duration)?,
            freq_hz: fit_u8("frequency", self.frequency)?,
            amplitude: quantize(self.amplitude),
            pulse_ms: ms_u8("pulse_duration", self.pulse_duration)?,
        };
        rig.flush_input();
        rig.send(&command).await?;
        Ok(Outcome::new("opto_train", Category::Opto)
            .param("amplitude", self.amplitude)
            .param("duration", self.duration)
            .param("frequency", self.frequency)
            .param("pulse_duration", self.pulse_duration))
    }
}

fn default_tags() -> u32 {
    75
}

fn default_tag_pulse() -> f64 {
    0.05
}

fn default_tag_amplitude() -> f64 {
    1.0
}

fn default_tag_interval() -> f64 {
    3.0
}

/// Opto-tagging protocol: `n` pulses, each followed by `interpulse_interval`
#[derive(Debug, Clone, Deserialize)]
pub struct RunTagging {
    /// Number of pulses
    #[serde(default = "default_tags")]
    pub n: u32,
    /// Pulse width, seconds
    #[serde(default = "default_tag_pulse")]
    pub pulse_duration: f64,
    /// Normalized amplitude
    #[serde(default = "default_tag_amplitude")]
    pub amplitude: f64,
    /// Seconds after each pulse
    #[serde(default = "default_tag_interval")]
    pub interpulse_interval: f64,
}

impl Default for RunTagging {
    fn default() -> Self {
        Self {
            n: default_tags(),
            pulse_duration: default_tag_pulse(),
            amplitude: default_tag_amplitude(),
            interpulse_interval: default_tag_interval(),
        }
    }
}

#[async_trait]
impl Action for RunTagging {
    fn timing(&self) -> Timing {
        Timing::Interval
    }

    async fn perform(&self, rig: &mut Rig) -> RigResult<Outcome> {
        let pulse = RunPulse {
            duration: self.pulse_duration,
            amplitude: self.amplitude,
        };
        info!(n = self.n, amplitude = self.amplitude, "Running opto tagging");
        rig.flush_input();

        let mut delivered = 0u32;
        let mut cancelled = false;
        for i in 0..self.n {
            debug!(tag = i + 1, of = self.n, "Tag pulse");
            rig.execute(&pulse, CallOptions::silent()).await?;
            delivered += 1;
            if rig.wait(self.interpulse_interval).await.is_cancelled() {
                cancelled = true;
                break;
            }
        }

        let mut outcome = Outcome::new("opto_tagging", Category::Opto)
            .param("n_tags", self.n)
            .param("amplitude", self.amplitude)
            .param("pulse_duration", self.pulse_duration)
            .param("interpulse_interval", self.interpulse_interval);
        if cancelled {
            outcome = outcome
                .param("cancelled", true)
                .param("tags_delivered", delivered);
        }
        Ok(outcome)
    }
}

/// Breath-triggered light stimulation
#[derive(Debug, Clone, Deserialize)]
pub struct PhasicStim {
    /// Window timing and pattern
    #[serde(flatten)]
    pub spec: PhasicSpec,
    /// Normalized amplitude
    pub amplitude: f64,
}

#[async_trait]
impl Action for PhasicStim {
    fn timing(&self) -> Timing {
        Timing::Interval
    }

    async fn perform(&self, rig: &mut Rig) -> RigResult<Outcome> {
        let window = self.spec.window()?;
        rig.flush_input();
        rig.send(&Command::OptoPhasic {
            window,
            amplitude: quantize(self.amplitude),
        })
        .await?;
        let outcome =
            Outcome::new("opto_phasic", Category::Opto).param("amplitude", self.amplitude);
        Ok(self.spec.describe(outcome, &window))
    }
}

/// Laser on at an amplitude until [`LaserOff`]. Not logged unless asked.
#[derive(Debug, Clone, Deserialize)]
pub struct LaserOn {
    /// Normalized amplitude
    pub amplitude: f64,
}

#[async_trait]
impl Action for LaserOn {
    fn timing(&self) -> Timing {
        Timing::Event
    }

    fn logged_by_default(&self) -> bool {
        false
    }

    async fn perform(&self, rig: &mut Rig) -> RigResult<Outcome> {
        rig.send(&Command::LaserOn {
            amplitude: quantize(self.amplitude),
        })
        .await?;
        Ok(Outcome::new("laser_on", Category::Opto).param("amplitude", self.amplitude))
    }
}

/// Laser off, ramping down from an amplitude. Not logged unless asked.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LaserOff {
    /// Amplitude the laser is currently at
    #[serde(default)]
    pub amplitude: f64,
}

#[async_trait]
impl Action for LaserOff {
    fn timing(&self) -> Timing {
        Timing::Event
    }

    fn logged_by_default(&self) -> bool {
        false
    }

    async fn perform(&self, rig: &mut Rig) -> RigResult<Outcome> {
        rig.send(&Command::LaserOff {
            amplitude: quantize(self.amplitude),
        })
        .await?;
        Ok(Outcome::new("laser_off", Category::Opto).param("amplitude", self.amplitude))
    }
}

/// Resend the laser configuration. Not logged unless asked.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InitLaser;

#[async_trait]
impl Action for InitLaser {
    fn timing(&self) -> Timing {
        Timing::Event
    }

    fn logged_by_default(&self) -> bool {
        false
    }

    async fn perform(&self, rig: &mut Rig) -> RigResult<Outcome> {
        let laser = rig.config().laser;
        let command = rig.laser_init_command();
        rig.send(&command).await?;
        Ok(Outcome::new("init_laser", Category::Opto)
            .param("mode", char::from(laser.mode.code()).to_string())
            .param("power_meter_pin", laser.power_meter_pin)
            .param("null_voltage", laser.null_voltage))
    }
}

impl Rig {
    /// Turn the laser on at `amplitude` and read the photometer
    #[instrument(skip(self))]
    pub async fn poll_laser_power(&mut self, amplitude: f64) -> RigResult<PowerReading> {
        let raw = self
            .link
            .query_u16(&Command::PollPower {
                amplitude: quantize(amplitude),
            })
            .await?;
        let reading = PowerReading::from_raw(raw, &self.config.photometer);
        debug!(raw, milliwatts = reading.milliwatts, "Photometer reading");
        Ok(reading)
    }

    /// Measure light power over amplitudes `[lo, hi)` in steps of `step`.
    ///
    /// A reading at amplitude 0 is taken first and subtracted from every sweep point;
    /// it is not part of the table. The laser is off when this returns.
    #[instrument(skip(self))]
    pub async fn auto_calibrate(
        &mut self,
        lo: f64,
        hi: f64,
        step: f64,
    ) -> RigResult<CalibrationTable> {
        let amplitudes = sweep_amplitudes(lo, hi, step)?;
        self.send(&Command::LaserOff { amplitude: 0 }).await?;
        let background = self.poll_laser_power(0.0).await?;
        info!(
            points = amplitudes.len(),
            background_mw = background.milliwatts,
            "Starting calibration sweep"
        );

        let mut powers = Vec::with_capacity(amplitudes.len());
        for &amplitude in &amplitudes {
            let reading = self.poll_laser_power(amplitude).await?;
            powers.push(reading.milliwatts - background.milliwatts);
        }
        self.send(&Command::LaserOff {
            amplitude: amplitudes.last().map_or(0, |&a| quantize(a)),
        })
        .await?;

        let mut table = CalibrationTable::new(amplitudes, powers)?;
        table.calibration_date = Some(chrono::Local::now().format("%Y-%m-%d").to_string());
        Ok(table)
    }
}
