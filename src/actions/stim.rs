//! Phase-locked stimulation windows shared by the opto and Hering-Breuer actions.

use crate::error::{RigError, RigResult};
use crate::protocol::{fit_u8, ms_u16, ms_u8, Phase, PhasicPattern, PhasicWindow};
use crate::record::Outcome;
use serde::Deserialize;

fn default_intertrain() -> f64 {
    30.0
}

/// Window contents as requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhasicMode {
    /// Continuous for the whole window
    #[serde(alias = "h")]
    Hold,
    /// Pulse train; needs `frequency` and `pulse_duration`
    #[serde(alias = "t")]
    Train,
    /// One pulse at window onset; needs `pulse_duration`
    #[serde(alias = "p")]
    Pulse,
}

/// Phasic stimulation request in seconds and hertz
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PhasicSpec {
    /// Trigger phase
    pub phase: Phase,
    /// Window contents
    pub mode: PhasicMode,
    /// Number of windows
    pub n: u8,
    /// Window length, seconds
    pub duration: f64,
    /// Gap between windows, seconds. Ignored for a single window.
    #[serde(default = "default_intertrain")]
    pub intertrain_interval: f64,
    /// Train pulse rate, Hz
    #[serde(default)]
    pub frequency: Option<f64>,
    /// Train or single pulse width, seconds
    #[serde(default)]
    pub pulse_duration: Option<f64>,
}

impl PhasicSpec {
    /// Windows of `duration` seconds with no pulse parameters
    pub fn new(phase: Phase, mode: PhasicMode, n: u8, duration: f64) -> Self {
        Self {
            phase,
            mode,
            n,
            duration,
            intertrain_interval: default_intertrain(),
            frequency: None,
            pulse_duration: None,
        }
    }

    /// Set the train rate
    pub fn with_frequency(mut self, hz: f64) -> Self {
        self.frequency = Some(hz);
        self
    }

    /// Set the pulse width
    pub fn with_pulse_duration(mut self, seconds: f64) -> Self {
        self.pulse_duration = Some(seconds);
        self
    }

    /// Set the gap between windows
    pub fn with_intertrain_interval(mut self, seconds: f64) -> Self {
        self.intertrain_interval = seconds;
        self
    }

    /// Check the mode's required parameters and convert to wire units.
    ///
    /// Parameters the mode does not use are ignored.
    pub fn window(&self) -> RigResult<PhasicWindow> {
        let pattern = match self.mode {
            PhasicMode::Hold => PhasicPattern::Hold,
            PhasicMode::Train => {
                let (Some(freq), Some(pulse)) = (self.frequency, self.pulse_duration) else {
                    return Err(RigError::InvalidStimulation(
                        "phasic trains need a frequency and a pulse duration".into(),
                    ));
                };
                PhasicPattern::Train {
                    pulse_ms: ms_u8("pulse_duration", pulse)?,
                    freq_hz: fit_u8("frequency", freq)?,
                }
            }
            PhasicMode::Pulse => {
                let Some(pulse) = self.pulse_duration else {
                    return Err(RigError::InvalidStimulation(
                        "phasic pulses need a pulse duration".into(),
                    ));
                };
                PhasicPattern::Pulse {
                    pulse_ms: ms_u8("pulse_duration", pulse)?,
                }
            }
        };
        let intertrain = if self.n == 1 {
            0.0
        } else {
            self.intertrain_interval
        };
        Ok(PhasicWindow {
            phase: self.phase,
            pattern,
            count: self.n,
            duration_ms: ms_u16("duration", self.duration)?,
            intertrain_ms: ms_u16("intertrain_interval", intertrain)?,
        })
    }

    /// Add the window parameters to `outcome`. Unused pulse parameters are logged as
    /// not applicable.
    pub fn describe(&self, outcome: Outcome, window: &PhasicWindow) -> Outcome {
        let (frequency, pulse_duration) = match window.pattern {
            PhasicPattern::Hold => (None, None),
            PhasicPattern::Train { .. } => (self.frequency, self.pulse_duration),
            PhasicPattern::Pulse { .. } => (None, self.pulse_duration),
        };
        outcome
            .param("phase", window.phase.log_name())
            .param("mode", window.pattern.log_name())
            .param("n", window.count)
            .param("duration", self.duration)
            .param("frequency", frequency.unwrap_or(f64::NAN))
            .param("pulse_duration", pulse_duration.unwrap_or(f64::NAN))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Category;

    #[test]
    fn single_window_drops_intertrain_gap() {
        let window = PhasicSpec::new(Phase::Inspiratory, PhasicMode::Hold, 1, 2.0)
            .window()
            .unwrap();
        assert_eq!(window.intertrain_ms, 0);
        assert_eq!(window.duration_ms, 2000);
    }

    #[test]
    fn train_requires_frequency_and_pulse() {
        let spec = PhasicSpec::new(Phase::Expiratory, PhasicMode::Train, 5, 1.0);
        assert!(matches!(
            spec.window(),
            Err(RigError::InvalidStimulation(_))
        ));
        let window = spec
            .with_frequency(20.0)
            .with_pulse_duration(0.01)
            .window()
            .unwrap();
        assert_eq!(
            window.pattern,
            PhasicPattern::Train {
                pulse_ms: 10,
                freq_hz: 20
            }
        );
        assert_eq!(window.intertrain_ms, 30_000);
    }

    #[test]
    fn pulse_requires_pulse_duration() {
        let spec = PhasicSpec::new(Phase::Inspiratory, PhasicMode::Pulse, 3, 1.0);
        assert!(spec.window().is_err());
        assert!(spec.with_pulse_duration(0.02).window().is_ok());
    }

    #[test]
    fn hold_ignores_pulse_parameters() {
        let spec = PhasicSpec::new(Phase::Inspiratory, PhasicMode::Hold, 2, 1.0)
            .with_frequency(10.0)
            .with_pulse_duration(0.01);
        let window = spec.window().unwrap();
        assert_eq!(window.pattern, PhasicPattern::Hold);

        let outcome = spec.describe(Outcome::new("x", Category::Opto), &window);
        assert_eq!(outcome.params.get("mode").unwrap().to_string(), "hold");
        assert_eq!(outcome.params.get("frequency").unwrap().to_string(), "NaN");
    }

    #[test]
    fn overlong_window_is_rejected() {
        let spec = PhasicSpec::new(Phase::Inspiratory, PhasicMode::Hold, 2, 70.0);
        assert!(matches!(
            spec.window(),
            Err(RigError::ParameterOutOfRange { name: "duration", .. })
        ));
    }

    #[test]
    fn deserializes_short_codes() {
        let spec: PhasicSpec =
            toml::from_str("phase = \"i\"\nmode = \"t\"\nn = 3\nduration = 2.0\nfrequency = 10.0\npulse_duration = 0.01")
                .unwrap();
        assert_eq!(spec.phase, Phase::Inspiratory);
        assert_eq!(spec.mode, PhasicMode::Train);
        assert_eq!(spec.intertrain_interval, 30.0);
    }
}
