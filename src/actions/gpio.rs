//! General-purpose output lines.

use crate::error::{RigError, RigResult};
use crate::pipeline::{Action, Timing};
use crate::protocol::{ms_u16, Command, GpioMode};
use crate::record::{Category, Outcome};
use crate::rig::Rig;
use async_trait::async_trait;
use serde::Deserialize;

/// Number of GPIO lines; the firmware maps `0..GPIO_PINS` onto physical pins
pub const GPIO_PINS: u8 = 8;

fn default_category() -> Category {
    Category::Event
}

fn default_pulse() -> f64 {
    0.1
}

/// Drive a GPIO line
#[derive(Debug, Clone, Deserialize)]
pub struct SetGpio {
    /// Line 0-7
    pub pin: u8,
    /// Pulse, latch high or latch low
    pub mode: GpioMode,
    /// Category the record is filed under
    #[serde(default = "default_category")]
    pub category: Category,
    /// Pulse width, seconds. Ignored unless pulsing.
    #[serde(default = "default_pulse")]
    pub pulse_duration: f64,
}

impl SetGpio {
    /// Drive `pin` with `mode`, filed as an event
    pub fn new(pin: u8, mode: GpioMode) -> Self {
        Self {
            pin,
            mode,
            category: default_category(),
            pulse_duration: default_pulse(),
        }
    }
}

#[async_trait]
impl Action for SetGpio {
    fn timing(&self) -> Timing {
        Timing::Event
    }

    async fn perform(&self, rig: &mut Rig) -> RigResult<Outcome> {
        if self.pin >= GPIO_PINS {
            return Err(RigError::InvalidPin(self.pin));
        }
        let command = Command::Gpio {
            mode: self.mode,
            duration_ms: ms_u16("pulse_duration", self.pulse_duration)?,
            pin: self.pin,
        };
        rig.send(&command).await?;

        let duration = match self.mode {
            GpioMode::Pulse => self.pulse_duration,
            GpioMode::High | GpioMode::Low => f64::NAN,
        };
        Ok(Outcome::new("gpio", self.category)
            .param("pin", self.pin)
            .param("mode", self.mode.log_name())
            .param("duration", duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RigConfig;
    use crate::mock::MockDevice;
    use crate::record::ParamValue;
    use crate::recording::RecordControl;
    use std::time::Duration;

    #[tokio::test]
    async fn pulse_logs_duration_and_latch_does_not() {
        let (link, device) = MockDevice::spawn(Duration::from_secs(1));
        let mut rig = Rig::new(RigConfig::default(), link, RecordControl::Ttl);

        let pulse = rig.run(&SetGpio::new(2, GpioMode::Pulse)).await.unwrap();
        assert_eq!(pulse.params.get("duration"), Some(&ParamValue::Float(0.1)));

        let mut latch = SetGpio::new(3, GpioMode::High);
        latch.category = Category::Opto;
        let high = rig.run(&latch).await.unwrap();
        assert_eq!(high.category, Category::Opto);
        assert_eq!(high.params.get("duration").unwrap().to_string(), "NaN");

        assert_eq!(
            device.commands(),
            vec![
                Command::Gpio {
                    mode: GpioMode::Pulse,
                    duration_ms: 100,
                    pin: 2
                },
                Command::Gpio {
                    mode: GpioMode::High,
                    duration_ms: 100,
                    pin: 3
                },
            ]
        );
    }

    #[tokio::test]
    async fn pin_out_of_range() {
        let (link, device) = MockDevice::spawn(Duration::from_secs(1));
        let mut rig = Rig::new(RigConfig::default(), link, RecordControl::Ttl);
        let err = rig.run(&SetGpio::new(8, GpioMode::Low)).await.unwrap_err();
        assert!(matches!(err, RigError::InvalidPin(8)));
        assert!(device.commands().is_empty());
    }
}
