//! Speaker tones.

use crate::error::RigResult;
use crate::pipeline::{Action, CallOptions, Timing};
use crate::protocol::{fit_u16, ms_u16, Command};
use crate::record::{Category, Outcome};
use crate::rig::Rig;
use async_trait::async_trait;
use serde::Deserialize;

const ALERT_HZ: f64 = 1000.0;
const ALERT_SECS: f64 = 0.5;

/// (frequency Hz, beats); a beat is a quarter second
const MELODY: [(f64, f64); 14] = [
    (261.63, 1.0),
    (261.63, 1.0),
    (392.00, 1.0),
    (392.00, 1.0),
    (440.00, 1.0),
    (440.00, 1.0),
    (392.00, 2.0),
    (349.23, 1.0),
    (349.23, 1.0),
    (329.63, 1.0),
    (329.63, 1.0),
    (293.66, 1.0),
    (293.66, 1.0),
    (261.63, 2.0),
];
const BEAT_SECS: f64 = 0.25;

/// Tone at a frequency
#[derive(Debug, Clone, Deserialize)]
pub struct PlayTone {
    /// Hz
    pub frequency: f64,
    /// Seconds
    pub duration: f64,
}

#[async_trait]
impl Action for PlayTone {
    fn timing(&self) -> Timing {
        Timing::Interval
    }

    async fn perform(&self, rig: &mut Rig) -> RigResult<Outcome> {
        let command = Command::Tone {
            freq_hz: fit_u16("frequency", self.frequency)?,
            duration_ms: ms_u16("duration", self.duration)?,
        };
        rig.flush_input();
        rig.send(&command).await?;
        Ok(Outcome::new("tone", Category::Event)
            .param("frequency", self.frequency)
            .param("duration", self.duration))
    }
}

/// Half-second 1 kHz beep
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlayAlert;

#[async_trait]
impl Action for PlayAlert {
    fn timing(&self) -> Timing {
        Timing::Interval
    }

    async fn perform(&self, rig: &mut Rig) -> RigResult<Outcome> {
        let tone = PlayTone {
            frequency: ALERT_HZ,
            duration: ALERT_SECS,
        };
        rig.execute(&tone, CallOptions::silent()).await?;
        Ok(Outcome::new("audio_alert", Category::Event)
            .param("frequency", ALERT_HZ)
            .param("duration", ALERT_SECS))
    }
}

/// Short recognizable tune, used to mark the end of a protocol
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlayMelody;

#[async_trait]
impl Action for PlayMelody {
    fn timing(&self) -> Timing {
        Timing::Interval
    }

    async fn perform(&self, rig: &mut Rig) -> RigResult<Outcome> {
        for (frequency, beats) in MELODY {
            let note = PlayTone {
                frequency,
                duration: beats * BEAT_SECS,
            };
            rig.execute(&note, CallOptions::silent()).await?;
        }
        Ok(Outcome::new("audio_alert_ttls", Category::Event))
    }
}

/// Firmware tone sequence for aligning audio recordings with the log
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlaySync;

#[async_trait]
impl Action for PlaySync {
    fn timing(&self) -> Timing {
        Timing::Interval
    }

    async fn perform(&self, rig: &mut Rig) -> RigResult<Outcome> {
        rig.send(&Command::AudioSync).await?;
        Ok(Outcome::new("audio_synch", Category::Event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RigConfig;
    use crate::mock::MockDevice;
    use crate::recording::RecordControl;
    use std::time::Duration;

    #[tokio::test]
    async fn alert_is_one_logged_tone() {
        let (link, device) = MockDevice::spawn(Duration::from_secs(1));
        let mut rig = Rig::new(RigConfig::default(), link, RecordControl::Ttl);

        let record = rig.run(&PlayAlert).await.unwrap();
        assert_eq!(record.label, "audio_alert");
        assert!(record.end_time.is_some());
        assert_eq!(rig.log().len(), 1);
        assert_eq!(
            device.commands(),
            vec![Command::Tone {
                freq_hz: 1000,
                duration_ms: 500
            }]
        );
    }

    #[tokio::test]
    async fn melody_plays_every_note() {
        let (link, device) = MockDevice::spawn(Duration::from_secs(1));
        let mut rig = Rig::new(RigConfig::default(), link, RecordControl::Ttl);

        rig.run(&PlayMelody).await.unwrap();
        let commands = device.commands();
        assert_eq!(commands.len(), MELODY.len());
        assert_eq!(
            commands[6],
            Command::Tone {
                freq_hz: 392,
                duration_ms: 500
            }
        );
        assert_eq!(rig.log().len(), 1);
    }
}
