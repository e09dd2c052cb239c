//! Recording start and stop as loggable actions.

use super::audio::PlayAlert;
use super::gas::PresentGas;
use crate::error::RigResult;
use crate::pipeline::{Action, CallOptions, Timing};
use crate::record::{Category, Outcome};
use crate::rig::Rig;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

fn yes() -> bool {
    true
}

/// Start acquisition
#[derive(Debug, Clone, Deserialize)]
pub struct StartRecording {
    /// Open a new gate (remote control only)
    #[serde(default = "yes")]
    pub increment_gate: bool,
    /// Beep once recording has started
    #[serde(default)]
    pub alert: bool,
}

impl Default for StartRecording {
    fn default() -> Self {
        Self {
            increment_gate: true,
            alert: false,
        }
    }
}

#[async_trait]
impl Action for StartRecording {
    fn timing(&self) -> Timing {
        Timing::Event
    }

    async fn perform(&self, rig: &mut Rig) -> RigResult<Outcome> {
        rig.begin_recording(self.increment_gate).await?;
        let mut outcome = Outcome::new("rec_start", Category::Event);
        if let Some(target) = rig.session().target() {
            outcome = outcome
                .param("gate", target.gate)
                .param("trigger", target.trigger);
        }
        if self.alert {
            rig.execute(&PlayAlert, CallOptions::silent()).await?;
        }
        Ok(outcome)
    }
}

/// Stop acquisition and save the event log
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StopRecording {
    /// Beep after stopping
    #[serde(default)]
    pub alert: bool,
    /// Switch back to the configured reset gas for a second
    #[serde(default)]
    pub reset_gas: bool,
}

#[async_trait]
impl Action for StopRecording {
    fn timing(&self) -> Timing {
        Timing::Event
    }

    async fn perform(&self, rig: &mut Rig) -> RigResult<Outcome> {
        rig.end_recording().await?;
        if self.alert {
            rig.execute(&PlayAlert, CallOptions::silent()).await?;
        }
        if self.reset_gas {
            let gas = PresentGas {
                gas: rig.config().recording.reset_gas.clone(),
                duration: Some(1.0),
            };
            rig.execute(&gas, CallOptions::silent()).await?;
        }
        if let Err(e) = rig.persist_log(true) {
            warn!(error = %e, "Could not save event log at recording stop");
        }
        Ok(Outcome::new("rec_stop", Category::Event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RigConfig;
    use crate::error::RigError;
    use crate::mock::{MockDevice, MockRecorder};
    use crate::protocol::{Command, DeviceLink};
    use crate::recording::{RecordControl, SessionState};
    use std::time::Duration;

    #[tokio::test]
    async fn ttl_cycle_raises_and_drops_the_line() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RigConfig::default();
        config.recording.data_dir = dir.path().to_path_buf();
        let (link, device) = MockDevice::spawn(Duration::from_secs(1));
        let mut rig = Rig::new(config, link, RecordControl::Ttl);

        rig.arm_run("m1", 0, 0).unwrap();
        rig.run(&StartRecording::default()).await.unwrap();
        assert_eq!(rig.session().state(), SessionState::Recording);
        rig.run(&StopRecording::default()).await.unwrap();

        assert_eq!(
            device.commands(),
            vec![Command::RecordStart, Command::RecordStop]
        );
        let labels: Vec<_> = rig.log().records().iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["rec_start", "rec_stop"]);
        assert!(rig.session().log_path().unwrap().exists());
    }

    #[tokio::test]
    async fn start_without_running_recorder_fails() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = MockRecorder::new("m1", dir.path());
        recorder.set_running(false);
        let mut rig = Rig::new(
            RigConfig::default(),
            DeviceLink::disconnected(),
            RecordControl::Remote(Box::new(recorder)),
        );
        let err = rig.run(&StartRecording::default()).await.unwrap_err();
        assert!(matches!(err, RigError::RecorderNotRunning));
        assert!(rig.log().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_can_restore_reset_gas() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = MockRecorder::new("m1", dir.path());
        let (link, device) = MockDevice::spawn(Duration::from_secs(1));
        let mut rig = Rig::new(
            RigConfig::default(),
            link,
            RecordControl::Remote(Box::new(recorder.clone())),
        );

        rig.run(&StartRecording::default()).await.unwrap();
        rig.run(&StopRecording {
            alert: false,
            reset_gas: true,
        })
        .await
        .unwrap();

        assert_eq!(recorder.triggers(), vec![(1, 1), (-1, 0)]);
        assert_eq!(device.commands(), vec![Command::OpenValve { valve: 0 }]);
        assert_eq!(rig.log().records().last().unwrap().label, "rec_stop");
    }
}
