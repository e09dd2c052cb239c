//! Multi-step routines run at the start and end of an experiment.

use super::camera::{StartCamera, StopCamera};
use super::control::{Annotate, Settle};
use super::gas::{EndHb, OpenValve, PresentGas};
use super::olfactometer::{PresentOdor, SetOlfactometerValves, BLANK_ODOR};
use super::recording::{StartRecording, StopRecording};
use crate::error::{RigError, RigResult};
use crate::rig::Rig;
use serde::Deserialize;
use tracing::{info, warn};

/// Patterns cycled through to home the olfactometer when no odor map is configured
const OLFACTOMETER_HOMING: [&str; 3] = ["11111111", "00000000", "10000000"];

/// Seconds between recording start and camera start
const CAMERA_DELAY_SECS: f64 = 0.5;

fn default_gas() -> String {
    "O2".to_string()
}

fn default_fps() -> u8 {
    120
}

fn yes() -> bool {
    true
}

/// Settings for [`Rig::preroll`]
#[derive(Debug, Clone, Deserialize)]
pub struct PrerollOptions {
    /// Gas presented before recording
    #[serde(default = "default_gas")]
    pub gas: String,
    /// Settle time override, seconds
    #[serde(default)]
    pub settle: Option<f64>,
    /// Home the olfactometer first
    #[serde(default)]
    pub set_olfactometer: bool,
    /// Start camera triggers after recording starts
    #[serde(default)]
    pub use_camera: bool,
    /// Camera rate when `use_camera` is set
    #[serde(default = "default_fps")]
    pub camera_fps: u8,
    /// Open a new gate (remote control only)
    #[serde(default = "yes")]
    pub increment_gate: bool,
}

impl Default for PrerollOptions {
    fn default() -> Self {
        Self {
            gas: default_gas(),
            settle: None,
            set_olfactometer: false,
            use_camera: false,
            camera_fps: default_fps(),
            increment_gate: true,
        }
    }
}

fn keep_first<T>(first: &mut Option<RigError>, step: &str, result: RigResult<T>) {
    if let Err(e) = result {
        warn!(step, error = %e, "Shutdown step failed");
        if first.is_none() {
            *first = Some(e);
        }
    }
}

impl Rig {
    /// Standard experiment opening: present the baseline gas, let the probe settle
    /// and start recording.
    ///
    /// With TTL control the rig must be armed first.
    pub async fn preroll(&mut self, options: &PrerollOptions) -> RigResult<()> {
        info!(gas = %options.gas, "Preroll");
        self.session.ensure_recorder_running().await?;

        if options.set_olfactometer {
            if self.config.odors.is_empty() {
                warn!("No odor map configured. Homing olfactometer by valve pattern");
                for pattern in OLFACTOMETER_HOMING {
                    self.run(&SetOlfactometerValves::new(pattern)).await?;
                }
            } else {
                self.run(&PresentOdor::new(BLANK_ODOR)).await?;
            }
        }

        self.run(&PresentGas::new(options.gas.clone())).await?;
        self.run(&Settle {
            duration: options.settle,
        })
        .await?;
        self.run(&StartRecording {
            increment_gate: options.increment_gate,
            alert: false,
        })
        .await?;

        if options.use_camera {
            self.wait(CAMERA_DELAY_SECS).await;
            self.run(&StartCamera {
                fps: options.camera_fps,
            })
            .await?;
        }
        Ok(())
    }

    /// Return the rig to rest: stop any recording, switch to valve 0 and release the
    /// Hering-Breuer valve.
    pub async fn reset(&mut self) -> RigResult<()> {
        if self.session.is_recording() {
            self.run(&StopRecording::default()).await?;
        }
        self.run(&OpenValve::new(0)).await?;
        self.run(&EndHb).await?;
        Ok(())
    }

    /// Shut down after an interrupt: stop recording, mark the log, stop the camera and
    /// save. Every step is attempted; the first failure is returned.
    pub async fn close(&mut self) -> RigResult<()> {
        info!("Shutting down");
        let mut first = None;
        if self.session.is_recording() {
            let stopped = self.run(&StopRecording::default()).await;
            keep_first(&mut first, "stop_recording", stopped);
        }
        let killed = self.run(&Annotate::new("Killed")).await;
        keep_first(&mut first, "annotate", killed);
        let camera = self.run(&StopCamera).await;
        keep_first(&mut first, "stop_camera", camera);
        let saved = self.persist_log(true);
        keep_first(&mut first, "persist_log", saved);

        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
