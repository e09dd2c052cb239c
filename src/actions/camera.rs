//! Camera frame trigger, relayed to the pulser board.

use crate::error::RigResult;
use crate::pipeline::{Action, Timing};
use crate::protocol::Command;
use crate::record::{Category, Outcome};
use crate::rig::Rig;
use async_trait::async_trait;
use serde::Deserialize;

fn default_fps() -> u8 {
    120
}

/// Start frame triggers
#[derive(Debug, Clone, Deserialize)]
pub struct StartCamera {
    /// Frames per second
    #[serde(default = "default_fps")]
    pub fps: u8,
}

impl Default for StartCamera {
    fn default() -> Self {
        Self { fps: default_fps() }
    }
}

#[async_trait]
impl Action for StartCamera {
    fn timing(&self) -> Timing {
        Timing::Event
    }

    async fn perform(&self, rig: &mut Rig) -> RigResult<Outcome> {
        rig.send(&Command::CameraStart { fps: self.fps }).await?;
        tracing::info!(fps = self.fps, "Camera trigger started");
        Ok(Outcome::new("start_camera", Category::Event).param("fps", self.fps))
    }
}

/// Stop frame triggers
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StopCamera;

#[async_trait]
impl Action for StopCamera {
    fn timing(&self) -> Timing {
        Timing::Event
    }

    async fn perform(&self, rig: &mut Rig) -> RigResult<Outcome> {
        rig.send(&Command::CameraStop).await?;
        Ok(Outcome::new("stop_camera", Category::Event))
    }
}
