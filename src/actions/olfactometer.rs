//! Olfactometer valves.
//!
//! Valves are numbered 1-8. Named odors come from the configured odor map, which
//! must contain `blank` for [`PresentOdor`] to return to it.

use crate::error::RigResult;
use crate::pipeline::{Action, CallOptions, Timing};
use crate::protocol::{Command, ValveMask};
use crate::record::{Category, Outcome};
use crate::rig::Rig;
use async_trait::async_trait;
use serde::Deserialize;

/// Odor selected between presentations
pub const BLANK_ODOR: &str = "blank";

/// Open one valve, leaving the others as they are
#[derive(Debug, Clone, Deserialize)]
pub struct OpenOlfactometer {
    /// Valve 1-8
    pub valve: u8,
}

#[async_trait]
impl Action for OpenOlfactometer {
    fn timing(&self) -> Timing {
        Timing::Event
    }

    async fn perform(&self, rig: &mut Rig) -> RigResult<Outcome> {
        ValveMask::single(self.valve)?;
        rig.send(&Command::OlfactometerOpen { valve: self.valve }).await?;
        Ok(Outcome::new("open_olfactometer_valve", Category::Odor).param("valve", self.valve))
    }
}

/// Close one valve
#[derive(Debug, Clone, Deserialize)]
pub struct CloseOlfactometer {
    /// Valve 1-8
    pub valve: u8,
}

#[async_trait]
impl Action for CloseOlfactometer {
    fn timing(&self) -> Timing {
        Timing::Event
    }

    async fn perform(&self, rig: &mut Rig) -> RigResult<Outcome> {
        ValveMask::single(self.valve)?;
        rig.send(&Command::OlfactometerClose { valve: self.valve }).await?;
        Ok(Outcome::new("close_olfactometer_valve", Category::Odor).param("valve", self.valve))
    }
}

/// Set all eight valves from a pattern such as `"10000000"` (valve 1 first)
#[derive(Debug, Clone, Deserialize)]
pub struct SetOlfactometerValves {
    /// Eight `0`/`1` characters
    pub pattern: String,
}

impl SetOlfactometerValves {
    /// Set valves from `pattern`
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }
}

#[async_trait]
impl Action for SetOlfactometerValves {
    fn timing(&self) -> Timing {
        Timing::Event
    }

    async fn perform(&self, rig: &mut Rig) -> RigResult<Outcome> {
        let mask = ValveMask::from_pattern(&self.pattern)?;
        rig.send(&Command::OlfactometerSetAll { mask }).await?;
        tracing::debug!(%mask, bits = mask.bits(), "Olfactometer valves set");
        Ok(Outcome::new("set_all_valves", Category::Odor).param("valve", mask.to_pattern()))
    }
}

/// Switch to a named odor; with a duration, return to [`BLANK_ODOR`] afterwards
#[derive(Debug, Clone, Deserialize)]
pub struct PresentOdor {
    /// Odor name from the configured odor map
    pub odor: String,
    /// Seconds before switching back to blank
    #[serde(default)]
    pub duration: Option<f64>,
}

impl PresentOdor {
    /// Switch to `odor` and leave it on
    pub fn new(odor: impl Into<String>) -> Self {
        Self {
            odor: odor.into(),
            duration: None,
        }
    }
}

#[async_trait]
impl Action for PresentOdor {
    fn timing(&self) -> Timing {
        Timing::Interval
    }

    async fn perform(&self, rig: &mut Rig) -> RigResult<Outcome> {
        let valve = rig.config().valve_for_odor(&self.odor)?;
        // Resolve blank up front so a missing entry fails before any valve moves
        let blank = match self.duration {
            Some(_) => Some(rig.config().valve_for_odor(BLANK_ODOR)?),
            None => None,
        };

        let select = |valve: u8| -> RigResult<SetOlfactometerValves> {
            Ok(SetOlfactometerValves::new(ValveMask::single(valve)?.to_pattern()))
        };
        rig.execute(&select(valve)?, CallOptions::silent()).await?;

        let mut outcome =
            Outcome::new("present_odor", Category::Odor).param("odor", self.odor.as_str());
        if let (Some(duration), Some(blank)) = (self.duration, blank) {
            if rig.wait(duration).await.is_cancelled() {
                outcome = outcome.param("cancelled", true);
            }
            rig.execute(&select(blank)?, CallOptions::silent()).await?;
        }
        Ok(outcome)
    }
}
