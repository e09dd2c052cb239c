//! Gas valves and the Hering-Breuer valve.

use super::stim::PhasicSpec;
use crate::error::{RigError, RigResult};
use crate::pipeline::{Action, CallOptions, Timing};
use crate::protocol::{Command, Phase, PhasicPattern};
use crate::record::{Category, Outcome};
use crate::rig::Rig;
use async_trait::async_trait;
use serde::Deserialize;

/// Open one gas valve (closing the others)
#[derive(Debug, Clone, Deserialize)]
pub struct OpenValve {
    /// Valve index
    pub valve: u8,
    /// Label the record with the gas name instead of `open_valve_<n>`
    #[serde(default)]
    pub label_as_gas: bool,
}

impl OpenValve {
    /// Open `valve`, labelled by number
    pub fn new(valve: u8) -> Self {
        Self {
            valve,
            label_as_gas: false,
        }
    }
}

#[async_trait]
impl Action for OpenValve {
    fn timing(&self) -> Timing {
        Timing::Event
    }

    async fn perform(&self, rig: &mut Rig) -> RigResult<Outcome> {
        rig.send(&Command::OpenValve { valve: self.valve }).await?;
        let label = match rig.config().gas_for_valve(self.valve) {
            Some(gas) if self.label_as_gas => gas.to_string(),
            _ => format!("open_valve_{}", self.valve),
        };
        Ok(Outcome::new(label, Category::Gas).param("valve", self.valve))
    }
}

/// Switch to a named gas and optionally hold it
#[derive(Debug, Clone, Deserialize)]
pub struct PresentGas {
    /// Gas name from the configured valve map
    pub gas: String,
    /// Seconds to wait after switching
    #[serde(default)]
    pub duration: Option<f64>,
}

impl PresentGas {
    /// Switch to `gas` and return at once
    pub fn new(gas: impl Into<String>) -> Self {
        Self {
            gas: gas.into(),
            duration: None,
        }
    }
}

#[async_trait]
impl Action for PresentGas {
    fn timing(&self) -> Timing {
        Timing::Event
    }

    async fn perform(&self, rig: &mut Rig) -> RigResult<Outcome> {
        let valve = rig.config().valve_for_gas(&self.gas)?;
        tracing::info!(gas = %self.gas, valve, "Presenting gas");
        rig.execute(
            &OpenValve {
                valve,
                label_as_gas: true,
            },
            CallOptions::silent(),
        )
        .await?;

        let mut outcome = Outcome::new(format!("present_{}", self.gas), Category::Gas);
        if let Some(duration) = self.duration {
            if rig.wait(duration).await.is_cancelled() {
                outcome = outcome.param("cancelled", true);
            }
        }
        Ok(outcome)
    }
}

/// Close the Hering-Breuer valve
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartHb;

#[async_trait]
impl Action for StartHb {
    fn timing(&self) -> Timing {
        Timing::Event
    }

    async fn perform(&self, rig: &mut Rig) -> RigResult<Outcome> {
        rig.send(&Command::HeringBreuerStart).await?;
        Ok(Outcome::new("start_heringbreuer", Category::Event))
    }
}

/// Reopen the Hering-Breuer valve
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndHb;

#[async_trait]
impl Action for EndHb {
    fn timing(&self) -> Timing {
        Timing::Event
    }

    async fn perform(&self, rig: &mut Rig) -> RigResult<Outcome> {
        rig.send(&Command::HeringBreuerEnd).await?;
        Ok(Outcome::new("end_heringbreuer", Category::Event))
    }
}

/// Hold the Hering-Breuer valve closed for a fixed time
#[derive(Debug, Clone, Deserialize)]
pub struct TimedHb {
    /// Seconds closed
    pub duration: f64,
}

#[async_trait]
impl Action for TimedHb {
    fn timing(&self) -> Timing {
        Timing::Interval
    }

    async fn perform(&self, rig: &mut Rig) -> RigResult<Outcome> {
        rig.execute(&StartHb, CallOptions::silent()).await?;
        let waited = rig.wait(self.duration).await;
        // Always reopen, even when the hold was cut short
        rig.execute(&EndHb, CallOptions::silent()).await?;

        let mut outcome =
            Outcome::new("hering_breuer", Category::Event).param("duration", self.duration);
        if waited.is_cancelled() {
            outcome = outcome.param("cancelled", true);
        }
        Ok(outcome)
    }
}

/// Breath-triggered Hering-Breuer occlusions. The valve supports inspiratory holds only.
#[derive(Debug, Clone, Deserialize)]
pub struct PhasicHb {
    /// Window timing and pattern
    #[serde(flatten)]
    pub spec: PhasicSpec,
}

#[async_trait]
impl Action for PhasicHb {
    fn timing(&self) -> Timing {
        Timing::Interval
    }

    async fn perform(&self, rig: &mut Rig) -> RigResult<Outcome> {
        let window = self.spec.window()?;
        if window.phase != Phase::Inspiratory || window.pattern != PhasicPattern::Hold {
            return Err(RigError::InvalidStimulation(format!(
                "Hering-Breuer stimulation supports inspiratory holds only (got {} {})",
                window.phase.log_name(),
                window.pattern.log_name()
            )));
        }
        rig.flush_input();
        rig.send(&Command::HeringBreuerPhasic(window)).await?;
        Ok(self
            .spec
            .describe(Outcome::new("hering_breuer_phasic", Category::Event), &window))
    }
}
