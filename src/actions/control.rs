//! Annotations and waits. None of these touch the hardware except [`Settle`], which
//! beeps first.

use super::audio::PlayAlert;
use crate::error::RigResult;
use crate::pipeline::{Action, CallOptions, Timing};
use crate::record::{Category, Outcome, Params};
use crate::rig::Rig;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

fn default_category() -> Category {
    Category::Event
}

/// Free-form log entry
#[derive(Debug, Clone, Deserialize)]
pub struct Annotate {
    /// Record label
    pub label: String,
    /// Record category
    #[serde(default = "default_category")]
    pub category: Category,
    /// Extra columns
    #[serde(default)]
    pub params: Params,
}

impl Annotate {
    /// Event-category note with no parameters
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            category: default_category(),
            params: Params::new(),
        }
    }

    /// Same note under `category`
    pub fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }
}

#[async_trait]
impl Action for Annotate {
    fn timing(&self) -> Timing {
        Timing::Event
    }

    async fn perform(&self, _rig: &mut Rig) -> RigResult<Outcome> {
        Ok(Outcome {
            label: self.label.clone(),
            category: self.category,
            params: self.params.clone(),
        })
    }
}

/// Cancellable pause. Not logged unless asked.
#[derive(Debug, Clone, Deserialize)]
pub struct Wait {
    /// Seconds
    pub duration: f64,
}

#[async_trait]
impl Action for Wait {
    fn timing(&self) -> Timing {
        Timing::Interval
    }

    fn logged_by_default(&self) -> bool {
        false
    }

    async fn perform(&self, rig: &mut Rig) -> RigResult<Outcome> {
        let mut outcome = Outcome::new("wait", Category::Event).param("duration", self.duration);
        if rig.wait(self.duration).await.is_cancelled() {
            outcome = outcome.param("cancelled", true);
        }
        Ok(outcome)
    }
}

/// Beep, then wait for the recording probe to settle. Not logged unless asked.
///
/// The alert gets its own record only while the settle itself is unlogged, so a
/// logged settle is a single row.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settle {
    /// Seconds; the configured settle time when absent
    #[serde(default)]
    pub duration: Option<f64>,
}

#[async_trait]
impl Action for Settle {
    fn timing(&self) -> Timing {
        Timing::Interval
    }

    fn logged_by_default(&self) -> bool {
        false
    }

    async fn perform(&self, rig: &mut Rig) -> RigResult<Outcome> {
        let duration = self
            .duration
            .unwrap_or(rig.config().recording.settle_secs);
        info!(
            seconds = duration,
            "Settling. Enable the recording, check the valves and camera, place the fibers"
        );
        let alert = CallOptions::default().with_log(!rig.is_call_logged());
        rig.execute(&PlayAlert, alert).await?;

        let mut outcome = Outcome::new("probe_settle", Category::Event);
        if rig.wait(duration).await.is_cancelled() {
            info!("Settle cut short");
            outcome = outcome.param("cancelled", true);
        } else {
            info!("Done settling");
        }
        Ok(outcome)
    }
}
