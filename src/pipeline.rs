//! Instrumentation pipeline.
//!
//! Every hardware operation is an [`Action`]: it performs its side effect and reports
//! an [`Outcome`] (label, category, parameters). [`Rig::execute`] wraps it in three
//! layers, always in this order:
//!
//! 1. **repeat**: run `n` times with a cancellable wait between runs (none after the
//!    last). A cancelled wait drops the remaining runs.
//! 2. **log**: append the record to the event log and rewrite the table, unless
//!    logging is off for this call.
//! 3. **time**: stamp the start (and for interval actions the end) around `perform`.
//!
//! Composite actions call their parts with [`CallOptions::silent`] so only the
//! composite itself shows up in the log.

use crate::error::RigResult;
use crate::record::{LogRecord, Outcome};
use crate::rig::Rig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// Which timestamps an action's record carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timing {
    /// Start and end around the call
    Interval,
    /// Start only; the end time does not apply
    Event,
}

/// A hardware operation run through the pipeline
#[async_trait]
pub trait Action: Send + Sync + fmt::Debug {
    /// Timing variant for this action's records
    fn timing(&self) -> Timing;

    /// Whether the action is logged when the caller does not say
    fn logged_by_default(&self) -> bool {
        true
    }

    /// Do the work and describe it
    async fn perform(&self, rig: &mut Rig) -> RigResult<Outcome>;
}

/// Run count and spacing for the repeat layer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Repeat {
    /// Number of runs
    pub n: u32,
    /// Seconds between runs
    pub interval: f64,
}

/// Per-call pipeline options
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CallOptions {
    /// Log override; `None` uses the action's default
    pub log: Option<bool>,
    /// Repetition; `None` runs once
    pub repeat: Option<Repeat>,
}

impl CallOptions {
    /// Run once, not logged
    pub fn silent() -> Self {
        Self {
            log: Some(false),
            repeat: None,
        }
    }

    /// Run once, logged
    pub fn logged() -> Self {
        Self {
            log: Some(true),
            repeat: None,
        }
    }

    /// Run `n` times, `interval` seconds apart
    pub fn repeat(n: u32, interval: f64) -> Self {
        Self {
            log: None,
            repeat: Some(Repeat { n, interval }),
        }
    }

    /// Same options with logging forced on or off
    pub fn with_log(mut self, enabled: bool) -> Self {
        self.log = Some(enabled);
        self
    }
}

/// Records produced by one pipeline call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Invocation {
    /// One record per completed run, logged or not
    pub records: Vec<LogRecord>,
    /// True if a cancel cut the repetitions short
    pub cancelled: bool,
}

impl Invocation {
    /// Record of the last completed run
    pub fn last(&self) -> Option<&LogRecord> {
        self.records.last()
    }
}

impl Rig {
    /// Run `action` through repeat, log and time layers
    pub async fn execute(
        &mut self,
        action: &dyn Action,
        options: CallOptions,
    ) -> RigResult<Invocation> {
        let log_enabled = options.log.unwrap_or_else(|| action.logged_by_default());

        let Some(repeat) = options.repeat else {
            let record = self.logged(action, log_enabled).await?;
            return Ok(Invocation {
                records: vec![record],
                cancelled: false,
            });
        };

        let mut invocation = Invocation {
            records: Vec::with_capacity(repeat.n as usize),
            cancelled: false,
        };
        for i in 0..repeat.n {
            invocation.records.push(self.logged(action, log_enabled).await?);
            if i + 1 < repeat.n && self.wait(repeat.interval).await.is_cancelled() {
                info!(
                    completed = i + 1,
                    requested = repeat.n,
                    "Remaining repetitions cancelled"
                );
                invocation.cancelled = true;
                break;
            }
        }
        Ok(invocation)
    }

    /// Run `action` once with its default logging and return its record
    pub async fn run(&mut self, action: &dyn Action) -> RigResult<LogRecord> {
        self.logged(action, action.logged_by_default()).await
    }

    /// Run `action` once without logging
    pub async fn run_silent(&mut self, action: &dyn Action) -> RigResult<LogRecord> {
        self.logged(action, false).await
    }

    /// Whether the action currently performing will get a log record
    pub fn is_call_logged(&self) -> bool {
        self.call_logged
    }

    async fn logged(&mut self, action: &dyn Action, log_enabled: bool) -> RigResult<LogRecord> {
        let outer = std::mem::replace(&mut self.call_logged, log_enabled);
        let record = self.timed(action).await;
        self.call_logged = outer;
        let record = record?;
        if log_enabled {
            self.log.append(record.clone());
            if let Err(e) = self.persist_log(false) {
                warn!(error = %e, "Could not write event log");
            }
        }
        Ok(record)
    }

    async fn timed(&mut self, action: &dyn Action) -> RigResult<LogRecord> {
        let start = self.clock.now();
        let outcome = action.perform(self).await?;
        let end = match action.timing() {
            Timing::Interval => Some(self.clock.now()),
            Timing::Event => None,
        };
        debug!(label = %outcome.label, category = %outcome.category, "Action complete");
        Ok(LogRecord::from_outcome(outcome, start, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RigConfig;
    use crate::protocol::DeviceLink;
    use crate::record::Category;
    use crate::recording::RecordControl;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct Sleepy {
        calls: AtomicUsize,
        seconds: f64,
        timing: Option<Timing>,
    }

    #[async_trait]
    impl Action for Sleepy {
        fn timing(&self) -> Timing {
            self.timing.unwrap_or(Timing::Interval)
        }

        async fn perform(&self, _rig: &mut Rig) -> RigResult<Outcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs_f64(self.seconds)).await;
            Ok(Outcome::new("sleepy", Category::Event))
        }
    }

    #[derive(Debug)]
    struct Composite;

    #[async_trait]
    impl Action for Composite {
        fn timing(&self) -> Timing {
            Timing::Interval
        }

        async fn perform(&self, rig: &mut Rig) -> RigResult<Outcome> {
            let inner = Sleepy::default();
            rig.execute(&inner, CallOptions::silent()).await?;
            rig.execute(&inner, CallOptions::silent()).await?;
            Ok(Outcome::new("composite", Category::Event))
        }
    }

    fn rig() -> Rig {
        Rig::new(
            RigConfig::default(),
            DeviceLink::disconnected(),
            RecordControl::Ttl,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn interval_timing_spans_the_call() {
        let mut rig = rig();
        let action = Sleepy {
            seconds: 1.5,
            ..Default::default()
        };
        let record = rig.run(&action).await.unwrap();
        let end = record.end_time.unwrap();
        assert!((end - record.start_time - 1.5).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn event_timing_has_no_end() {
        let mut rig = rig();
        let action = Sleepy {
            seconds: 1.0,
            timing: Some(Timing::Event),
            ..Default::default()
        };
        assert_eq!(rig.run(&action).await.unwrap().end_time, None);
    }

    #[tokio::test(start_paused = true)]
    async fn repeat_waits_between_runs_only() {
        let mut rig = rig();
        let action = Sleepy::default();
        let started = tokio::time::Instant::now();

        let invocation = rig
            .execute(&action, CallOptions::repeat(3, 2.0))
            .await
            .unwrap();

        assert_eq!(action.calls.load(Ordering::SeqCst), 3);
        assert_eq!(invocation.records.len(), 3);
        assert!(!invocation.cancelled);
        assert_eq!(started.elapsed(), Duration::from_secs(4));
        assert_eq!(rig.log().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn no_repeat_runs_once_without_waiting() {
        let mut rig = rig();
        let action = Sleepy::default();
        let started = tokio::time::Instant::now();
        rig.execute(&action, CallOptions::default()).await.unwrap();
        assert_eq!(action.calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_drops_remaining_repetitions() {
        let mut rig = rig();
        let handle = rig.cancel_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            handle.cancel();
        });

        let action = Sleepy::default();
        let invocation = rig
            .execute(&action, CallOptions::repeat(5, 2.0))
            .await
            .unwrap();
        assert!(invocation.cancelled);
        assert_eq!(action.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn composite_yields_single_record() {
        let mut rig = rig();
        rig.run(&Composite).await.unwrap();
        assert_eq!(rig.log().len(), 1);
        assert_eq!(rig.log().records()[0].label, "composite");
    }

    #[tokio::test]
    async fn silent_calls_still_return_records() {
        let mut rig = rig();
        let record = rig.run_silent(&Sleepy::default()).await.unwrap();
        assert_eq!(record.label, "sleepy");
        assert!(rig.log().is_empty());
    }
}
