//! Experiment plans.
//!
//! A plan is a TOML file with an ordered list of steps. Each step names an action and
//! gives its parameters, with optional `repeat` and `log` overrides:
//!
//! ```toml
//! name = "tagging then trains"
//!
//! [[steps]]
//! action = "preroll"
//! gas = "O2"
//! settle = 600
//!
//! [[steps]]
//! action = "run_train"
//! duration = 2.0
//! frequency = 20
//! amplitude = 0.6
//! pulse_duration = 0.01
//! repeat = { n = 10, interval = 30 }
//!
//! [[steps]]
//! action = "stop_recording"
//! reset_gas = true
//! ```
//!
//! Recoverable faults (device not answering, recorder hiccups) are reported and the
//! plan moves on. Anything else stops the plan after the event log is saved.

use crate::actions::{
    Annotate, CloseOlfactometer, EndHb, InitLaser, LaserOff, LaserOn, OpenOlfactometer,
    OpenValve, PhasicHb, PhasicStim, PlayAlert, PlayMelody, PlaySync, PlayTone, PrerollOptions,
    PresentGas, PresentOdor, RunPulse, RunTagging, RunTrain, SetGpio, SetOlfactometerValves,
    Settle, StartCamera, StartHb, StartRecording, StopCamera, StopRecording, TimedHb, Wait,
};
use crate::clock::MAX_WAIT_SECS;
use crate::error::{RigError, RigResult};
use crate::pipeline::{Action, CallOptions, Repeat};
use crate::rig::Rig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// What a step does
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepAction {
    /// [`OpenValve`]
    OpenValve(OpenValve),
    /// [`PresentGas`]
    PresentGas(PresentGas),
    /// [`StartHb`]
    StartHb,
    /// [`EndHb`]
    EndHb,
    /// [`TimedHb`]
    TimedHb(TimedHb),
    /// [`PhasicHb`]
    PhasicStimHb(PhasicHb),
    /// [`RunPulse`]
    RunPulse(RunPulse),
    /// [`RunTrain`]
    RunTrain(RunTrain),
    /// [`RunTagging`]
    RunTagging(RunTagging),
    /// [`PhasicStim`]
    PhasicStim(PhasicStim),
    /// [`LaserOn`]
    LaserOn(LaserOn),
    /// [`LaserOff`]
    LaserOff(LaserOff),
    /// [`InitLaser`]
    InitLaser,
    /// [`PlayTone`]
    PlayTone(PlayTone),
    /// [`PlayAlert`]
    PlayAlert,
    /// [`PlayMelody`]
    PlayMelody,
    /// [`PlaySync`]
    PlaySync,
    /// [`StartCamera`]
    StartCameraTrig(StartCamera),
    /// [`StopCamera`]
    StopCameraTrig,
    /// [`OpenOlfactometer`]
    OpenOlfactometer(OpenOlfactometer),
    /// [`CloseOlfactometer`]
    CloseOlfactometer(CloseOlfactometer),
    /// [`SetOlfactometerValves`]
    SetAllOlfactometerValves(SetOlfactometerValves),
    /// [`PresentOdor`]
    PresentOdor(PresentOdor),
    /// [`SetGpio`]
    SetGpio(SetGpio),
    /// [`Annotate`]
    Annotate(Annotate),
    /// [`Wait`]
    Wait(Wait),
    /// [`Settle`]
    Settle(Settle),
    /// [`StartRecording`]
    StartRecording(StartRecording),
    /// [`StopRecording`]
    StopRecording(StopRecording),
    /// [`Rig::preroll`]
    Preroll(PrerollOptions),
    /// [`Rig::reset`]
    Reset,
    /// Arm a TTL recording, see [`Rig::arm_run`]
    Arm {
        /// Run name
        run: String,
        /// Gate index
        #[serde(default)]
        gate: u32,
        /// Trigger index
        #[serde(default)]
        trigger: u32,
    },
    /// Load a calibration table, see [`Rig::load_calibration`]
    LoadCalibration {
        /// JSON table
        path: PathBuf,
    },
}

impl StepAction {
    /// Name as written in plan files
    pub fn name(&self) -> &'static str {
        match self {
            StepAction::OpenValve(_) => "open_valve",
            StepAction::PresentGas(_) => "present_gas",
            StepAction::StartHb => "start_hb",
            StepAction::EndHb => "end_hb",
            StepAction::TimedHb(_) => "timed_hb",
            StepAction::PhasicStimHb(_) => "phasic_stim_hb",
            StepAction::RunPulse(_) => "run_pulse",
            StepAction::RunTrain(_) => "run_train",
            StepAction::RunTagging(_) => "run_tagging",
            StepAction::PhasicStim(_) => "phasic_stim",
            StepAction::LaserOn(_) => "laser_on",
            StepAction::LaserOff(_) => "laser_off",
            StepAction::InitLaser => "init_laser",
            StepAction::PlayTone(_) => "play_tone",
            StepAction::PlayAlert => "play_alert",
            StepAction::PlayMelody => "play_melody",
            StepAction::PlaySync => "play_sync",
            StepAction::StartCameraTrig(_) => "start_camera_trig",
            StepAction::StopCameraTrig => "stop_camera_trig",
            StepAction::OpenOlfactometer(_) => "open_olfactometer",
            StepAction::CloseOlfactometer(_) => "close_olfactometer",
            StepAction::SetAllOlfactometerValves(_) => "set_all_olfactometer_valves",
            StepAction::PresentOdor(_) => "present_odor",
            StepAction::SetGpio(_) => "set_gpio",
            StepAction::Annotate(_) => "annotate",
            StepAction::Wait(_) => "wait",
            StepAction::Settle(_) => "settle",
            StepAction::StartRecording(_) => "start_recording",
            StepAction::StopRecording(_) => "stop_recording",
            StepAction::Preroll(_) => "preroll",
            StepAction::Reset => "reset",
            StepAction::Arm { .. } => "arm",
            StepAction::LoadCalibration { .. } => "load_calibration",
        }
    }

    /// Seconds the host waits inside this step, for steps that take a wait length
    fn wait_seconds(&self) -> Option<f64> {
        match self {
            StepAction::PresentGas(a) => a.duration,
            StepAction::PresentOdor(a) => a.duration,
            StepAction::TimedHb(a) => Some(a.duration),
            StepAction::Wait(a) => Some(a.duration),
            StepAction::Settle(a) => a.duration,
            StepAction::RunTagging(a) => Some(a.interpulse_interval),
            StepAction::Preroll(options) => options.settle,
            _ => None,
        }
    }

    /// The pipeline action behind this step. `None` for rig-level routines, which
    /// log their own parts.
    pub fn action(&self) -> Option<&dyn Action> {
        let action: &dyn Action = match self {
            StepAction::OpenValve(a) => a,
            StepAction::PresentGas(a) => a,
            StepAction::StartHb => &StartHb,
            StepAction::EndHb => &EndHb,
            StepAction::TimedHb(a) => a,
            StepAction::PhasicStimHb(a) => a,
            StepAction::RunPulse(a) => a,
            StepAction::RunTrain(a) => a,
            StepAction::RunTagging(a) => a,
            StepAction::PhasicStim(a) => a,
            StepAction::LaserOn(a) => a,
            StepAction::LaserOff(a) => a,
            StepAction::InitLaser => &InitLaser,
            StepAction::PlayTone(a) => a,
            StepAction::PlayAlert => &PlayAlert,
            StepAction::PlayMelody => &PlayMelody,
            StepAction::PlaySync => &PlaySync,
            StepAction::StartCameraTrig(a) => a,
            StepAction::StopCameraTrig => &StopCamera,
            StepAction::OpenOlfactometer(a) => a,
            StepAction::CloseOlfactometer(a) => a,
            StepAction::SetAllOlfactometerValves(a) => a,
            StepAction::PresentOdor(a) => a,
            StepAction::SetGpio(a) => a,
            StepAction::Annotate(a) => a,
            StepAction::Wait(a) => a,
            StepAction::Settle(a) => a,
            StepAction::StartRecording(a) => a,
            StepAction::StopRecording(a) => a,
            StepAction::Preroll(_)
            | StepAction::Reset
            | StepAction::Arm { .. }
            | StepAction::LoadCalibration { .. } => return None,
        };
        Some(action)
    }
}

/// One plan entry
#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    /// Action and its parameters
    #[serde(flatten)]
    pub action: StepAction,
    /// Run several times
    #[serde(default)]
    pub repeat: Option<Repeat>,
    /// Override the action's default logging
    #[serde(default)]
    pub log: Option<bool>,
}

impl Step {
    fn call_options(&self) -> CallOptions {
        CallOptions {
            log: self.log,
            repeat: self.repeat,
        }
    }
}

/// An ordered list of steps
#[derive(Debug, Clone, Deserialize)]
pub struct Plan {
    /// Free-form title
    #[serde(default)]
    pub name: Option<String>,
    /// Steps in execution order
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// A step that failed without stopping the plan
#[derive(Debug, Clone, PartialEq)]
pub struct StepFault {
    /// Zero-based step index
    pub index: usize,
    /// Step action name
    pub action: &'static str,
    /// Error message
    pub message: String,
}

/// Summary of a plan run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanReport {
    /// Steps that finished
    pub completed: usize,
    /// Steps whose repetitions were cut short by a cancel
    pub cancelled: usize,
    /// Recoverable failures
    pub faults: Vec<StepFault>,
    /// Where the event log was saved, if anywhere
    pub log_path: Option<PathBuf>,
}

impl Plan {
    /// Parse and check a plan
    pub fn from_toml_str(text: &str) -> RigResult<Self> {
        let plan: Plan = toml::from_str(text).map_err(|e| RigError::Plan(e.to_string()))?;
        plan.validate()?;
        Ok(plan)
    }

    /// Read a plan file
    pub fn load(path: impl AsRef<Path>) -> RigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text).map_err(|e| match e {
            RigError::Plan(msg) => RigError::Plan(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    /// Reject repeat settings and wait lengths that cannot run
    pub fn validate(&self) -> RigResult<()> {
        for (i, step) in self.steps.iter().enumerate() {
            let name = step.action.name();
            if let Some(repeat) = step.repeat {
                if repeat.n == 0 {
                    return Err(RigError::Plan(format!(
                        "step {} ({}): repeat count must be at least 1",
                        i + 1,
                        name
                    )));
                }
                check_seconds(i, name, "repeat interval", repeat.interval)?;
            }
            if let Some(seconds) = step.action.wait_seconds() {
                check_seconds(i, name, "duration", seconds)?;
            }
        }
        Ok(())
    }

    /// Run every step in order on `rig`
    pub async fn run(&self, rig: &mut Rig) -> RigResult<PlanReport> {
        let total = self.steps.len();
        info!(
            plan = self.name.as_deref().unwrap_or("unnamed"),
            steps = total,
            "Starting plan"
        );
        let mut report = PlanReport::default();

        for (index, step) in self.steps.iter().enumerate() {
            let name = step.action.name();
            info!(step = index + 1, of = total, action = name, "Step");
            match run_step(rig, step).await {
                Ok(cancelled) => {
                    report.completed += 1;
                    if cancelled {
                        report.cancelled += 1;
                    }
                }
                Err(e) if e.is_recoverable() => {
                    warn!(step = index + 1, action = name, error = %e, "Step failed. Continuing");
                    report.faults.push(StepFault {
                        index,
                        action: name,
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    error!(step = index + 1, action = name, error = %e, "Step failed. Stopping plan");
                    if let Err(save) = rig.persist_log(true) {
                        warn!(error = %save, "Could not save event log");
                    }
                    return Err(e);
                }
            }
        }

        report.log_path = rig.persist_log(true)?;
        info!(
            completed = report.completed,
            faults = report.faults.len(),
            "Plan finished"
        );
        Ok(report)
    }
}

fn check_seconds(index: usize, action: &str, what: &str, seconds: f64) -> RigResult<()> {
    if seconds.is_finite() && (0.0..=MAX_WAIT_SECS).contains(&seconds) {
        return Ok(());
    }
    Err(RigError::Plan(format!(
        "step {} ({}): {} must be between 0 and {} seconds, got {}",
        index + 1,
        action,
        what,
        MAX_WAIT_SECS,
        seconds
    )))
}

/// Returns whether a cancel cut the step's repetitions short
async fn run_step(rig: &mut Rig, step: &Step) -> RigResult<bool> {
    if let Some(action) = step.action.action() {
        let invocation = rig.execute(action, step.call_options()).await?;
        return Ok(invocation.cancelled);
    }
    match &step.action {
        StepAction::Preroll(options) => rig.preroll(options).await?,
        StepAction::Reset => rig.reset().await?,
        StepAction::Arm { run, gate, trigger } => rig.arm_run(run, *gate, *trigger)?,
        StepAction::LoadCalibration { path } => rig.load_calibration(path)?,
        other => {
            return Err(RigError::Plan(format!(
                "step '{}' has no runner",
                other.name()
            )))
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::PhasicMode;
    use crate::config::RigConfig;
    use crate::mock::MockDevice;
    use crate::protocol::{Command, DeviceLink, Phase};
    use crate::recording::RecordControl;
    use std::time::Duration;

    const PLAN: &str = r#"
name = "smoke"

[[steps]]
action = "present_gas"
gas = "hypoxia"

[[steps]]
action = "run_pulse"
duration = 0.05
amplitude = 0.5
repeat = { n = 3, interval = 1.0 }

[[steps]]
action = "phasic_stim"
phase = "e"
mode = "train"
n = 5
duration = 2
amplitude = 1
frequency = 20
pulse_duration = 0.01

[[steps]]
action = "start_hb"

[[steps]]
action = "wait"
duration = 2.5
log = true

[[steps]]
action = "annotate"
label = "injection"
params = { drug = "saline", volume_ul = 50 }
"#;

    #[test]
    fn parses_every_step_shape() {
        let plan = Plan::from_toml_str(PLAN).unwrap();
        assert_eq!(plan.name.as_deref(), Some("smoke"));
        assert_eq!(plan.steps.len(), 6);
        assert_eq!(
            plan.steps[1].repeat,
            Some(Repeat {
                n: 3,
                interval: 1.0
            })
        );
        match &plan.steps[2].action {
            StepAction::PhasicStim(stim) => {
                assert_eq!(stim.spec.phase, Phase::Expiratory);
                assert_eq!(stim.spec.mode, PhasicMode::Train);
                assert_eq!(stim.spec.duration, 2.0);
            }
            other => panic!("unexpected step {:?}", other),
        }
        assert!(matches!(plan.steps[3].action, StepAction::StartHb));
        assert_eq!(plan.steps[4].log, Some(true));
    }

    #[test]
    fn unknown_action_is_a_plan_error() {
        let err = Plan::from_toml_str("[[steps]]\naction = \"launch_rocket\"\n").unwrap_err();
        assert!(matches!(err, RigError::Plan(_)));
    }

    #[test]
    fn zero_repeat_is_rejected() {
        let text = "[[steps]]\naction = \"play_alert\"\nrepeat = { n = 0, interval = 1.0 }\n";
        assert!(matches!(Plan::from_toml_str(text), Err(RigError::Plan(_))));
    }

    #[test]
    fn oversized_waits_are_rejected() {
        for text in [
            "[[steps]]\naction = \"wait\"\nduration = 1e20\n",
            "[[steps]]\naction = \"present_gas\"\ngas = \"O2\"\nduration = 1e20\n",
            "[[steps]]\naction = \"preroll\"\nsettle = 1e20\n",
            "[[steps]]\naction = \"play_alert\"\nrepeat = { n = 2, interval = 1e20 }\n",
        ] {
            let err = Plan::from_toml_str(text).unwrap_err();
            assert!(err.to_string().contains("between 0 and"), "{}", err);
        }
        let week = "[[steps]]\naction = \"wait\"\nduration = 604800\n";
        assert!(Plan::from_toml_str(week).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn runs_steps_in_order() {
        let (link, device) = MockDevice::spawn(Duration::from_secs(1));
        let mut rig = Rig::new(RigConfig::default(), link, RecordControl::Ttl);
        let plan = Plan::from_toml_str(PLAN).unwrap();

        let report = plan.run(&mut rig).await.unwrap();
        assert_eq!(report.completed, 6);
        assert!(report.faults.is_empty());
        assert_eq!(report.log_path, None);

        let commands = device.commands();
        assert_eq!(commands[0], Command::OpenValve { valve: 3 });
        assert_eq!(commands.len(), 1 + 3 + 1 + 1);
        assert_eq!(commands[5], Command::HeringBreuerStart);

        let labels: Vec<_> = rig.log().records().iter().map(|r| r.label.as_str()).collect();
        assert_eq!(
            labels,
            vec![
                "present_hypoxia",
                "opto_pulse",
                "opto_pulse",
                "opto_pulse",
                "opto_phasic",
                "start_heringbreuer",
                "wait",
                "injection"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn connectivity_faults_do_not_stop_the_plan() {
        let (link, device) = MockDevice::spawn(Duration::from_millis(200));
        device.set_silent(true);
        let mut rig = Rig::new(RigConfig::default(), link, RecordControl::Ttl);
        let plan = Plan::from_toml_str(
            "[[steps]]\naction = \"start_hb\"\n\n[[steps]]\naction = \"annotate\"\nlabel = \"after\"\n",
        )
        .unwrap();

        let report = plan.run(&mut rig).await.unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(report.faults.len(), 1);
        assert_eq!(report.faults[0].action, "start_hb");
        assert_eq!(rig.log().records()[0].label, "after");
    }

    #[tokio::test]
    async fn precondition_failure_stops_the_plan() {
        let mut rig = Rig::new(
            RigConfig::default(),
            DeviceLink::disconnected(),
            RecordControl::Ttl,
        );
        let plan = Plan::from_toml_str(
            "[[steps]]\naction = \"present_gas\"\ngas = \"helium\"\n\n[[steps]]\naction = \"play_alert\"\n",
        )
        .unwrap();

        let err = plan.run(&mut rig).await.unwrap_err();
        assert!(matches!(err, RigError::GasNotConfigured { .. }));
        assert!(rig.log().is_empty());
    }

    #[tokio::test]
    async fn arm_step_targets_the_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RigConfig::default();
        config.recording.data_dir = dir.path().to_path_buf();
        let mut rig = Rig::new(config, DeviceLink::disconnected(), RecordControl::Ttl);
        let plan = Plan::from_toml_str(
            "[[steps]]\naction = \"arm\"\nrun = \"m4\"\ngate = 2\n\n[[steps]]\naction = \"start_recording\"\n\n[[steps]]\naction = \"stop_recording\"\n",
        )
        .unwrap();

        let report = plan.run(&mut rig).await.unwrap();
        let path = report.log_path.unwrap();
        assert!(path.starts_with(dir.path().join("m4").join("m4_g2")));
        assert!(path.exists());
    }
}
