//! Recording session state machine.
//!
//! ```text
//! idle --arm--> armed --start--> recording --stop--> idle
//! ```
//!
//! The TTL backend is armed explicitly with a [`RunTarget`]. The remote backend arms
//! itself on `start` by asking the recorder for run name and data directory.

use super::backend::RecordingBackend;
use super::naming::{next_recording, RunTarget};
use crate::clock::SessionClock;
use crate::config::RecordControlKind;
use crate::error::{RigError, RigResult};
use crate::protocol::{Command, DeviceLink};
use std::path::PathBuf;
use tracing::{info, instrument, warn};

/// Session states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing armed
    Idle,
    /// Target known, not yet recording
    Armed,
    /// Recorder capturing
    Recording,
}

impl SessionState {
    /// Lower-case state name
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Armed => "armed",
            SessionState::Recording => "recording",
        }
    }
}

/// How recordings are started and stopped
pub enum RecordControl {
    /// Record line on the microcontroller
    Ttl,
    /// Remote-command API of the acquisition software
    Remote(Box<dyn RecordingBackend>),
}

impl RecordControl {
    /// Configuration kind of this control
    pub fn kind(&self) -> RecordControlKind {
        match self {
            RecordControl::Ttl => RecordControlKind::Ttl,
            RecordControl::Remote(_) => RecordControlKind::Remote,
        }
    }
}

impl std::fmt::Debug for RecordControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordControl::Ttl => f.write_str("Ttl"),
            RecordControl::Remote(_) => f.write_str("Remote(..)"),
        }
    }
}

/// Recording state, target and base time
#[derive(Debug)]
pub struct RecordingSession {
    control: RecordControl,
    state: SessionState,
    target: Option<RunTarget>,
    started_at: Option<f64>,
    root_data_dir: Option<PathBuf>,
    log_prefix: String,
}

impl RecordingSession {
    /// Idle session on `control`
    pub fn new(control: RecordControl, log_prefix: impl Into<String>) -> Self {
        Self {
            control,
            state: SessionState::Idle,
            target: None,
            started_at: None,
            root_data_dir: None,
            log_prefix: log_prefix.into(),
        }
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether capture is running
    pub fn is_recording(&self) -> bool {
        self.state == SessionState::Recording
    }

    /// Backend kind
    pub fn control_kind(&self) -> RecordControlKind {
        self.control.kind()
    }

    /// Current or last target
    pub fn target(&self) -> Option<&RunTarget> {
        self.target.as_ref()
    }

    /// Start time of the current or last recording
    pub fn base_time(&self) -> Option<f64> {
        self.started_at
    }

    /// Where the log table goes, once a target is known
    pub fn log_path(&self) -> Option<PathBuf> {
        self.target.as_ref().map(|t| t.log_path(&self.log_prefix))
    }

    /// Set the target for the next TTL recording
    pub fn arm(&mut self, target: RunTarget) -> RigResult<()> {
        if self.state == SessionState::Recording {
            return Err(self.wrong_state("idle or armed"));
        }
        std::fs::create_dir_all(&target.dest)?;
        info!(
            run = %target.run,
            gate = target.gate,
            trigger = target.trigger,
            "Recording armed"
        );
        self.target = Some(target);
        self.state = SessionState::Armed;
        Ok(())
    }

    /// Fail unless the recorder is live. Always succeeds for TTL control.
    pub async fn ensure_recorder_running(&mut self) -> RigResult<()> {
        match &mut self.control {
            RecordControl::Ttl => Ok(()),
            RecordControl::Remote(backend) => {
                if backend.is_running().await? {
                    Ok(())
                } else {
                    Err(RigError::RecorderNotRunning)
                }
            }
        }
    }

    /// Start capture. On success the session is recording and its base time is set.
    #[instrument(skip(self, link, clock), fields(control = ?self.control.kind()), err)]
    pub async fn start(
        &mut self,
        link: &mut DeviceLink,
        clock: &SessionClock,
        increment_gate: bool,
    ) -> RigResult<()> {
        if self.state == SessionState::Recording {
            return Err(self.wrong_state("idle or armed"));
        }
        if self.control.kind() == RecordControlKind::Ttl && self.state != SessionState::Armed {
            return Err(self.wrong_state("armed"));
        }
        match &mut self.control {
            RecordControl::Ttl => {
                if increment_gate {
                    warn!("Gate increment is not available with TTL control. Ignoring");
                }
                link.flush_input();
                link.send(&Command::RecordStart).await?;
            }
            RecordControl::Remote(backend) => {
                if !backend.is_running().await? {
                    return Err(RigError::RecorderNotRunning);
                }
                let data_dir = backend.data_dir().await?;
                let run = backend.run_name().await?;

                let named_after_run =
                    data_dir.file_name().and_then(|n| n.to_str()) == Some(run.as_str());
                let subject_dir = if named_after_run {
                    data_dir.clone()
                } else {
                    let subject_dir = data_dir.join(&run);
                    std::fs::create_dir_all(&subject_dir)?;
                    backend.set_data_dir(&subject_dir).await?;
                    subject_dir
                };
                self.root_data_dir = Some(data_dir);

                let next = next_recording(&subject_dir, &run, increment_gate)?;
                let dest = subject_dir.join(format!("{}_g{}", run, next.gate));
                std::fs::create_dir_all(&dest)?;

                backend.enable(true).await?;
                let gate_delta = if next.new_gate { 1 } else { -1 };
                backend.trigger(gate_delta, 1).await?;

                self.target = Some(RunTarget {
                    dest,
                    run,
                    gate: next.gate,
                    trigger: next.trigger,
                });
            }
        }

        self.state = SessionState::Recording;
        self.started_at = Some(clock.now());
        if let Some(path) = self.log_path() {
            info!(log = %path.display(), "Recording started");
        }
        Ok(())
    }

    /// Stop capture and return to idle. The target and base time stay so the log
    /// can be written one last time.
    #[instrument(skip(self, link), fields(control = ?self.control.kind()), err)]
    pub async fn stop(&mut self, link: &mut DeviceLink) -> RigResult<()> {
        if self.state != SessionState::Recording {
            return Err(self.wrong_state("recording"));
        }
        match &mut self.control {
            RecordControl::Ttl => {
                link.flush_input();
                link.send(&Command::RecordStop).await?;
            }
            RecordControl::Remote(backend) => {
                // Gate is not advanced here; the next start decides
                backend.trigger(-1, 0).await?;
                if let Some(root) = self.root_data_dir.take() {
                    backend.set_data_dir(&root).await?;
                }
            }
        }
        self.state = SessionState::Idle;
        info!("Recording stopped");
        Ok(())
    }

    fn wrong_state(&self, expected: &'static str) -> RigError {
        RigError::InvalidState {
            expected,
            actual: self.state.as_str(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRecorder;

    fn target(dir: &std::path::Path) -> RunTarget {
        RunTarget {
            dest: dir.join("m1_g0"),
            run: "m1".into(),
            gate: 0,
            trigger: 0,
        }
    }

    #[tokio::test]
    async fn ttl_requires_arming() {
        let mut session = RecordingSession::new(RecordControl::Ttl, "_log");
        let mut link = DeviceLink::disconnected();
        let clock = SessionClock::new();

        let err = session.start(&mut link, &clock, false).await.unwrap_err();
        assert!(matches!(
            err,
            RigError::InvalidState {
                expected: "armed",
                actual: "idle"
            }
        ));

        let dir = tempfile::tempdir().unwrap();
        session.arm(target(dir.path())).unwrap();
        session.start(&mut link, &clock, false).await.unwrap();
        assert!(session.is_recording());
        assert!(session.base_time().is_some());
        assert!(matches!(
            session.arm(target(dir.path())),
            Err(RigError::InvalidState { .. })
        ));

        session.stop(&mut link).await.unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.log_path().is_some());
    }

    #[tokio::test]
    async fn stop_when_idle_is_rejected() {
        let mut session = RecordingSession::new(RecordControl::Ttl, "_log");
        let mut link = DeviceLink::disconnected();
        assert!(matches!(
            session.stop(&mut link).await,
            Err(RigError::InvalidState {
                expected: "recording",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn remote_start_requires_live_recorder() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = MockRecorder::new("m1", dir.path());
        recorder.set_running(false);
        let mut session =
            RecordingSession::new(RecordControl::Remote(Box::new(recorder.clone())), "_log");
        let mut link = DeviceLink::disconnected();

        let err = session
            .start(&mut link, &SessionClock::new(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, RigError::RecorderNotRunning));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(recorder.triggers().is_empty());
    }

    #[tokio::test]
    async fn remote_start_creates_subject_dir_and_restores_root() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = MockRecorder::new("m1", dir.path());
        let mut session = RecordingSession::new(
            RecordControl::Remote(Box::new(recorder.clone())),
            "_cibbrig_log.table",
        );
        let mut link = DeviceLink::disconnected();

        session
            .start(&mut link, &SessionClock::new(), true)
            .await
            .unwrap();
        let subject = dir.path().join("m1");
        assert_eq!(recorder.current_data_dir(), subject);
        assert!(subject.join("m1_g0").is_dir());
        assert_eq!(
            session.log_path().unwrap(),
            subject.join("m1_g0").join("_cibbrig_log.table.m1.g0.t0.tsv")
        );
        assert!(recorder.is_enabled());
        assert_eq!(recorder.triggers(), vec![(1, 1)]);

        session.stop(&mut link).await.unwrap();
        assert_eq!(recorder.triggers(), vec![(1, 1), (-1, 0)]);
        assert_eq!(recorder.current_data_dir(), dir.path());
    }

    #[tokio::test]
    async fn remote_restart_without_increment_keeps_gate() {
        let dir = tempfile::tempdir().unwrap();
        let subject = dir.path().join("m1");
        let gate = subject.join("m1_g0");
        std::fs::create_dir_all(&gate).unwrap();
        std::fs::write(gate.join("m1_g0_t0.nidq.bin"), b"").unwrap();

        let recorder = MockRecorder::new("m1", &subject);
        let mut session =
            RecordingSession::new(RecordControl::Remote(Box::new(recorder.clone())), "_log");
        let mut link = DeviceLink::disconnected();

        session
            .start(&mut link, &SessionClock::new(), false)
            .await
            .unwrap();
        let target = session.target().unwrap();
        assert_eq!((target.gate, target.trigger), (0, 1));
        assert_eq!(recorder.triggers(), vec![(-1, 1)]);
        // Already inside the run directory: no sub-directory
        assert_eq!(recorder.current_data_dir(), subject);
    }
}
