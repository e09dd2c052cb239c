//! The rig: device link, event log, recording session and clock in one place.
//!
//! All hardware access goes through `&mut Rig`, so commands are serialized by
//! construction.

use crate::amplitude::CalibrationTable;
use crate::clock::{CancelHandle, SessionClock, WaitOutcome, Waiter};
use crate::config::{RecordControlKind, RigConfig};
use crate::error::RigResult;
use crate::log_store::LogStore;
use crate::protocol::{Command, DeviceLink};
use crate::recording::{RecordControl, RecordingSession, RemoteRecorder, RunTarget};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// File name of the calibration snapshot written next to each remote recording
pub const CALIBRATION_SNAPSHOT: &str = "opto_calibration.json";

/// Rig controller
#[derive(Debug)]
pub struct Rig {
    pub(crate) link: DeviceLink,
    pub(crate) config: RigConfig,
    pub(crate) log: LogStore,
    pub(crate) session: RecordingSession,
    pub(crate) clock: SessionClock,
    pub(crate) waiter: Waiter,
    pub(crate) calibration: Option<CalibrationTable>,
    /// Whether the action being performed will be logged
    pub(crate) call_logged: bool,
}

impl Rig {
    /// Assemble a rig from parts. Does not talk to the device.
    pub fn new(config: RigConfig, link: DeviceLink, control: RecordControl) -> Self {
        let clock = SessionClock::new();
        let session = RecordingSession::new(control, config.recording.log_prefix.clone());
        Self {
            link,
            log: LogStore::new(clock.now()),
            session,
            clock,
            waiter: Waiter::new(),
            calibration: None,
            call_logged: false,
            config,
        }
    }

    /// Validate `config`, open the serial port (or run disconnected) and send the
    /// laser configuration.
    pub async fn connect(config: RigConfig) -> RigResult<Self> {
        config.validate()?;
        let link = DeviceLink::connect(&config.serial).await;
        let control = match config.recording.control {
            RecordControlKind::Ttl => RecordControl::Ttl,
            RecordControlKind::Remote => RecordControl::Remote(Box::new(RemoteRecorder::new(
                config.recording.remote_addr.clone(),
                Duration::from_millis(config.recording.remote_timeout_ms),
            ))),
        };
        let mut rig = Self::new(config, link, control);
        rig.init_device().await?;
        Ok(rig)
    }

    /// Swap in a new link and send the device configuration over it
    pub async fn attach(&mut self, link: DeviceLink) -> RigResult<()> {
        self.link = link;
        self.init_device().await
    }

    /// Send the laser configuration. The firmware forgets it on reset, so this runs on
    /// every (re)connect. An unanswered init is reported and the rig carries on.
    #[instrument(skip(self), fields(port = %self.link.name()))]
    pub async fn init_device(&mut self) -> RigResult<()> {
        if !self.link.is_connected() {
            return Ok(());
        }
        let laser = self.config.laser;
        match self.link.send(&self.laser_init_command()).await {
            Ok(()) => {
                info!(mode = ?laser.mode, pin = laser.power_meter_pin, "Laser initialized");
                Ok(())
            }
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "Laser init not acknowledged");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Laser configuration frame for the current [`crate::config::DeviceConfig`]
    pub fn laser_init_command(&self) -> Command {
        let laser = &self.config.laser;
        Command::LaserInit {
            mode: laser.mode,
            power_meter_pin: laser.power_meter_pin,
            null_voltage: laser.null_voltage_u8(),
        }
    }

    /// Active configuration
    pub fn config(&self) -> &RigConfig {
        &self.config
    }

    /// Event log
    pub fn log(&self) -> &LogStore {
        &self.log
    }

    /// Recording session
    pub fn session(&self) -> &RecordingSession {
        &self.session
    }

    /// Whether a device is attached
    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Current time, epoch seconds
    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    /// Handle that interrupts the wait in flight
    pub fn cancel_handle(&self) -> CancelHandle {
        self.waiter.handle()
    }

    /// Loaded calibration table
    pub fn calibration(&self) -> Option<&CalibrationTable> {
        self.calibration.as_ref()
    }

    /// Replace the calibration table
    pub fn set_calibration(&mut self, table: Option<CalibrationTable>) {
        self.calibration = table;
    }

    /// Load a calibration table from JSON
    pub fn load_calibration(&mut self, path: impl AsRef<Path>) -> RigResult<()> {
        let table = CalibrationTable::load(path.as_ref())?;
        info!(path = %path.as_ref().display(), points = table.command_voltage.len(), "Calibration loaded");
        self.calibration = Some(table);
        Ok(())
    }

    /// Send a raw command
    pub async fn send(&mut self, command: &Command) -> RigResult<()> {
        self.link.send(command).await
    }

    /// Cancellable wait
    pub async fn wait(&mut self, seconds: f64) -> WaitOutcome {
        self.waiter.wait(seconds).await
    }

    /// Time all persisted timestamps are relative to: the recording start if there
    /// has been one, else when the log was created.
    pub fn base_time(&self) -> f64 {
        self.session
            .base_time()
            .unwrap_or_else(|| self.log.created_at())
    }

    /// Rewrite the event log table.
    ///
    /// Without a recording target there is no file name and nothing is written; the
    /// omission is reported when `verbose`.
    pub fn persist_log(&self, verbose: bool) -> RigResult<Option<PathBuf>> {
        let Some(path) = self.session.log_path() else {
            if verbose {
                warn!("No log file name yet. Event log not saved");
            } else {
                debug!("No log file name yet. Event log not saved");
            }
            return Ok(None);
        };
        self.log.write_table(&path, self.base_time(), self.now())?;
        if verbose {
            info!(path = %path.display(), rows = self.log.len(), "Event log saved");
        }
        Ok(Some(path))
    }

    /// Write the event log table to an explicit path
    pub fn persist_log_to(&self, path: &Path) -> RigResult<()> {
        self.log.write_table(path, self.base_time(), self.now())?;
        info!(path = %path.display(), rows = self.log.len(), "Event log saved");
        Ok(())
    }

    /// Arm a TTL recording
    pub fn arm(&mut self, target: RunTarget) -> RigResult<()> {
        self.session.arm(target)
    }

    /// Arm a TTL recording under the configured data directory:
    /// `<data_dir>/<run>/<run>_g<gate>`
    pub fn arm_run(&mut self, run: &str, gate: u32, trigger: u32) -> RigResult<()> {
        let dest = self
            .config
            .recording
            .data_dir
            .join(run)
            .join(format!("{}_g{}", run, gate));
        self.session.arm(RunTarget {
            dest,
            run: run.to_string(),
            gate,
            trigger,
        })
    }

    /// Start capture.
    ///
    /// Snapshots the calibration table into the gate directory. With remote control
    /// this also clears the event log. A TTL start keeps earlier records, so the
    /// baseline gas stays in the table.
    pub async fn begin_recording(&mut self, increment_gate: bool) -> RigResult<()> {
        self.session
            .start(&mut self.link, &self.clock, increment_gate)
            .await?;

        if self.session.control_kind() == RecordControlKind::Remote {
            self.log.reset(self.clock.now());
        }
        if let (Some(table), Some(target)) = (&self.calibration, self.session.target()) {
            let path = target.dest.join(CALIBRATION_SNAPSHOT);
            if path.exists() {
                warn!(path = %path.display(), "Calibration snapshot exists. Overwriting");
            }
            table.save(&path)?;
        }
        Ok(())
    }

    /// Stop capture
    pub async fn end_recording(&mut self) -> RigResult<()> {
        self.session.stop(&mut self.link).await
    }

    /// Discard buffered input from the device
    pub fn flush_input(&mut self) -> usize {
        self.link.flush_input()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRecorder;
    use crate::record::{Category, LogRecord, Outcome};

    #[test]
    fn base_time_falls_back_to_log_creation() {
        let rig = Rig::new(
            RigConfig::default(),
            DeviceLink::disconnected(),
            RecordControl::Ttl,
        );
        assert_eq!(rig.base_time(), rig.log().created_at());
    }

    #[tokio::test]
    async fn no_target_means_no_file() {
        let mut rig = Rig::new(
            RigConfig::default(),
            DeviceLink::disconnected(),
            RecordControl::Ttl,
        );
        rig.log.append(LogRecord::from_outcome(
            Outcome::new("x", Category::Event),
            rig.now(),
            None,
        ));
        assert_eq!(rig.persist_log(true).unwrap(), None);
    }

    #[tokio::test]
    async fn remote_start_snapshots_calibration_and_resets_log() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = MockRecorder::new("m2", dir.path());
        let mut rig = Rig::new(
            RigConfig::default(),
            DeviceLink::disconnected(),
            RecordControl::Remote(Box::new(recorder)),
        );
        rig.set_calibration(Some(
            CalibrationTable::new(vec![0.0, 1.0], vec![0.0, 12.0]).unwrap(),
        ));
        rig.log.append(LogRecord::from_outcome(
            Outcome::new("before", Category::Event),
            rig.now(),
            None,
        ));

        rig.begin_recording(true).await.unwrap();
        assert!(rig.log().is_empty());
        let snapshot = dir.path().join("m2").join("m2_g0").join(CALIBRATION_SNAPSHOT);
        assert!(snapshot.exists());
        assert_eq!(rig.base_time(), rig.session().base_time().unwrap());
    }

    #[tokio::test]
    async fn ttl_start_keeps_earlier_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RigConfig::default();
        config.recording.data_dir = dir.path().to_path_buf();
        let mut rig = Rig::new(config, DeviceLink::disconnected(), RecordControl::Ttl);
        rig.log.append(LogRecord::from_outcome(
            Outcome::new("present_O2", Category::Gas),
            rig.now(),
            None,
        ));

        rig.arm_run("m1", 0, 0).unwrap();
        rig.begin_recording(false).await.unwrap();

        let labels: Vec<_> = rig.log().records().iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["present_O2"]);
        assert_eq!(rig.base_time(), rig.session().base_time().unwrap());
    }

    #[test]
    fn arm_run_uses_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RigConfig::default();
        config.recording.data_dir = dir.path().to_path_buf();
        let mut rig = Rig::new(config, DeviceLink::disconnected(), RecordControl::Ttl);

        rig.arm_run("m3", 1, 0).unwrap();
        let path = rig.session().log_path().unwrap();
        assert_eq!(
            path,
            dir.path()
                .join("m3")
                .join("m3_g1")
                .join("_cibbrig_log.table.m3.g1.t0.tsv")
        );
    }
}
