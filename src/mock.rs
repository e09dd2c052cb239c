//! Mock hardware for running without a rig.
//!
//! - [`MockDevice`] - firmware emulator behind an in-memory serial stream. Decodes
//!   every frame, records it, answers polls and acknowledges.
//! - [`MockRecorder`] - acquisition software stand-in backed by a real directory.
//!
//! Used by the test suite and by `rig_daq run --emulate`.

use crate::error::{RigError, RigResult};
use crate::protocol::{Command, DeviceLink};
use crate::recording::RecordingBackend;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tracing::{debug, trace};

/// Byte the emulated firmware acknowledges with
pub const ACK: u8 = b'k';

/// Scheduler turns [`MockDevice::wait_for_commands`] gives the emulator
const MAX_YIELDS: usize = 1000;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug)]
struct DeviceState {
    commands: Vec<Command>,
    silent: bool,
    background: u16,
    counts_per_percent: u16,
}

/// Emulated rig firmware
#[derive(Debug, Clone)]
pub struct MockDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl MockDevice {
    /// Start the emulator and return a link connected to it.
    ///
    /// Must be called inside a tokio runtime. The emulator stops when the link is
    /// dropped.
    pub fn spawn(ack_timeout: Duration) -> (DeviceLink, MockDevice) {
        let (host, device) = tokio::io::duplex(1024);
        let mock = MockDevice {
            state: Arc::new(Mutex::new(DeviceState {
                commands: Vec::new(),
                silent: false,
                background: 40,
                counts_per_percent: 50,
            })),
        };
        tokio::spawn(mock.clone().serve(device));
        (DeviceLink::from_io(host, ack_timeout), mock)
    }

    /// Every command received so far
    pub fn commands(&self) -> Vec<Command> {
        lock(&self.state).commands.clone()
    }

    /// Commands received, once at least `n` have arrived.
    ///
    /// Frames without an ack are written before the emulator has read them, so a
    /// test that ends on one must let the emulator task catch up. Returns what
    /// arrived if the emulator stalls.
    pub async fn wait_for_commands(&self, n: usize) -> Vec<Command> {
        for _ in 0..MAX_YIELDS {
            let commands = self.commands();
            if commands.len() >= n {
                return commands;
            }
            tokio::task::yield_now().await;
        }
        self.commands()
    }

    /// Forget received commands
    pub fn clear(&self) {
        lock(&self.state).commands.clear();
    }

    /// Stop answering (commands are still recorded)
    pub fn set_silent(&self, silent: bool) {
        lock(&self.state).silent = silent;
    }

    /// Photometer model: `background + amplitude_percent * counts_per_percent`
    pub fn set_photometer(&self, background: u16, counts_per_percent: u16) {
        let mut state = lock(&self.state);
        state.background = background;
        state.counts_per_percent = counts_per_percent;
    }

    async fn serve(self, mut io: DuplexStream) {
        let mut pending: Vec<u8> = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            let n = match io.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            pending.extend_from_slice(&buf[..n]);

            loop {
                let (command, used) = match Command::decode(&pending) {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break,
                    Err(e) => {
                        debug!(error = %e, "Emulator dropped malformed input");
                        pending.clear();
                        break;
                    }
                };
                pending.drain(..used);
                trace!(?command, "Emulator received");

                let reply = self.respond(command);
                if !reply.is_empty() && io.write_all(&reply).await.is_err() {
                    return;
                }
            }
        }
    }

    fn respond(&self, command: Command) -> Vec<u8> {
        let mut state = lock(&self.state);
        let mut reply = Vec::new();
        if !state.silent {
            if let Command::PollPower { amplitude } = command {
                let reading = state
                    .background
                    .saturating_add(u16::from(amplitude).saturating_mul(state.counts_per_percent));
                reply.extend_from_slice(&reading.to_le_bytes());
            }
            if command.expects_ack() {
                reply.push(ACK);
            }
        }
        state.commands.push(command);
        reply
    }
}

#[derive(Debug)]
struct RecorderState {
    running: bool,
    enabled: bool,
    run: String,
    data_dir: PathBuf,
    triggers: Vec<(i32, i32)>,
}

/// In-memory acquisition software
#[derive(Debug, Clone)]
pub struct MockRecorder {
    state: Arc<Mutex<RecorderState>>,
}

impl MockRecorder {
    /// Running recorder for `run`, writing into `data_dir`
    pub fn new(run: impl Into<String>, data_dir: impl AsRef<Path>) -> Self {
        Self {
            state: Arc::new(Mutex::new(RecorderState {
                running: true,
                enabled: false,
                run: run.into(),
                data_dir: data_dir.as_ref().to_path_buf(),
                triggers: Vec::new(),
            })),
        }
    }

    /// Start or stop the simulated run
    pub fn set_running(&self, running: bool) {
        lock(&self.state).running = running;
    }

    /// Whether recording was enabled
    pub fn is_enabled(&self) -> bool {
        lock(&self.state).enabled
    }

    /// Gate/trigger calls received, in order
    pub fn triggers(&self) -> Vec<(i32, i32)> {
        lock(&self.state).triggers.clone()
    }

    /// Data directory as last set
    pub fn current_data_dir(&self) -> PathBuf {
        lock(&self.state).data_dir.clone()
    }
}

#[async_trait]
impl RecordingBackend for MockRecorder {
    async fn is_running(&mut self) -> RigResult<bool> {
        Ok(lock(&self.state).running)
    }

    async fn enable(&mut self, enabled: bool) -> RigResult<()> {
        lock(&self.state).enabled = enabled;
        Ok(())
    }

    async fn trigger(&mut self, gate_delta: i32, trigger_delta: i32) -> RigResult<()> {
        let mut state = lock(&self.state);
        if !state.running {
            return Err(RigError::RecorderNotRunning);
        }
        state.triggers.push((gate_delta, trigger_delta));
        Ok(())
    }

    async fn run_name(&mut self) -> RigResult<String> {
        Ok(lock(&self.state).run.clone())
    }

    async fn data_dir(&mut self) -> RigResult<PathBuf> {
        Ok(lock(&self.state).data_dir.clone())
    }

    async fn set_data_dir(&mut self, dir: &Path) -> RigResult<()> {
        lock(&self.state).data_dir = dir.to_path_buf();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emulator_acknowledges_and_records() {
        let (mut link, device) = MockDevice::spawn(Duration::from_secs(1));
        link.send(&Command::OpenValve { valve: 1 }).await.unwrap();
        link.send(&Command::CameraStart { fps: 60 }).await.unwrap();
        link.send(&Command::AudioSync).await.unwrap();

        assert_eq!(
            device.commands(),
            vec![
                Command::OpenValve { valve: 1 },
                Command::CameraStart { fps: 60 },
                Command::AudioSync
            ]
        );
    }

    #[tokio::test]
    async fn unacknowledged_frame_is_seen_after_waiting() {
        let (mut link, device) = MockDevice::spawn(Duration::from_secs(1));
        link.send(&Command::OpenValve { valve: 2 }).await.unwrap();
        link.send(&Command::CameraStart { fps: 120 }).await.unwrap();

        let commands = device.wait_for_commands(2).await;
        assert_eq!(commands.last(), Some(&Command::CameraStart { fps: 120 }));
    }

    #[tokio::test]
    async fn emulator_answers_power_polls() {
        let (mut link, device) = MockDevice::spawn(Duration::from_secs(1));
        device.set_photometer(100, 10);
        let reading = link
            .query_u16(&Command::PollPower { amplitude: 30 })
            .await
            .unwrap();
        assert_eq!(reading, 400);
    }
}
