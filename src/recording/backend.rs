use crate::error::RigResult;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Control surface of the acquisition software.
///
/// Mirrors the remote-command API: the rig only ever checks the recorder is live,
/// enables recording, moves the gate/trigger counters and manages the data
/// directory. Gate and trigger deltas follow the recorder convention: `1` starts a
/// new one, `-1` keeps the current one, `0` stops.
#[async_trait]
pub trait RecordingBackend: Send {
    /// Whether a run is active in the acquisition software
    async fn is_running(&mut self) -> RigResult<bool>;

    /// Enable or disable writing to disk
    async fn enable(&mut self, enabled: bool) -> RigResult<()>;

    /// Move the gate and trigger counters
    async fn trigger(&mut self, gate_delta: i32, trigger_delta: i32) -> RigResult<()>;

    /// Current run name
    async fn run_name(&mut self) -> RigResult<String>;

    /// Directory the recorder writes gates into
    async fn data_dir(&mut self) -> RigResult<PathBuf>;

    /// Point the recorder at another directory
    async fn set_data_dir(&mut self, dir: &Path) -> RigResult<()>;
}
