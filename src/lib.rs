//! # Rig DAQ Core Library
//!
//! This crate drives a physiological recording rig: a microcontroller on a serial link
//! switches gas valves, fires optogenetic light, plays tones, triggers cameras and an
//! olfactometer, while an acquisition program records the animal. Every hardware
//! action is timestamped and written to a tab-separated event log that is later
//! aligned with the recorded signals.
//!
//! ## Crate Structure
//!
//! - **`protocol`**: Command frames, their byte encoding and the acknowledged serial
//!   link ([`protocol::DeviceLink`]).
//! - **`amplitude`**: Laser amplitude quantization, calibration tables and photometer
//!   conversion.
//! - **`pipeline`**: The [`pipeline::Action`] trait and the repeat / log / time layers
//!   every action runs through.
//! - **`actions`**: The action library (gas, Hering-Breuer, opto, audio, camera,
//!   olfactometer, GPIO, recording) and the preroll / reset / close routines.
//! - **`record`** and **`log_store`**: Event records and the in-memory log with gas
//!   interval consolidation and table output.
//! - **`recording`**: Recording session state machine with TTL and remote-recorder
//!   backends, plus run/gate/trigger file naming.
//! - **`rig`**: [`rig::Rig`], which owns the link, log, session and clock.
//! - **`plan`**: TOML experiment plans and their runner.
//! - **`config`**: Layered configuration (TOML file plus `RIG_DAQ_` environment).
//! - **`logging`**: `tracing` subscriber setup.
//! - **`error`**: The crate-wide [`error::RigError`].
//! - **`mock`**: Device emulator and in-memory recorder for tests and dry runs.

pub mod actions;
pub mod amplitude;
pub mod clock;
pub mod config;
pub mod error;
pub mod log_store;
pub mod logging;
pub mod mock;
pub mod pipeline;
pub mod plan;
pub mod protocol;
pub mod record;
pub mod recording;
pub mod rig;

pub use config::RigConfig;
pub use error::{RigError, RigResult};
pub use pipeline::{Action, CallOptions};
pub use plan::{Plan, PlanReport};
pub use rig::Rig;
