//! Recording control: session state, backends and file naming.

pub mod backend;
pub mod naming;
pub mod remote;
pub mod session;

pub use backend::RecordingBackend;
pub use naming::{next_recording, NextRecording, RunTarget};
pub use remote::RemoteRecorder;
pub use session::{RecordControl, RecordingSession, SessionState};
