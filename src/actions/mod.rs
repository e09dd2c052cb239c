//! Action library.
//!
//! Each action is a plain struct implementing [`crate::pipeline::Action`]. The
//! structs also deserialize from plan files, so field names are the parameter names
//! users write.

pub mod audio;
pub mod camera;
pub mod control;
pub mod gas;
pub mod gpio;
pub mod olfactometer;
pub mod opto;
pub mod recording;
pub mod sequences;
pub mod stim;

pub use audio::{PlayAlert, PlayMelody, PlaySync, PlayTone};
pub use camera::{StartCamera, StopCamera};
pub use control::{Annotate, Settle, Wait};
pub use gas::{EndHb, OpenValve, PhasicHb, PresentGas, StartHb, TimedHb};
pub use gpio::SetGpio;
pub use olfactometer::{
    CloseOlfactometer, OpenOlfactometer, PresentOdor, SetOlfactometerValves, BLANK_ODOR,
};
pub use opto::{InitLaser, LaserOff, LaserOn, PhasicStim, RunPulse, RunTagging, RunTrain};
pub use recording::{StartRecording, StopRecording};
pub use sequences::PrerollOptions;
pub use stim::{PhasicMode, PhasicSpec};
