//! Binary command protocol spoken by the rig microcontroller.

pub mod command;
pub mod link;

pub use command::{
    fit_u16, fit_u8, ms_u16, ms_u8, Command, GpioMode, Phase, PhasicPattern, PhasicWindow,
    ValveMask,
};
pub use link::{DeviceLink, DynSerial, SerialPortIO};
