//! Command frames for the rig microcontroller.
//!
//! Every frame is one to three ASCII opcode bytes followed by fixed-width unsigned
//! parameters. 16-bit parameters are little-endian. Most frames are answered by a
//! single acknowledgment byte; see [`Command::expects_ack`].
//!
//! | Command | Bytes |
//! |---|---|
//! | open valve | `v` u8 |
//! | Hering-Breuer start / end | `h b` / `h e` |
//! | Hering-Breuer phasic | `a h` phase mode u8 u16 u16 [extras] |
//! | laser init | `c m` mode u8 u8 |
//! | opto pulse | `p` u16 u8 |
//! | opto train | `t` u16 u8 u8 u8 |
//! | opto phasic | `a p` phase mode u8 u16 u16 u8 [extras] |
//! | laser on / off / poll | `o o` u8 / `o x` u8 / `o p` u8 |
//! | tone / audio sync | `a a` u16 u16 / `a s` |
//! | record line high / low | `r b` / `r e` |
//! | camera start / stop | `a v b` u8 / `a v e` u8 |
//! | olfactometer open / close / set all | `s o` u8 / `s c` u8 / `s b` u8 |
//! | gpio | `m` mode u16 u8 |
//!
//! Phasic extras: train mode appends `u8 pulse_ms, u8 freq_hz`, pulse mode appends
//! `u8 pulse_ms`, hold mode appends nothing.

use crate::config::LaserMode;
use crate::error::{RigError, RigResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Respiratory phase a phasic stimulation window is locked to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Inspiration
    #[serde(alias = "i", alias = "insp")]
    Inspiratory,
    /// Expiration
    #[serde(alias = "e", alias = "exp")]
    Expiratory,
}

impl Phase {
    /// Opcode byte
    pub fn code(self) -> u8 {
        match self {
            Phase::Inspiratory => b'i',
            Phase::Expiratory => b'e',
        }
    }

    /// Inverse of [`Phase::code`]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            b'i' => Some(Phase::Inspiratory),
            b'e' => Some(Phase::Expiratory),
            _ => None,
        }
    }

    /// Name written to the event log
    pub fn log_name(self) -> &'static str {
        match self {
            Phase::Inspiratory => "insp",
            Phase::Expiratory => "exp",
        }
    }
}

/// What happens inside a phasic stimulation window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhasicPattern {
    /// Continuous for the whole window
    Hold,
    /// Pulse train inside the window
    Train {
        /// Pulse width
        pulse_ms: u8,
        /// Pulse rate
        freq_hz: u8,
    },
    /// One pulse at window onset
    Pulse {
        /// Pulse width
        pulse_ms: u8,
    },
}

impl PhasicPattern {
    /// Mode opcode byte
    pub fn code(&self) -> u8 {
        match self {
            PhasicPattern::Hold => b'h',
            PhasicPattern::Train { .. } => b't',
            PhasicPattern::Pulse { .. } => b'p',
        }
    }

    /// Name written to the event log
    pub fn log_name(&self) -> &'static str {
        match self {
            PhasicPattern::Hold => "hold",
            PhasicPattern::Train { .. } => "train",
            PhasicPattern::Pulse { .. } => "pulse",
        }
    }
}

/// Timing of a set of phase-locked stimulation windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhasicWindow {
    /// Trigger phase
    pub phase: Phase,
    /// Window contents
    pub pattern: PhasicPattern,
    /// Number of windows
    pub count: u8,
    /// Window length
    pub duration_ms: u16,
    /// Gap between windows
    pub intertrain_ms: u16,
}

/// GPIO line actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpioMode {
    /// High for the given duration, then low
    Pulse,
    /// Latch high
    High,
    /// Latch low
    Low,
}

impl GpioMode {
    /// Opcode byte
    pub fn code(self) -> u8 {
        match self {
            GpioMode::Pulse => b'p',
            GpioMode::High => b'h',
            GpioMode::Low => b'l',
        }
    }

    /// Inverse of [`GpioMode::code`]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            b'p' => Some(GpioMode::Pulse),
            b'h' => Some(GpioMode::High),
            b'l' => Some(GpioMode::Low),
            _ => None,
        }
    }

    /// Name written to the event log
    pub fn log_name(self) -> &'static str {
        match self {
            GpioMode::Pulse => "pulse",
            GpioMode::High => "high",
            GpioMode::Low => "low",
        }
    }
}

/// Open/closed state of the eight olfactometer valves.
///
/// Callers write the state left to right, valve 1 first: `"10000000"` opens valve 1.
/// On the wire valve 1 is the least significant bit, so that string encodes to `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValveMask(u8);

impl ValveMask {
    /// All valves closed
    pub const CLOSED: ValveMask = ValveMask(0);
    /// All valves open
    pub const ALL_OPEN: ValveMask = ValveMask(0xFF);

    /// Parse a left-to-right valve pattern such as `"01000000"`
    pub fn from_pattern(pattern: &str) -> RigResult<Self> {
        if pattern.len() != 8 {
            return Err(RigError::InvalidValvePattern(pattern.to_string()));
        }
        let mut mask = 0u8;
        for (i, c) in pattern.chars().enumerate() {
            match c {
                '1' => mask |= 1 << i,
                '0' => {}
                _ => return Err(RigError::InvalidValvePattern(pattern.to_string())),
            }
        }
        Ok(ValveMask(mask))
    }

    /// Only `valve` (1-8) open
    pub fn single(valve: u8) -> RigResult<Self> {
        if !(1..=8).contains(&valve) {
            return Err(RigError::InvalidStimulation(format!(
                "olfactometer valve {} out of range (1-8)",
                valve
            )));
        }
        Ok(ValveMask(1 << (valve - 1)))
    }

    /// Wrap a raw wire byte
    pub fn from_bits(bits: u8) -> Self {
        ValveMask(bits)
    }

    /// Raw wire byte
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Left-to-right pattern, valve 1 first
    pub fn to_pattern(self) -> String {
        (0..8)
            .map(|i| if self.0 & (1 << i) != 0 { '1' } else { '0' })
            .collect()
    }
}

impl fmt::Display for ValveMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_pattern())
    }
}

/// A command understood by the rig firmware
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Open one gas valve, closing the others
    OpenValve { valve: u8 },
    /// Close the Hering-Breuer valve
    HeringBreuerStart,
    /// Reopen the Hering-Breuer valve
    HeringBreuerEnd,
    /// Phase-locked Hering-Breuer occlusions
    HeringBreuerPhasic(PhasicWindow),
    /// Configure the laser driver
    LaserInit {
        mode: LaserMode,
        power_meter_pin: u8,
        null_voltage: u8,
    },
    /// Single opto pulse
    Pulse { duration_ms: u16, amplitude: u8 },
    /// Opto pulse train
    Train {
        duration_ms: u16,
        freq_hz: u8,
        amplitude: u8,
        pulse_ms: u8,
    },
    /// Phase-locked opto stimulation
    OptoPhasic { window: PhasicWindow, amplitude: u8 },
    /// Laser on at an amplitude
    LaserOn { amplitude: u8 },
    /// Laser off from an amplitude
    LaserOff { amplitude: u8 },
    /// Laser on and read the photometer
    PollPower { amplitude: u8 },
    /// Audio tone
    Tone { freq_hz: u16, duration_ms: u16 },
    /// Audio synchronization sequence
    AudioSync,
    /// Raise the record line
    RecordStart,
    /// Drop the record line
    RecordStop,
    /// Start the camera pulser
    CameraStart { fps: u8 },
    /// Stop the camera pulser
    CameraStop,
    /// Open one olfactometer valve
    OlfactometerOpen { valve: u8 },
    /// Close one olfactometer valve
    OlfactometerClose { valve: u8 },
    /// Set all olfactometer valves at once
    OlfactometerSetAll { mask: ValveMask },
    /// Drive a GPIO line
    Gpio {
        mode: GpioMode,
        duration_ms: u16,
        pin: u8,
    },
}

impl Command {
    /// Whether the firmware answers this frame with an acknowledgment byte.
    ///
    /// Camera frames are relayed to the pulser board, which does not answer.
    pub fn expects_ack(&self) -> bool {
        !matches!(self, Command::CameraStart { .. } | Command::CameraStop)
    }

    /// Whether a 16-bit reading precedes the acknowledgment
    pub fn expects_reading(&self) -> bool {
        matches!(self, Command::PollPower { .. })
    }

    /// Serialize to wire bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = FrameBuilder::with_capacity(12);
        match self {
            Command::OpenValve { valve } => frame.op(b"v").u8(*valve),
            Command::HeringBreuerStart => frame.op(b"hb"),
            Command::HeringBreuerEnd => frame.op(b"he"),
            Command::HeringBreuerPhasic(window) => {
                frame.op(b"ah").window_head(window).window_extras(&window.pattern)
            }
            Command::LaserInit {
                mode,
                power_meter_pin,
                null_voltage,
            } => frame
                .op(b"cm")
                .u8(mode.code())
                .u8(*power_meter_pin)
                .u8(*null_voltage),
            Command::Pulse {
                duration_ms,
                amplitude,
            } => frame.op(b"p").u16(*duration_ms).u8(*amplitude),
            Command::Train {
                duration_ms,
                freq_hz,
                amplitude,
                pulse_ms,
            } => frame
                .op(b"t")
                .u16(*duration_ms)
                .u8(*freq_hz)
                .u8(*amplitude)
                .u8(*pulse_ms),
            Command::OptoPhasic { window, amplitude } => frame
                .op(b"ap")
                .window_head(window)
                .u8(*amplitude)
                .window_extras(&window.pattern),
            Command::LaserOn { amplitude } => frame.op(b"oo").u8(*amplitude),
            Command::LaserOff { amplitude } => frame.op(b"ox").u8(*amplitude),
            Command::PollPower { amplitude } => frame.op(b"op").u8(*amplitude),
            Command::Tone {
                freq_hz,
                duration_ms,
            } => frame.op(b"aa").u16(*freq_hz).u16(*duration_ms),
            Command::AudioSync => frame.op(b"as"),
            Command::RecordStart => frame.op(b"rb"),
            Command::RecordStop => frame.op(b"re"),
            Command::CameraStart { fps } => frame.op(b"avb").u8(*fps),
            Command::CameraStop => frame.op(b"ave").u8(0),
            Command::OlfactometerOpen { valve } => frame.op(b"so").u8(*valve),
            Command::OlfactometerClose { valve } => frame.op(b"sc").u8(*valve),
            Command::OlfactometerSetAll { mask } => frame.op(b"sb").u8(mask.bits()),
            Command::Gpio {
                mode,
                duration_ms,
                pin,
            } => frame.op(b"m").u8(mode.code()).u16(*duration_ms).u8(*pin),
        };
        frame.finish()
    }

    /// Parse one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` holds only part of a frame, and the command with
    /// the number of bytes it used otherwise.
    pub fn decode(buf: &[u8]) -> RigResult<Option<(Command, usize)>> {
        let mut reader = FrameReader { buf, pos: 0 };
        match Self::read(&mut reader) {
            Ok(command) => Ok(Some((command, reader.pos))),
            Err(Short::Incomplete) => Ok(None),
            Err(Short::Invalid(msg)) => Err(RigError::Protocol(msg)),
        }
    }

    fn read(r: &mut FrameReader<'_>) -> Result<Command, Short> {
        let op = r.u8()?;
        let command = match op {
            b'v' => Command::OpenValve { valve: r.u8()? },
            b'h' => match r.u8()? {
                b'b' => Command::HeringBreuerStart,
                b'e' => Command::HeringBreuerEnd,
                sub => return Err(Short::unknown(op, sub)),
            },
            b'c' => match r.u8()? {
                b'm' => {
                    let code = r.u8()?;
                    let mode = LaserMode::from_code(code).ok_or_else(|| {
                        Short::Invalid(format!("unknown laser mode 0x{:02x}", code))
                    })?;
                    Command::LaserInit {
                        mode,
                        power_meter_pin: r.u8()?,
                        null_voltage: r.u8()?,
                    }
                }
                sub => return Err(Short::unknown(op, sub)),
            },
            b'p' => Command::Pulse {
                duration_ms: r.u16()?,
                amplitude: r.u8()?,
            },
            b't' => Command::Train {
                duration_ms: r.u16()?,
                freq_hz: r.u8()?,
                amplitude: r.u8()?,
                pulse_ms: r.u8()?,
            },
            b'o' => match r.u8()? {
                b'o' => Command::LaserOn { amplitude: r.u8()? },
                b'x' => Command::LaserOff { amplitude: r.u8()? },
                b'p' => Command::PollPower { amplitude: r.u8()? },
                sub => return Err(Short::unknown(op, sub)),
            },
            b'a' => match r.u8()? {
                b'h' => {
                    let (window, _) = r.phasic(false)?;
                    Command::HeringBreuerPhasic(window)
                }
                b'p' => {
                    let (window, amplitude) = r.phasic(true)?;
                    Command::OptoPhasic {
                        window,
                        amplitude: amplitude.unwrap_or_default(),
                    }
                }
                b'a' => Command::Tone {
                    freq_hz: r.u16()?,
                    duration_ms: r.u16()?,
                },
                b's' => Command::AudioSync,
                b'v' => match r.u8()? {
                    b'b' => Command::CameraStart { fps: r.u8()? },
                    b'e' => {
                        r.u8()?;
                        Command::CameraStop
                    }
                    sub => return Err(Short::unknown(b'v', sub)),
                },
                sub => return Err(Short::unknown(op, sub)),
            },
            b'r' => match r.u8()? {
                b'b' => Command::RecordStart,
                b'e' => Command::RecordStop,
                sub => return Err(Short::unknown(op, sub)),
            },
            b's' => match r.u8()? {
                b'o' => Command::OlfactometerOpen { valve: r.u8()? },
                b'c' => Command::OlfactometerClose { valve: r.u8()? },
                b'b' => Command::OlfactometerSetAll {
                    mask: ValveMask::from_bits(r.u8()?),
                },
                sub => return Err(Short::unknown(op, sub)),
            },
            b'm' => {
                let code = r.u8()?;
                let mode = GpioMode::from_code(code)
                    .ok_or_else(|| Short::Invalid(format!("unknown gpio mode 0x{:02x}", code)))?;
                Command::Gpio {
                    mode,
                    duration_ms: r.u16()?,
                    pin: r.u8()?,
                }
            }
            other => {
                return Err(Short::Invalid(format!("unknown opcode 0x{:02x}", other)));
            }
        };
        Ok(command)
    }
}

/// Frame builder for command frames.
#[derive(Debug, Default)]
struct FrameBuilder {
    buffer: Vec<u8>,
}

impl FrameBuilder {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    fn op(&mut self, opcodes: &[u8]) -> &mut Self {
        self.buffer.extend_from_slice(opcodes);
        self
    }

    fn u8(&mut self, value: u8) -> &mut Self {
        self.buffer.push(value);
        self
    }

    fn u16(&mut self, value: u16) -> &mut Self {
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    fn window_head(&mut self, window: &PhasicWindow) -> &mut Self {
        self.u8(window.phase.code())
            .u8(window.pattern.code())
            .u8(window.count)
            .u16(window.duration_ms)
            .u16(window.intertrain_ms)
    }

    fn window_extras(&mut self, pattern: &PhasicPattern) -> &mut Self {
        match pattern {
            PhasicPattern::Hold => self,
            PhasicPattern::Train { pulse_ms, freq_hz } => self.u8(*pulse_ms).u8(*freq_hz),
            PhasicPattern::Pulse { pulse_ms } => self.u8(*pulse_ms),
        }
    }

    fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }
}

enum Short {
    Incomplete,
    Invalid(String),
}

impl Short {
    fn unknown(op: u8, sub: u8) -> Self {
        Short::Invalid(format!(
            "unknown sub-command '{}' for opcode '{}'",
            sub as char, op as char
        ))
    }
}

struct FrameReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl FrameReader<'_> {
    fn u8(&mut self) -> Result<u8, Short> {
        let byte = *self.buf.get(self.pos).ok_or(Short::Incomplete)?;
        self.pos += 1;
        Ok(byte)
    }

    fn u16(&mut self) -> Result<u16, Short> {
        let lo = self.u8()?;
        let hi = self.u8()?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    fn phasic(&mut self, with_amplitude: bool) -> Result<(PhasicWindow, Option<u8>), Short> {
        let phase_code = self.u8()?;
        let phase = Phase::from_code(phase_code)
            .ok_or_else(|| Short::Invalid(format!("unknown phase 0x{:02x}", phase_code)))?;
        let mode = self.u8()?;
        let count = self.u8()?;
        let duration_ms = self.u16()?;
        let intertrain_ms = self.u16()?;
        let amplitude = if with_amplitude {
            Some(self.u8()?)
        } else {
            None
        };
        let pattern = match mode {
            b'h' => PhasicPattern::Hold,
            b't' => PhasicPattern::Train {
                pulse_ms: self.u8()?,
                freq_hz: self.u8()?,
            },
            b'p' => PhasicPattern::Pulse {
                pulse_ms: self.u8()?,
            },
            other => {
                return Err(Short::Invalid(format!(
                    "unknown phasic mode 0x{:02x}",
                    other
                )))
            }
        };
        Ok((
            PhasicWindow {
                phase,
                pattern,
                count,
                duration_ms,
                intertrain_ms,
            },
            amplitude,
        ))
    }
}

/// Seconds to a 16-bit millisecond field
pub fn ms_u16(name: &'static str, seconds: f64) -> RigResult<u16> {
    let ms = seconds_to_ms(name, seconds)?;
    u16::try_from(ms).map_err(|_| RigError::ParameterOutOfRange {
        name,
        value: seconds,
        max: u32::from(u16::MAX),
    })
}

/// Seconds to an 8-bit millisecond field
pub fn ms_u8(name: &'static str, seconds: f64) -> RigResult<u8> {
    let ms = seconds_to_ms(name, seconds)?;
    u8::try_from(ms).map_err(|_| RigError::ParameterOutOfRange {
        name,
        value: seconds,
        max: u32::from(u8::MAX),
    })
}

/// A non-negative value truncated into an 8-bit field
pub fn fit_u8(name: &'static str, value: f64) -> RigResult<u8> {
    if !value.is_finite() || value < 0.0 || value >= 256.0 {
        return Err(RigError::ParameterOutOfRange {
            name,
            value,
            max: u32::from(u8::MAX),
        });
    }
    Ok(value as u8)
}

/// A non-negative value truncated into a 16-bit field
pub fn fit_u16(name: &'static str, value: f64) -> RigResult<u16> {
    if !value.is_finite() || value < 0.0 || value >= 65_536.0 {
        return Err(RigError::ParameterOutOfRange {
            name,
            value,
            max: u32::from(u16::MAX),
        });
    }
    Ok(value as u16)
}

fn seconds_to_ms(name: &'static str, seconds: f64) -> RigResult<u64> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(RigError::ParameterOutOfRange {
            name,
            value: seconds,
            max: u32::from(u16::MAX),
        });
    }
    Ok((seconds * 1000.0) as u64)
}
