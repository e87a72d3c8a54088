//! Line-oriented ASCII wire protocol spoken to the actuator microcontroller.
//!
//! Grammar: `CHANNEL ':' OPCODE [':' ARG]`, one command per line. Three
//! channels exist: `C` (control), `M` (management), `E` (emergency). The
//! opcode set per channel is closed; unknown lines are parse errors, never
//! silently dropped.

use std::fmt;

use thiserror::Error;

/// Protocol-level argument bounds. Vehicle-specific servo limits are narrower
/// and enforced by the angle converter, not here.
pub const STEER_MIN: i32 = 0;
pub const STEER_MAX: i32 = 180;
pub const SPEED_MIN: i32 = 0;
pub const SPEED_MAX: i32 = 255;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    Control,
    Management,
    Emergency,
}

impl Channel {
    pub fn prefix(self) -> char {
        match self {
            Channel::Control => 'C',
            Channel::Management => 'M',
            Channel::Emergency => 'E',
        }
    }

    fn from_prefix(c: char) -> Option<Self> {
        match c {
            'C' => Some(Channel::Control),
            'M' => Some(Channel::Management),
            'E' => Some(Channel::Emergency),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Manual,
    Auto,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    SetSpeed(i32),
    SetSteer(i32),
    SysArm,
    SysDisarm,
    SysMode(Mode),
    BrakeNow,
    Stop,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty command line")]
    Empty,
    #[error("missing ':' separator in {0:?}")]
    MissingSeparator(String),
    #[error("unknown channel {0:?}")]
    UnknownChannel(char),
    #[error("unknown opcode {opcode:?} on channel {channel:?}")]
    UnknownOpcode { channel: char, opcode: String },
    #[error("opcode {opcode} requires an integer argument, got {arg:?}")]
    BadArgument { opcode: &'static str, arg: String },
    #[error("{opcode} argument {value} outside {min}..={max}")]
    OutOfRange {
        opcode: &'static str,
        value: i32,
        min: i32,
        max: i32,
    },
}

impl Command {
    /// Range-checked constructor for `C:SET_SPEED`.
    pub fn set_speed(value: i32) -> Result<Self, ProtocolError> {
        check_range("SET_SPEED", value, SPEED_MIN, SPEED_MAX)?;
        Ok(Command::SetSpeed(value))
    }

    /// Range-checked constructor for `C:SET_STEER`.
    pub fn set_steer(value: i32) -> Result<Self, ProtocolError> {
        check_range("SET_STEER", value, STEER_MIN, STEER_MAX)?;
        Ok(Command::SetSteer(value))
    }

    pub fn channel(self) -> Channel {
        match self {
            Command::SetSpeed(_) | Command::SetSteer(_) => Channel::Control,
            Command::SysArm | Command::SysDisarm | Command::SysMode(_) => Channel::Management,
            Command::BrakeNow | Command::Stop => Channel::Emergency,
        }
    }

    /// Parse one wire line (trailing `\r`/`\n` tolerated).
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return Err(ProtocolError::Empty);
        }

        let mut fields = line.splitn(3, ':');
        let channel_field = fields.next().unwrap_or_default();
        let opcode = fields
            .next()
            .ok_or_else(|| ProtocolError::MissingSeparator(line.to_string()))?;
        let arg = fields.next();

        let mut channel_chars = channel_field.chars();
        let prefix = channel_chars.next().ok_or(ProtocolError::Empty)?;
        if channel_chars.next().is_some() {
            return Err(ProtocolError::UnknownChannel(prefix));
        }
        let channel =
            Channel::from_prefix(prefix).ok_or(ProtocolError::UnknownChannel(prefix))?;

        match (channel, opcode) {
            (Channel::Control, "SET_SPEED") => Command::set_speed(parse_arg("SET_SPEED", arg)?),
            (Channel::Control, "SET_STEER") => Command::set_steer(parse_arg("SET_STEER", arg)?),
            (Channel::Management, "SYS_ARM") => Ok(Command::SysArm),
            (Channel::Management, "SYS_DISARM") => Ok(Command::SysDisarm),
            (Channel::Management, "SYS_MODE") => match parse_arg("SYS_MODE", arg)? {
                0 => Ok(Command::SysMode(Mode::Manual)),
                1 => Ok(Command::SysMode(Mode::Auto)),
                value => Err(ProtocolError::OutOfRange {
                    opcode: "SYS_MODE",
                    value,
                    min: 0,
                    max: 1,
                }),
            },
            (Channel::Emergency, "BRAKE_NOW") => Ok(Command::BrakeNow),
            (Channel::Emergency, "STOP") => Ok(Command::Stop),
            (_, opcode) => Err(ProtocolError::UnknownOpcode {
                channel: prefix,
                opcode: opcode.to_string(),
            }),
        }
    }
}

/// Wire encoding without the terminating newline; the transport appends it.
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = self.channel().prefix();
        match self {
            Command::SetSpeed(v) => write!(f, "{prefix}:SET_SPEED:{v}"),
            Command::SetSteer(v) => write!(f, "{prefix}:SET_STEER:{v}"),
            Command::SysArm => write!(f, "{prefix}:SYS_ARM"),
            Command::SysDisarm => write!(f, "{prefix}:SYS_DISARM"),
            Command::SysMode(Mode::Manual) => write!(f, "{prefix}:SYS_MODE:0"),
            Command::SysMode(Mode::Auto) => write!(f, "{prefix}:SYS_MODE:1"),
            Command::BrakeNow => write!(f, "{prefix}:BRAKE_NOW"),
            Command::Stop => write!(f, "{prefix}:STOP"),
        }
    }
}

fn parse_arg(opcode: &'static str, arg: Option<&str>) -> Result<i32, ProtocolError> {
    let arg = arg.ok_or(ProtocolError::BadArgument {
        opcode,
        arg: String::new(),
    })?;
    arg.trim().parse::<i32>().map_err(|_| ProtocolError::BadArgument {
        opcode,
        arg: arg.to_string(),
    })
}

fn check_range(
    opcode: &'static str,
    value: i32,
    min: i32,
    max: i32,
) -> Result<(), ProtocolError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ProtocolError::OutOfRange {
            opcode,
            value,
            min,
            max,
        })
    }
}
