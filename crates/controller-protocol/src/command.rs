//! Command Definitions and Parameter Encoding
//!
//! A command is one identifier byte followed by zero or more parameter
//! bytes. Multi-byte numbers are sent big-endian.

use crate::ProtocolError;
use serde::{Deserialize, Serialize};

/// Controller clock used to convert the timer period into ticks
pub const CONTROLLER_CLOCK_MHZ: f64 = 60.0;

/// Command identifiers understood by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CommandId {
    /// Gate voltage, channel 1 ('A')
    SetGateVoltage1 = b'A',
    /// Source current setpoint, channel 1 ('B')
    SetSourceSetpoint1 = b'B',
    /// Gate voltage, channel 2 ('C')
    SetGateVoltage2 = b'C',
    /// Source current setpoint, channel 2 ('D')
    SetSourceSetpoint2 = b'D',
    /// Sampling timer period ('2')
    SetTimerPeriod = b'2',
    /// Timing lock ('P')
    SetTimingLock = b'P',
}

impl CommandId {
    /// Wire byte of this identifier
    pub fn as_byte(&self) -> u8 {
        *self as u8
    }

    /// Identifier as a printable character
    pub fn as_char(&self) -> char {
        self.as_byte() as char
    }
}

/// Timing lock state sent on acquisition start and stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimingLock {
    /// Period frozen while acquiring
    Engaged,
    /// Period may be changed
    Released,
}

impl TimingLock {
    fn as_byte(self) -> u8 {
        match self {
            TimingLock::Engaged => 0,
            TimingLock::Released => 1,
        }
    }
}

/// Configurable controller parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Parameter {
    /// Sampling timer period in microseconds (channel ignored)
    TimerPeriod,
    /// Gate bias voltage magnitude in volts
    GateVoltage,
    /// Drain-source current setpoint magnitude in microamperes
    CurrentSetpoint,
}

impl Parameter {
    /// Human readable name
    pub fn name(&self) -> &'static str {
        match self {
            Parameter::TimerPeriod => "timer period",
            Parameter::GateVoltage => "gate voltage",
            Parameter::CurrentSetpoint => "current setpoint",
        }
    }

    /// Label recorded in the tag ledger after a successful change
    pub fn audit_label(&self, value: f64, channel: u8) -> String {
        match self {
            Parameter::TimerPeriod => format!("$T_{{2}}={:.2}\\text{{ }}\\mu \\text{{s}}$", value),
            Parameter::GateVoltage => {
                format!("$V_{{g_{{{}}}}}=-{:.2}\\text{{ V}}$", channel, value)
            }
            Parameter::CurrentSetpoint => format!(
                "$I_{{ds_{{{}}}}}=-{:.2}\\text{{ }}\\mu \\text{{A}}$",
                channel, value
            ),
        }
    }
}

/// A framed controller command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    id: CommandId,
    params: Vec<u8>,
}

impl Command {
    /// Create a command from an identifier and raw parameter bytes
    pub fn new(id: CommandId, params: Vec<u8>) -> Self {
        Self { id, params }
    }

    /// Timing lock command
    pub fn timing_lock(lock: TimingLock) -> Self {
        Self::new(CommandId::SetTimingLock, vec![lock.as_byte()])
    }

    /// Parameter-set command
    ///
    /// The timer period is sent as controller clock ticks. Voltages and
    /// currents are sent in hundredths of their unit.
    pub fn set_parameter(
        parameter: Parameter,
        value: f64,
        channel: u8,
    ) -> Result<Self, ProtocolError> {
        let id = match (parameter, channel) {
            (Parameter::TimerPeriod, _) => CommandId::SetTimerPeriod,
            (Parameter::GateVoltage, 1) => CommandId::SetGateVoltage1,
            (Parameter::GateVoltage, 2) => CommandId::SetGateVoltage2,
            (Parameter::CurrentSetpoint, 1) => CommandId::SetSourceSetpoint1,
            (Parameter::CurrentSetpoint, 2) => CommandId::SetSourceSetpoint2,
            (_, other) => return Err(ProtocolError::InvalidChannel(other)),
        };

        let scaled = match parameter {
            Parameter::TimerPeriod => value * CONTROLLER_CLOCK_MHZ,
            Parameter::GateVoltage | Parameter::CurrentSetpoint => value * 100.0,
        };
        let word = encode_u16(parameter, value, scaled)?;

        Ok(Self::new(id, word.to_be_bytes().to_vec()))
    }

    /// Command identifier
    pub fn id(&self) -> CommandId {
        self.id
    }

    /// Parameter bytes
    pub fn params(&self) -> &[u8] {
        &self.params
    }

    /// Bytes put on the wire
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + self.params.len());
        bytes.push(self.id.as_byte());
        bytes.extend_from_slice(&self.params);
        bytes
    }
}

fn encode_u16(parameter: Parameter, value: f64, scaled: f64) -> Result<u16, ProtocolError> {
    let invalid = |reason| ProtocolError::InvalidValue {
        parameter: parameter.name(),
        value,
        reason,
    };

    if !value.is_finite() {
        return Err(invalid("not a finite number"));
    }
    if value < 0.0 {
        return Err(invalid("negative"));
    }
    let rounded = scaled.round();
    if rounded > u16::MAX as f64 {
        return Err(invalid("too large"));
    }
    Ok(rounded as u16)
}
