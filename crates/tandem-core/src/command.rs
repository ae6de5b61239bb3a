//! The 64-byte binary command record.
//!
//! Every parameter or gate mutation that reaches a worker travels as one
//! fixed-width record. The layout is versioned by its first byte; this crate
//! speaks version 2 only and rejects anything else instead of guessing.
//!
//! ```text
//! offset  size  field
//!      0     1  version (= 2)
//!      1     1  op          1 = SET, 2 = GATE
//!      2     1  value_type  1 = FLOAT, 2 = BOOL
//!      3     1  flags       bit 0 = IMMEDIATE
//!      4    16  module_id   ASCII graphic, NUL padded
//!     20    16  param_id    ASCII graphic, NUL padded
//!     36     8  value       f64 bits (FLOAT) or u64 0/1 (BOOL), little endian
//!     44    20  reserved    zero on encode, ignored on decode
//! ```
//!
//! Encoding validates everything decoding checks, so a record that was
//! produced by [`pack`] always survives [`unpack`] unchanged and no invalid
//! record is ever written into a ring.

use std::collections::VecDeque;

use thiserror::Error;

use crate::ident::{IDENT_LEN, Ident, IdentError};

/// Size of one encoded command record in bytes.
pub const COMMAND_SIZE: usize = 64;

/// Version tag written into byte 0 of every record.
pub const COMMAND_VERSION: u8 = 2;

/// Conventional parameter id carried by `GATE` commands.
pub const GATE_PARAM: &str = "gate";

/// Parameter id that toggles a module's activity flag.
pub const ACTIVE_PARAM: &str = "active";

const FLAG_IMMEDIATE: u8 = 0b0000_0001;

const OFFSET_MODULE: usize = 4;
const OFFSET_PARAM: usize = OFFSET_MODULE + IDENT_LEN;
const OFFSET_VALUE: usize = OFFSET_PARAM + IDENT_LEN;

/// Command operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Op {
    /// Set a continuous or boolean parameter.
    Set = 1,
    /// Trigger (`true`) or release (`false`) an envelope-like state machine.
    Gate = 2,
}

impl Op {
    fn from_byte(b: u8) -> Result<Self, CommandError> {
        match b {
            1 => Ok(Op::Set),
            2 => Ok(Op::Gate),
            other => Err(CommandError::UnknownOp(other)),
        }
    }
}

/// Interpretation of the 8-byte value field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueType {
    /// IEEE-754 double.
    Float = 1,
    /// `0` or `1`.
    Bool = 2,
}

impl ValueType {
    fn from_byte(b: u8) -> Result<Self, CommandError> {
        match b {
            1 => Ok(ValueType::Float),
            2 => Ok(ValueType::Bool),
            other => Err(CommandError::UnknownValueType(other)),
        }
    }
}

/// Which identifier field failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdField {
    /// The module identifier.
    Module,
    /// The parameter identifier.
    Param,
}

impl core::fmt::Display for IdField {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            IdField::Module => f.write_str("module_id"),
            IdField::Param => f.write_str("param_id"),
        }
    }
}

/// Errors from encoding or decoding a command record.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    /// `module_id` or `param_id` is empty, too long, or not printable ASCII.
    #[error("invalid {field}: {source}")]
    InvalidIdentifier {
        /// The offending field.
        field: IdField,
        /// What was wrong with it.
        #[source]
        source: IdentError,
    },
    /// The leading version tag is not [`COMMAND_VERSION`].
    #[error("unsupported command version {0}")]
    UnsupportedVersion(u8),
    /// Unknown op byte.
    #[error("unknown op {0}")]
    UnknownOp(u8),
    /// Unknown value type byte.
    #[error("unknown value type {0}")]
    UnknownValueType(u8),
    /// `GATE` carries a non-boolean value.
    #[error("{op:?} does not accept {value_type:?} values")]
    InvalidCombination {
        /// Operation.
        op: Op,
        /// Value type that was paired with it.
        value_type: ValueType,
    },
    /// FLOAT value is NaN or infinite.
    #[error("float value is not finite")]
    NonFiniteValue,
    /// BOOL value is neither 0 nor 1.
    #[error("bool value must be 0 or 1, got {0}")]
    InvalidBool(u64),
}

impl CommandError {
    fn ident(field: IdField) -> impl FnOnce(IdentError) -> Self {
        move |source| CommandError::InvalidIdentifier { field, source }
    }
}

/// A decoded, validated command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Command {
    /// Operation.
    pub op: Op,
    /// How `value` is interpreted.
    pub value_type: ValueType,
    /// Target module.
    pub module_id: Ident,
    /// Target parameter.
    pub param_id: Ident,
    /// Payload. BOOL commands carry exactly `0.0` or `1.0`.
    pub value: f64,
    /// Skip smoothing: jump current and target together.
    pub immediate: bool,
}

impl Command {
    /// `SET module.param = value` (FLOAT).
    pub fn set(module_id: &str, param_id: &str, value: f64) -> Result<Self, CommandError> {
        Self::build(Op::Set, ValueType::Float, module_id, param_id, value)
    }

    /// `SET module.param = on` (BOOL).
    pub fn set_bool(module_id: &str, param_id: &str, on: bool) -> Result<Self, CommandError> {
        Self::build(
            Op::Set,
            ValueType::Bool,
            module_id,
            param_id,
            if on { 1.0 } else { 0.0 },
        )
    }

    /// `GATE module = on`.
    pub fn gate(module_id: &str, on: bool) -> Result<Self, CommandError> {
        Self::build(
            Op::Gate,
            ValueType::Bool,
            module_id,
            GATE_PARAM,
            if on { 1.0 } else { 0.0 },
        )
    }

    /// Marks the command as immediate (no smoothing).
    pub fn with_immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    /// Returns the payload as a boolean (`value != 0`).
    #[inline]
    pub fn as_bool(&self) -> bool {
        self.value != 0.0
    }

    fn build(
        op: Op,
        value_type: ValueType,
        module_id: &str,
        param_id: &str,
        value: f64,
    ) -> Result<Self, CommandError> {
        let cmd = Self {
            op,
            value_type,
            module_id: Ident::new(module_id).map_err(CommandError::ident(IdField::Module))?,
            param_id: Ident::new(param_id).map_err(CommandError::ident(IdField::Param))?,
            value,
            immediate: false,
        };
        cmd.check_payload()?;
        Ok(cmd)
    }

    fn check_payload(&self) -> Result<(), CommandError> {
        if self.op == Op::Gate && self.value_type != ValueType::Bool {
            return Err(CommandError::InvalidCombination {
                op: self.op,
                value_type: self.value_type,
            });
        }
        match self.value_type {
            ValueType::Float if !self.value.is_finite() => Err(CommandError::NonFiniteValue),
            ValueType::Bool if self.value != 0.0 && self.value != 1.0 => {
                Err(CommandError::InvalidBool(self.value.to_bits()))
            }
            _ => Ok(()),
        }
    }

    /// Encodes the command into a 64-byte record.
    pub fn encode(&self) -> Result<[u8; COMMAND_SIZE], CommandError> {
        self.check_payload()?;
        let mut out = [0u8; COMMAND_SIZE];
        out[0] = COMMAND_VERSION;
        out[1] = self.op as u8;
        out[2] = self.value_type as u8;
        out[3] = if self.immediate { FLAG_IMMEDIATE } else { 0 };
        out[OFFSET_MODULE..OFFSET_PARAM].copy_from_slice(&self.module_id.to_field());
        out[OFFSET_PARAM..OFFSET_VALUE].copy_from_slice(&self.param_id.to_field());
        let value_bits = match self.value_type {
            ValueType::Float => self.value.to_bits(),
            ValueType::Bool => u64::from(self.as_bool()),
        };
        out[OFFSET_VALUE..OFFSET_VALUE + 8].copy_from_slice(&value_bits.to_le_bytes());
        Ok(out)
    }

    /// Decodes and validates a 64-byte record.
    ///
    /// Never partially succeeds: any malformed field rejects the whole record.
    pub fn decode(bytes: &[u8; COMMAND_SIZE]) -> Result<Self, CommandError> {
        if bytes[0] != COMMAND_VERSION {
            return Err(CommandError::UnsupportedVersion(bytes[0]));
        }
        let op = Op::from_byte(bytes[1])?;
        let value_type = ValueType::from_byte(bytes[2])?;
        let immediate = bytes[3] & FLAG_IMMEDIATE != 0;

        let mut field = [0u8; IDENT_LEN];
        field.copy_from_slice(&bytes[OFFSET_MODULE..OFFSET_PARAM]);
        let module_id = Ident::from_field(&field).map_err(CommandError::ident(IdField::Module))?;
        field.copy_from_slice(&bytes[OFFSET_PARAM..OFFSET_VALUE]);
        let param_id = Ident::from_field(&field).map_err(CommandError::ident(IdField::Param))?;

        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[OFFSET_VALUE..OFFSET_VALUE + 8]);
        let bits = u64::from_le_bytes(raw);
        let value = match value_type {
            ValueType::Float => f64::from_bits(bits),
            ValueType::Bool => match bits {
                0 => 0.0,
                1 => 1.0,
                other => return Err(CommandError::InvalidBool(other)),
            },
        };

        let cmd = Self {
            op,
            value_type,
            module_id,
            param_id,
            value,
            immediate,
        };
        cmd.check_payload()?;
        Ok(cmd)
    }
}

/// Encodes a command from its raw parts.
///
/// BOOL values must be `0.0` or `1.0`.
pub fn pack(
    op: Op,
    value_type: ValueType,
    module_id: &str,
    param_id: &str,
    value: f64,
) -> Result<[u8; COMMAND_SIZE], CommandError> {
    Command::build(op, value_type, module_id, param_id, value)?.encode()
}

/// Decodes a 64-byte record. Inverse of [`pack`].
pub fn unpack(bytes: &[u8; COMMAND_SIZE]) -> Result<Command, CommandError> {
    Command::decode(bytes)
}

/// A queue of encoded command records that a host can drain.
///
/// The shared-memory `CommandRing` implements this for workers; a
/// `VecDeque` works for in-process hosts and tests.
pub trait CommandSource {
    /// Pops the oldest pending record, or `None` when empty.
    fn next_record(&mut self) -> Option<[u8; COMMAND_SIZE]>;
}

impl CommandSource for VecDeque<[u8; COMMAND_SIZE]> {
    fn next_record(&mut self) -> Option<[u8; COMMAND_SIZE]> {
        self.pop_front()
    }
}

impl<S: CommandSource + ?Sized> CommandSource for &mut S {
    fn next_record(&mut self) -> Option<[u8; COMMAND_SIZE]> {
        (**self).next_record()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_round_trip() {
        let bytes = pack(Op::Set, ValueType::Float, "osc1", "freq", 440.0).unwrap();
        assert_eq!(bytes.len(), COMMAND_SIZE);
        assert_eq!(bytes[0], COMMAND_VERSION);
        let cmd = unpack(&bytes).unwrap();
        assert_eq!(cmd.op, Op::Set);
        assert_eq!(cmd.value_type, ValueType::Float);
        assert!(cmd.module_id.matches("osc1"));
        assert!(cmd.param_id.matches("freq"));
        assert_eq!(cmd.value, 440.0);
        assert!(!cmd.immediate);
    }

    #[test]
    fn test_gate_round_trip() {
        let cmd = Command::gate("env", true).unwrap();
        let back = Command::decode(&cmd.encode().unwrap()).unwrap();
        assert_eq!(back, cmd);
        assert!(back.as_bool());
        assert!(back.param_id.matches(GATE_PARAM));
    }

    #[test]
    fn test_immediate_flag_survives() {
        let cmd = Command::set("filt", "cutoff", 1200.0)
            .unwrap()
            .with_immediate(true);
        let back = Command::decode(&cmd.encode().unwrap()).unwrap();
        assert!(back.immediate);
    }

    #[test]
    fn test_invalid_identifiers_rejected_at_encode() {
        let err = pack(Op::Set, ValueType::Float, "osc\u{e9}", "freq", 1.0).unwrap_err();
        assert!(matches!(
            err,
            CommandError::InvalidIdentifier {
                field: IdField::Module,
                ..
            }
        ));
        let err = pack(Op::Set, ValueType::Float, "osc", "a_very_long_param_x", 1.0).unwrap_err();
        assert!(matches!(
            err,
            CommandError::InvalidIdentifier {
                field: IdField::Param,
                source: IdentError::TooLong(19)
            }
        ));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut bytes = pack(Op::Set, ValueType::Float, "osc", "freq", 1.0).unwrap();
        bytes[0] = 1;
        assert_eq!(unpack(&bytes), Err(CommandError::UnsupportedVersion(1)));
    }

    #[test]
    fn test_control_character_in_field_rejected_at_decode() {
        let mut bytes = pack(Op::Set, ValueType::Float, "osc", "freq", 1.0).unwrap();
        bytes[OFFSET_MODULE + 1] = 0x07;
        assert!(matches!(
            unpack(&bytes),
            Err(CommandError::InvalidIdentifier {
                field: IdField::Module,
                source: IdentError::InvalidByte(0x07)
            })
        ));
    }

    #[test]
    fn test_gate_requires_bool() {
        let err = pack(Op::Gate, ValueType::Float, "env", "gate", 1.0).unwrap_err();
        assert!(matches!(err, CommandError::InvalidCombination { .. }));
    }

    #[test]
    fn test_bool_payload_validated() {
        assert!(matches!(
            pack(Op::Set, ValueType::Bool, "env", "active", 0.5),
            Err(CommandError::InvalidBool(_))
        ));
        let mut bytes = pack(Op::Set, ValueType::Bool, "env", "active", 1.0).unwrap();
        bytes[OFFSET_VALUE] = 7;
        assert_eq!(unpack(&bytes), Err(CommandError::InvalidBool(7)));
    }

    #[test]
    fn test_non_finite_rejected() {
        assert_eq!(
            pack(Op::Set, ValueType::Float, "osc", "freq", f64::NAN),
            Err(CommandError::NonFiniteValue)
        );
        let mut bytes = pack(Op::Set, ValueType::Float, "osc", "freq", 1.0).unwrap();
        bytes[OFFSET_VALUE..OFFSET_VALUE + 8].copy_from_slice(&f64::INFINITY.to_bits().to_le_bytes());
        assert_eq!(unpack(&bytes), Err(CommandError::NonFiniteValue));
    }

    #[test]
    fn test_reserved_bytes_ignored() {
        let mut bytes = pack(Op::Set, ValueType::Float, "osc", "freq", 2.5).unwrap();
        assert!(bytes[44..].iter().all(|&b| b == 0));
        bytes[63] = 0xFF;
        assert_eq!(unpack(&bytes).unwrap().value, 2.5);
    }

    #[test]
    fn test_vecdeque_is_a_command_source() {
        let mut queue = VecDeque::new();
        queue.push_back(pack(Op::Set, ValueType::Float, "a", "b", 1.0).unwrap());
        queue.push_back(pack(Op::Set, ValueType::Float, "a", "b", 2.0).unwrap());
        let first = queue.next_record().unwrap();
        assert_eq!(unpack(&first).unwrap().value, 1.0);
        assert!(queue.next_record().is_some());
        assert!(queue.next_record().is_none());
    }
}
