//! Modbus data categories and protocol constants

use serde::{Deserialize, Serialize};

/// MBAP header length: transaction id (2) + protocol id (2) + length (2) + unit id (1)
pub const MBAP_HEADER_LEN: usize = 7;

/// Maximum PDU size per the Modbus specification
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum value of the MBAP length field: unit id (1) + PDU (253)
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

/// Response buffer size, large enough for any TCP frame
pub const RESPONSE_BUFFER_SIZE: usize = 512;

/// Maximum registers per read request (FC 0x03/0x04)
pub const MAX_READ_REGISTERS: u16 = 125;

/// Maximum bits per read request (FC 0x01/0x02)
pub const MAX_READ_BITS: u16 = 2000;

/// Read coils
pub const FC_READ_COILS: u8 = 0x01;
/// Read discrete inputs
pub const FC_READ_DISCRETE_INPUTS: u8 = 0x02;
/// Read holding registers
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;
/// Read input registers
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;
/// Write single coil
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;
/// Write single register
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;

/// Modbus element category for read operations.
///
/// Bit kinds (coils, discrete inputs) are limited to 2000 elements per
/// request; word kinds (holding/input registers) to 125.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterKind {
    HoldingRegister,
    InputRegister,
    Coil,
    DiscreteInput,
}

impl RegisterKind {
    /// Whether this kind is represented as single-bit values
    pub fn is_bit(self) -> bool {
        matches!(self, RegisterKind::Coil | RegisterKind::DiscreteInput)
    }

    /// Per-request element limit for this kind's category
    pub fn max_read_count(self) -> u16 {
        if self.is_bit() {
            MAX_READ_BITS
        } else {
            MAX_READ_REGISTERS
        }
    }

    /// Modbus read function code for this kind
    pub fn read_function(self) -> u8 {
        match self {
            RegisterKind::Coil => FC_READ_COILS,
            RegisterKind::DiscreteInput => FC_READ_DISCRETE_INPUTS,
            RegisterKind::HoldingRegister => FC_READ_HOLDING_REGISTERS,
            RegisterKind::InputRegister => FC_READ_INPUT_REGISTERS,
        }
    }

    /// Display name used in log messages
    pub fn name(self) -> &'static str {
        match self {
            RegisterKind::HoldingRegister => "Holding Registers",
            RegisterKind::InputRegister => "Input Registers",
            RegisterKind::Coil => "Coils",
            RegisterKind::DiscreteInput => "Discrete Inputs",
        }
    }
}

impl std::fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Writable element category for single-address writes.
///
/// Only holding registers (FC 0x06) and coils (FC 0x05) accept single
/// writes; the other read categories are read-only by protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteKind {
    HoldingRegister,
    Coil,
}

impl WriteKind {
    /// Modbus write function code for this kind
    pub fn write_function(self) -> u8 {
        match self {
            WriteKind::HoldingRegister => FC_WRITE_SINGLE_REGISTER,
            WriteKind::Coil => FC_WRITE_SINGLE_COIL,
        }
    }

    /// Display name used in log messages
    pub fn name(self) -> &'static str {
        match self {
            WriteKind::HoldingRegister => "Holding Register",
            WriteKind::Coil => "Coil",
        }
    }
}

impl std::fmt::Display for WriteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_kinds() {
        assert!(RegisterKind::Coil.is_bit());
        assert!(RegisterKind::DiscreteInput.is_bit());
        assert!(!RegisterKind::HoldingRegister.is_bit());
        assert!(!RegisterKind::InputRegister.is_bit());
    }

    #[test]
    fn test_read_limits() {
        assert_eq!(RegisterKind::Coil.max_read_count(), 2000);
        assert_eq!(RegisterKind::DiscreteInput.max_read_count(), 2000);
        assert_eq!(RegisterKind::HoldingRegister.max_read_count(), 125);
        assert_eq!(RegisterKind::InputRegister.max_read_count(), 125);
    }

    #[test]
    fn test_function_codes() {
        assert_eq!(RegisterKind::Coil.read_function(), 0x01);
        assert_eq!(RegisterKind::HoldingRegister.read_function(), 0x03);
        assert_eq!(WriteKind::Coil.write_function(), 0x05);
        assert_eq!(WriteKind::HoldingRegister.write_function(), 0x06);
    }

    #[test]
    fn test_serde_names() {
        let kind: RegisterKind =
            serde_json::from_str("\"holding_register\"").expect("valid kind name");
        assert_eq!(kind, RegisterKind::HoldingRegister);
    }
}
