//! Modbus TCP frame codec
//!
//! Builds request frames (MBAP header + PDU) and parses response PDUs for
//! the function codes the link supports.

use bytes::{BufMut, BytesMut};

use crate::error::{LinkError, Result};
use crate::types::{
    WriteKind, FC_WRITE_SINGLE_COIL, MAX_MBAP_LENGTH, MBAP_HEADER_LEN,
};

/// Modbus TCP MBAP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    /// Transaction identifier
    pub transaction_id: u16,
    /// Protocol identifier (always 0 for Modbus)
    pub protocol_id: u16,
    /// Length field: unit id + PDU bytes
    pub length: u16,
    /// Unit identifier (slave ID)
    pub unit_id: u8,
}

impl MbapHeader {
    /// Parse a header from the first [`MBAP_HEADER_LEN`] bytes of a frame.
    ///
    /// Validates the protocol id (must be 0) and the length field (1..=254).
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < MBAP_HEADER_LEN {
            return Err(LinkError::Protocol(format!(
                "MBAP header too short: {} bytes",
                buf.len()
            )));
        }

        let protocol_id = u16::from_be_bytes([buf[2], buf[3]]);
        if protocol_id != 0 {
            return Err(LinkError::Protocol(format!(
                "Unexpected protocol id: {protocol_id}"
            )));
        }

        let length = u16::from_be_bytes([buf[4], buf[5]]);
        if length == 0 || length as usize > MAX_MBAP_LENGTH {
            return Err(LinkError::Protocol(format!(
                "Invalid TCP frame length: {length}"
            )));
        }

        Ok(Self {
            transaction_id: u16::from_be_bytes([buf[0], buf[1]]),
            protocol_id,
            length,
            unit_id: buf[6],
        })
    }

    /// Number of PDU bytes that follow the header on the wire
    pub fn pdu_len(&self) -> usize {
        self.length as usize - 1
    }
}

/// Encode an MBAP header followed by the given PDU into one frame
fn encode_frame(transaction_id: u16, unit_id: u8, pdu: &[u8]) -> BytesMut {
    let mut frame = BytesMut::with_capacity(MBAP_HEADER_LEN + pdu.len());
    frame.put_u16(transaction_id);
    frame.put_u16(0); // protocol id
    frame.put_u16(pdu.len() as u16 + 1);
    frame.put_u8(unit_id);
    frame.put_slice(pdu);
    frame
}

/// Build a read request frame (FC 0x01-0x04)
pub fn build_read_request(
    transaction_id: u16,
    unit_id: u8,
    function: u8,
    address: u16,
    quantity: u16,
) -> Result<BytesMut> {
    if !matches!(function, 0x01..=0x04) {
        return Err(LinkError::Protocol(format!(
            "build_read_request only supports FC01-04, got FC{function:02X}"
        )));
    }

    let mut pdu = [0u8; 5];
    pdu[0] = function;
    pdu[1..3].copy_from_slice(&address.to_be_bytes());
    pdu[3..5].copy_from_slice(&quantity.to_be_bytes());
    Ok(encode_frame(transaction_id, unit_id, &pdu))
}

/// Build a single-write request frame (FC 0x05/0x06).
///
/// For coils the value is mapped to the protocol's 0xFF00/0x0000 encoding.
pub fn build_write_single(
    transaction_id: u16,
    unit_id: u8,
    kind: WriteKind,
    address: u16,
    value: u16,
) -> BytesMut {
    let function = kind.write_function();
    let wire_value = if function == FC_WRITE_SINGLE_COIL {
        if value != 0 {
            0xFF00
        } else {
            0x0000
        }
    } else {
        value
    };

    let mut pdu = [0u8; 5];
    pdu[0] = function;
    pdu[1..3].copy_from_slice(&address.to_be_bytes());
    pdu[3..5].copy_from_slice(&wire_value.to_be_bytes());
    encode_frame(transaction_id, unit_id, &pdu)
}

/// Validate a response PDU's function code, surfacing Modbus exceptions
pub fn check_function(pdu: &[u8], expected: u8) -> Result<()> {
    let Some(&fc) = pdu.first() else {
        return Err(LinkError::Protocol("Empty response PDU".to_string()));
    };

    if fc & 0x80 != 0 {
        let code = pdu.get(1).copied().unwrap_or(0);
        return Err(LinkError::Exception {
            function: fc & 0x7F,
            code,
        });
    }

    if fc != expected {
        return Err(LinkError::Protocol(format!(
            "Function code mismatch: expected {expected:#04x}, got {fc:#04x}"
        )));
    }

    Ok(())
}

/// Parse a bit-read response PDU (FC 0x01/0x02) into 0/1 values.
///
/// Bits are packed LSB-first within each byte; the result is truncated to
/// the requested count.
pub fn parse_read_bits(pdu: &[u8], function: u8, count: u16) -> Result<Vec<u16>> {
    check_function(pdu, function)?;

    if pdu.len() < 2 {
        return Err(LinkError::Protocol(
            "Bit response missing byte count".to_string(),
        ));
    }

    let byte_count = pdu[1] as usize;
    let expected_bytes = count.div_ceil(8) as usize;
    if byte_count != expected_bytes || pdu.len() < 2 + byte_count {
        return Err(LinkError::Protocol(format!(
            "Bit response byte count mismatch: declared {byte_count}, expected {expected_bytes} for {count} bits"
        )));
    }

    let mut values = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let byte = pdu[2 + i / 8];
        values.push(u16::from((byte >> (i % 8)) & 1));
    }
    Ok(values)
}

/// Parse a register-read response PDU (FC 0x03/0x04)
pub fn parse_read_registers(pdu: &[u8], function: u8, count: u16) -> Result<Vec<u16>> {
    check_function(pdu, function)?;

    if pdu.len() < 2 {
        return Err(LinkError::Protocol(
            "Register response missing byte count".to_string(),
        ));
    }

    let byte_count = pdu[1] as usize;
    let expected_bytes = count as usize * 2;
    if byte_count != expected_bytes || pdu.len() < 2 + byte_count {
        return Err(LinkError::Protocol(format!(
            "Register response byte count mismatch: declared {byte_count}, expected {expected_bytes} for {count} registers"
        )));
    }

    let mut values = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let offset = 2 + i * 2;
        values.push(u16::from_be_bytes([pdu[offset], pdu[offset + 1]]));
    }
    Ok(values)
}

/// Validate a single-write response PDU (FC 0x05/0x06).
///
/// The device echoes the request; the echoed address must match.
pub fn parse_write_response(pdu: &[u8], function: u8, address: u16) -> Result<()> {
    check_function(pdu, function)?;

    if pdu.len() < 5 {
        return Err(LinkError::Protocol(format!(
            "Write response too short: {} bytes",
            pdu.len()
        )));
    }

    let echoed = u16::from_be_bytes([pdu[1], pdu[2]]);
    if echoed != address {
        return Err(LinkError::Protocol(format!(
            "Write response address mismatch: expected {address}, got {echoed}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_read_request() {
        let frame = build_read_request(0x0001, 1, 0x03, 0x0100, 10).expect("valid request");
        assert_eq!(
            frame.as_ref(),
            &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x01, 0x00, 0x00, 0x0A]
        );
    }

    #[test]
    fn test_build_read_request_rejects_write_fc() {
        assert!(build_read_request(1, 1, 0x06, 0, 1).is_err());
    }

    #[test]
    fn test_build_write_coil_encoding() {
        let on = build_write_single(1, 1, WriteKind::Coil, 0x0010, 1);
        assert_eq!(&on[7..], &[0x05, 0x00, 0x10, 0xFF, 0x00]);

        let off = build_write_single(2, 1, WriteKind::Coil, 0x0010, 0);
        assert_eq!(&off[7..], &[0x05, 0x00, 0x10, 0x00, 0x00]);
    }

    #[test]
    fn test_build_write_register_passthrough() {
        let frame = build_write_single(1, 1, WriteKind::HoldingRegister, 0x0002, 0x1234);
        assert_eq!(&frame[7..], &[0x06, 0x00, 0x02, 0x12, 0x34]);
    }

    #[test]
    fn test_mbap_header_roundtrip() {
        let frame = build_read_request(0x4242, 9, 0x01, 0, 16).expect("valid request");
        let header = MbapHeader::parse(&frame).expect("valid header");
        assert_eq!(header.transaction_id, 0x4242);
        assert_eq!(header.protocol_id, 0);
        assert_eq!(header.unit_id, 9);
        assert_eq!(header.pdu_len(), 5);
    }

    #[test]
    fn test_mbap_header_invalid_length() {
        let mut frame = build_read_request(1, 1, 0x03, 0, 1).expect("valid request").to_vec();
        frame[4] = 0xFF;
        frame[5] = 0xFF;
        assert!(MbapHeader::parse(&frame).is_err());
    }

    #[test]
    fn test_parse_registers() {
        // FC03, 4 bytes, values 0x0102 0x0304
        let pdu = [0x03, 0x04, 0x01, 0x02, 0x03, 0x04];
        let values = parse_read_registers(&pdu, 0x03, 2).expect("valid response");
        assert_eq!(values, vec![0x0102, 0x0304]);
    }

    #[test]
    fn test_parse_registers_byte_count_mismatch() {
        let pdu = [0x03, 0x02, 0x01, 0x02];
        assert!(parse_read_registers(&pdu, 0x03, 2).is_err());
    }

    #[test]
    fn test_parse_bits_lsb_first() {
        // FC01, 1 byte, pattern 0b0000_0101 -> bits 1,0,1
        let pdu = [0x01, 0x01, 0x05];
        let values = parse_read_bits(&pdu, 0x01, 3).expect("valid response");
        assert_eq!(values, vec![1, 0, 1]);
    }

    #[test]
    fn test_parse_bits_truncates_padding() {
        // 10 bits over 2 bytes, all set
        let pdu = [0x01, 0x02, 0xFF, 0xFF];
        let values = parse_read_bits(&pdu, 0x01, 10).expect("valid response");
        assert_eq!(values.len(), 10);
        assert!(values.iter().all(|&v| v == 1));
    }

    #[test]
    fn test_exception_detected() {
        let pdu = [0x83, 0x02];
        let err = parse_read_registers(&pdu, 0x03, 1).expect_err("exception response");
        match err {
            LinkError::Exception { function, code } => {
                assert_eq!(function, 0x03);
                assert_eq!(code, 0x02);
            },
            other => panic!("Expected Exception, got {other:?}"),
        }
    }

    #[test]
    fn test_write_response_echo_check() {
        let pdu = [0x06, 0x00, 0x64, 0x12, 0x34];
        assert!(parse_write_response(&pdu, 0x06, 100).is_ok());
        assert!(parse_write_response(&pdu, 0x06, 101).is_err());
    }
}
