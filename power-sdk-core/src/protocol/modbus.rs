use std::time::Duration;

use crc::{Algorithm, Crc};

use crate::error::{ProtocolError, TransportError};
use crate::transport::Transport;

/// CRC-16/Modbus: poly 0xA001 reflected == poly 0x8005 with refin/refout,
/// init 0xFFFF, appended little-endian on the wire.
const CRC_MODBUS: Algorithm<u16> = crc::CRC_16_MODBUS;

fn crc() -> Crc<u16> {
    Crc::<u16>::new(&CRC_MODBUS)
}

const READ_HOLDING_REGISTERS: u8 = 0x03;
const EXCEPTION_BIT: u8 = 0x80;

/// Build a Modbus-RTU "read holding registers" request frame, CRC appended.
pub fn build_request(device_address: u8, block_address: u16, register_count: u16) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8);
    frame.push(device_address);
    frame.push(READ_HOLDING_REGISTERS);
    frame.extend_from_slice(&block_address.to_be_bytes());
    frame.extend_from_slice(&register_count.to_be_bytes());
    let checksum = crc().checksum(&frame);
    frame.extend_from_slice(&checksum.to_le_bytes());
    frame
}

/// True if the frame's trailing CRC matches the CRC of its leading bytes.
pub fn validate_crc(frame: &[u8]) -> bool {
    if frame.len() < 2 {
        return false;
    }
    let (body, tail) = frame.split_at(frame.len() - 2);
    let expected = u16::from_le_bytes([tail[0], tail[1]]);
    crc().checksum(body) == expected
}

/// A structurally parsed Modbus-RTU frame, CRC not yet re-validated here.
#[derive(Debug, Clone, PartialEq)]
pub struct ModbusFrame {
    pub address: u8,
    pub function: u8,
    pub byte_count: usize,
    pub data: Vec<u8>,
    pub crc: u16,
}

/// Parse a raw frame's structure. Does not itself check the CRC; callers
/// should run `validate_crc` first (see `read_block`).
pub fn parse_frame(frame: &[u8]) -> Result<ModbusFrame, ProtocolError> {
    if frame.len() < 5 {
        return Err(ProtocolError::FrameTooShort { len: frame.len() });
    }
    let address = frame[0];
    let function = frame[1];

    if function & EXCEPTION_BIT != 0 {
        // Exception frames carry no byte-count byte: addr | func | code | crc.
        let data = frame[2..frame.len() - 2].to_vec();
        let crc_bytes = &frame[frame.len() - 2..];
        let crc = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
        return Ok(ModbusFrame {
            address,
            function,
            byte_count: data.len(),
            data,
            crc,
        });
    }

    let byte_count = frame[2] as usize;
    let expected_len = 3 + byte_count + 2;
    if frame.len() < expected_len {
        return Err(ProtocolError::FrameTruncated {
            expected: expected_len,
            actual: frame.len(),
        });
    }
    // Data runs to the frame's actual end (minus the trailing CRC), not just
    // `byte_count` bytes: a frame longer than its header declares is a
    // byte-count mismatch caught by `normalize`, not a truncation here.
    let data = frame[3..frame.len() - 2].to_vec();
    let crc_bytes = &frame[frame.len() - 2..];
    let crc = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
    Ok(ModbusFrame {
        address,
        function,
        byte_count,
        data,
        crc,
    })
}

fn exception_message(code: u8) -> String {
    match code {
        0x01 => "Illegal function".to_string(),
        0x02 => "Illegal data address".to_string(),
        0x03 => "Illegal data value".to_string(),
        0x04 => "Slave device failure".to_string(),
        other => format!("Unknown error {other}"),
    }
}

/// Strip framing and validate a parsed response, returning the payload's
/// data bytes unchanged (already big-endian registers).
pub fn normalize(frame: &ModbusFrame) -> Result<Vec<u8>, ProtocolError> {
    if frame.function & EXCEPTION_BIT != 0 {
        let code = *frame
            .data
            .first()
            .ok_or(ProtocolError::MalformedErrorFrame)?;
        return Err(ProtocolError::ModbusException {
            code,
            message: exception_message(code),
        });
    }
    if frame.function != READ_HOLDING_REGISTERS {
        return Err(ProtocolError::UnsupportedFunctionCode(frame.function));
    }
    if frame.byte_count != frame.data.len() {
        return Err(ProtocolError::ByteCountMismatch {
            header: frame.byte_count,
            actual: frame.data.len(),
        });
    }
    Ok(frame.data.clone())
}

/// A normalized block read result: framing and CRC stripped, register
/// bytes only.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPayload {
    pub block_id: u32,
    pub data: Vec<u8>,
    pub device_address: u8,
    pub protocol_version: Option<u32>,
}

/// Error surfaced by a full `read_block` round-trip: either a transport
/// failure or a protocol-level decode failure.
#[derive(Debug, thiserror::Error)]
pub enum ReadBlockError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Build a request, send it over `transport`, validate the CRC, parse, and
/// normalize the response.
pub fn read_block(
    transport: &dyn Transport,
    device_address: u8,
    block_address: u16,
    block_id: u32,
    register_count: u16,
    protocol_version: Option<u32>,
    timeout: Duration,
) -> Result<NormalizedPayload, ReadBlockError> {
    let request = build_request(device_address, block_address, register_count);
    let response = transport.send_frame(&request, timeout)?;
    if !validate_crc(&response) {
        return Err(ProtocolError::CrcMismatch.into());
    }
    let frame = parse_frame(&response)?;
    let data = normalize(&frame)?;
    Ok(NormalizedPayload {
        block_id,
        data,
        device_address,
        protocol_version,
    })
}
