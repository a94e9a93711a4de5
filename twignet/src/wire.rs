//! Frame codec: fixed-size radio frames with a one-byte integrity code.
//!
//! ## Frame layout
//!
//! ```text
//! crc8 (1) || version (1) || sender (1) || last_node (1)
//! || destination (1) || sensor (1) || command (1) || sub_type (1)
//! || payload_len (1) || payload (0..=23) || zero padding to 32
//!
//! Command byte:
//! - bits 0-2: command class (0-4, see Command)
//! - bits 3-6: reserved, must be zero
//! - bit 7: echo-request flag
//! ```
//!
//! The CRC covers every byte after itself through the end of the
//! payload; padding is excluded and ignored on receive. Frames are
//! always exactly [`FRAME_SIZE`] bytes on air, so a truncated or
//! over-long buffer is rejected before any field is inspected.

use alloc::vec::Vec;

use crate::types::{
    Command, Message, Error, FRAME_SIZE, HEADER_SIZE, MAX_PAYLOAD, PROTOCOL_VERSION,
};

// Field offsets within a frame.
const OFF_CRC: usize = 0;
const OFF_VERSION: usize = 1;
const OFF_SENDER: usize = 2;
const OFF_LAST_NODE: usize = 3;
const OFF_DESTINATION: usize = 4;
const OFF_SENSOR: usize = 5;
const OFF_COMMAND: usize = 6;
const OFF_SUB_TYPE: usize = 7;
const OFF_PAYLOAD_LEN: usize = 8;
const OFF_PAYLOAD: usize = HEADER_SIZE;

const ECHO_FLAG: u8 = 0x80;
const COMMAND_MASK: u8 = 0x07;

/// Reasons a frame fails validation. All of them result in a silent
/// drop at the node level; the distinction exists for tests and debug
/// tracing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Buffer is not exactly one frame long.
    WrongLength,
    /// Protocol version mismatch.
    UnsupportedVersion,
    /// Command byte has an unknown class or reserved bits set.
    InvalidCommand,
    /// Declared payload length exceeds the frame.
    InvalidPayloadLength,
    /// Integrity code does not match the frame contents.
    ChecksumMismatch,
}

/// CRC-8 (Dallas/Maxim, reflected polynomial 0x8C).
///
/// One byte on air is the whole integrity budget, and this polynomial
/// detects all single-bit errors over the covered region.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in data {
        let mut inbyte = byte;
        for _ in 0..8 {
            let mix = (crc ^ inbyte) & 0x01;
            crc >>= 1;
            if mix != 0 {
                crc ^= 0x8C;
            }
            inbyte >>= 1;
        }
    }
    crc
}

/// Encode a message into a radio frame.
///
/// Fails only when the payload exceeds [`MAX_PAYLOAD`]; every other
/// field fits by construction.
pub fn encode(msg: &Message) -> Result<[u8; FRAME_SIZE], Error> {
    if msg.payload.len() > MAX_PAYLOAD {
        return Err(Error::PayloadTooLarge);
    }

    let mut frame = [0u8; FRAME_SIZE];
    frame[OFF_VERSION] = PROTOCOL_VERSION;
    frame[OFF_SENDER] = msg.sender;
    frame[OFF_LAST_NODE] = msg.last_node;
    frame[OFF_DESTINATION] = msg.destination;
    frame[OFF_SENSOR] = msg.sensor;
    frame[OFF_COMMAND] = msg.command as u8 | if msg.echo_request { ECHO_FLAG } else { 0 };
    frame[OFF_SUB_TYPE] = msg.sub_type;
    frame[OFF_PAYLOAD_LEN] = msg.payload.len() as u8;
    frame[OFF_PAYLOAD..OFF_PAYLOAD + msg.payload.len()].copy_from_slice(&msg.payload);

    frame[OFF_CRC] = crc8(&frame[OFF_VERSION..OFF_PAYLOAD + msg.payload.len()]);
    Ok(frame)
}

/// Validate and decode a radio frame.
pub fn decode(data: &[u8]) -> Result<Message, DecodeError> {
    if data.len() != FRAME_SIZE {
        return Err(DecodeError::WrongLength);
    }
    if data[OFF_VERSION] != PROTOCOL_VERSION {
        return Err(DecodeError::UnsupportedVersion);
    }

    let len = data[OFF_PAYLOAD_LEN] as usize;
    if len > MAX_PAYLOAD {
        return Err(DecodeError::InvalidPayloadLength);
    }

    let command_byte = data[OFF_COMMAND];
    if command_byte & !(COMMAND_MASK | ECHO_FLAG) != 0 {
        return Err(DecodeError::InvalidCommand);
    }
    let command =
        Command::from_wire(command_byte & COMMAND_MASK).ok_or(DecodeError::InvalidCommand)?;

    if crc8(&data[OFF_VERSION..OFF_PAYLOAD + len]) != data[OFF_CRC] {
        return Err(DecodeError::ChecksumMismatch);
    }

    let mut payload = Vec::with_capacity(len);
    payload.extend_from_slice(&data[OFF_PAYLOAD..OFF_PAYLOAD + len]);

    Ok(Message {
        sender: data[OFF_SENDER],
        last_node: data[OFF_LAST_NODE],
        destination: data[OFF_DESTINATION],
        sensor: data[OFF_SENSOR],
        command,
        sub_type: data[OFF_SUB_TYPE],
        echo_request: command_byte & ECHO_FLAG != 0,
        payload,
    })
}
