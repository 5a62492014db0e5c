//! Control message codec: fixed 42-byte big-endian record
//!
//! Format:
//! [1 byte]  message type
//! [1 byte]  hop count
//! [4 bytes] request id
//! [4 bytes] destination address
//! [4 bytes] origin address
//! [8 bytes] link quality (IEEE-754 bits)
//! [8 bytes] delay (IEEE-754 bits)
//! [8 bytes] mobility (IEEE-754 bits)
//! [4 bytes] sequence number

use super::types::{ControlMessage, MessageType};
use std::net::Ipv4Addr;
use thiserror::Error;

/// Encoded size of every control message
pub const CONTROL_MESSAGE_SIZE: usize = 1 + 1 + 4 + 4 + 4 + 8 + 8 + 8 + 4;

/// Errors raised while decoding a control message
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Buffer too short: need {need} bytes, got {got}")]
    BufferTooShort { need: usize, got: usize },

    #[error("Invalid message type: {0}")]
    InvalidMessageType(u8),

    #[error("Non-finite value in field {0}")]
    NonFiniteField(&'static str),
}

/// Serialize a control message
pub fn encode_message(msg: &ControlMessage) -> [u8; CONTROL_MESSAGE_SIZE] {
    let mut buf = [0u8; CONTROL_MESSAGE_SIZE];
    buf[0] = msg.message_type.as_u8();
    buf[1] = msg.hop_count;
    buf[2..6].copy_from_slice(&msg.request_id.to_be_bytes());
    buf[6..10].copy_from_slice(&msg.destination.octets());
    buf[10..14].copy_from_slice(&msg.origin.octets());
    buf[14..22].copy_from_slice(&msg.link_quality.to_bits().to_be_bytes());
    buf[22..30].copy_from_slice(&msg.delay.to_bits().to_be_bytes());
    buf[30..38].copy_from_slice(&msg.mobility.to_bits().to_be_bytes());
    buf[38..42].copy_from_slice(&msg.sequence_number.to_be_bytes());
    buf
}

/// Deserialize a control message
///
/// Trailing bytes beyond the fixed record are ignored.
pub fn decode_message(data: &[u8]) -> Result<ControlMessage, WireError> {
    if data.len() < CONTROL_MESSAGE_SIZE {
        return Err(WireError::BufferTooShort {
            need: CONTROL_MESSAGE_SIZE,
            got: data.len(),
        });
    }

    let message_type =
        MessageType::from_u8(data[0]).ok_or(WireError::InvalidMessageType(data[0]))?;

    let link_quality = read_f64(data, 14, "link_quality")?;
    let delay = read_f64(data, 22, "delay")?;
    let mobility = read_f64(data, 30, "mobility")?;

    Ok(ControlMessage {
        message_type,
        hop_count: data[1],
        request_id: read_u32(data, 2),
        destination: Ipv4Addr::from(read_u32(data, 6)),
        origin: Ipv4Addr::from(read_u32(data, 10)),
        link_quality,
        delay,
        mobility,
        sequence_number: read_u32(data, 38),
    })
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

fn read_f64(data: &[u8], offset: usize, field: &'static str) -> Result<f64, WireError> {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&data[offset..offset + 8]);
    let value = f64::from_bits(u64::from_be_bytes(raw));
    if value.is_finite() {
        Ok(value)
    } else {
        Err(WireError::NonFiniteField(field))
    }
}
