// Message module: control message types and the fixed-size wire codec

pub mod types;
pub mod codec;

pub use types::{ControlMessage, MessageType, PROBE_ECHO, PROBE_REQUEST};
pub use codec::{decode_message, encode_message, WireError, CONTROL_MESSAGE_SIZE};
