//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the framed byte protocol spoken with the backend
//! child over its stdin/stdout pipes:
//! - 4-byte header encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Frame struct with typed accessors

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{build_frame, build_frame_parts, Frame};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{opcode, Header, CONTROL_CLIENT_ID, HEADER_SIZE, MAX_PAYLOAD_SIZE};
