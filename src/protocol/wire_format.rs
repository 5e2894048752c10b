//! Wire format encoding and decoding.
//!
//! Implements the 4-byte backend header format:
//! ```text
//! ┌───────────┬──────────┐
//! │ Client ID │ Data Len │
//! │ 2 bytes   │ 2 bytes  │
//! │ uint16 LE │ uint16 LE│
//! └───────────┴──────────┘
//! ```
//!
//! All multi-byte integers are Little Endian. Client id 0 is reserved for
//! control and REPL traffic between the wrapper and the backend; the first
//! two bytes of a client-0 payload are an opcode (see [`opcode`]).

/// Header size in bytes (fixed, exactly 4).
pub const HEADER_SIZE: usize = 4;

/// Maximum payload size carried by one frame (limit of the u16 length field).
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// Client id reserved for control/REPL traffic.
pub const CONTROL_CLIENT_ID: u16 = 0;

/// Opcode constants for client-0 payloads.
///
/// The opcode is carried in the first two bytes (u16 LE) of the payload.
pub mod opcode {
    /// Announce a new WebSocket session to the backend.
    pub const ADD_CLIENT: u16 = 0xff00;
    /// Ask the backend to tear down a session.
    pub const REMOVE_CLIENT: u16 = 0xff01;
    /// Backend acknowledgment that a session is gone.
    pub const CLIENT_REMOVED: u16 = 0xff02;
    /// REPL command submission (cookie-tagged).
    pub const REPL_COMMAND: u16 = 0xff03;
    /// REPL reply (cookie-tagged).
    pub const REPL_RESULT: u16 = 0xff04;
    /// Orderly backend shutdown.
    pub const SHUTDOWN: u16 = 0xff05;
    /// Restart request: server side.
    pub const RESTART_SERVER: u16 = 0xff06;
    /// Restart request: client side.
    pub const RESTART_CLIENT: u16 = 0xff07;
    /// Restart request: both sides.
    pub const RESTART_BOTH: u16 = 0xff08;
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Session id the payload belongs to (0 = control/REPL).
    pub client_id: u16,
    /// Payload length in bytes.
    pub data_len: u16,
}

impl Header {
    /// Create a new header.
    pub fn new(client_id: u16, data_len: u16) -> Self {
        Self {
            client_id,
            data_len,
        }
    }

    /// Encode header to bytes (Little Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use outpost_wrapper::protocol::Header;
    ///
    /// let header = Header::new(1, 5);
    /// assert_eq!(header.encode(), [0x01, 0x00, 0x05, 0x00]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (4 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..2].copy_from_slice(&self.client_id.to_le_bytes());
        buf[2..4].copy_from_slice(&self.data_len.to_le_bytes());
    }

    /// Decode header from bytes (Little Endian).
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            client_id: u16::from_le_bytes([buf[0], buf[1]]),
            data_len: u16::from_le_bytes([buf[2], buf[3]]),
        })
    }

    /// Check if this frame carries control/REPL traffic.
    #[inline]
    pub fn is_control(&self) -> bool {
        self.client_id == CONTROL_CLIENT_ID
    }
}
