//! Wire format for BASP frames.
//!
//! Frame format: `[header:69][payload:N]`, the payload absent when
//! `payload_len == 0`.
//!
//! Header layout, all multi-byte integers in network byte order:
//!
//! - **source_node**: originating node (24 bytes)
//! - **dest_node**: destination node (24 bytes)
//! - **source_actor**: originating actor id (big-endian u32)
//! - **dest_actor**: destination actor id (big-endian u32)
//! - **payload_len**: payload size in bytes (big-endian u32)
//! - **operation**: message type byte
//! - **operation_data**: type-specific value (big-endian u64)

use basp_core::{ActorId, CodecError, NODE_ID_SIZE, NodeId, Writer};

pub mod payload;

/// Header size: two node ids + two actor ids + payload length + operation
/// byte + operation data = 24 + 24 + 4 + 4 + 4 + 1 + 8 = 69 bytes.
pub const HEADER_SIZE: usize = 2 * NODE_ID_SIZE + 4 + 4 + 4 + 1 + 8;

/// Maximum payload size (1MB).
///
/// Frames announcing more are rejected to prevent memory exhaustion.
pub const MAX_PAYLOAD_SIZE: u32 = 1024 * 1024;

/// Protocol version transmitted in the server handshake's
/// `operation_data` field. Nodes speaking a different version never get
/// past the handshake.
pub const PROTOCOL_VERSION: u64 = 1;

/// Wire format error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// The header bytes do not form a well-formed record.
    #[error("invalid header: need {needed} bytes, have {have}")]
    InvalidHeader {
        /// Minimum bytes required to decode a header.
        needed: usize,
        /// Actual bytes available.
        have: usize,
    },

    /// The operation byte does not name a known message type.
    #[error("unknown operation: {op:#04x}")]
    UnknownOperation {
        /// The unrecognized operation byte.
        op: u8,
    },

    /// A typed payload failed to decode.
    #[error("malformed payload: {0}")]
    PayloadMalformed(#[from] CodecError),

    /// The payload chunk does not match the length announced by its header.
    #[error("payload length mismatch: header says {expected}, got {actual}")]
    PayloadLenMismatch {
        /// Length announced in the header.
        expected: u32,
        /// Length of the chunk actually received.
        actual: usize,
    },
}

/// Message types carried in the header's operation byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Sent by the accepting side first after a new connection.
    /// `operation_data` carries the protocol version; the optional payload
    /// announces a published actor and its interfaces.
    ServerHandshake = 0x00,

    /// Sent by the connecting side in response to a server handshake.
    ClientHandshake = 0x01,

    /// An actor-to-actor message. `operation_data` is the message id; the
    /// payload carries the forwarding stack and the serialized message.
    DispatchMessage = 0x02,

    /// "I have created a proxy for your actor."
    AnnounceProxyInstance = 0x03,

    /// Proxy destruction, or a routing-failure reply when `operation_data`
    /// carries an [`ErrorCode`] and the payload the undeliverable frame.
    KillProxyInstance = 0x04,

    /// Liveness probe. Always empty.
    Heartbeat = 0x05,
}

impl MessageType {
    /// Decode an operation byte.
    ///
    /// # Errors
    ///
    /// Returns `UnknownOperation` for bytes outside the defined range.
    pub fn from_u8(op: u8) -> Result<Self, WireError> {
        match op {
            0x00 => Ok(Self::ServerHandshake),
            0x01 => Ok(Self::ClientHandshake),
            0x02 => Ok(Self::DispatchMessage),
            0x03 => Ok(Self::AnnounceProxyInstance),
            0x04 => Ok(Self::KillProxyInstance),
            0x05 => Ok(Self::Heartbeat),
            op => Err(WireError::UnknownOperation { op }),
        }
    }

    /// The operation byte.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether this is either handshake type.
    pub const fn is_handshake(self) -> bool {
        matches!(self, Self::ServerHandshake | Self::ClientHandshake)
    }

    /// Whether this is a heartbeat.
    pub const fn is_heartbeat(self) -> bool {
        matches!(self, Self::Heartbeat)
    }
}

/// Error codes transmitted in the `operation_data` slot of a
/// routing-failure reply.
///
/// The slot is 64 bits wide on the wire; codes are cast into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum ErrorCode {
    /// No route to the destination node of a forwarded message.
    NoRouteToDestination = 1,
}

impl ErrorCode {
    /// The wire value.
    pub const fn as_u64(self) -> u64 {
        self as u64
    }
}

/// Fixed-size frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Originating node.
    pub source_node: NodeId,
    /// Destination node; the invalid id addresses "whoever accepts".
    pub dest_node: NodeId,
    /// Originating actor id.
    pub source_actor: ActorId,
    /// Destination actor id.
    pub dest_actor: ActorId,
    /// Payload size in bytes.
    pub payload_len: u32,
    /// Message type.
    pub operation: MessageType,
    /// Type-specific value (version, message id, exit reason, error code).
    pub operation_data: u64,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            source_node: NodeId::invalid(),
            dest_node: NodeId::invalid(),
            source_actor: 0,
            dest_actor: 0,
            payload_len: 0,
            operation: MessageType::Heartbeat,
            operation_data: 0,
        }
    }
}

impl Header {
    /// Serialize into a buffer (must be at least `HEADER_SIZE` bytes).
    ///
    /// Writing into a caller-chosen region supports the reserved-space
    /// patch-back used by [`write_frame_with`].
    ///
    /// # Panics
    ///
    /// Panics if the buffer is smaller than `HEADER_SIZE`.
    pub fn write_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..20].copy_from_slice(self.source_node.host());
        buf[20..24].copy_from_slice(&self.source_node.process_id().to_be_bytes());
        buf[24..44].copy_from_slice(self.dest_node.host());
        buf[44..48].copy_from_slice(&self.dest_node.process_id().to_be_bytes());
        buf[48..52].copy_from_slice(&self.source_actor.to_be_bytes());
        buf[52..56].copy_from_slice(&self.dest_actor.to_be_bytes());
        buf[56..60].copy_from_slice(&self.payload_len.to_be_bytes());
        buf[60] = self.operation.as_u8();
        buf[61..69].copy_from_slice(&self.operation_data.to_be_bytes());
    }

    /// Deserialize a header from a buffer.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHeader` when fewer than `HEADER_SIZE` bytes are
    /// available and `UnknownOperation` for an unrecognized operation byte.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < HEADER_SIZE {
            return Err(WireError::InvalidHeader {
                needed: HEADER_SIZE,
                have: buf.len(),
            });
        }
        let mut host = [0u8; 20];

        host.copy_from_slice(&buf[0..20]);
        let source_node = NodeId::new(u32::from_be_bytes([buf[20], buf[21], buf[22], buf[23]]), host);

        host.copy_from_slice(&buf[24..44]);
        let dest_node = NodeId::new(u32::from_be_bytes([buf[44], buf[45], buf[46], buf[47]]), host);

        let source_actor = u32::from_be_bytes([buf[48], buf[49], buf[50], buf[51]]);
        let dest_actor = u32::from_be_bytes([buf[52], buf[53], buf[54], buf[55]]);
        let payload_len = u32::from_be_bytes([buf[56], buf[57], buf[58], buf[59]]);
        let operation = MessageType::from_u8(buf[60])?;
        let operation_data = u64::from_be_bytes([
            buf[61], buf[62], buf[63], buf[64], buf[65], buf[66], buf[67], buf[68],
        ]);

        Ok(Self {
            source_node,
            dest_node,
            source_actor,
            dest_actor,
            payload_len,
            operation,
            operation_data,
        })
    }

    /// Whether the per-type constraints hold.
    ///
    /// A server handshake must announce the local protocol version, a
    /// heartbeat must be empty, and no frame may announce more than
    /// [`MAX_PAYLOAD_SIZE`] payload bytes.
    pub fn valid(&self) -> bool {
        if self.payload_len > MAX_PAYLOAD_SIZE {
            return false;
        }
        match self.operation {
            MessageType::ServerHandshake => self.operation_data == PROTOCOL_VERSION,
            MessageType::Heartbeat => self.payload_len == 0,
            _ => true,
        }
    }
}

/// Append a frame with an empty payload to `buf`.
///
/// Returns the header as written (with `payload_len` forced to zero).
pub fn write_frame(buf: &mut Vec<u8>, mut hdr: Header) -> Header {
    hdr.payload_len = 0;
    let hdr_pos = buf.len();
    buf.resize(hdr_pos + HEADER_SIZE, 0);
    hdr.write_into(&mut buf[hdr_pos..]);
    hdr
}

/// Append a frame with a payload to `buf`.
///
/// Two-pass, single-buffer assembly: reserve `HEADER_SIZE` placeholder
/// bytes, let `write_payload` append the payload, then patch the finished
/// header (with the now-known `payload_len`) back into the reserved
/// region. Returns the header as written.
pub fn write_frame_with<F>(buf: &mut Vec<u8>, mut hdr: Header, write_payload: F) -> Header
where
    F: FnOnce(&mut Writer<'_>),
{
    let hdr_pos = buf.len();
    buf.resize(hdr_pos + HEADER_SIZE, 0);
    let payload_pos = buf.len();
    {
        let mut w = Writer::new(buf);
        write_payload(&mut w);
    }
    hdr.payload_len = (buf.len() - payload_pos) as u32;
    hdr.write_into(&mut buf[hdr_pos..hdr_pos + HEADER_SIZE]);
    hdr
}
