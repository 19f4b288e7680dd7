//! Node identity.
//!
//! A [`NodeId`] identifies one running instance of an actor system: an
//! opaque 20-byte host identifier plus a process tag, so that two
//! processes on the same host (or one restarted process) never collide.
//!
//! The all-zero value is the distinguished *invalid* id. It never names a
//! real node and compares unequal to every valid id.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::{CodecError, Reader, Writer};

/// Size of the opaque host identifier in bytes.
pub const HOST_ID_SIZE: usize = 20;

/// Encoded size of a [`NodeId`] on the wire: host id + `u32` process tag.
pub const NODE_ID_SIZE: usize = HOST_ID_SIZE + 4;

/// Globally unique identifier of a node.
///
/// # Examples
///
/// ```
/// use basp_core::NodeId;
///
/// let node = NodeId::new(42, [0xAB; 20]);
/// assert!(!node.is_invalid());
///
/// assert!(NodeId::invalid().is_invalid());
/// assert_ne!(node, NodeId::invalid());
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct NodeId {
    host: [u8; HOST_ID_SIZE],
    process_id: u32,
}

impl NodeId {
    /// Create a node id from a process tag and host identifier.
    pub const fn new(process_id: u32, host: [u8; HOST_ID_SIZE]) -> Self {
        Self { host, process_id }
    }

    /// The distinguished invalid id (all-zero host, zero process tag).
    pub const fn invalid() -> Self {
        Self {
            host: [0; HOST_ID_SIZE],
            process_id: 0,
        }
    }

    /// Whether this is the distinguished invalid id.
    pub fn is_invalid(&self) -> bool {
        *self == Self::invalid()
    }

    /// The opaque host identifier.
    pub const fn host(&self) -> &[u8; HOST_ID_SIZE] {
        &self.host
    }

    /// The process tag distinguishing instances on the same host.
    pub const fn process_id(&self) -> u32 {
        self.process_id
    }

    /// Append the wire form: raw host bytes, then big-endian process tag.
    pub fn encode(&self, w: &mut Writer<'_>) {
        w.write_raw(&self.host);
        w.write_u32(self.process_id);
    }

    /// Decode the wire form produced by [`encode`](Self::encode).
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedEof` when fewer than [`NODE_ID_SIZE`] bytes remain.
    pub fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let mut host = [0u8; HOST_ID_SIZE];
        host.copy_from_slice(r.read_exact(HOST_ID_SIZE)?);
        let process_id = r.read_u32()?;
        Ok(Self { host, process_id })
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.host {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ":{}", self.process_id)
    }
}
