//! Actor identifiers, addresses, and message correlation types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::{CodecError, Reader, Writer};
use crate::node_id::NodeId;

/// Identifier of an actor within its node.
pub type ActorId = u32;

/// The distinguished invalid actor id.
pub const INVALID_ACTOR_ID: ActorId = 0;

/// Global address of an actor: its node plus its id on that node.
///
/// The default value pairs the invalid node with the invalid actor id and
/// stands for "no actor".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct ActorAddr {
    /// Node the actor lives on.
    pub node: NodeId,
    /// Actor id within that node.
    pub id: ActorId,
}

impl ActorAddr {
    /// Create an address from its parts.
    pub const fn new(node: NodeId, id: ActorId) -> Self {
        Self { node, id }
    }

    /// Whether this address names no actor.
    pub fn is_invalid(&self) -> bool {
        self.id == INVALID_ACTOR_ID && self.node.is_invalid()
    }

    /// Append the wire form: node id, then big-endian actor id.
    pub fn encode(&self, w: &mut Writer<'_>) {
        self.node.encode(w);
        w.write_u32(self.id);
    }

    /// Decode the wire form produced by [`encode`](Self::encode).
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedEof` on truncated input.
    pub fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let node = NodeId::decode(r)?;
        let id = r.read_u32()?;
        Ok(Self { node, id })
    }
}

impl fmt::Display for ActorAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.node)
    }
}

/// Opaque 64-bit message correlation value.
///
/// The engine never interprets it; it travels in the `operation_data`
/// field of dispatch frames and comes back in replies.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct MessageId(u64);

impl MessageId {
    /// Wrap a raw correlation value.
    pub const fn from_integer(value: u64) -> Self {
        Self(value)
    }

    /// The raw correlation value.
    pub const fn integer_value(self) -> u64 {
        self.0
    }
}

/// Reason an actor terminated, carried in kill-proxy notifications.
///
/// The wire slot is 64 bits wide; the named constants cover the reasons
/// the local system produces, and [`from_raw`](Self::from_raw) accepts any
/// value a peer sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExitReason(u64);

impl ExitReason {
    /// Regular termination.
    pub const NORMAL: ExitReason = ExitReason(1);
    /// Terminated by an explicit kill.
    pub const KILL: ExitReason = ExitReason(2);
    /// Terminated by an unhandled error.
    pub const UNHANDLED_EXCEPTION: ExitReason = ExitReason(3);
    /// The hosting node shut down.
    pub const USER_SHUTDOWN: ExitReason = ExitReason(4);
    /// The link to the remote actor was lost.
    pub const REMOTE_LINK_UNREACHABLE: ExitReason = ExitReason(5);

    /// Wrap a raw wire value.
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// The raw wire value.
    pub const fn raw(self) -> u64 {
        self.0
    }
}
