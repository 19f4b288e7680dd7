//! # BASP core types
//!
//! Identifier types and the binary codec shared by every layer of the
//! BASP (Binary Actor System Protocol) stack:
//!
//! - [`NodeId`]: globally unique identity of a node (host id + process tag)
//! - [`ActorId`] / [`ActorAddr`]: actor identity, local and global
//! - [`MessageId`]: opaque 64-bit message correlation value
//! - [`ExitReason`]: actor termination reason carried in kill notifications
//! - [`codec`]: network-byte-order cursor pair used for all wire fields
//!
//! The wire format built on top of these types lives in `basp-transport`.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

/// Actor identifiers, addresses, and message correlation types.
pub mod actor;

/// Network-byte-order binary reader/writer.
pub mod codec;

/// Node identity.
pub mod node_id;

pub use actor::{ActorAddr, ActorId, ExitReason, INVALID_ACTOR_ID, MessageId};
pub use codec::{CodecError, Reader, Writer};
pub use node_id::{HOST_ID_SIZE, NODE_ID_SIZE, NodeId};
