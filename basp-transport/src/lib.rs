//! # BASP transport core
//!
//! The per-node engine of the Binary Actor System Protocol: it multiplexes
//! actor-to-actor message streams over a mesh of point-to-point byte
//! connections owned by an I/O broker.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │              Local actor system                  │
//! │        Receives upcalls via [`Callee`]           │
//! ├──────────────────────────────────────────────────┤
//! │     Instance (protocol engine)                   │
//! │     • Receive state machine per connection       │
//! │     • Handshake, forwarding, dispatch            │
//! ├──────────────────────────────────────────────────┤
//! │     RoutingTable (direct + indirect routes)      │
//! ├──────────────────────────────────────────────────┤
//! │     Wire format (fixed header + typed payloads)  │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! Inbound bytes flow from the broker into [`Instance::handle`], which
//! alternates between reading a fixed-size header and a variable-size
//! payload, then either forwards the frame to the next hop or delivers it
//! locally through the [`Callee`]. Outbound frames are appended to
//! broker-owned write buffers and flushed per connection.
//!
//! ## Components
//!
//! | Component | Purpose |
//! |-----------|---------|
//! | [`wire`] | Fixed 69-byte header codec and typed payload codecs |
//! | [`RoutingTable`] | Direct/indirect route map with erase cascades |
//! | [`PublishedActors`] | Port → published actor registry |
//! | [`Instance`] | The protocol engine itself |
//! | [`Callee`] | Upcall contract into the local actor system |
//! | [`HookNotifier`] | Side-effect-only observation fan-out |

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

// Re-export core types for convenience
pub use basp_core::{
    ActorAddr, ActorId, CodecError, ExitReason, HOST_ID_SIZE, INVALID_ACTOR_ID, MessageId,
    NODE_ID_SIZE, NodeId, Reader, Writer,
};

/// Interface to the I/O broker owning connections and write buffers.
pub mod broker;

/// Upcall contract into the local actor system.
pub mod callee;

/// Observation hooks and their fan-out notifier.
pub mod hooks;

/// The protocol engine.
pub mod instance;

/// Registry of locally published actors.
pub mod published;

/// Routing table with direct and indirect routes.
pub mod routing;

/// Wire format: header and payload codecs.
pub mod wire;

pub use broker::{Broker, ConnectionHandle};
pub use callee::Callee;
pub use hooks::{Hook, HookNotifier};
pub use instance::{ConnectionState, Instance};
pub use published::{PublishedActor, PublishedActors};
pub use routing::{Route, RoutingTable};
pub use wire::{
    ErrorCode, HEADER_SIZE, Header, MAX_PAYLOAD_SIZE, MessageType, PROTOCOL_VERSION, WireError,
    payload::{DispatchPayload, HandshakePayload},
    write_frame, write_frame_with,
};
