//! The protocol engine.
//!
//! One [`Instance`] runs per node. The broker feeds it inbound chunks
//! (alternating fixed-size headers and variable-size payloads) through
//! [`Instance::handle`], and every outbound frame leaves through a
//! broker-owned write buffer.
//!
//! # Receive state machine
//!
//! ```text
//!              header chunk                payload chunk
//! ┌────────────┐  decode ok,  ┌─────────────┐  complete  ┌──────────┐
//! │AwaitHeader ├─────────────►│AwaitPayload ├───────────►│ dispatch │
//! │            │ payload_len>0│             │            │ or fwd   │
//! └─────▲──────┘              └──────┬──────┘            └────┬─────┘
//!       │        payload_len == 0    │ bad length              │
//!       │◄───────────────────────────┼─────────────────────────┘
//!       │                            ▼
//!       │                    ┌────────────────┐
//!       └─── invalid frame ─►│CloseConnection │
//!                            └────────────────┘
//! ```
//!
//! Every recoverable error inside one frame takes the same exit: erase
//! the connection's direct route (purging nodes that become unreachable)
//! and tell the broker to drop the connection. The cleanup is idempotent,
//! so a broker that also calls [`Instance::handle_node_shutdown`] on
//! close does no harm.

use std::collections::BTreeSet;

use tracing::{debug, error, info, trace, warn};

use basp_core::{ActorAddr, ActorId, ExitReason, INVALID_ACTOR_ID, MessageId, NodeId};

use crate::broker::{Broker, ConnectionHandle};
use crate::callee::Callee;
use crate::hooks::{Hook, HookNotifier};
use crate::published::{PublishedActor, PublishedActors};
use crate::routing::{Route, RoutingTable};
use crate::wire::{
    ErrorCode, HEADER_SIZE, Header, MessageType, PROTOCOL_VERSION, write_frame, write_frame_with,
    payload::{DispatchPayload, HandshakePayload},
};

/// Receive-loop state of a single connection.
///
/// The broker keeps one `(ConnectionState, Header)` pair per connection:
/// the state decides how many bytes to read next, the header slot carries
/// the decoded header between the two read phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Expecting a `HEADER_SIZE`-byte header chunk.
    AwaitHeader,
    /// Header decoded; expecting a `payload_len`-byte payload chunk.
    AwaitPayload,
    /// Terminal: the broker must drop the connection.
    CloseConnection,
}

/// The per-node protocol engine.
///
/// Owns the routing table and the published-actor registry; borrows the
/// broker's write buffers per call and delivers decoded events into the
/// [`Callee`]. The engine is single-threaded: every call runs to
/// completion on the broker's event loop and no locking happens inside.
pub struct Instance<C: Callee> {
    tbl: RoutingTable,
    this_node: NodeId,
    callee: C,
    published_actors: PublishedActors,
    hooks: HookNotifier,
}

impl<C: Callee> Instance<C> {
    /// Create an engine for `this_node`, delivering upcalls to `callee`.
    pub fn new(this_node: NodeId, callee: C) -> Self {
        debug_assert!(!this_node.is_invalid());
        Self {
            tbl: RoutingTable::new(),
            this_node,
            callee,
            published_actors: PublishedActors::new(),
            hooks: HookNotifier::new(),
        }
    }

    /// Register an observation hook.
    pub fn add_hook(&mut self, hook: Box<dyn Hook>) {
        self.hooks.add(hook);
    }

    /// The local node's id.
    pub fn this_node(&self) -> &NodeId {
        &self.this_node
    }

    /// Read access to the routing table.
    pub fn routing_table(&self) -> &RoutingTable {
        &self.tbl
    }

    /// Read access to the published-actor registry.
    pub fn published_actors(&self) -> &PublishedActors {
        &self.published_actors
    }

    /// Read access to the callee.
    pub fn callee(&self) -> &C {
        &self.callee
    }

    /// Mutable access to the callee.
    pub fn callee_mut(&mut self) -> &mut C {
        &mut self.callee
    }

    /// Find a route to `node`.
    pub fn lookup(&self, node: &NodeId) -> Option<Route> {
        self.tbl.lookup(node)
    }

    /// Process one inbound chunk from `handle`.
    ///
    /// With `is_payload == false` the chunk must hold a full header; with
    /// `is_payload == true` it must hold exactly the payload announced by
    /// the header saved in `hdr` from the previous call. The returned
    /// state tells the broker what to read next, or to drop the
    /// connection, in which case the route cleanup already ran.
    pub fn handle<B: Broker>(
        &mut self,
        broker: &mut B,
        chunk: &[u8],
        handle: ConnectionHandle,
        hdr: &mut Header,
        is_payload: bool,
    ) -> ConnectionState {
        let payload: &[u8] = if is_payload {
            if chunk.len() != hdr.payload_len as usize {
                warn!(
                    expected = hdr.payload_len,
                    received = chunk.len(),
                    "received invalid payload"
                );
                return self.close_connection(handle);
            }
            chunk
        } else {
            *hdr = match Header::decode(chunk) {
                Ok(decoded) => decoded,
                Err(err) => {
                    warn!(%err, "received invalid header");
                    return self.close_connection(handle);
                }
            };
            trace!(header = ?hdr, %handle, "decoded header");
            if !hdr.valid() {
                warn!(operation = ?hdr.operation, "received invalid header");
                return self.close_connection(handle);
            }
            if hdr.payload_len > 0 {
                return ConnectionState::AwaitPayload;
            }
            &[]
        };

        // Frames addressed to another node transit this one, except for
        // handshakes and heartbeats, which never travel past a link.
        if !hdr.operation.is_handshake()
            && !hdr.operation.is_heartbeat()
            && hdr.dest_node != self.this_node
        {
            return self.forward(broker, hdr, payload);
        }

        match hdr.operation {
            MessageType::ServerHandshake => {
                let hs = if payload.is_empty() {
                    HandshakePayload::default()
                } else {
                    match HandshakePayload::decode(payload) {
                        Ok(decoded) => decoded,
                        Err(err) => {
                            warn!(%err, "received malformed server handshake");
                            return self.close_connection(handle);
                        }
                    }
                };
                // A connection to ourselves carries no information; finish
                // the handshake for the caller's sake, then drop it.
                if hdr.source_node == self.this_node {
                    info!("close connection to self immediately");
                    self.callee
                        .finalize_handshake(&hdr.source_node, hs.published_actor, &hs.interfaces);
                    return self.close_connection(handle);
                }
                // Two nodes connecting to each other simultaneously end up
                // with two connections; keep the first, drop the second.
                if self.tbl.lookup_direct(&hdr.source_node).is_some() {
                    info!(
                        node = %hdr.source_node,
                        "close redundant connection, direct route exists"
                    );
                    self.callee
                        .finalize_handshake(&hdr.source_node, hs.published_actor, &hs.interfaces);
                    return self.close_connection(handle);
                }
                info!(node = %hdr.source_node, "new direct connection");
                self.tbl.add_direct(handle, hdr.source_node);
                let was_indirect = self.tbl.erase_indirect(&hdr.source_node);
                let Some(route) = self.tbl.lookup(&hdr.source_node) else {
                    error!(node = %hdr.source_node, "no route to node after adding it");
                    return self.close_connection(handle);
                };
                self.write_client_handshake(broker.wr_buf(route.handle), &hdr.source_node);
                self.callee
                    .learned_new_node_directly(&hdr.source_node, was_indirect);
                self.callee
                    .finalize_handshake(&hdr.source_node, hs.published_actor, &hs.interfaces);
                broker.flush(route.handle);
            }
            MessageType::ClientHandshake => {
                if self.tbl.lookup_direct(&hdr.source_node).is_some() {
                    info!(node = %hdr.source_node, "received second client handshake");
                } else {
                    info!(node = %hdr.source_node, "new direct connection");
                    self.tbl.add_direct(handle, hdr.source_node);
                    let was_indirect = self.tbl.erase_indirect(&hdr.source_node);
                    self.callee
                        .learned_new_node_directly(&hdr.source_node, was_indirect);
                }
            }
            MessageType::DispatchMessage => {
                if payload.is_empty() {
                    warn!("received dispatch message without payload");
                    return self.close_connection(handle);
                }
                // A message relayed by a third node means its relay offers
                // a route back to the original source.
                if let Some(last_hop) = self.tbl.lookup_node(handle)
                    && !hdr.source_node.is_invalid()
                    && hdr.source_node != self.this_node
                    && last_hop != hdr.source_node
                    && self.tbl.lookup_direct(&hdr.source_node).is_none()
                    && self.tbl.add_indirect(last_hop, hdr.source_node)
                {
                    self.callee.learned_new_node_indirectly(&hdr.source_node);
                }
                let dispatch = match DispatchPayload::decode(payload) {
                    Ok(decoded) => decoded,
                    Err(err) => {
                        warn!(%err, "received malformed dispatch message");
                        return self.close_connection(handle);
                    }
                };
                self.callee.deliver(
                    &hdr.source_node,
                    hdr.source_actor,
                    &hdr.dest_node,
                    hdr.dest_actor,
                    MessageId::from_integer(hdr.operation_data),
                    dispatch.forwarding_stack,
                    dispatch.message,
                );
            }
            MessageType::AnnounceProxyInstance => {
                self.callee.proxy_announced(&hdr.source_node, hdr.dest_actor);
            }
            MessageType::KillProxyInstance => {
                self.callee.kill_proxy(
                    &hdr.source_node,
                    hdr.source_actor,
                    ExitReason::from_raw(hdr.operation_data),
                );
            }
            MessageType::Heartbeat => {
                trace!(node = %hdr.source_node, "received heartbeat");
                self.callee.handle_heartbeat(&hdr.source_node);
            }
        }
        ConnectionState::AwaitHeader
    }

    /// Relay a transiting frame, or report the routing failure.
    fn forward<B: Broker>(
        &mut self,
        broker: &mut B,
        hdr: &Header,
        payload: &[u8],
    ) -> ConnectionState {
        if let Some(route) = self.tbl.lookup(&hdr.dest_node) {
            debug!(dest = %hdr.dest_node, next_hop = %route.next_hop, "forwarding message");
            let buf = broker.wr_buf(route.handle);
            let pos = buf.len();
            buf.resize(pos + HEADER_SIZE, 0);
            hdr.write_into(&mut buf[pos..]);
            buf.extend_from_slice(payload);
            broker.flush(route.handle);
            self.hooks.message_forwarded(hdr, payload);
        } else {
            info!(dest = %hdr.dest_node, "cannot forward message, no route to destination");
            if hdr.source_node == self.this_node {
                warn!("lost packet with probably spoofed source");
            } else if let Some(reverse) = self.tbl.lookup(&hdr.source_node) {
                let this_node = self.this_node;
                self.write_dispatch_error(
                    broker.wr_buf(reverse.handle),
                    &this_node,
                    &hdr.source_node,
                    ErrorCode::NoRouteToDestination,
                    hdr,
                    payload,
                );
            } else {
                warn!(source = %hdr.source_node, "cannot send error message, no route to source");
            }
            self.hooks.message_forwarding_failed(hdr, payload);
        }
        ConnectionState::AwaitHeader
    }

    /// Send an actor-to-actor message to a remote receiver.
    ///
    /// `receiver` must live on another node. Returns `false` when no route
    /// to the receiver's node exists; the message is dropped and the
    /// sending-failed hook fires.
    pub fn dispatch<B: Broker>(
        &mut self,
        broker: &mut B,
        sender: Option<&ActorAddr>,
        forwarding_stack: &[ActorAddr],
        receiver: &ActorAddr,
        mid: MessageId,
        message: &[u8],
    ) -> bool {
        debug_assert!(
            receiver.node != self.this_node,
            "dispatch requires a remote receiver"
        );
        let Some(route) = self.tbl.lookup(&receiver.node) else {
            debug!(receiver = %receiver, "cannot dispatch message, no route");
            self.hooks
                .message_sending_failed(sender, receiver, mid, message);
            return false;
        };
        let hdr = Header {
            source_node: sender.map_or(self.this_node, |s| s.node),
            dest_node: receiver.node,
            source_actor: sender.map_or(INVALID_ACTOR_ID, |s| s.id),
            dest_actor: receiver.id,
            payload_len: 0,
            operation: MessageType::DispatchMessage,
            operation_data: mid.integer_value(),
        };
        write_frame_with(broker.wr_buf(route.handle), hdr, |w| {
            DispatchPayload::write(w, forwarding_stack, message);
        });
        broker.flush(route.handle);
        self.hooks
            .message_sent(sender, &route.next_hop, receiver, mid, message);
        true
    }

    /// Append a server handshake to `buf`.
    ///
    /// When `port` names a published actor, the payload announces it and
    /// its interfaces; otherwise the payload stays empty. Sent by the
    /// accepting side as the first frame on every new connection.
    pub fn write_server_handshake(&self, buf: &mut Vec<u8>, port: Option<u16>) {
        let published = port.and_then(|p| self.published_actors.get(p));
        let hdr = Header {
            source_node: self.this_node,
            dest_node: NodeId::invalid(),
            source_actor: published.map_or(INVALID_ACTOR_ID, |p| p.actor.id),
            dest_actor: INVALID_ACTOR_ID,
            payload_len: 0,
            operation: MessageType::ServerHandshake,
            operation_data: PROTOCOL_VERSION,
        };
        match published {
            Some(entry) => {
                write_frame_with(buf, hdr, |w| {
                    HandshakePayload::write(w, entry.actor.id, &entry.interfaces);
                });
            }
            None => {
                write_frame(buf, hdr);
            }
        }
    }

    /// Append a client handshake addressed to `remote`.
    pub fn write_client_handshake(&self, buf: &mut Vec<u8>, remote: &NodeId) {
        write_frame(
            buf,
            Header {
                source_node: self.this_node,
                dest_node: *remote,
                source_actor: INVALID_ACTOR_ID,
                dest_actor: INVALID_ACTOR_ID,
                payload_len: 0,
                operation: MessageType::ClientHandshake,
                operation_data: 0,
            },
        );
    }

    /// Append a routing-failure reply for an undeliverable frame.
    ///
    /// The reply is a kill-proxy frame whose `operation_data` carries the
    /// error code and whose payload holds the original header and payload
    /// verbatim, so the sender can identify the failed message.
    pub fn write_dispatch_error(
        &self,
        buf: &mut Vec<u8>,
        source_node: &NodeId,
        dest_node: &NodeId,
        code: ErrorCode,
        original_hdr: &Header,
        original_payload: &[u8],
    ) {
        let mut original = [0u8; HEADER_SIZE];
        original_hdr.write_into(&mut original);
        write_frame_with(
            buf,
            Header {
                source_node: *source_node,
                dest_node: *dest_node,
                source_actor: INVALID_ACTOR_ID,
                dest_actor: INVALID_ACTOR_ID,
                payload_len: 0,
                operation: MessageType::KillProxyInstance,
                operation_data: code.as_u64(),
            },
            |w| {
                w.write_raw(&original);
                w.write_raw(original_payload);
            },
        );
    }

    /// Append a kill-proxy notification for the local actor `aid`.
    pub fn write_kill_proxy_instance(
        &self,
        buf: &mut Vec<u8>,
        dest_node: &NodeId,
        aid: ActorId,
        reason: ExitReason,
    ) {
        write_frame(
            buf,
            Header {
                source_node: self.this_node,
                dest_node: *dest_node,
                source_actor: aid,
                dest_actor: INVALID_ACTOR_ID,
                payload_len: 0,
                operation: MessageType::KillProxyInstance,
                operation_data: reason.raw(),
            },
        );
    }

    /// Append a heartbeat addressed to `remote`.
    pub fn write_heartbeat(&self, buf: &mut Vec<u8>, remote: &NodeId) {
        write_frame(
            buf,
            Header {
                source_node: self.this_node,
                dest_node: *remote,
                source_actor: INVALID_ACTOR_ID,
                dest_actor: INVALID_ACTOR_ID,
                payload_len: 0,
                operation: MessageType::Heartbeat,
                operation_data: 0,
            },
        );
    }

    /// Emit a heartbeat to every direct peer.
    ///
    /// Driven by an external timer; the engine keeps no timers of its own.
    pub fn handle_heartbeat<B: Broker>(&self, broker: &mut B) {
        for (handle, node) in self.tbl.direct_connections() {
            trace!(%handle, %node, "sending heartbeat");
            self.write_heartbeat(broker.wr_buf(handle), node);
            broker.flush(handle);
        }
    }

    /// Remove every route of `node` and purge state for all nodes that
    /// become unreachable. Ignores the invalid id.
    pub fn handle_node_shutdown(&mut self, node: &NodeId) {
        if node.is_invalid() {
            return;
        }
        info!(%node, "lost direct connection");
        let callee = &mut self.callee;
        self.tbl.erase(node, |n| callee.purge_state(n));
    }

    /// Publish `actor` on `port`, replacing any previous entry.
    pub fn add_published_actor(
        &mut self,
        port: u16,
        actor: ActorAddr,
        interfaces: BTreeSet<String>,
    ) {
        let entry: &PublishedActor = self.published_actors.insert(port, actor, interfaces);
        self.hooks
            .actor_published(&entry.actor, &entry.interfaces, port);
    }

    /// Remove the actor published on `port`.
    ///
    /// Returns the number of removed entries (zero or one); `on_removed`
    /// is invoked per removal.
    pub fn remove_published_actor(
        &mut self,
        port: u16,
        on_removed: impl FnMut(&ActorAddr, u16),
    ) -> usize {
        self.published_actors.remove_port(port, on_removed)
    }

    /// Remove entries publishing `whom`: one port when `port != 0`, every
    /// port publishing `whom` when `port == 0`.
    ///
    /// Returns the removal count; `on_removed` is invoked per removal.
    pub fn remove_published_actor_by_addr(
        &mut self,
        whom: &ActorAddr,
        port: u16,
        on_removed: impl FnMut(&ActorAddr, u16),
    ) -> usize {
        self.published_actors.remove_actor(whom, port, on_removed)
    }

    /// The single cleanup path for every per-frame failure: drop the
    /// connection's direct route, purge state for nodes that became
    /// unreachable, and tell the broker to close.
    fn close_connection(&mut self, handle: ConnectionHandle) -> ConnectionState {
        let callee = &mut self.callee;
        self.tbl.erase_direct(handle, |n| callee.purge_state(n));
        ConnectionState::CloseConnection
    }
}
