//! End-to-end scenarios driving multiple engine instances over an
//! in-memory broker: handshakes, relayed discovery, forwarding, routing
//! failures, heartbeat fanout, and shutdown cascades.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use basp_transport::{
    ActorAddr, ActorId, Broker, Callee, ConnectionHandle, ConnectionState, DispatchPayload,
    ErrorCode, ExitReason, HEADER_SIZE, Header, Hook, INVALID_ACTOR_ID, Instance, MessageId,
    MessageType, NodeId, write_frame_with,
};

fn node(tag: u8) -> NodeId {
    NodeId::new(1, [tag; 20])
}

fn handle(id: u64) -> ConnectionHandle {
    ConnectionHandle::from_raw(id)
}

/// In-memory broker: a write buffer per connection plus a flush log.
#[derive(Default)]
struct MemoryBroker {
    buffers: HashMap<ConnectionHandle, Vec<u8>>,
    flushed: Vec<ConnectionHandle>,
}

impl Broker for MemoryBroker {
    fn wr_buf(&mut self, handle: ConnectionHandle) -> &mut Vec<u8> {
        self.buffers.entry(handle).or_default()
    }

    fn flush(&mut self, handle: ConnectionHandle) {
        self.flushed.push(handle);
    }
}

/// Callee recording every upcall for later assertions.
#[derive(Debug, Default)]
struct RecordingCallee {
    learned_directly: Vec<(NodeId, bool)>,
    learned_indirectly: Vec<NodeId>,
    finalized: Vec<(NodeId, ActorId, BTreeSet<String>)>,
    purged: Vec<NodeId>,
    delivered: Vec<(NodeId, ActorId, ActorId, MessageId, Vec<ActorAddr>, Vec<u8>)>,
    heartbeats: Vec<NodeId>,
    proxies_announced: Vec<(NodeId, ActorId)>,
    proxies_killed: Vec<(NodeId, ActorId, ExitReason)>,
}

impl Callee for RecordingCallee {
    fn learned_new_node_directly(&mut self, node: &NodeId, was_indirect: bool) {
        self.learned_directly.push((*node, was_indirect));
    }

    fn learned_new_node_indirectly(&mut self, node: &NodeId) {
        self.learned_indirectly.push(*node);
    }

    fn finalize_handshake(
        &mut self,
        peer: &NodeId,
        published_actor: ActorId,
        interfaces: &BTreeSet<String>,
    ) {
        self.finalized
            .push((*peer, published_actor, interfaces.clone()));
    }

    fn proxy_announced(&mut self, node: &NodeId, aid: ActorId) {
        self.proxies_announced.push((*node, aid));
    }

    fn kill_proxy(&mut self, node: &NodeId, aid: ActorId, reason: ExitReason) {
        self.proxies_killed.push((*node, aid, reason));
    }

    fn deliver(
        &mut self,
        source_node: &NodeId,
        source_actor: ActorId,
        _dest_node: &NodeId,
        dest_actor: ActorId,
        mid: MessageId,
        forwarding_stack: Vec<ActorAddr>,
        message: Vec<u8>,
    ) {
        self.delivered.push((
            *source_node,
            source_actor,
            dest_actor,
            mid,
            forwarding_stack,
            message,
        ));
    }

    fn handle_heartbeat(&mut self, node: &NodeId) {
        self.heartbeats.push(*node);
    }

    fn purge_state(&mut self, node: &NodeId) {
        self.purged.push(*node);
    }
}

/// Hook recording forwarding outcomes.
#[derive(Default)]
struct ForwardingProbe {
    forwarded: Arc<Mutex<usize>>,
    failed: Arc<Mutex<usize>>,
}

impl Hook for ForwardingProbe {
    fn message_forwarded(&mut self, _hdr: &Header, _payload: &[u8]) {
        *self.forwarded.lock().expect("lock") += 1;
    }

    fn message_forwarding_failed(&mut self, _hdr: &Header, _payload: &[u8]) {
        *self.failed.lock().expect("lock") += 1;
    }
}

/// One node under test: engine, broker, and per-connection receive state.
struct TestNode {
    engine: Instance<RecordingCallee>,
    broker: MemoryBroker,
    conns: HashMap<ConnectionHandle, (ConnectionState, Header)>,
}

impl TestNode {
    fn new(tag: u8) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        Self {
            engine: Instance::new(node(tag), RecordingCallee::default()),
            broker: MemoryBroker::default(),
            conns: HashMap::new(),
        }
    }

    /// Run a byte stream through the receive state machine the way a
    /// broker would: header-sized chunks, then payload-sized chunks.
    fn receive(&mut self, on: ConnectionHandle, mut bytes: &[u8]) -> ConnectionState {
        let conn = self
            .conns
            .entry(on)
            .or_insert((ConnectionState::AwaitHeader, Header::default()));
        while !bytes.is_empty() {
            match conn.0 {
                ConnectionState::AwaitHeader => {
                    let (chunk, rest) = bytes.split_at(HEADER_SIZE);
                    bytes = rest;
                    conn.0 = self
                        .engine
                        .handle(&mut self.broker, chunk, on, &mut conn.1, false);
                }
                ConnectionState::AwaitPayload => {
                    let (chunk, rest) = bytes.split_at(conn.1.payload_len as usize);
                    bytes = rest;
                    conn.0 = self
                        .engine
                        .handle(&mut self.broker, chunk, on, &mut conn.1, true);
                }
                ConnectionState::CloseConnection => break,
            }
        }
        conn.0
    }

    /// Take everything written to the buffer of `on`.
    fn drain(&mut self, on: ConnectionHandle) -> Vec<u8> {
        std::mem::take(self.broker.wr_buf(on))
    }
}

/// Complete a handshake over the pair (server:`on_server` ↔
/// client:`on_client`), with the server announcing `port`.
fn shake_hands(
    server: &mut TestNode,
    on_server: ConnectionHandle,
    client: &mut TestNode,
    on_client: ConnectionHandle,
    port: Option<u16>,
) {
    server
        .engine
        .write_server_handshake(server.broker.wr_buf(on_server), port);
    server.broker.flush(on_server);

    let offer = server.drain(on_server);
    assert_eq!(
        client.receive(on_client, &offer),
        ConnectionState::AwaitHeader
    );

    let reply = client.drain(on_client);
    assert_eq!(
        server.receive(on_server, &reply),
        ConnectionState::AwaitHeader
    );
}

fn dispatch_frame(
    source: NodeId,
    dest: NodeId,
    source_actor: ActorId,
    dest_actor: ActorId,
    mid: u64,
    stack: &[ActorAddr],
    message: &[u8],
) -> Vec<u8> {
    let mut frame = Vec::new();
    write_frame_with(
        &mut frame,
        Header {
            source_node: source,
            dest_node: dest,
            source_actor,
            dest_actor,
            payload_len: 0,
            operation: MessageType::DispatchMessage,
            operation_data: mid,
        },
        |w| DispatchPayload::write(w, stack, message),
    );
    frame
}

#[test]
fn handshake_establishes_direct_routes_on_both_sides() {
    let mut a = TestNode::new(0xA);
    let mut b = TestNode::new(0xB);

    shake_hands(&mut a, handle(1), &mut b, handle(9), None);

    for (side, peer) in [(&a, node(0xB)), (&b, node(0xA))] {
        assert_eq!(side.engine.routing_table().direct_count(), 1);
        assert!(side.engine.lookup(&peer).is_some());
        assert_eq!(side.engine.callee().learned_directly, vec![(peer, false)]);
    }
    // Only the client side saw a server handshake to finalize.
    assert!(a.engine.callee().finalized.is_empty());
    assert_eq!(b.engine.callee().finalized.len(), 1);
    let (peer, aid, interfaces) = &b.engine.callee().finalized[0];
    assert_eq!(*peer, node(0xA));
    assert_eq!(*aid, INVALID_ACTOR_ID);
    assert!(interfaces.is_empty());
}

#[test]
fn handshake_announces_published_actor() {
    let mut a = TestNode::new(0xA);
    let mut b = TestNode::new(0xB);

    a.engine.add_published_actor(
        4500,
        ActorAddr::new(node(0xA), 31),
        ["calculator".to_owned()].into(),
    );
    shake_hands(&mut a, handle(1), &mut b, handle(9), Some(4500));

    let (peer, aid, interfaces) = &b.engine.callee().finalized[0];
    assert_eq!(*peer, node(0xA));
    assert_eq!(*aid, 31);
    assert!(interfaces.contains("calculator"));
}

#[test]
fn self_handshake_finalizes_and_closes() {
    let mut a = TestNode::new(0xA);

    let mut offer = Vec::new();
    a.engine.write_server_handshake(&mut offer, None);
    let state = a.receive(handle(1), &offer);

    assert_eq!(state, ConnectionState::CloseConnection);
    assert_eq!(a.engine.routing_table().direct_count(), 0);
    assert_eq!(a.engine.callee().finalized.len(), 1);
    assert!(a.engine.callee().purged.is_empty());
}

#[test]
fn relayed_dispatch_discovers_indirect_route() {
    let mut a = TestNode::new(0xA);
    let mut b = TestNode::new(0xB);
    let mut c = TestNode::new(0xC);

    // A ↔ B and B ↔ C, no A ↔ C.
    shake_hands(&mut a, handle(1), &mut b, handle(9), None);
    shake_hands(&mut b, handle(2), &mut c, handle(8), None);

    let forwarded = Arc::new(Mutex::new(0));
    b.engine.add_hook(Box::new(ForwardingProbe {
        forwarded: Arc::clone(&forwarded),
        ..Default::default()
    }));

    // C addresses an actor on A; B must relay.
    let frame = dispatch_frame(node(0xC), node(0xA), 5, 7, 99, &[], b"via relay");
    b.receive(handle(2), &frame);
    assert_eq!(*forwarded.lock().expect("lock"), 1);

    let relayed = b.drain(handle(9));
    // Relaying must not rewrite the frame.
    assert_eq!(relayed, frame);

    a.receive(handle(1), &relayed);

    // A now knows C through B and has delivered the message.
    assert_eq!(a.engine.callee().learned_indirectly, vec![node(0xC)]);
    let hops = a
        .engine
        .routing_table()
        .indirect_hops(&node(0xC))
        .expect("hops");
    assert_eq!(hops.iter().copied().collect::<Vec<_>>(), vec![node(0xB)]);

    let (src, src_actor, dest_actor, mid, stack, msg) = &a.engine.callee().delivered[0];
    assert_eq!(*src, node(0xC));
    assert_eq!(*src_actor, 5);
    assert_eq!(*dest_actor, 7);
    assert_eq!(*mid, MessageId::from_integer(99));
    assert!(stack.is_empty());
    assert_eq!(msg, b"via relay");
}

#[test]
fn dispatch_roundtrip_preserves_stack_and_message() {
    let mut a = TestNode::new(0xA);
    let mut b = TestNode::new(0xB);

    shake_hands(&mut a, handle(1), &mut b, handle(9), None);
    a.drain(handle(1));

    let sender = ActorAddr::new(node(0xA), 11);
    let receiver = ActorAddr::new(node(0xB), 22);
    let stack = vec![sender, ActorAddr::new(node(0xC), 33)];
    assert!(a.engine.dispatch(
        &mut a.broker,
        Some(&sender),
        &stack,
        &receiver,
        MessageId::from_integer(1234),
        b"round trip",
    ));

    let frame = a.drain(handle(1));
    b.receive(handle(9), &frame);

    let (src, src_actor, dest_actor, mid, received_stack, msg) = &b.engine.callee().delivered[0];
    assert_eq!(*src, node(0xA));
    assert_eq!(*src_actor, 11);
    assert_eq!(*dest_actor, 22);
    assert_eq!(*mid, MessageId::from_integer(1234));
    assert_eq!(received_stack, &stack);
    assert_eq!(msg, b"round trip");
}

#[test]
fn unroutable_frame_reports_error_to_source() {
    let mut a = TestNode::new(0xA);
    let mut p = TestNode::new(0x50);

    shake_hands(&mut a, handle(1), &mut p, handle(9), None);
    a.drain(handle(1));

    let failed = Arc::new(Mutex::new(0));
    a.engine.add_hook(Box::new(ForwardingProbe {
        failed: Arc::clone(&failed),
        ..Default::default()
    }));

    // A relayed message from X teaches A the reverse route X → P.
    let teach = dispatch_frame(node(0xE), node(0xA), 5, 7, 1, &[], b"hello from X");
    a.receive(handle(1), &teach);
    assert_eq!(a.engine.callee().learned_indirectly, vec![node(0xE)]);

    // Now X addresses a node A has never heard of.
    let lost = dispatch_frame(node(0xE), node(0xF), 5, 7, 2, &[], b"into the void");
    a.receive(handle(1), &lost);
    assert_eq!(*failed.lock().expect("lock"), 1);

    // The error reply sits in P's buffer: a kill-proxy frame wrapping the
    // undeliverable frame verbatim.
    let reply = a.drain(handle(1));
    let hdr = Header::decode(&reply).expect("header");
    assert_eq!(hdr.operation, MessageType::KillProxyInstance);
    assert_eq!(hdr.operation_data, ErrorCode::NoRouteToDestination.as_u64());
    assert_eq!(hdr.source_node, node(0xA));
    assert_eq!(hdr.dest_node, node(0xE));
    assert_eq!(&reply[HEADER_SIZE..], &lost[..]);
}

#[test]
fn unroutable_frame_without_reverse_route_is_dropped() {
    let mut a = TestNode::new(0xA);
    let mut p = TestNode::new(0x50);

    shake_hands(&mut a, handle(1), &mut p, handle(9), None);
    a.drain(handle(1));

    let failed = Arc::new(Mutex::new(0));
    a.engine.add_hook(Box::new(ForwardingProbe {
        failed: Arc::clone(&failed),
        ..Default::default()
    }));

    // Unknown source, unknown destination: nothing to reply to.
    let lost = dispatch_frame(node(0xE), node(0xF), 5, 7, 2, &[], b"nowhere");
    let state = a.receive(handle(1), &lost);

    assert_eq!(state, ConnectionState::AwaitHeader);
    assert_eq!(*failed.lock().expect("lock"), 1);
    assert!(a.drain(handle(1)).is_empty());
}

#[test]
fn spoofed_source_is_dropped_silently() {
    let mut a = TestNode::new(0xA);
    let mut p = TestNode::new(0x50);

    shake_hands(&mut a, handle(1), &mut p, handle(9), None);
    a.drain(handle(1));

    // A frame claiming to come from A itself, for an unknown destination.
    let lost = dispatch_frame(node(0xA), node(0xF), 5, 7, 2, &[], b"spoof");
    let state = a.receive(handle(1), &lost);

    // Dropped without an error reply and without closing the connection.
    assert_eq!(state, ConnectionState::AwaitHeader);
    assert!(a.drain(handle(1)).is_empty());
    assert_eq!(a.engine.routing_table().direct_count(), 1);
}

#[test]
fn heartbeat_fans_out_to_every_direct_peer() {
    let mut a = TestNode::new(0xA);
    let mut b = TestNode::new(0xB);
    let mut c = TestNode::new(0xC);

    shake_hands(&mut a, handle(1), &mut b, handle(9), None);
    shake_hands(&mut a, handle(2), &mut c, handle(8), None);
    a.drain(handle(1));
    a.drain(handle(2));
    a.broker.flushed.clear();

    a.engine.handle_heartbeat(&mut a.broker);

    let mut flushed = a.broker.flushed.clone();
    flushed.sort();
    assert_eq!(flushed, vec![handle(1), handle(2)]);

    for (on, peer, dest) in [(handle(1), &mut b, node(0xB)), (handle(2), &mut c, node(0xC))] {
        let frame = a.drain(on);
        assert_eq!(frame.len(), HEADER_SIZE);
        let hdr = Header::decode(&frame).expect("header");
        assert_eq!(hdr.operation, MessageType::Heartbeat);
        assert_eq!(hdr.dest_node, dest);

        peer.receive(if on == handle(1) { handle(9) } else { handle(8) }, &frame);
        assert_eq!(peer.engine.callee().heartbeats, vec![node(0xA)]);
    }
}

#[test]
fn node_shutdown_purges_everything_reached_through_it() {
    let mut a = TestNode::new(0xA);
    let mut b = TestNode::new(0xB);

    shake_hands(&mut a, handle(1), &mut b, handle(9), None);

    // C and D are known only through B.
    a.receive(
        handle(1),
        &dispatch_frame(node(0xC), node(0xA), 1, 2, 1, &[], b"from c"),
    );
    a.receive(
        handle(1),
        &dispatch_frame(node(0xD), node(0xA), 3, 4, 2, &[], b"from d"),
    );
    assert_eq!(a.engine.routing_table().indirect_count(), 2);

    a.engine.handle_node_shutdown(&node(0xB));

    let mut purged = a.engine.callee().purged.clone();
    purged.sort();
    assert_eq!(purged, vec![node(0xB), node(0xC), node(0xD)]);
    assert_eq!(a.engine.routing_table().direct_count(), 0);
    assert_eq!(a.engine.routing_table().indirect_count(), 0);
}

#[test]
fn connection_error_cleanup_is_idempotent_with_shutdown() {
    let mut a = TestNode::new(0xA);
    let mut b = TestNode::new(0xB);

    shake_hands(&mut a, handle(1), &mut b, handle(9), None);

    // Garbage on the wire closes the connection and purges B once.
    let garbage = vec![0xFF; HEADER_SIZE];
    assert_eq!(
        a.receive(handle(1), &garbage),
        ConnectionState::CloseConnection
    );
    assert_eq!(a.engine.callee().purged, vec![node(0xB)]);

    // The broker's follow-up shutdown finds nothing left to purge.
    a.engine.callee_mut().purged.clear();
    a.engine.handle_node_shutdown(&node(0xB));
    assert!(a.engine.callee().purged.is_empty());
}

#[test]
fn promotion_from_indirect_to_direct_is_reported() {
    let mut a = TestNode::new(0xA);
    let mut b = TestNode::new(0xB);
    let mut c = TestNode::new(0xC);

    shake_hands(&mut a, handle(1), &mut b, handle(9), None);

    // A hears of C through B first...
    a.receive(
        handle(1),
        &dispatch_frame(node(0xC), node(0xA), 1, 2, 1, &[], b"hi"),
    );
    assert_eq!(a.engine.callee().learned_indirectly, vec![node(0xC)]);

    // ...then C connects directly.
    shake_hands(&mut a, handle(2), &mut c, handle(8), None);

    assert_eq!(
        c.engine.callee().learned_directly,
        vec![(node(0xA), false)]
    );
    assert!(
        a.engine
            .callee()
            .learned_directly
            .contains(&(node(0xC), true))
    );
    // The indirect entry is gone; the direct route wins.
    assert!(a.engine.routing_table().indirect_hops(&node(0xC)).is_none());
    assert_eq!(
        a.engine.lookup(&node(0xC)).expect("route").next_hop,
        node(0xC)
    );
}

#[test]
fn kill_proxy_notification_crosses_the_wire() {
    let mut a = TestNode::new(0xA);
    let mut b = TestNode::new(0xB);

    shake_hands(&mut a, handle(1), &mut b, handle(9), None);
    a.drain(handle(1));

    a.engine.write_kill_proxy_instance(
        a.broker.wr_buf(handle(1)),
        &node(0xB),
        23,
        ExitReason::REMOTE_LINK_UNREACHABLE,
    );
    a.broker.flush(handle(1));

    let frame = a.drain(handle(1));
    b.receive(handle(9), &frame);

    assert_eq!(
        b.engine.callee().proxies_killed,
        vec![(node(0xA), 23, ExitReason::REMOTE_LINK_UNREACHABLE)]
    );
}
