//! Upcall contract into the local actor system.

use std::collections::BTreeSet;

use basp_core::{ActorAddr, ActorId, ExitReason, MessageId, NodeId};

/// Receiver of decoded protocol events.
///
/// The engine invokes these synchronously from inside
/// [`Instance::handle`](crate::Instance::handle); implementations must not
/// block the receive loop. The callee owns the proxy registry and all
/// per-node application state the engine asks it to purge.
pub trait Callee {
    /// A peer was promoted from unknown or indirect to direct.
    ///
    /// `was_indirect` is `true` when an indirect route to the node existed
    /// before the promotion.
    fn learned_new_node_directly(&mut self, node: &NodeId, was_indirect: bool);

    /// A node became reachable for the first time, through a dispatch
    /// message relayed by one of the direct peers.
    fn learned_new_node_indirectly(&mut self, node: &NodeId);

    /// A server handshake arrived, regardless of whether it resulted in a
    /// new route. `published_actor` and `interfaces` describe what the
    /// peer published on the contacted port; an invalid id means nothing
    /// was published.
    fn finalize_handshake(
        &mut self,
        peer: &NodeId,
        published_actor: ActorId,
        interfaces: &BTreeSet<String>,
    );

    /// The remote `node` created a proxy for the local actor `aid`.
    fn proxy_announced(&mut self, node: &NodeId, aid: ActorId);

    /// The remote actor `aid` on `node` terminated; any local proxy for it
    /// must be killed with `reason`.
    fn kill_proxy(&mut self, node: &NodeId, aid: ActorId, reason: ExitReason);

    /// An actor-to-actor message for a local actor.
    #[allow(clippy::too_many_arguments)]
    fn deliver(
        &mut self,
        source_node: &NodeId,
        source_actor: ActorId,
        dest_node: &NodeId,
        dest_actor: ActorId,
        mid: MessageId,
        forwarding_stack: Vec<ActorAddr>,
        message: Vec<u8>,
    );

    /// A heartbeat arrived from a direct peer.
    fn handle_heartbeat(&mut self, node: &NodeId);

    /// `node` became unreachable; all state held for it must go.
    ///
    /// Invoked once per lost node per erase cascade.
    fn purge_state(&mut self, node: &NodeId);
}
