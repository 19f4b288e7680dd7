//! Observation hooks.
//!
//! Hooks watch the engine's traffic without influencing it: every method
//! defaults to a no-op, returns nothing, and is called after the protocol
//! action already happened. Telemetry and test probes implement [`Hook`];
//! the engine fans events out through a [`HookNotifier`].

use std::collections::BTreeSet;

use basp_core::{ActorAddr, MessageId, NodeId};

use crate::wire::Header;

/// Observer of protocol events. All methods default to no-ops.
pub trait Hook {
    /// An actor was published on `port`.
    fn actor_published(&mut self, actor: &ActorAddr, interfaces: &BTreeSet<String>, port: u16) {
        let _ = (actor, interfaces, port);
    }

    /// A locally originated message was written to `next_hop`.
    fn message_sent(
        &mut self,
        sender: Option<&ActorAddr>,
        next_hop: &NodeId,
        receiver: &ActorAddr,
        mid: MessageId,
        message: &[u8],
    ) {
        let _ = (sender, next_hop, receiver, mid, message);
    }

    /// A transiting frame was written towards its next hop.
    fn message_forwarded(&mut self, hdr: &Header, payload: &[u8]) {
        let _ = (hdr, payload);
    }

    /// A locally originated message had no route to its receiver.
    fn message_sending_failed(
        &mut self,
        sender: Option<&ActorAddr>,
        receiver: &ActorAddr,
        mid: MessageId,
        message: &[u8],
    ) {
        let _ = (sender, receiver, mid, message);
    }

    /// A transiting frame had no route to its destination.
    fn message_forwarding_failed(&mut self, hdr: &Header, payload: &[u8]) {
        let _ = (hdr, payload);
    }
}

/// Fan-out over a list of registered hooks.
///
/// Notification order is registration order. Hooks are side-effect-only;
/// nothing they do feeds back into the protocol.
#[derive(Default)]
pub struct HookNotifier {
    hooks: Vec<Box<dyn Hook>>,
}

impl HookNotifier {
    /// Create a notifier with no hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook.
    pub fn add(&mut self, hook: Box<dyn Hook>) {
        self.hooks.push(hook);
    }

    /// Number of registered hooks.
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Whether no hooks are registered.
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Notify all hooks of a published actor.
    pub fn actor_published(&mut self, actor: &ActorAddr, interfaces: &BTreeSet<String>, port: u16) {
        for hook in &mut self.hooks {
            hook.actor_published(actor, interfaces, port);
        }
    }

    /// Notify all hooks of a sent message.
    pub fn message_sent(
        &mut self,
        sender: Option<&ActorAddr>,
        next_hop: &NodeId,
        receiver: &ActorAddr,
        mid: MessageId,
        message: &[u8],
    ) {
        for hook in &mut self.hooks {
            hook.message_sent(sender, next_hop, receiver, mid, message);
        }
    }

    /// Notify all hooks of a forwarded frame.
    pub fn message_forwarded(&mut self, hdr: &Header, payload: &[u8]) {
        for hook in &mut self.hooks {
            hook.message_forwarded(hdr, payload);
        }
    }

    /// Notify all hooks of a failed send.
    pub fn message_sending_failed(
        &mut self,
        sender: Option<&ActorAddr>,
        receiver: &ActorAddr,
        mid: MessageId,
        message: &[u8],
    ) {
        for hook in &mut self.hooks {
            hook.message_sending_failed(sender, receiver, mid, message);
        }
    }

    /// Notify all hooks of a failed forward.
    pub fn message_forwarding_failed(&mut self, hdr: &Header, payload: &[u8]) {
        for hook in &mut self.hooks {
            hook.message_forwarding_failed(hdr, payload);
        }
    }
}
