//! Routing table: direct and indirect routes between nodes.
//!
//! A node is *directly* reachable when this instance owns a physical
//! connection to it, and *indirectly* reachable when some direct peer has
//! advertised a path to it (by relaying one of its dispatch messages).
//! Direct routes always win; indirect hop sets are ordered so repeated
//! lookups against an unchanged table pick the same hop.
//!
//! Erasing a route cascades: every node whose last next-hop disappears is
//! reported through the caller's callback exactly once, so the owner can
//! purge proxies for nodes that just became unreachable.

use std::collections::{BTreeSet, HashMap};

use basp_core::NodeId;

use crate::broker::ConnectionHandle;

/// Result of a route lookup: the direct peer to write through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    /// The directly connected node the frame goes to next.
    pub next_hop: NodeId,
    /// Connection handle of `next_hop`; its write buffer carries the frame.
    pub handle: ConnectionHandle,
}

/// Direct and indirect routes of one instance.
#[derive(Debug, Default)]
pub struct RoutingTable {
    /// Direct routes by connection handle.
    direct_by_handle: HashMap<ConnectionHandle, NodeId>,
    /// Inverse of `direct_by_handle`.
    direct_by_node: HashMap<NodeId, ConnectionHandle>,
    /// Target node → direct peers that advertised reachability.
    /// Hop sets are never empty; the erase cascades drop drained entries.
    indirect: HashMap<NodeId, BTreeSet<NodeId>>,
}

impl RoutingTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a direct route.
    ///
    /// Neither `handle` nor `node` may already have a direct entry; the
    /// handshake logic guarantees this before calling.
    pub fn add_direct(&mut self, handle: ConnectionHandle, node: NodeId) {
        debug_assert!(!self.direct_by_handle.contains_key(&handle));
        debug_assert!(!self.direct_by_node.contains_key(&node));
        self.direct_by_handle.insert(handle, node);
        self.direct_by_node.insert(node, handle);
    }

    /// Add `hop` to the next-hop set of `node`.
    ///
    /// Returns `true` iff `node` was not previously reachable by any
    /// indirect route, i.e. the caller just learned of a new node.
    pub fn add_indirect(&mut self, hop: NodeId, node: NodeId) -> bool {
        let hops = self.indirect.entry(node).or_default();
        let novel = hops.is_empty();
        hops.insert(hop);
        novel
    }

    /// Connection handle of a directly reachable node.
    pub fn lookup_direct(&self, node: &NodeId) -> Option<ConnectionHandle> {
        self.direct_by_node.get(node).copied()
    }

    /// Node on the other end of a connection handle.
    pub fn lookup_node(&self, handle: ConnectionHandle) -> Option<NodeId> {
        self.direct_by_handle.get(&handle).copied()
    }

    /// Find a route to `node`: direct if available, otherwise the first
    /// indirect hop (in node-id order) that still has a direct route.
    pub fn lookup(&self, node: &NodeId) -> Option<Route> {
        if let Some(handle) = self.lookup_direct(node) {
            return Some(Route {
                next_hop: *node,
                handle,
            });
        }
        let hops = self.indirect.get(node)?;
        hops.iter().find_map(|hop| {
            self.lookup_direct(hop).map(|handle| Route {
                next_hop: *hop,
                handle,
            })
        })
    }

    /// Remove the direct route of `handle` and cascade.
    ///
    /// Every node left without any route is reported through
    /// `on_lost_node` exactly once; that includes the disconnected peer
    /// itself unless it stays indirectly reachable. Calling this for an
    /// unknown handle is a no-op, which makes connection-close cleanup
    /// idempotent.
    pub fn erase_direct(&mut self, handle: ConnectionHandle, mut on_lost_node: impl FnMut(&NodeId)) {
        let Some(node) = self.direct_by_handle.remove(&handle) else {
            return;
        };
        self.direct_by_node.remove(&node);
        let mut lost = self.sweep_hop(&node);
        if !self.indirect.contains_key(&node) {
            lost.insert(node);
        }
        for n in &lost {
            on_lost_node(n);
        }
    }

    /// Remove every route of `node` (direct, indirect, and its uses as a
    /// next hop) and cascade as in [`erase_direct`](Self::erase_direct).
    ///
    /// `node` itself is reported iff it was previously reachable.
    pub fn erase(&mut self, node: &NodeId, mut on_lost_node: impl FnMut(&NodeId)) {
        let direct = self.direct_by_node.remove(node);
        if let Some(handle) = direct {
            self.direct_by_handle.remove(&handle);
        }
        let indirect = self.indirect.remove(node).is_some();
        if direct.is_none() && !indirect {
            return;
        }
        let mut lost = self.sweep_hop(node);
        lost.insert(*node);
        for n in &lost {
            on_lost_node(n);
        }
    }

    /// Drop any indirect entry for `node`.
    ///
    /// Called when `node` becomes directly reachable. Returns `true` iff
    /// an entry existed.
    pub fn erase_indirect(&mut self, node: &NodeId) -> bool {
        self.indirect.remove(node).is_some()
    }

    /// Iterate all direct connections.
    pub fn direct_connections(&self) -> impl Iterator<Item = (ConnectionHandle, &NodeId)> {
        self.direct_by_handle.iter().map(|(h, n)| (*h, n))
    }

    /// Number of direct routes.
    pub fn direct_count(&self) -> usize {
        self.direct_by_handle.len()
    }

    /// Number of indirectly reachable nodes.
    pub fn indirect_count(&self) -> usize {
        self.indirect.len()
    }

    /// Next-hop set of an indirectly reachable node.
    pub fn indirect_hops(&self, node: &NodeId) -> Option<&BTreeSet<NodeId>> {
        self.indirect.get(node)
    }

    /// Remove `hop` from every next-hop set and return the targets that
    /// became unreachable (drained set, no direct route).
    fn sweep_hop(&mut self, hop: &NodeId) -> BTreeSet<NodeId> {
        let mut drained = Vec::new();
        self.indirect.retain(|target, hops| {
            hops.remove(hop);
            if hops.is_empty() {
                drained.push(*target);
                false
            } else {
                true
            }
        });
        drained
            .into_iter()
            .filter(|target| !self.direct_by_node.contains_key(target))
            .collect()
    }
}
