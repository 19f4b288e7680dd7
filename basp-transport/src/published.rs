//! Registry of locally published actors.
//!
//! Publishing binds a local actor to a port so that the server handshake
//! sent on connections accepted at that port can announce it, together
//! with the interface it exports.

use std::collections::{BTreeSet, HashMap};

use basp_core::ActorAddr;

/// A published actor: its address and the interface it exports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedActor {
    /// Address of the published actor.
    pub actor: ActorAddr,
    /// Type names of the interface the actor exports.
    pub interfaces: BTreeSet<String>,
}

/// Port → published actor map.
#[derive(Debug, Default)]
pub struct PublishedActors {
    by_port: HashMap<u16, PublishedActor>,
}

impl PublishedActors {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `actor` on `port`, replacing any previous entry.
    pub fn insert(
        &mut self,
        port: u16,
        actor: ActorAddr,
        interfaces: BTreeSet<String>,
    ) -> &PublishedActor {
        self.by_port
            .insert(port, PublishedActor { actor, interfaces });
        &self.by_port[&port]
    }

    /// The entry published on `port`, if any.
    pub fn get(&self, port: u16) -> Option<&PublishedActor> {
        self.by_port.get(&port)
    }

    /// Remove the entry published on `port`.
    ///
    /// `on_removed` is invoked for the removed entry. Returns the number
    /// of removed entries (zero or one).
    pub fn remove_port(&mut self, port: u16, mut on_removed: impl FnMut(&ActorAddr, u16)) -> usize {
        match self.by_port.remove(&port) {
            Some(entry) => {
                on_removed(&entry.actor, port);
                1
            }
            None => 0,
        }
    }

    /// Remove entries publishing `whom`.
    ///
    /// With a nonzero `port`, only that port's entry is removed, and only
    /// if it publishes `whom`. With `port == 0`, every entry publishing
    /// `whom` is removed. `on_removed` is invoked once per removal;
    /// returns the removal count.
    pub fn remove_actor(
        &mut self,
        whom: &ActorAddr,
        port: u16,
        mut on_removed: impl FnMut(&ActorAddr, u16),
    ) -> usize {
        if port != 0 {
            if self.by_port.get(&port).is_some_and(|e| e.actor == *whom) {
                self.by_port.remove(&port);
                on_removed(whom, port);
                return 1;
            }
            return 0;
        }
        let mut removed = 0;
        self.by_port.retain(|p, entry| {
            if entry.actor == *whom {
                on_removed(&entry.actor, *p);
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    /// Number of published entries.
    pub fn len(&self) -> usize {
        self.by_port.len()
    }

    /// Whether nothing is published.
    pub fn is_empty(&self) -> bool {
        self.by_port.is_empty()
    }
}
