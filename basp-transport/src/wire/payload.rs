//! Typed payload codecs.
//!
//! Payloads use the same binary codec as headers. Decoders are strict:
//! truncated input and trailing garbage both fail with
//! [`WireError::PayloadMalformed`].

use std::collections::BTreeSet;

use basp_core::{ActorAddr, ActorId, INVALID_ACTOR_ID, Reader, Writer};

use super::WireError;

/// Payload of a server handshake: the actor published on the contacted
/// port and the interface it exports.
///
/// The payload is optional on the wire; an absent payload means "nothing
/// published", which is what [`Default`] produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakePayload {
    /// Id of the published actor, or [`INVALID_ACTOR_ID`].
    pub published_actor: ActorId,
    /// Interface exported by the published actor.
    pub interfaces: BTreeSet<String>,
}

impl Default for HandshakePayload {
    fn default() -> Self {
        Self {
            published_actor: INVALID_ACTOR_ID,
            interfaces: BTreeSet::new(),
        }
    }
}

impl HandshakePayload {
    /// Append the wire form: actor id, interface count, then each
    /// interface string.
    pub fn write(w: &mut Writer<'_>, published_actor: ActorId, interfaces: &BTreeSet<String>) {
        w.write_u32(published_actor);
        w.write_u32(interfaces.len() as u32);
        for interface in interfaces {
            w.write_str(interface);
        }
    }

    /// Append this payload's wire form.
    pub fn encode(&self, w: &mut Writer<'_>) {
        Self::write(w, self.published_actor, &self.interfaces);
    }

    /// Decode a complete payload buffer.
    ///
    /// # Errors
    ///
    /// Returns `PayloadMalformed` on truncation, invalid UTF-8, or
    /// trailing bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let published_actor = r.read_u32()?;
        let count = r.read_u32()?;
        let mut interfaces = BTreeSet::new();
        for _ in 0..count {
            interfaces.insert(r.read_str()?.to_owned());
        }
        r.expect_end()?;
        Ok(Self {
            published_actor,
            interfaces,
        })
    }
}

/// Payload of a dispatch message: the forwarding stack and the serialized
/// actor message, which this layer treats as opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DispatchPayload {
    /// Actor addresses the message has already transited.
    pub forwarding_stack: Vec<ActorAddr>,
    /// Opaque serialized actor message.
    pub message: Vec<u8>,
}

impl DispatchPayload {
    /// Append the wire form: stack length, each address, then the
    /// length-prefixed message bytes.
    pub fn write(w: &mut Writer<'_>, forwarding_stack: &[ActorAddr], message: &[u8]) {
        w.write_u32(forwarding_stack.len() as u32);
        for addr in forwarding_stack {
            addr.encode(w);
        }
        w.write_bytes(message);
    }

    /// Append this payload's wire form.
    pub fn encode(&self, w: &mut Writer<'_>) {
        Self::write(w, &self.forwarding_stack, &self.message);
    }

    /// Decode a complete payload buffer.
    ///
    /// # Errors
    ///
    /// Returns `PayloadMalformed` on truncation or trailing bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let count = r.read_u32()?;
        let mut forwarding_stack = Vec::new();
        for _ in 0..count {
            forwarding_stack.push(ActorAddr::decode(&mut r)?);
        }
        let message = r.read_bytes()?.to_vec();
        r.expect_end()?;
        Ok(Self {
            forwarding_stack,
            message,
        })
    }
}
