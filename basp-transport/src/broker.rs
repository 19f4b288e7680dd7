//! Interface to the I/O broker.
//!
//! The broker owns the sockets: it accepts and connects, reads inbound
//! chunks of exactly the requested length, and drains per-connection
//! write buffers. The engine never touches a socket; it borrows a write
//! buffer, appends frames, and asks for a flush.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier of a direct byte transport, issued by the broker.
///
/// The default value (zero) is the distinguished invalid handle.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct ConnectionHandle(u64);

impl ConnectionHandle {
    /// Wrap a broker-issued id.
    pub const fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// The raw id.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// The distinguished invalid handle.
    pub const fn invalid() -> Self {
        Self(0)
    }

    /// Whether this is the distinguished invalid handle.
    pub const fn is_invalid(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Write-side services the engine requires from the broker.
///
/// Flushes may be deferred but must drain each connection's buffer in
/// FIFO order; ordering across connections is not guaranteed.
pub trait Broker {
    /// Mutable access to the write buffer of `handle`.
    fn wr_buf(&mut self, handle: ConnectionHandle) -> &mut Vec<u8>;

    /// Schedule the write buffer of `handle` to be drained to its socket.
    fn flush(&mut self, handle: ConnectionHandle);
}
