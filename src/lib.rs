//! An IPv4 fragment reassembly engine implementing the hole-descriptor
//! algorithm from RFC 815, with LRU eviction under memory pressure and a
//! per-datagram timeout that reports back an ICMPv4 *Time Exceeded* message.
//!
//! # Organization
//!
//! - [`Reassembler`] holds the per-datagram state: the hole list, the
//!   fragments accepted so far, and the logic that turns a stream of
//!   fragments into one assembled datagram.
//! - [`Fragmentation`] is the process-wide coordinator: it owns every live
//!   [`Reassembler`], evicts the least-recently-created ones once memory use
//!   crosses a high watermark, and schedules the timeout that gives up on an
//!   incomplete datagram.
//! - [`Message`] is the opaque byte-sequence type fragments and assembled
//!   datagrams are carried in; nothing outside of [`mod@message`] looks at
//!   its internal representation.
//! - [`Route`] is the one collaborator this crate calls out to, used only to
//!   hand off a synthesized ICMPv4 *Time Exceeded* packet on timeout.

pub mod coordinator;
pub mod error;
mod icmp;
pub mod logging;
pub mod message;
pub mod reassembler;
pub mod route;

pub use coordinator::Fragmentation;
pub use error::FragError;
pub use message::Message;
pub use reassembler::{ProcessOutcome, Reassembler};
pub use route::Route;

pub(crate) use rustc_hash::FxHashMap;

/// Identifies one IPv4 datagram being reassembled: its source address,
/// destination address, protocol, and IP identification field folded into a
/// single key by the caller.
///
/// This crate never looks inside the key. Folding the four fields together
/// is the caller's job, since only the caller knows how its own addresses
/// and protocol numbers are represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FragmentId(u32);

impl FragmentId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn into_u32(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for FragmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}
