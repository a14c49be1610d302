//! The error taxonomy for the reassembly engine.

use crate::FragmentId;

/// Everything that can go wrong while reassembling a datagram.
///
/// Every variant causes the offending [`crate::Reassembler`] to be released
/// (see [`crate::Fragmentation::process`]); there is no retry at this layer.
#[derive(Debug, Clone, Copy, thiserror::Error, PartialEq, Eq)]
pub enum FragError {
    /// `first > last`, an offset past 65535, or a payload length that does
    /// not match `last - first + 1`.
    #[error("invalid fragment range for {id:?}: first={first} last={last} payload_len={payload_len}")]
    InvalidRange {
        id: FragmentId,
        first: u16,
        last: u16,
        payload_len: usize,
    },

    /// A fragment arrived strictly beyond a previously declared datagram end.
    #[error("fragment for {id:?} at [{first}, {last}] arrived past the declared datagram end")]
    OverflowPastFinal { id: FragmentId, first: u16, last: u16 },
}
