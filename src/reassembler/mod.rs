//! Per-datagram reassembly: the RFC 815 hole-descriptor algorithm.
//!
//! <https://www.rfc-editor.org/rfc/rfc815>

mod hole;

use self::hole::Hole;
use crate::{FragError, FragmentId, Message};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time::Instant;

/// The last byte offset an IPv4 datagram can address (`2^16 - 1`).
const MAX_OFFSET: u16 = 65535;

/// The outcome of feeding one fragment to a [`Reassembler`].
#[derive(Debug)]
pub struct ProcessOutcome {
    /// `Some` exactly on the call that fills the last hole.
    pub assembled: Option<Message>,
    /// Newly accepted payload bytes. Duplicate/overlapping bytes that were
    /// discarded under the first-writer-wins policy do not count.
    pub consumed: usize,
}

/// One piece accepted into a datagram: the fragment's starting offset and
/// the bytes it contributed.
#[derive(Debug, Clone)]
struct Piece {
    first: u16,
    payload: Message,
}

/// Per-datagram reassembly state.
///
/// A `Reassembler` is confined to one thread at a time by its caller (see
/// the crate's concurrency notes on [`crate::Fragmentation`]); nothing here
/// is internally synchronized except [`Reassembler::claim_done`], which must
/// remain race-free even under that confinement because the timeout timer,
/// the coordinator's eviction path, and a reused-id replacement can all race
/// to release the same reassembler.
#[derive(Debug)]
pub struct Reassembler {
    id: FragmentId,
    holes: Vec<Hole>,
    deleted: u32,
    data: Vec<Piece>,
    size: usize,
    done: AtomicBool,
    creation_time: Instant,
}

impl Reassembler {
    /// Creates a new reassembler for `id`, with the full `[0, 65535]` range
    /// outstanding.
    pub fn new(id: FragmentId) -> Self {
        Self {
            id,
            holes: vec![Hole::new(0, MAX_OFFSET)],
            deleted: 0,
            data: Vec::new(),
            size: 0,
            done: AtomicBool::new(false),
            creation_time: Instant::now(),
        }
    }

    pub fn id(&self) -> FragmentId {
        self.id
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn creation_time(&self) -> Instant {
        self.creation_time
    }

    /// Whether every hole has been filled. A reassembler can still be
    /// genuinely incomplete when its timeout fires; the coordinator checks
    /// this to decide whether a timeout is real or merely lost a race with
    /// the completing call.
    pub fn is_complete(&self) -> bool {
        self.holes.is_empty()
    }

    /// How many holes have been fully covered so far. Monotonically
    /// increasing; exposed mainly for diagnostics and tests.
    pub fn deleted_holes(&self) -> u32 {
        self.deleted
    }

    /// Atomically returns whether this reassembler was already marked done,
    /// and marks it done if it was not. The coordinator uses this to
    /// guarantee exactly-once release no matter which path gets there first:
    /// completion, timeout, eviction, or stale-entry replacement.
    pub fn claim_done(&self) -> bool {
        self.done.swap(true, Ordering::SeqCst)
    }

    /// Integrates one fragment into the datagram.
    ///
    /// `first` and `last` are inclusive byte offsets; `more` is the IPv4
    /// "more fragments" flag. Returns the newly consumed byte count and,
    /// when this call fills the last hole, the fully assembled datagram.
    pub fn process(
        &mut self,
        first: u16,
        last: u16,
        more: bool,
        payload: Message,
    ) -> Result<ProcessOutcome, FragError> {
        if first > last || last > MAX_OFFSET {
            return Err(FragError::InvalidRange {
                id: self.id,
                first,
                last,
                payload_len: payload.len(),
            });
        }
        let expected_len = last as usize - first as usize + 1;
        if payload.len() != expected_len {
            return Err(FragError::InvalidRange {
                id: self.id,
                first,
                last,
                payload_len: payload.len(),
            });
        }

        // A fragment beyond the declared end (truncated away in step 2
        // below) overlaps no hole at all, so the overlap test below rejects
        // it the same way RFC 815 does.
        if !self.holes.iter().any(|h| h.overlaps(first, last)) {
            return Err(FragError::OverflowPastFinal { id: self.id, first, last });
        }

        let mut remaining = Vec::with_capacity(self.holes.len());
        // Bytes that actually filled a hole. A fragment may re-cover bytes
        // an earlier fragment already wrote (the overlap/duplicate case);
        // those bytes are not a hole anymore and so are not counted here,
        // per the public contract's duplicate-discard rule.
        let mut new_bytes: usize = 0;
        for hole in self.holes.drain(..) {
            if !hole.overlaps(first, last) {
                remaining.push(hole);
                continue;
            }

            let inter_first = hole.first.max(first);
            let inter_last = hole.last.min(last);
            new_bytes += inter_last as usize - inter_first as usize + 1;

            if hole.fully_covered_by(first, last) {
                self.deleted += 1;
            }

            if first > hole.first {
                remaining.push(Hole::new(hole.first, first - 1));
            }
            if last < hole.last {
                if more {
                    remaining.push(Hole::new(last + 1, hole.last));
                }
                // `more == false`: this fragment declares the datagram
                // length, so the right shard is truncated rather than left
                // as an outstanding hole. Anything arriving past `last`
                // later will overlap no remaining hole and be rejected
                // above as `OverflowPastFinal`.
            }
        }
        self.holes = remaining;

        let consumed = new_bytes;
        self.size += consumed;
        self.data.push(Piece { first, payload });

        let assembled = if self.holes.is_empty() {
            self.data.sort_by_key(|piece| piece.first);
            let mut message = Message::new(Vec::new());
            let mut next_expected: usize = 0;
            for piece in &self.data {
                let piece_first = piece.first as usize;
                if piece_first < next_expected {
                    // Overlaps a region a prior (earlier-accepted) fragment
                    // already wrote. First-writer-wins: keep only the tail
                    // this piece contributes beyond what's already covered.
                    let overlap = next_expected - piece_first;
                    if overlap >= piece.payload.len() {
                        continue;
                    }
                    let mut trimmed = piece.payload.clone();
                    trimmed.slice(overlap..);
                    next_expected += trimmed.len();
                    message.concatenate(trimmed);
                } else {
                    next_expected = piece_first + piece.payload.len();
                    message.concatenate(piece.payload.clone());
                }
            }
            Some(message)
        } else {
            None
        };

        Ok(ProcessOutcome { assembled, consumed })
    }
}
