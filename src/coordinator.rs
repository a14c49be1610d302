//! The process-wide reassembly coordinator: tracks every in-flight datagram,
//! evicts under memory pressure, and schedules the timeout that gives up on
//! a datagram and reports it upstream.

use crate::{
    error::FragError,
    icmp, logging,
    reassembler::Reassembler,
    route::Route,
    FragmentId, FxHashMap, Message,
};
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

/// The outcome of feeding one fragment through [`Fragmentation::process`].
#[derive(Debug)]
pub struct ProcessOutcome {
    /// `Some` exactly on the call that completes the datagram.
    pub assembled: Option<Message>,
}

struct Entry {
    reassembler: Arc<Mutex<Reassembler>>,
    timer: tokio::task::JoinHandle<()>,
    ip_header_snapshot: Message,
    payload_preview: Message,
    route: Arc<dyn Route>,
}

struct Inner {
    reassemblers: FxHashMap<FragmentId, Entry>,
    /// Most-recently-created id at the front, eviction candidates at the back.
    /// Only creation re-links an id to the front. Later fragments don't
    /// promote it, so a slow drip can't pin an entry against eviction.
    lru: VecDeque<FragmentId>,
    size: usize,
}

/// Released bookkeeping for one entry, handed back to whichever caller (a
/// completed `process`, a fired timer, or a watermark eviction) performed
/// the release, so it can decide what follow-up, if any, to take.
struct Released {
    was_incomplete: bool,
    ip_header_snapshot: Message,
    payload_preview: Message,
    route: Arc<dyn Route>,
}

/// Tracks every datagram currently being reassembled, evicting the
/// least-recently-created ones under memory pressure and giving up on ones
/// that sit unfinished past a timeout.
///
/// A single [`std::sync::Mutex`] guards the map, the LRU order, and the
/// running memory total together, since those three move as one unit on
/// every insert, update, and release. A sharded map like `dashmap::DashMap`
/// can't hold that invariant across shards. Confinement to a single
/// fragment's own reassembler is a second, finer-grained lock:
/// [`Fragmentation::process`] drops the coordinator lock before calling into
/// a [`Reassembler`], so concurrent fragments for different ids never wait
/// on each other.
pub struct Fragmentation {
    inner: Mutex<Inner>,
    high_limit: usize,
    low_limit: usize,
    timeout: Duration,
}

impl Fragmentation {
    /// Above this many bytes of outstanding fragment data, eviction kicks in.
    pub const DEFAULT_HIGH_LIMIT: usize = 4 * 1024 * 1024;
    /// Eviction stops once outstanding data falls to this many bytes.
    pub const DEFAULT_LOW_LIMIT: usize = 3 * 1024 * 1024;
    /// How long an incomplete datagram may sit before it's given up on.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Builds a coordinator with the given watermarks and per-datagram
    /// timeout. `low_limit` is clamped to `high_limit` if it would otherwise
    /// exceed it, since an eviction target above the trigger threshold would
    /// never be reachable.
    pub fn new(high_limit: usize, low_limit: usize, timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                reassemblers: FxHashMap::default(),
                lru: VecDeque::new(),
                size: 0,
            }),
            high_limit,
            low_limit: low_limit.min(high_limit),
            timeout,
        }
    }

    /// Wraps `self` in the `Arc` that [`Fragmentation::process`] requires,
    /// since its timeout timers need a cloneable handle back to the
    /// coordinator.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Total bytes of outstanding (not yet assembled) fragment data.
    pub fn size(&self) -> usize {
        self.inner.lock().unwrap().size
    }

    /// How many datagrams are currently being reassembled.
    pub fn live_count(&self) -> usize {
        self.inner.lock().unwrap().reassemblers.len()
    }

    /// Whether `id` currently has a reassembler in flight.
    pub fn contains(&self, id: FragmentId) -> bool {
        self.inner.lock().unwrap().reassemblers.contains_key(&id)
    }

    /// Integrates one fragment of datagram `id` into its reassembler,
    /// creating one if this is the first fragment seen for `id`.
    ///
    /// `ip_header_snapshot` and `route` are only retained on the call that
    /// creates the reassembler. The timeout path needs them to synthesize and
    /// send the ICMPv4 Time Exceeded notification.
    pub fn process(
        self: &Arc<Self>,
        id: FragmentId,
        first: u16,
        last: u16,
        more: bool,
        payload: Message,
        ip_header_snapshot: Message,
        route: Arc<dyn Route>,
    ) -> Result<ProcessOutcome, FragError> {
        let reassembler = {
            let mut inner = self.inner.lock().unwrap();

            if let Some(entry) = inner.reassemblers.get(&id) {
                let stale = entry.reassembler.lock().unwrap().creation_time().elapsed() >= self.timeout;
                if stale {
                    self.release_locked(&mut inner, id);
                }
            }

            match inner.reassemblers.get(&id) {
                Some(entry) => entry.reassembler.clone(),
                None => {
                    let reassembler = Arc::new(Mutex::new(Reassembler::new(id)));
                    let timer = self.spawn_timer(id);
                    inner.reassemblers.insert(
                        id,
                        Entry {
                            reassembler: reassembler.clone(),
                            timer,
                            ip_header_snapshot,
                            payload_preview: preview(&payload),
                            route,
                        },
                    );
                    inner.lru.push_front(id);
                    reassembler
                }
            }
        };

        let result = reassembler.lock().unwrap().process(first, last, more, payload);

        let mut inner = self.inner.lock().unwrap();
        match result {
            Err(error) => {
                tracing::debug!(
                    target: logging::PROTOCOL_ERROR,
                    id = id.into_u32(),
                    %error,
                    "discarding reassembler after a protocol violation",
                );
                self.release_locked(&mut inner, id);
                Err(error)
            }
            Ok(outcome) => {
                inner.size += outcome.consumed;
                let assembled = outcome.assembled;
                if assembled.is_some() {
                    self.release_locked(&mut inner, id);
                }
                self.enforce_watermarks(&mut inner);
                Ok(ProcessOutcome { assembled })
            }
        }
    }

    fn spawn_timer(self: &Arc<Self>, id: FragmentId) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            this.handle_timeout(id);
        })
    }

    fn handle_timeout(self: Arc<Self>, id: FragmentId) {
        let released = {
            let mut inner = self.inner.lock().unwrap();
            self.release_locked(&mut inner, id)
        };
        let Some(released) = released else {
            return;
        };
        if !released.was_incomplete {
            return;
        }
        tracing::trace!(target: logging::TIMEOUT, id = id.into_u32(), "reassembly timed out");
        icmp::emit_time_exceeded(
            released.route.as_ref(),
            &released.ip_header_snapshot,
            &released.payload_preview,
        );
    }

    /// Removes `id`'s entry, if any, from the map, the LRU order, and the
    /// running size total, aborting its timer and reporting whether it was
    /// still incomplete at the moment of release. A no-op (returns `None`)
    /// if `id` was already released by a concurrent caller. This makes
    /// release exactly-once regardless of which of completion, timeout,
    /// eviction, or stale-entry replacement gets to it first.
    fn release_locked(&self, inner: &mut Inner, id: FragmentId) -> Option<Released> {
        let entry = inner.reassemblers.remove(&id)?;
        inner.lru.retain(|&queued| queued != id);
        entry.timer.abort();

        let reassembler = entry.reassembler.lock().unwrap();
        let already_claimed = reassembler.claim_done();
        let freed = reassembler.size();
        let was_incomplete = !already_claimed && !reassembler.is_complete();
        drop(reassembler);

        if freed > inner.size {
            tracing::error!(
                target: logging::ACCOUNTING,
                id = id.into_u32(),
                size = inner.size,
                freed,
                "coordinator size underflow on release",
            );
            inner.size = 0;
        } else {
            inner.size -= freed;
        }

        Some(Released {
            was_incomplete,
            ip_header_snapshot: entry.ip_header_snapshot,
            payload_preview: entry.payload_preview,
            route: entry.route,
        })
    }

    /// Evicts from the tail of the LRU order, oldest-created first, until
    /// `size` falls to `low_limit` or there is nothing left to evict.
    /// Entered only once `size` has crossed `high_limit`.
    fn enforce_watermarks(&self, inner: &mut Inner) {
        if inner.size <= self.high_limit {
            return;
        }
        while inner.size > self.low_limit {
            let Some(&oldest) = inner.lru.back() else {
                break;
            };
            tracing::debug!(target: logging::EVICT, id = oldest.into_u32(), "evicting under memory pressure");
            if self.release_locked(inner, oldest).is_none() {
                break;
            }
        }
    }
}

impl Default for Fragmentation {
    fn default() -> Self {
        Self::new(Self::DEFAULT_HIGH_LIMIT, Self::DEFAULT_LOW_LIMIT, Self::DEFAULT_TIMEOUT)
    }
}

/// The first up to 8 bytes of a fragment's payload, the amount an ICMP
/// *Time Exceeded* message carries from the original datagram.
fn preview(payload: &Message) -> Message {
    let mut preview = payload.clone();
    let take = preview.len().min(8);
    preview.slice(0..take);
    preview
}
