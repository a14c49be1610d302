//! Event targets used when instrumenting the reassembly engine with `tracing`.
//!
//! This crate is a library, not a binary, so unlike the original sim's
//! `logging` module it never installs a `tracing` subscriber or opens a log
//! file itself. That is the caller's job. A caller can filter on these
//! targets with an `EnvFilter` directive such as `ip4_reassembly::timeout=debug`.

/// A fragment was rejected as a protocol violation and its reassembler discarded.
pub const PROTOCOL_ERROR: &str = "ip4_reassembly::protocol_error";

/// A reassembler was evicted to bring `size` back under `low_limit`.
pub const EVICT: &str = "ip4_reassembly::evict";

/// A reassembler's timer fired and an ICMP Time Exceeded notification was sent.
pub const TIMEOUT: &str = "ip4_reassembly::timeout";

/// The coordinator's `size` accounting underflowed on release. Always a bug.
pub const ACCOUNTING: &str = "ip4_reassembly::accounting";
