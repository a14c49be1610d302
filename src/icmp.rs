//! Synthesizes the one piece of wire format this crate emits itself: an
//! ICMPv4 *Time Exceeded* (fragment reassembly time exceeded) message.
//!
//! Everything else a caller needs to interpret a [`Message`] is opaque to
//! this crate; this is the single exception, and it exists only because the
//! timeout path has no other way to report the dropped datagram.

use crate::{message::Message, route::Route};

const TYPE_TIME_EXCEEDED: u8 = 11;
const CODE_FRAGMENT_REASSEMBLY_TIME_EXCEEDED: u8 = 1;
const PROTOCOL_ICMP: u8 = 1;

/// A ones'-complement running checksum, the same algorithm IP, ICMP, TCP,
/// and UDP all use over their own headers.
#[derive(Debug, Default, Clone, Copy)]
struct Checksum(u16);

impl Checksum {
    fn new() -> Self {
        Self::default()
    }

    fn add_u16(&mut self, value: u16) {
        let (sum, carry) = self.0.overflowing_add(value);
        self.0 = sum + carry as u16;
    }

    fn add_u8(&mut self, a: u8, b: u8) {
        self.add_u16(u16::from_be_bytes([a, b]));
    }

    fn as_u16(&self) -> u16 {
        match self.0 {
            0xffff => 0xffff,
            sum => !sum,
        }
    }
}

/// Builds the ICMP header-plus-data message: an 8-byte ICMP header (type,
/// code, checksum, and four bytes unused) followed by a data area holding
/// the original IP header and the first 8 bytes of the original payload.
fn build(ip_header_snapshot: &Message, payload_preview: &Message) -> Message {
    let mut data = ip_header_snapshot.to_vec();
    data.extend_from_slice(&payload_preview.to_vec());

    let mut header = [0u8; 8];
    header[0] = TYPE_TIME_EXCEEDED;
    header[1] = CODE_FRAGMENT_REASSEMBLY_TIME_EXCEEDED;

    let mut checksum = Checksum::new();
    let mut bytes = header.iter().copied().chain(data.iter().copied());
    loop {
        let a = match bytes.next() {
            Some(a) => a,
            None => break,
        };
        let b = bytes.next().unwrap_or(0);
        checksum.add_u8(a, b);
    }
    let value = checksum.as_u16().to_be_bytes();
    header[2] = value[0];
    header[3] = value[1];

    let mut message = Message::new(header.to_vec());
    message.concatenate(Message::new(data));
    message
}

/// Emits an ICMPv4 *Time Exceeded* notification for a datagram whose
/// reassembly timed out, via `route`. Best-effort: the route's own failures
/// are not surfaced here, matching how the timeout path treats this as a
/// courtesy notification rather than something the caller can act on.
pub(crate) fn emit_time_exceeded(
    route: &dyn Route,
    ip_header_snapshot: &Message,
    payload_preview: &Message,
) {
    let data = build(ip_header_snapshot, payload_preview);
    let header = Message::new(vec![0u8; route.max_header_length()]);
    let transport = Message::new(Vec::<u8>::new());
    route.write_packet(header, data, transport, PROTOCOL_ICMP, route.default_ttl(), 0);
}
