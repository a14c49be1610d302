//! End-to-end scenarios against [`Fragmentation`], exercised the way a
//! caller sitting above an IP layer would: feed fragments in, inspect what
//! comes back, and for the timeout cases, advance a paused clock instead of
//! sleeping for real.

use ip4_reassembly::{message::Message, route::Route, FragmentId, Fragmentation};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct RecordingRoute {
    sent: Mutex<Vec<Message>>,
}

impl RecordingRoute {
    fn new() -> Arc<Self> {
        Arc::new(Self { sent: Mutex::new(Vec::new()) })
    }

    fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl Route for RecordingRoute {
    fn max_header_length(&self) -> usize {
        20
    }

    fn default_ttl(&self) -> u8 {
        64
    }

    fn write_packet(
        &self,
        _header: Message,
        data: Message,
        _transport: Message,
        _protocol: u8,
        _ttl: u8,
        _tos: u8,
    ) {
        self.sent.lock().unwrap().push(data);
    }
}

fn ip_header() -> Message {
    Message::new(*b"0123456789ABCDEF0123")
}

#[tokio::test]
async fn fragments_arriving_in_order_assemble() {
    let coordinator = Fragmentation::new(1 << 20, 1 << 19, Duration::from_secs(30)).shared();
    let route: Arc<dyn Route> = RecordingRoute::new();
    let id = FragmentId::new(42);

    let first = coordinator
        .process(id, 0, 7, true, Message::new(*b"AAAAAAAA"), ip_header(), route.clone())
        .unwrap();
    assert!(first.assembled.is_none());

    let second = coordinator
        .process(id, 8, 15, false, Message::new(*b"BBBBBBBB"), ip_header(), route)
        .unwrap();
    assert_eq!(second.assembled.unwrap().to_vec(), b"AAAAAAAABBBBBBBB");
    assert!(!coordinator.contains(id));
}

#[tokio::test]
async fn fragments_arriving_out_of_order_assemble() {
    let coordinator = Fragmentation::new(1 << 20, 1 << 19, Duration::from_secs(30)).shared();
    let route: Arc<dyn Route> = RecordingRoute::new();
    let id = FragmentId::new(7);

    coordinator
        .process(id, 16, 23, false, Message::new(*b"CCCCCCCC"), ip_header(), route.clone())
        .unwrap();
    coordinator
        .process(id, 0, 7, true, Message::new(*b"AAAAAAAA"), ip_header(), route.clone())
        .unwrap();
    let outcome = coordinator
        .process(id, 8, 15, true, Message::new(*b"BBBBBBBB"), ip_header(), route)
        .unwrap();

    assert_eq!(outcome.assembled.unwrap().to_vec(), b"AAAAAAAABBBBBBBBCCCCCCCC");
}

#[tokio::test]
async fn overlapping_retransmission_keeps_first_writer() {
    let coordinator = Fragmentation::new(1 << 20, 1 << 19, Duration::from_secs(30)).shared();
    let route: Arc<dyn Route> = RecordingRoute::new();
    let id = FragmentId::new(9);

    coordinator
        .process(id, 0, 7, true, Message::new(*b"AAAAAAAA"), ip_header(), route.clone())
        .unwrap();
    let outcome = coordinator
        .process(id, 4, 11, false, Message::new(*b"ZZZZZZZZ"), ip_header(), route)
        .unwrap();

    assert_eq!(outcome.assembled.unwrap().to_vec(), b"AAAAAAAAZZZZ");
}

#[tokio::test]
async fn fragment_past_declared_end_is_rejected() {
    let coordinator = Fragmentation::new(1 << 20, 1 << 19, Duration::from_secs(30)).shared();
    let route: Arc<dyn Route> = RecordingRoute::new();
    let id = FragmentId::new(5);

    coordinator
        .process(id, 0, 15, false, Message::new(*b"0123456789ABCDEF"), ip_header(), route.clone())
        .unwrap();
    let error = coordinator
        .process(id, 16, 23, true, Message::new(*b"XXXXXXXX"), ip_header(), route)
        .unwrap_err();

    assert!(matches!(error, ip4_reassembly::FragError::OverflowPastFinal { .. }));
    // A rejected fragment discards the reassembler entirely.
    assert!(!coordinator.contains(id));
}

#[tokio::test(start_paused = true)]
async fn incomplete_datagram_times_out_and_reports_icmp() {
    let coordinator = Fragmentation::new(1 << 20, 1 << 19, Duration::from_millis(200)).shared();
    let route = RecordingRoute::new();
    let id = FragmentId::new(11);

    coordinator
        .process(id, 0, 7, true, Message::new(*b"AAAAAAAA"), ip_header(), route.clone())
        .unwrap();
    assert!(coordinator.contains(id));

    tokio::time::advance(Duration::from_millis(250)).await;
    tokio::task::yield_now().await;

    assert!(!coordinator.contains(id));
    assert_eq!(route.sent_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn completing_before_timeout_suppresses_icmp() {
    let coordinator = Fragmentation::new(1 << 20, 1 << 19, Duration::from_millis(200)).shared();
    let route = RecordingRoute::new();
    let id = FragmentId::new(12);

    coordinator
        .process(id, 0, 7, true, Message::new(*b"AAAAAAAA"), ip_header(), route.clone())
        .unwrap();
    coordinator
        .process(id, 8, 15, false, Message::new(*b"BBBBBBBB"), ip_header(), route.clone())
        .unwrap();

    tokio::time::advance(Duration::from_millis(250)).await;
    tokio::task::yield_now().await;

    assert_eq!(route.sent_count(), 0);
}

#[tokio::test]
async fn memory_pressure_evicts_oldest_first() {
    let coordinator = Fragmentation::new(20, 16, Duration::from_secs(30)).shared();
    let route: Arc<dyn Route> = RecordingRoute::new();

    coordinator
        .process(FragmentId::new(1), 0, 7, true, Message::new(*b"AAAAAAAA"), ip_header(), route.clone())
        .unwrap();
    coordinator
        .process(FragmentId::new(2), 0, 7, true, Message::new(*b"BBBBBBBB"), ip_header(), route.clone())
        .unwrap();
    coordinator
        .process(FragmentId::new(3), 0, 7, true, Message::new(*b"CCCCCCCC"), ip_header(), route)
        .unwrap();

    assert!(!coordinator.contains(FragmentId::new(1)));
    assert!(coordinator.contains(FragmentId::new(2)));
    assert!(coordinator.contains(FragmentId::new(3)));
}

#[tokio::test(start_paused = true)]
async fn reusing_an_id_past_its_timeout_starts_fresh() {
    let coordinator = Fragmentation::new(1 << 20, 1 << 19, Duration::from_millis(100)).shared();
    let route = RecordingRoute::new();
    let id = FragmentId::new(99);

    coordinator
        .process(id, 0, 7, true, Message::new(*b"AAAAAAAA"), ip_header(), route.clone())
        .unwrap();

    // Outlives the timeout. Whether the background timer or the next
    // `process` call for this id gets there first is a race (both are
    // legitimate ways to notice a stale entry); either way exactly one fresh
    // reassembler should end up tracking the new fragment, and the stale one
    // is reported at most once.
    tokio::time::advance(Duration::from_millis(150)).await;

    let outcome = coordinator
        .process(id, 0, 7, true, Message::new(*b"ZZZZZZZZ"), ip_header(), route.clone())
        .unwrap();

    assert!(outcome.assembled.is_none());
    assert_eq!(coordinator.size(), 8);
    assert!(route.sent_count() <= 1);
}
