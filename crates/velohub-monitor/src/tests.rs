//! Unit tests for sequencing, replay, fan-out, and connection lifecycle.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::buffer::ReplayBuffer;
use crate::config::MonitorConfig;
use crate::dispatcher::Dispatcher;
use crate::error::MonitorError;
use crate::event::{Envelope, EventCategory, EventId, Frame};
use crate::lifecycle::{Session, SessionState};
use crate::publisher::{global, LogLevel, Publisher, TrafficStatus};
use crate::registry::{ClientRegistry, Visit};
use crate::sequencer::Sequencer;

fn dispatcher_with_capacity(capacity: usize) -> Arc<Dispatcher> {
    Dispatcher::shared(&MonitorConfig {
        buffer_capacity: capacity,
        ..MonitorConfig::default()
    })
}

fn envelope(id: u64, payload: &str) -> Arc<Envelope> {
    Arc::new(Envelope::new(
        EventId::new(id),
        EventCategory::Log,
        json!(payload),
    ))
}

/// Pulls every frame already queued on the session without waiting.
fn drain(session: &mut Session) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Some(frame) = session.try_recv() {
        frames.push(frame);
    }
    frames
}

/// Payloads of the sequenced envelopes among `frames`, in arrival order.
fn payloads(frames: &[Frame]) -> Vec<Value> {
    frames
        .iter()
        .filter_map(Frame::envelope)
        .filter(|e| e.category.is_persisted())
        .map(|e| e.payload.clone())
        .collect()
}

fn ids(frames: &[Frame]) -> Vec<u64> {
    frames
        .iter()
        .filter_map(Frame::envelope)
        .filter(|e| e.category.is_persisted())
        .map(|e| e.id.as_u64())
        .collect()
}

fn publish_all(dispatcher: &Dispatcher, labels: &[&str]) {
    for label in labels {
        dispatcher.publish(EventCategory::Log, json!(label));
    }
}

// ── Sequencer ────────────────────────────────────────────────────────

#[test]
fn sequencer_starts_at_one_and_increments() {
    let seq = Sequencer::new();
    assert_eq!(seq.current(), EventId::ZERO);
    assert_eq!(seq.next(), EventId::new(1));
    assert_eq!(seq.next(), EventId::new(2));
    assert_eq!(seq.current(), EventId::new(2));
}

#[test]
fn sequencer_is_unique_and_monotonic_across_threads() {
    let seq = Arc::new(Sequencer::new());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let seq = seq.clone();
            std::thread::spawn(move || (0..1000).map(|_| seq.next()).collect::<Vec<_>>())
        })
        .collect();

    let mut all = HashSet::new();
    for handle in handles {
        let issued = handle.join().expect("thread should not panic");
        assert!(
            issued.windows(2).all(|w| w[0] < w[1]),
            "ids seen by one thread must increase"
        );
        all.extend(issued);
    }
    assert_eq!(all.len(), 8000, "no id may be issued twice");
    assert_eq!(seq.current(), EventId::new(8000));
}

#[test]
fn event_id_parses_from_header_text() {
    assert_eq!(" 42 ".parse::<EventId>().ok(), Some(EventId::new(42)));
    assert!("abc".parse::<EventId>().is_err());
    assert!("-1".parse::<EventId>().is_err());
}

#[test]
fn event_category_round_trips_through_labels() {
    for category in [
        EventCategory::Log,
        EventCategory::TrafficStatus,
        EventCategory::OutboundPayload,
        EventCategory::InboundPayload,
        EventCategory::Connected,
        EventCategory::Heartbeat,
    ] {
        let parsed: EventCategory = category.as_str().parse().expect("label should parse");
        assert_eq!(parsed, category);
        assert_eq!(
            serde_json::to_value(category).expect("should serialize"),
            json!(category.as_str())
        );
    }
    assert!("LOG".parse::<EventCategory>().is_err());
}

// ── Replay buffer ────────────────────────────────────────────────────

#[test]
fn buffer_evicts_oldest_first() {
    let mut buffer = ReplayBuffer::with_capacity(3);
    for id in 1..=5 {
        buffer.append(envelope(id, "x"));
    }
    assert_eq!(buffer.len(), 3);
    assert_eq!(buffer.head_id(), Some(EventId::new(3)));
    assert_eq!(buffer.tail_id(), Some(EventId::new(5)));

    let all: Vec<u64> = buffer.since(None).iter().map(|e| e.id.as_u64()).collect();
    assert_eq!(all, vec![3, 4, 5]);
}

#[test]
fn buffer_since_returns_strictly_newer_entries() {
    let mut buffer = ReplayBuffer::with_capacity(10);
    for id in 1..=4 {
        buffer.append(envelope(id, "x"));
    }
    let newer: Vec<u64> = buffer
        .since(Some(EventId::new(2)))
        .iter()
        .map(|e| e.id.as_u64())
        .collect();
    assert_eq!(newer, vec![3, 4]);
    assert!(buffer.since(Some(EventId::new(4))).is_empty());
    assert!(buffer.since(Some(EventId::new(99))).is_empty());
}

#[test]
fn buffer_since_stale_position_returns_everything() {
    let mut buffer = ReplayBuffer::with_capacity(2);
    for id in 1..=5 {
        buffer.append(envelope(id, "x"));
    }
    let resync: Vec<u64> = buffer
        .since(Some(EventId::new(1)))
        .iter()
        .map(|e| e.id.as_u64())
        .collect();
    assert_eq!(resync, vec![4, 5]);
}

#[test]
fn buffer_zero_capacity_is_clamped() {
    let mut buffer = ReplayBuffer::with_capacity(0);
    buffer.append(envelope(1, "x"));
    buffer.append(envelope(2, "y"));
    assert_eq!(buffer.capacity(), 1);
    assert_eq!(buffer.since(None)[0].id, EventId::new(2));
}

// ── Client registry ──────────────────────────────────────────────────

#[test]
fn registry_unregister_is_idempotent() {
    let mut registry = ClientRegistry::new();
    let (tx, _rx) = mpsc::unbounded_channel();
    let id = registry.register(tx, EventId::ZERO);

    assert_eq!(registry.len(), 1);
    assert!(registry.unregister(id));
    assert!(!registry.unregister(id));
    assert!(registry.is_empty());
}

#[test]
fn registry_deliver_skips_envelopes_already_seen() {
    let mut registry = ClientRegistry::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = registry.register(tx, EventId::new(5));

    let mut delivered = Vec::new();
    registry.for_each(|client| {
        for e in [envelope(4, "old"), envelope(5, "same"), envelope(6, "new")] {
            delivered.push(client.deliver(&e).expect("receiver is alive"));
        }
        Visit::Keep
    });

    assert_eq!(delivered, vec![false, false, true]);
    assert_eq!(
        registry.get(id).map(|c| c.last_delivered()),
        Some(EventId::new(6))
    );
    let frame = rx.try_recv().expect("one frame queued");
    assert_eq!(frame.envelope().map(|e| e.id), Some(EventId::new(6)));
    assert!(rx.try_recv().is_err());
}

#[test]
fn registry_for_each_removes_only_requested_clients() {
    let mut registry = ClientRegistry::new();
    let (tx_a, _rx_a) = mpsc::unbounded_channel();
    let (tx_b, _rx_b) = mpsc::unbounded_channel();
    let a = registry.register(tx_a, EventId::ZERO);
    let b = registry.register(tx_b, EventId::ZERO);

    registry.for_each(|client| {
        if client.id() == a {
            Visit::Remove
        } else {
            Visit::Keep
        }
    });

    let mut visited = Vec::new();
    registry.for_each(|client| {
        visited.push(client.id());
        Visit::Keep
    });
    assert_eq!(visited, vec![b]);
}

#[test]
fn registry_deliver_reports_closed_receiver() {
    let mut registry = ClientRegistry::new();
    let (tx, rx) = mpsc::unbounded_channel();
    registry.register(tx, EventId::ZERO);
    drop(rx);

    let mut result = None;
    registry.for_each(|client| {
        result = Some(client.deliver(&envelope(1, "x")));
        Visit::Remove
    });
    assert!(matches!(result, Some(Err(MonitorError::ConnectionClosed))));
}

// ── Dispatcher and sessions ──────────────────────────────────────────

#[tokio::test]
async fn live_client_receives_every_event_in_order() {
    let dispatcher = dispatcher_with_capacity(100);
    let mut session = Session::open(&dispatcher, None).expect("open should succeed");
    assert_eq!(session.state(), SessionState::Live);

    let labels: Vec<String> = (0..50).map(|i| format!("event-{i}")).collect();
    for label in &labels {
        dispatcher.publish(EventCategory::Log, json!(label));
    }

    let frames = drain(&mut session);
    let expected: Vec<Value> = labels.iter().map(|l| json!(l)).collect();
    assert_eq!(payloads(&frames), expected);
    assert_eq!(ids(&frames), (1..=50).collect::<Vec<_>>());
}

#[tokio::test]
async fn welcome_envelope_follows_replay_and_is_not_buffered() {
    let dispatcher = dispatcher_with_capacity(10);
    publish_all(&dispatcher, &["A", "B"]);

    let mut session = Session::open(&dispatcher, None).expect("open should succeed");
    let frames = drain(&mut session);

    let categories: Vec<EventCategory> = frames
        .iter()
        .filter_map(Frame::envelope)
        .map(|e| e.category)
        .collect();
    assert_eq!(
        categories,
        vec![EventCategory::Log, EventCategory::Log, EventCategory::Connected]
    );

    let welcome = frames[2].envelope().expect("welcome is an envelope");
    assert_eq!(welcome.id, EventId::new(2));
    assert_eq!(welcome.payload["replayed"], 2);
    assert_eq!(welcome.payload["bufferCapacity"], 10);
    assert_eq!(dispatcher.stats().buffered_events, 2);
}

#[tokio::test]
async fn bounded_replay_returns_last_n_events() {
    let n = 10;
    let dispatcher = dispatcher_with_capacity(n);
    for i in 0..n + 5 {
        dispatcher.publish(EventCategory::Log, json!(i));
    }

    let mut session = Session::open(&dispatcher, None).expect("open should succeed");
    assert_eq!(session.replayed(), n);

    let frames = drain(&mut session);
    let expected: Vec<Value> = (5..n + 5).map(|i| json!(i)).collect();
    assert_eq!(payloads(&frames), expected);
}

#[tokio::test]
async fn reconnect_with_position_replays_only_missed_events() {
    let dispatcher = dispatcher_with_capacity(100);
    let mut first = Session::open(&dispatcher, None).expect("open should succeed");
    publish_all(&dispatcher, &["A", "B", "C"]);

    let seen = drain(&mut first);
    let last_seen = *ids(&seen).last().expect("received events");
    drop(first);
    assert_eq!(dispatcher.stats().connected_clients, 0);

    publish_all(&dispatcher, &["D", "E"]);

    let mut second =
        Session::open(&dispatcher, Some(EventId::new(last_seen))).expect("open should succeed");
    publish_all(&dispatcher, &["F"]);

    let frames = drain(&mut second);
    assert_eq!(payloads(&frames), vec![json!("D"), json!("E"), json!("F")]);
    assert_eq!(ids(&frames), vec![4, 5, 6]);
}

#[tokio::test]
async fn eviction_scenario_with_capacity_three() {
    let dispatcher = dispatcher_with_capacity(3);
    publish_all(&dispatcher, &["A", "B", "C", "D"]);

    let mut fresh = Session::open(&dispatcher, None).expect("open should succeed");
    assert_eq!(
        payloads(&drain(&mut fresh)),
        vec![json!("B"), json!("C"), json!("D")]
    );

    // "B" was the second envelope published.
    let mut resumed =
        Session::open(&dispatcher, Some(EventId::new(2))).expect("open should succeed");
    assert_eq!(payloads(&drain(&mut resumed)), vec![json!("C"), json!("D")]);
}

#[tokio::test]
async fn position_ahead_of_buffer_registers_at_tail() {
    let dispatcher = dispatcher_with_capacity(5);
    publish_all(&dispatcher, &["A", "B"]);

    let mut session =
        Session::open(&dispatcher, Some(EventId::new(500))).expect("open should succeed");
    assert_eq!(session.replayed(), 0);
    assert_eq!(session.position(), EventId::new(2));

    publish_all(&dispatcher, &["C"]);
    assert_eq!(payloads(&drain(&mut session)), vec![json!("C")]);
}

#[tokio::test]
async fn failed_client_does_not_affect_others() {
    let dispatcher = dispatcher_with_capacity(10);
    let mut healthy = Session::open(&dispatcher, None).expect("open should succeed");

    // A connection whose transport has already gone away.
    let (tx, rx) = mpsc::unbounded_channel();
    let broken = dispatcher.lock_hub().registry.register(tx, EventId::ZERO);
    drop(rx);
    assert_eq!(dispatcher.stats().connected_clients, 2);

    let mut other = Session::open(&dispatcher, None).expect("open should succeed");
    publish_all(&dispatcher, &["A", "B"]);

    assert_eq!(payloads(&drain(&mut healthy)), vec![json!("A"), json!("B")]);
    assert_eq!(payloads(&drain(&mut other)), vec![json!("A"), json!("B")]);
    assert!(dispatcher.lock_hub().registry.get(broken).is_none());
    assert_eq!(dispatcher.stats().connected_clients, 2);
}

#[tokio::test]
async fn unsequenced_categories_are_refused() {
    let dispatcher = dispatcher_with_capacity(10);
    assert_eq!(dispatcher.publish(EventCategory::Heartbeat, Value::Null), None);
    assert_eq!(dispatcher.publish(EventCategory::Connected, Value::Null), None);
    assert_eq!(dispatcher.stats().buffered_events, 0);
    assert_eq!(dispatcher.stats().last_event_id, EventId::ZERO);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_publishers_keep_per_client_order() {
    let dispatcher = dispatcher_with_capacity(1000);
    let mut session = Session::open(&dispatcher, None).expect("open should succeed");

    let tasks: Vec<_> = (0..8)
        .map(|task| {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                for i in 0..100 {
                    dispatcher.publish(EventCategory::TrafficStatus, json!({ "task": task, "i": i }));
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.expect("publisher should not panic");
    }

    let received = ids(&drain(&mut session));
    assert_eq!(received, (1..=800).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sessions_opened_during_publishing_see_a_gap_free_run() {
    const PUBLISHERS: usize = 4;
    const MAX_PER_PUBLISHER: usize = 5000;

    // Large enough that nothing is evicted while the test runs.
    let dispatcher = dispatcher_with_capacity(PUBLISHERS * MAX_PER_PUBLISHER);
    let stop = Arc::new(AtomicBool::new(false));

    let publishers: Vec<_> = (0..PUBLISHERS)
        .map(|task| {
            let dispatcher = dispatcher.clone();
            let stop = stop.clone();
            tokio::spawn(async move {
                for i in 0..MAX_PER_PUBLISHER {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    dispatcher.publish(EventCategory::Log, json!({ "task": task, "i": i }));
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    let mut sessions = Vec::new();
    for round in 0..12u64 {
        let current = dispatcher.stats().last_event_id.as_u64();
        let last_seen = match round % 3 {
            0 => None,
            1 => Some(EventId::ZERO),
            _ => Some(EventId::new(current / 2)),
        };
        let session = Session::open(&dispatcher, last_seen).expect("open should succeed");
        sessions.push((last_seen, session));
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    stop.store(true, Ordering::Relaxed);
    for publisher in publishers {
        publisher.await.expect("publisher should not panic");
    }
    let last = dispatcher.stats().last_event_id.as_u64();
    assert!(last > 0, "publishers should have emitted something");

    for (last_seen, mut session) in sessions {
        let first = last_seen.map_or(0, EventId::as_u64) + 1;
        let frames = drain(&mut session);

        let welcome_at = frames
            .iter()
            .position(|f| matches!(f, Frame::Event(e) if e.category == EventCategory::Connected))
            .expect("welcome envelope");
        assert_eq!(welcome_at, session.replayed(), "welcome follows replay");
        assert_eq!(
            session.position().as_u64(),
            first - 1 + session.replayed() as u64,
            "registered right after the last replayed id"
        );

        let received = ids(&frames);
        assert_eq!(
            received,
            (first..=last).collect::<Vec<_>>(),
            "session opened with {:?} missed or repeated an event",
            last_seen
        );
    }
}

#[tokio::test]
async fn close_is_idempotent_and_unregisters() {
    let dispatcher = dispatcher_with_capacity(10);
    let mut session = Session::open(&dispatcher, None).expect("open should succeed");
    let client = session.client_id();
    assert_eq!(dispatcher.stats().connected_clients, 1);

    session.close();
    session.close();
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(dispatcher.stats().connected_clients, 0);
    assert!(!dispatcher.unregister(client));
    assert!(session.recv().await.is_none());
}

#[tokio::test]
async fn dropping_session_unregisters_client() {
    let dispatcher = dispatcher_with_capacity(10);
    let session = Session::open(&dispatcher, None).expect("open should succeed");
    assert_eq!(dispatcher.stats().connected_clients, 1);
    drop(session);
    assert_eq!(dispatcher.stats().connected_clients, 0);
}

#[tokio::test]
async fn shutdown_ends_streams_and_refuses_new_connections() {
    let dispatcher = dispatcher_with_capacity(10);
    let mut session = Session::open(&dispatcher, None).expect("open should succeed");
    drain(&mut session);

    assert_eq!(dispatcher.shutdown(), 1);
    assert!(dispatcher.is_shut_down());
    assert!(session.recv().await.is_none());
    assert_eq!(session.state(), SessionState::Closed);

    assert!(matches!(
        Session::open(&dispatcher, None),
        Err(MonitorError::ShuttingDown)
    ));
}

#[tokio::test(start_paused = true)]
async fn heartbeat_is_sent_on_interval_and_not_sequenced() {
    let dispatcher = dispatcher_with_capacity(10);
    let mut session = Session::open(&dispatcher, None).expect("open should succeed");
    drain(&mut session);

    let started = tokio::time::Instant::now();
    let frame = session.recv().await.expect("session is live");
    assert!(matches!(frame, Frame::Heartbeat));
    assert!(started.elapsed() >= Duration::from_secs(15));

    publish_all(&dispatcher, &["A"]);
    let frame = session.recv().await.expect("session is live");
    assert_eq!(frame.envelope().map(|e| e.id), Some(EventId::new(1)));
    assert_eq!(dispatcher.stats().buffered_events, 1);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_does_not_outlive_registration() {
    let dispatcher = dispatcher_with_capacity(10);
    let mut session = Session::open(&dispatcher, None).expect("open should succeed");
    drain(&mut session);

    dispatcher.shutdown();
    let next = tokio::time::timeout(Duration::from_secs(60), session.recv())
        .await
        .expect("stream must end rather than keep heartbeating");
    assert!(next.is_none());
}

// ── Publisher ────────────────────────────────────────────────────────

#[test]
fn disabled_publisher_is_a_silent_noop() {
    let publisher = Publisher::disabled();
    assert!(!publisher.is_enabled());
    publisher.emit_log(LogLevel::Error, "nobody listening");
    publisher.emit_traffic("GET /api/users", TrafficStatus::Received, "start");
    publisher.emit_json(&json!({ "ok": true }));
    publisher.emit_json_input(&json!({ "ok": true }));
}

#[test]
fn global_publisher_is_disabled_until_installed() {
    // No test installs a global publisher, so this is always the fallback.
    assert!(!global().is_enabled());
    global().emit_log(LogLevel::Info, "before init");
}

#[tokio::test]
async fn publisher_emits_each_category_with_its_payload_shape() {
    let dispatcher = dispatcher_with_capacity(10);
    let publisher = Publisher::new(dispatcher.clone());

    publisher.emit_log(LogLevel::Success, "saved");
    publisher.emit_traffic("POST /api/users", TrafficStatus::Completed, "created");
    publisher.emit_json(&json!({ "id": 7 }));
    publisher.emit_json_input(&json!({ "name": "x" }));

    let buffered = dispatcher.since(None);
    let categories: Vec<EventCategory> = buffered.iter().map(|e| e.category).collect();
    assert_eq!(
        categories,
        vec![
            EventCategory::Log,
            EventCategory::TrafficStatus,
            EventCategory::OutboundPayload,
            EventCategory::InboundPayload,
        ]
    );
    assert_eq!(buffered[0].payload, json!({ "level": "success", "message": "saved" }));
    assert_eq!(
        buffered[1].payload,
        json!({ "origin": "POST /api/users", "status": "completed", "message": "created" })
    );
    assert_eq!(buffered[2].payload, json!({ "id": 7 }));
    assert_eq!(buffered[3].payload, json!({ "name": "x" }));
}

#[test]
fn envelope_serializes_with_camel_case_fields() {
    let value = serde_json::to_value(&*envelope(3, "hello")).expect("should serialize");
    assert_eq!(value["id"], 3);
    assert_eq!(value["category"], "log");
    assert_eq!(value["payload"], "hello");
    assert!(value.get("createdAt").is_some());
    assert!(value.get("token").is_some());
}
