use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::WebSocketStream;

use base64::{engine::general_purpose::STANDARD, Engine};
use fancast_config::{DeliverySettings, Mode, PublishSettings};

use crate::clock::Clock;
use crate::conn::Connection;
use crate::dispatcher::{run_sweeper, Dispatcher};
use crate::message::{Message, Outbound};
use crate::metrics::collect;
use crate::publisher::{PublishStats, Publisher};
use crate::registry::Registry;
use crate::session::{DrainReason, Session, SessionLimits, SessionState};
use crate::stats::{mean, percentile, SampleWindow};

const SECOND: u64 = 1_000_000_000;

/// Real loopback WebSocket pair: the server-side write half wrapped as a
/// `Connection`, and the client-side stream to observe what was sent.
async fn ws_conn() -> (Connection, WebSocketStream<TcpStream>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (client, server) = tokio::join!(
        async {
            let stream = TcpStream::connect(addr).await.unwrap();
            tokio_tungstenite::client_async("ws://localhost/", stream)
                .await
                .unwrap()
                .0
        },
        async {
            let (stream, _) = listener.accept().await.unwrap();
            tokio_tungstenite::accept_async(stream).await.unwrap()
        }
    );
    let (sink, _) = server.split();
    (Connection::new(sink, 0), client)
}

fn limits(drop_limit: usize, window_secs: f64, full_timeout_secs: f64) -> SessionLimits {
    SessionLimits {
        drop_limit,
        drop_window: Duration::from_secs_f64(window_secs),
        full_timeout: Duration::from_secs_f64(full_timeout_secs),
    }
}

async fn queued_session(
    id: &str,
    capacity: usize,
    limits: SessionLimits,
) -> (Arc<Session>, WebSocketStream<TcpStream>) {
    let (conn, client) = ws_conn().await;
    let session = Arc::new(Session::new(id.to_string(), conn, Some(capacity), limits));
    (session, client)
}

fn delivery(mode: Mode, maxsize: u32, drop_limit: u32) -> DeliverySettings {
    DeliverySettings {
        mode,
        maxsize,
        drop_limit,
        drop_window_secs: 10.0,
        full_timeout_secs: 5.0,
        send_timeout_secs: 1.0,
    }
}

fn message(seq: u64) -> Arc<Message> {
    Arc::new(Message {
        seq,
        ts: seq * 1_000_000,
        payload: vec![seq as u8; 8],
    })
}

fn outbound(seq: u64) -> Outbound {
    Outbound::encode(message(seq)).unwrap()
}

#[test]
fn outbound_text_carries_seq_ts_and_base64_payload() {
    let out = outbound(7);
    let value: serde_json::Value = serde_json::from_str(out.text.as_str()).unwrap();
    assert_eq!(value["seq"], 7);
    assert_eq!(value["ts"], 7_000_000);
    let payload = STANDARD
        .decode(value["payload"].as_str().unwrap())
        .unwrap();
    assert_eq!(payload, vec![7u8; 8]);
}

#[tokio::test]
async fn drop_oldest_evicts_the_head() {
    let (session, _client) = queued_session("t-0", 3, limits(50, 10.0, 5.0)).await;

    for seq in 1..=5 {
        session.enqueue(outbound(seq), 0);
    }

    assert_eq!(session.drops_total(), 2);
    assert_eq!(session.queue_len(), 3);
    let mut seqs = Vec::new();
    for _ in 0..3 {
        seqs.push(session.next_message().await.unwrap().seq());
    }
    assert_eq!(seqs, vec![3, 4, 5]);
}

#[tokio::test]
async fn enqueue_below_capacity_never_drops() {
    let (session, _client) = queued_session("t-0", 3, limits(50, 10.0, 5.0)).await;

    assert!(!session.enqueue(outbound(1), 0));
    assert!(!session.enqueue(outbound(2), 0));
    assert_eq!(session.drops_total(), 0);
    assert_eq!(session.queue_len(), 2);
    assert_eq!(session.full_since_ns(), None);
}

#[tokio::test]
async fn full_marker_follows_queue_capacity() {
    let (session, _client) = queued_session("t-0", 2, limits(50, 10.0, 5.0)).await;

    session.enqueue(outbound(1), 10);
    assert_eq!(session.full_since_ns(), None);

    session.enqueue(outbound(2), 20);
    assert_eq!(session.full_since_ns(), Some(20));

    // An overflow while already full keeps the original timestamp.
    session.enqueue(outbound(3), 30);
    assert_eq!(session.full_since_ns(), Some(20));

    // Draining below capacity clears the marker.
    session.next_message().await.unwrap();
    assert_eq!(session.full_since_ns(), None);
}

#[tokio::test]
async fn drop_rate_policy_triggers_at_the_limit() {
    let (session, _client) = queued_session("t-0", 1, limits(5, 10.0, 100.0)).await;

    session.enqueue(outbound(1), 0);
    assert_eq!(session.overflow_violation(0), None);

    for seq in 2..=7 {
        session.enqueue(outbound(seq), 0);
    }
    assert_eq!(session.drops_total(), 6);
    assert_eq!(
        session.overflow_violation(0),
        Some(DrainReason::ExcessiveDrops)
    );
}

#[tokio::test]
async fn drop_rate_policy_forgets_old_drops() {
    let (session, _client) = queued_session("t-0", 1, limits(5, 10.0, 100.0)).await;

    for seq in 1..=7 {
        session.enqueue(outbound(seq), 0);
    }
    // Eleven seconds later every drop has aged out of the window.
    assert_eq!(session.overflow_violation(11 * SECOND), None);
}

#[tokio::test]
async fn full_timeout_policy_needs_sustained_overflow() {
    let (session, _client) = queued_session("t-0", 2, limits(1000, 10.0, 1.0)).await;

    for seq in 1..=3 {
        session.enqueue(outbound(seq), 0);
    }
    assert_eq!(session.full_since_ns(), Some(1));

    assert_eq!(session.overflow_violation(SECOND / 2), None);
    assert_eq!(
        session.overflow_violation(SECOND + SECOND / 10),
        Some(DrainReason::QueueFullTimeout)
    );
}

#[tokio::test]
async fn dispatcher_drains_excessive_dropper() {
    let registry = Arc::new(Registry::new());
    let clock = Arc::new(Clock::new());
    let cfg = delivery(Mode::Queue, 1, 5);
    let (session, _client) = queued_session("slow-0", 1, SessionLimits::from(&cfg)).await;
    registry.insert(session.clone());

    let dispatcher = Dispatcher::new(registry.clone(), clock, cfg);
    for seq in 1..=7 {
        dispatcher.dispatch(message(seq)).await;
    }

    assert_eq!(session.state(), SessionState::Draining);
    assert_eq!(session.drain_reason(), Some(DrainReason::ExcessiveDrops));
}

#[tokio::test]
async fn stalled_session_does_not_starve_the_others() {
    let registry = Arc::new(Registry::new());
    let clock = Arc::new(Clock::new());
    let cfg = delivery(Mode::Queue, 100, 1000);
    let (fast, _fast_client) = queued_session("fast-0", 100, SessionLimits::from(&cfg)).await;
    let (slow, _slow_client) = queued_session("slow-0", 1, SessionLimits::from(&cfg)).await;
    registry.insert(fast.clone());
    registry.insert(slow.clone());

    let dispatcher = Dispatcher::new(registry.clone(), clock, cfg);
    for seq in 1..=40 {
        dispatcher.dispatch(message(seq)).await;
    }

    // The stalled session ate its own drops; the healthy one got everything,
    // in order.
    assert_eq!(fast.drops_total(), 0);
    assert_eq!(fast.queue_len(), 40);
    for expect in 1..=40u64 {
        assert_eq!(fast.next_message().await.unwrap().seq(), expect);
    }
    assert_eq!(slow.drops_total(), 39);
    assert_eq!(slow.next_message().await.unwrap().seq(), 40);
}

#[tokio::test]
async fn naive_fan_out_reaches_every_session() {
    let registry = Arc::new(Registry::new());
    let clock = Arc::new(Clock::new());
    let cfg = delivery(Mode::Naive, 100, 50);

    let mut clients = Vec::new();
    for i in 0..2 {
        let (conn, client) = ws_conn().await;
        let session = Arc::new(Session::new(
            format!("cli-{i}"),
            conn,
            None,
            SessionLimits::from(&cfg),
        ));
        registry.insert(session);
        clients.push(client);
    }

    let dispatcher = Dispatcher::new(registry.clone(), clock, cfg);
    dispatcher.dispatch(message(1)).await;

    for client in &mut clients {
        let frame = client.next().await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
        assert_eq!(value["seq"], 1);
    }
}

#[tokio::test]
async fn ack_resolves_against_tracked_outbound() {
    let (session, _client) = queued_session("t-0", 10, limits(50, 10.0, 5.0)).await;

    session.record_send(7, 1_000_000, Duration::from_millis(1));
    assert!(session.record_ack(7, 5_000_000));
    assert_eq!(session.take_e2e_samples(), vec![4.0]);

    // Unknown (never sent, or already resolved) seqs are ignored.
    assert!(!session.record_ack(7, 6_000_000));
    assert!(!session.record_ack(99, 6_000_000));
    assert!(session.take_e2e_samples().is_empty());
}

#[tokio::test]
async fn registry_snapshot_is_a_point_in_time_copy() {
    let registry = Registry::new();
    let (a, _ca) = queued_session("a-0", 2, limits(50, 10.0, 5.0)).await;
    let (b, _cb) = queued_session("b-0", 2, limits(50, 10.0, 5.0)).await;
    registry.insert(a.clone());
    let snap = registry.snapshot();
    registry.insert(b.clone());

    assert_eq!(snap.len(), 1);
    assert_eq!(registry.len(), 2);
}

#[tokio::test]
async fn registry_remove_counts_each_session_once() {
    let registry = Registry::new();
    let (session, _client) = queued_session("a-0", 2, limits(50, 10.0, 5.0)).await;
    registry.insert(session.clone());

    assert!(registry.remove("a-0").is_some());
    assert!(registry.remove("a-0").is_none());
    assert_eq!(registry.disconnects_total(), 1);
    assert!(registry.is_empty());
}

#[test]
fn allocated_ids_are_prefixed_and_unique() {
    let registry = Registry::new();
    assert_eq!(registry.allocate_id("fast"), "fast-0");
    assert_eq!(registry.allocate_id("fast"), "fast-1");
    assert_eq!(registry.allocate_id("cli"), "cli-2");
}

#[tokio::test]
async fn begin_drain_has_a_single_winner() {
    let (session, _client) = queued_session("t-0", 2, limits(50, 10.0, 5.0)).await;

    let mut signal = session.drain_signal();
    assert!(session.begin_drain(DrainReason::ExcessiveDrops));
    assert!(!session.begin_drain(DrainReason::Shutdown));
    assert_eq!(session.drain_reason(), Some(DrainReason::ExcessiveDrops));
    assert_eq!(session.state(), SessionState::Draining);

    tokio::time::timeout(Duration::from_secs(1), signal.wait_for(|stop| *stop))
        .await
        .expect("drain signal not observed")
        .unwrap();

    session.mark_closed();
    assert_eq!(session.state(), SessionState::Closed);
}

#[test]
fn percentile_uses_floor_indexing() {
    let mut values = vec![4.0, 1.0, 3.0, 2.0];
    assert_eq!(percentile(&mut values, 0.50), Some(3.0));
    assert_eq!(percentile(&mut values, 0.95), Some(4.0));
    assert_eq!(percentile(&mut values, 0.0), Some(1.0));
    assert_eq!(percentile(&mut Vec::new(), 0.50), None);
}

#[test]
fn mean_of_empty_is_absent() {
    assert_eq!(mean(&[]), None);
    assert_eq!(mean(&[2.0, 4.0]), Some(3.0));
}

#[test]
fn sample_window_evicts_oldest() {
    let mut window = SampleWindow::new(3);
    for v in [1.0, 2.0, 3.0, 4.0] {
        window.push(v);
    }
    assert_eq!(window.len(), 3);
    assert_eq!(window.mean(), Some(3.0));
    assert_eq!(window.drain(), vec![2.0, 3.0, 4.0]);
    assert!(window.is_empty());
}

#[tokio::test(start_paused = true)]
async fn publisher_holds_the_configured_rate() {
    let clock = Arc::new(Clock::new());
    let stats = Arc::new(PublishStats::default());
    let cfg = PublishSettings {
        rate: 100.0,
        payload_bytes: 16,
        metrics_period_secs: 5.0,
    };
    let publisher = Publisher::new(&cfg, clock, stats.clone());

    let (tx, mut rx) = mpsc::channel(256);
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(publisher.run(tx, stop_rx));

    let started = tokio::time::Instant::now();
    let mut last_seq = 0;
    for _ in 0..100 {
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.seq, last_seq + 1);
        last_seq = msg.seq;
        assert_eq!(msg.payload.len(), 16);
    }

    // First tick fires immediately, so 100 messages take 99 periods.
    let elapsed = started.elapsed();
    assert!(
        elapsed >= Duration::from_millis(980) && elapsed <= Duration::from_millis(1000),
        "100 messages at 100/s took {elapsed:?}"
    );

    assert_eq!(stats.published(), 100);
    stop_tx.send(true).unwrap();
}

#[tokio::test]
async fn metrics_collect_unions_session_samples() {
    let registry = Registry::new();
    let (a, _ca) = queued_session("a-0", 10, limits(50, 10.0, 5.0)).await;
    let (b, _cb) = queued_session("b-0", 10, limits(50, 10.0, 5.0)).await;
    registry.insert(a.clone());
    registry.insert(b.clone());

    a.record_send(1, 0, Duration::from_millis(1));
    a.record_ack(1, 2_000_000); // 2 ms
    a.record_send(2, 0, Duration::from_millis(1));
    a.record_ack(2, 6_000_000); // 6 ms

    let (summary, rows) = collect(&registry, 42.0);
    assert_eq!(summary.clients, 2);
    assert_eq!(summary.pub_rate, 42.0);
    assert_eq!(summary.e2e_p50_ms, Some(6.0));
    assert_eq!(summary.e2e_p95_ms, Some(6.0));
    assert_eq!(summary.disconnects_total, 0);
    assert_eq!(rows.len(), 2);

    // Samples are drained per period; a quiet period has no percentiles.
    let (summary, _) = collect(&registry, 42.0);
    assert_eq!(summary.e2e_p50_ms, None);
    assert_eq!(summary.e2e_p95_ms, None);
}

#[tokio::test]
async fn sweeper_drains_sustained_overflow() {
    let registry = Arc::new(Registry::new());
    let clock = Arc::new(Clock::new());
    let (session, _client) = queued_session("slow-0", 1, limits(1000, 10.0, 0.3)).await;
    registry.insert(session.clone());

    session.enqueue(outbound(1), clock.now_ns());
    assert!(session.full_since_ns().is_some());

    let (stop_tx, stop_rx) = watch::channel(false);
    let sweeper = tokio::spawn(run_sweeper(registry.clone(), clock, stop_rx));

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(session.state(), SessionState::Draining);
    assert_eq!(session.drain_reason(), Some(DrainReason::QueueFullTimeout));

    stop_tx.send(true).unwrap();
    sweeper.await.unwrap();
}
