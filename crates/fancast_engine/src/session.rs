//! Per-subscriber session state.
//!
//! A `Session` is the shared handle the registry, the dispatcher, and the
//! transport's per-connection tasks all hold. It owns the connection's write
//! half, the bounded send queue (queue mode only), the drop accounting that
//! feeds the disconnect policies, and the latency sample windows the metrics
//! aggregator reads.
//!
//! State machine: Open -> Draining -> Closed, never backwards. Any task (or
//! the dispatcher) can initiate draining; the first `begin_drain` wins and
//! records the reason, a watch channel fans the signal out to the session's
//! tasks, and the transport teardown performs the Draining -> Closed step
//! once the connection is released and the session is out of the registry.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use fancast_config::DeliverySettings;

use crate::clock::ns_to_ms;
use crate::conn::Connection;
use crate::message::Outbound;
use crate::queue::SendQueue;
use crate::stats::SampleWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Draining,
    Closed,
}

/// Why a session left the Open state. The display form is the label that
/// shows up in logs and is asserted on by the integration tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainReason {
    TransportError,
    SendTimeout,
    ExcessiveDrops,
    QueueFullTimeout,
    PingTimeout,
    MalformedFrames,
    PeerClosed,
    Shutdown,
}

impl std::fmt::Display for DrainReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DrainReason::TransportError => "transport_error",
            DrainReason::SendTimeout => "send_timeout",
            DrainReason::ExcessiveDrops => "excessive_drops",
            DrainReason::QueueFullTimeout => "queue_full_timeout",
            DrainReason::PingTimeout => "ping_timeout",
            DrainReason::MalformedFrames => "malformed_frames",
            DrainReason::PeerClosed => "peer_closed",
            DrainReason::Shutdown => "shutdown",
        };
        write!(f, "{label}")
    }
}

/// Disconnect-policy parameters, fixed at session construction.
#[derive(Debug, Clone)]
pub struct SessionLimits {
    pub drop_limit: usize,
    pub drop_window: Duration,
    pub full_timeout: Duration,
}

impl From<&DeliverySettings> for SessionLimits {
    fn from(cfg: &DeliverySettings) -> Self {
        Self {
            drop_limit: cfg.drop_limit as usize,
            drop_window: cfg.drop_window(),
            full_timeout: cfg.full_timeout(),
        }
    }
}

const STATE_OPEN: u8 = 0;
const STATE_DRAINING: u8 = 1;
const STATE_CLOSED: u8 = 2;

#[derive(Debug)]
pub struct Session {
    id: String,
    conn: Connection,
    /// Present in queue mode only; naive sessions are written to directly.
    queue: Option<SendQueue>,
    limits: SessionLimits,

    state: AtomicU8,
    drain_reason: Mutex<Option<DrainReason>>,
    drain_tx: watch::Sender<bool>,

    drops_total: AtomicU64,
    /// Timestamps (ns) of recent overflow drops, pruned to the policy window.
    drop_window: Mutex<VecDeque<u64>>,
    /// Monotonic ns since the queue has been continuously at capacity; 0 when
    /// it is not.
    full_since_ns: AtomicU64,

    send_latency: Mutex<SampleWindow>,
    e2e_latency: Mutex<SampleWindow>,
    /// Recently transmitted (seq, publish ts) pairs awaiting a client ACK.
    inflight: Mutex<VecDeque<(u64, u64)>>,
}

impl Session {
    /// Tracked outbound sends kept for ACK resolution; older entries are
    /// evicted and their ACKs silently ignored.
    const TRACKED_OUTBOUND: usize = 1024;
    /// Ring sizes for the latency windows sampled by the metrics aggregator.
    const SEND_SAMPLES: usize = 100;
    const E2E_SAMPLES: usize = 256;

    pub fn new(
        id: String,
        conn: Connection,
        queue_capacity: Option<usize>,
        limits: SessionLimits,
    ) -> Self {
        let (drain_tx, _) = watch::channel(false);
        Self {
            id,
            conn,
            queue: queue_capacity.map(SendQueue::new),
            limits,
            state: AtomicU8::new(STATE_OPEN),
            drain_reason: Mutex::new(None),
            drain_tx,
            drops_total: AtomicU64::new(0),
            drop_window: Mutex::new(VecDeque::new()),
            full_since_ns: AtomicU64::new(0),
            send_latency: Mutex::new(SampleWindow::new(Self::SEND_SAMPLES)),
            e2e_latency: Mutex::new(SampleWindow::new(Self::E2E_SAMPLES)),
            inflight: Mutex::new(VecDeque::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn queue(&self) -> Option<&SendQueue> {
        self.queue.as_ref()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.as_ref().map(SendQueue::len).unwrap_or(0)
    }

    pub fn state(&self) -> SessionState {
        match self.state.load(Ordering::SeqCst) {
            STATE_OPEN => SessionState::Open,
            STATE_DRAINING => SessionState::Draining,
            _ => SessionState::Closed,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_OPEN
    }

    /// Open -> Draining. Only the first caller wins and records the reason;
    /// the drain signal wakes every task belonging to this session.
    pub fn begin_drain(&self, reason: DrainReason) -> bool {
        if self
            .state
            .compare_exchange(
                STATE_OPEN,
                STATE_DRAINING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return false;
        }
        *self.drain_reason.lock().unwrap() = Some(reason);
        info!(client = %self.id, %reason, "session draining");
        let _ = self.drain_tx.send(true);
        true
    }

    pub fn drain_reason(&self) -> Option<DrainReason> {
        *self.drain_reason.lock().unwrap()
    }

    /// A receiver that resolves once the session leaves the Open state.
    pub fn drain_signal(&self) -> watch::Receiver<bool> {
        self.drain_tx.subscribe()
    }

    /// Draining -> Closed. The caller must already have removed the session
    /// from the registry and released the connection.
    pub fn mark_closed(&self) {
        self.state.store(STATE_CLOSED, Ordering::SeqCst);
        let _ = self.drain_tx.send(true);
    }

    /// Non-blocking enqueue with drop-oldest overflow (queue mode).
    ///
    /// Returns true when the head was discarded to admit this message. Also
    /// maintains the continuously-full marker: set when this enqueue leaves
    /// the queue at capacity, cleared when the queue is observed below it.
    pub fn enqueue(&self, out: Outbound, now_ns: u64) -> bool {
        let Some(queue) = &self.queue else {
            return false;
        };
        let dropped = queue.push_drop_oldest(out);
        if dropped {
            self.drops_total.fetch_add(1, Ordering::Relaxed);
            let mut window = self.drop_window.lock().unwrap();
            window.push_back(now_ns);
            Self::prune_window(&mut window, now_ns, self.limits.drop_window);
            // The count only has to reach drop_limit; cap the ring there.
            while window.len() > self.limits.drop_limit + 1 {
                window.pop_front();
            }
        }
        if queue.is_full() {
            let _ = self.full_since_ns.compare_exchange(
                0,
                now_ns.max(1),
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
        } else {
            self.full_since_ns.store(0, Ordering::SeqCst);
        }
        dropped
    }

    /// Wait for the next queued message (queue mode). Clears the
    /// continuously-full marker once the queue is below capacity again.
    pub async fn next_message(&self) -> Option<Outbound> {
        let queue = self.queue.as_ref()?;
        let out = queue.pop().await;
        if !queue.is_full() {
            self.full_since_ns.store(0, Ordering::SeqCst);
        }
        Some(out)
    }

    fn prune_window(window: &mut VecDeque<u64>, now_ns: u64, span: Duration) {
        let horizon = now_ns.saturating_sub(span.as_nanos() as u64);
        while window.front().is_some_and(|&t| t < horizon) {
            window.pop_front();
        }
    }

    /// Evaluate the disconnect policies. Called by the dispatcher after an
    /// enqueue that dropped, and periodically by the sweeper for the
    /// time-based rule.
    pub fn overflow_violation(&self, now_ns: u64) -> Option<DrainReason> {
        {
            let mut window = self.drop_window.lock().unwrap();
            Self::prune_window(&mut window, now_ns, self.limits.drop_window);
            if window.len() >= self.limits.drop_limit {
                return Some(DrainReason::ExcessiveDrops);
            }
        }
        let since = self.full_since_ns.load(Ordering::SeqCst);
        if since != 0 && now_ns.saturating_sub(since) >= self.limits.full_timeout.as_nanos() as u64
        {
            return Some(DrainReason::QueueFullTimeout);
        }
        None
    }

    pub fn drops_total(&self) -> u64 {
        self.drops_total.load(Ordering::Relaxed)
    }

    pub fn full_since_ns(&self) -> Option<u64> {
        match self.full_since_ns.load(Ordering::SeqCst) {
            0 => None,
            ns => Some(ns),
        }
    }

    /// Record a completed transmission: the send-latency sample and the
    /// (seq, publish ts) pair the client's ACK will be matched against.
    pub fn record_send(&self, seq: u64, publish_ts_ns: u64, elapsed: Duration) {
        self.send_latency
            .lock()
            .unwrap()
            .push(elapsed.as_secs_f64() * 1000.0);
        let mut inflight = self.inflight.lock().unwrap();
        inflight.push_back((seq, publish_ts_ns));
        if inflight.len() > Self::TRACKED_OUTBOUND {
            inflight.pop_front();
        }
    }

    /// Resolve a client ACK against the tracked outbound window. ACKs for
    /// unknown seqs (dropped, evicted, or fabricated) are ignored.
    pub fn record_ack(&self, ack_seq: u64, now_ns: u64) -> bool {
        let publish_ts = {
            let mut inflight = self.inflight.lock().unwrap();
            match inflight.iter().position(|&(seq, _)| seq == ack_seq) {
                Some(idx) => inflight.remove(idx).map(|(_, ts)| ts),
                None => None,
            }
        };
        match publish_ts {
            Some(ts) => {
                self.e2e_latency
                    .lock()
                    .unwrap()
                    .push(ns_to_ms(now_ns.saturating_sub(ts)));
                true
            }
            None => false,
        }
    }

    pub fn send_latency_mean(&self) -> Option<f64> {
        self.send_latency.lock().unwrap().mean()
    }

    /// Hand the e2e samples collected since the last call to the metrics
    /// aggregator.
    pub fn take_e2e_samples(&self) -> Vec<f64> {
        self.e2e_latency.lock().unwrap().drain()
    }
}
