//! Broadcast fan-out.
//!
//! The dispatcher pulls each published message off the channel, encodes the
//! wire text once, snapshots the registry, and delivers per the configured
//! mode:
//!
//! - Naive: awaited, sequential sends with a hard per-send timeout. The mode
//!   exists to show what it costs: the slowest socket in the snapshot sets
//!   the pace for everyone behind it.
//! - Queue: a non-blocking drop-oldest enqueue per session, O(sessions) per
//!   message, after which the disconnect policies are evaluated for any
//!   session that overflowed.
//!
//! The sweeper re-evaluates the time-based policy for every open session so
//! a session that stops overflowing (because nothing new arrives) still gets
//! drained once its queue has sat full for too long.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tracing::{debug, error};

use fancast_config::{DeliverySettings, Mode};

use crate::clock::Clock;
use crate::message::{Message, Outbound};
use crate::registry::Registry;
use crate::session::DrainReason;

/// Cadence of the policy sweeper; comfortably finer than any sane
/// full-timeout setting.
pub const SWEEP_PERIOD: Duration = Duration::from_millis(250);

#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    clock: Arc<Clock>,
    cfg: DeliverySettings,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, clock: Arc<Clock>, cfg: DeliverySettings) -> Self {
        Self {
            registry,
            clock,
            cfg,
        }
    }

    /// Consume published messages until the publisher hangs up. The channel
    /// closing is the shutdown signal: whatever is still buffered gets fanned
    /// out, then the loop ends.
    pub async fn run(self, mut rx: mpsc::Receiver<Arc<Message>>) {
        while let Some(msg) = rx.recv().await {
            self.dispatch(msg).await;
        }
        debug!("dispatcher stopped");
    }

    pub async fn dispatch(&self, msg: Arc<Message>) {
        let out = match Outbound::encode(msg) {
            Ok(out) => out,
            Err(e) => {
                error!("failed to encode outbound frame: {e}");
                return;
            }
        };
        match self.cfg.mode {
            Mode::Queue => self.fan_out_queued(&out),
            Mode::Naive => self.fan_out_naive(&out).await,
        }
    }

    fn fan_out_queued(&self, out: &Outbound) {
        let now = self.clock.now_ns();
        for session in self.registry.snapshot() {
            if !session.is_open() {
                continue;
            }
            let dropped = session.enqueue(out.clone(), now);
            if dropped {
                if let Some(reason) = session.overflow_violation(now) {
                    session.begin_drain(reason);
                }
            }
        }
    }

    async fn fan_out_naive(&self, out: &Outbound) {
        let send_timeout = self.cfg.send_timeout();
        for session in self.registry.snapshot() {
            if !session.is_open() {
                continue;
            }
            let started = Instant::now();
            match tokio::time::timeout(send_timeout, session.conn().send_text(out.text.clone()))
                .await
            {
                Ok(Ok(())) => {
                    session.record_send(out.seq(), out.msg.ts, started.elapsed());
                }
                Ok(Err(e)) => {
                    debug!(client = %session.id(), "broadcast send failed: {e}");
                    session.begin_drain(DrainReason::TransportError);
                }
                Err(_) => {
                    session.begin_drain(DrainReason::SendTimeout);
                }
            }
        }
    }
}

/// Periodic policy sweep for sessions whose queues sit full without new
/// drops arriving to trigger the dispatcher-side check.
pub async fn run_sweeper(
    registry: Arc<Registry>,
    clock: Arc<Clock>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(SWEEP_PERIOD);
    loop {
        tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break,
            _ = ticker.tick() => {}
        }
        let now = clock.now_ns();
        for session in registry.snapshot() {
            if !session.is_open() {
                continue;
            }
            if let Some(reason) = session.overflow_violation(now) {
                session.begin_drain(reason);
            }
        }
    }
}
