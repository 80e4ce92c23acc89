//! Fixed-rate message production.
//!
//! One message per tick at the configured rate. The tick comes from
//! `tokio::time::interval`, which schedules against absolute deadlines, so
//! sleep error does not accumulate into rate drift. The publisher is a pure
//! generator: on shutdown it stops at the next tick with nothing to drain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use fancast_config::PublishSettings;

use crate::clock::Clock;
use crate::message::Message;

/// Messages handed to the dispatcher but not yet fanned out. Kept small so a
/// stalled naive broadcast shows up as publisher backpressure instead of an
/// unbounded backlog.
pub const PUBLISH_CHANNEL_CAP: usize = 64;

/// Shared production counter read by the metrics aggregator.
#[derive(Debug, Default)]
pub struct PublishStats {
    published: AtomicU64,
}

impl PublishStats {
    pub fn record(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

/// Fixed-size random payloads, fresh bytes per message.
#[derive(Debug)]
pub struct PayloadSource {
    len: usize,
}

impl PayloadSource {
    pub fn new(len: usize) -> Self {
        Self { len }
    }

    pub fn next(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.len];
        rand::rng().fill_bytes(&mut buf);
        buf
    }
}

#[derive(Debug)]
pub struct Publisher {
    rate: f64,
    payload: PayloadSource,
    clock: Arc<Clock>,
    stats: Arc<PublishStats>,
}

impl Publisher {
    pub fn new(cfg: &PublishSettings, clock: Arc<Clock>, stats: Arc<PublishStats>) -> Self {
        Self {
            rate: cfg.rate,
            payload: PayloadSource::new(cfg.payload_bytes as usize),
            clock,
            stats,
        }
    }

    pub async fn run(self, tx: mpsc::Sender<Arc<Message>>, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs_f64(1.0 / self.rate);
        let mut ticker = tokio::time::interval(period);
        let mut seq: u64 = 0;

        loop {
            tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => break,
                _ = ticker.tick() => {}
            }

            seq += 1;
            let msg = Arc::new(Message {
                seq,
                ts: self.clock.now_ns(),
                payload: self.payload.next(),
            });
            self.stats.record();
            if tx.send(msg).await.is_err() {
                break;
            }
        }

        debug!(last_seq = seq, "publisher stopped");
    }
}
