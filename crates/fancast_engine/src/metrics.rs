//! Periodic metrics aggregation.
//!
//! Every period the aggregator samples the registry and emits one summary
//! record (client count, observed publish rate, e2e latency percentiles over
//! the union of the period's samples, cumulative disconnects) plus one
//! debug-level row per session. Everything goes through `tracing`; with
//! `--log-json` each record is a JSON line.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info};

use crate::publisher::PublishStats;
use crate::registry::Registry;
use crate::stats::{mean, percentile};

#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub clients: usize,
    pub pub_rate: f64,
    pub e2e_p50_ms: Option<f64>,
    pub e2e_p95_ms: Option<f64>,
    pub disconnects_total: u64,
}

#[derive(Debug, Clone)]
pub struct SessionRow {
    pub client: String,
    pub queue_len: usize,
    pub drops_total: u64,
    pub send_latency_ms: Option<f64>,
    pub e2e_latency_ms: Option<f64>,
}

/// Drain the period's e2e samples from every session and fold them into the
/// summary. Percentiles index the sorted union at floor(p * N); an empty
/// union yields no percentile fields.
pub fn collect(registry: &Registry, pub_rate: f64) -> (MetricsSnapshot, Vec<SessionRow>) {
    let sessions = registry.snapshot();
    let mut union: Vec<f64> = Vec::new();
    let mut rows = Vec::with_capacity(sessions.len());

    for session in &sessions {
        let samples = session.take_e2e_samples();
        rows.push(SessionRow {
            client: session.id().to_string(),
            queue_len: session.queue_len(),
            drops_total: session.drops_total(),
            send_latency_ms: session.send_latency_mean(),
            e2e_latency_ms: mean(&samples),
        });
        union.extend(samples);
    }

    let snapshot = MetricsSnapshot {
        clients: sessions.len(),
        pub_rate,
        e2e_p50_ms: percentile(&mut union, 0.50),
        e2e_p95_ms: percentile(&mut union, 0.95),
        disconnects_total: registry.disconnects_total(),
    };
    (snapshot, rows)
}

pub async fn run_metrics(
    registry: Arc<Registry>,
    stats: Arc<PublishStats>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    // The first tick of an interval completes immediately; skip it so the
    // first sample covers a full period.
    ticker.tick().await;

    let mut last_published = stats.published();
    let mut last_at = Instant::now();

    loop {
        tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break,
            _ = ticker.tick() => {}
        }

        let published = stats.published();
        let elapsed = last_at.elapsed().as_secs_f64();
        let pub_rate = if elapsed > 0.0 {
            (published - last_published) as f64 / elapsed
        } else {
            0.0
        };
        last_published = published;
        last_at = Instant::now();

        let (summary, rows) = collect(&registry, pub_rate);
        match (summary.e2e_p50_ms, summary.e2e_p95_ms) {
            (Some(p50), Some(p95)) => info!(
                clients = summary.clients,
                pub_rate = %format_args!("{pub_rate:.1}"),
                e2e_p50_ms = %format_args!("{p50:.1}"),
                e2e_p95_ms = %format_args!("{p95:.1}"),
                disconnects_total = summary.disconnects_total,
                "broadcast summary"
            ),
            _ => info!(
                clients = summary.clients,
                pub_rate = %format_args!("{pub_rate:.1}"),
                disconnects_total = summary.disconnects_total,
                "broadcast summary"
            ),
        }
        for row in rows {
            debug!(
                client = %row.client,
                queue_len = row.queue_len,
                drops_total = row.drops_total,
                send_latency_ms = %format_args!("{:.1}", row.send_latency_ms.unwrap_or(0.0)),
                e2e_latency_ms = %format_args!("{:.1}", row.e2e_latency_ms.unwrap_or(0.0)),
                "client metrics"
            );
        }
    }
}
