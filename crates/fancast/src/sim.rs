//! Load-generating client simulator.
//!
//! Each worker opens one subscription, announces its id prefix, ACKs every
//! frame after an optional processing delay (the knob that makes a client
//! "slow"), infers drops from gaps in the sequence numbers, and reconnects
//! with exponential backoff until the run duration elapses.
//!
//! Latency is reported relative to the first received frame: server
//! timestamps are monotonic and only comparable within the server process,
//! so the simulator measures how much the stream falls behind its own
//! baseline rather than an absolute wall-clock delta.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::json;
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tungstenite::protocol::Message as WsMessage;

use fancast_engine::stats::percentile;
use fancast_transport::PublishedFrame;

#[derive(clap::Args)]
pub struct ClientArgs {
    /// WebSocket server URL
    #[arg(long, default_value = "ws://127.0.0.1:8765")]
    url: String,
    /// Number of concurrent connections
    #[arg(long, default_value_t = 1)]
    concurrency: u32,
    /// Processing delay per message (ms)
    #[arg(long, default_value_t = 0)]
    slow_ms: u64,
    /// Random latency jitter (+/- ms)
    #[arg(long, default_value_t = 0)]
    jitter_ms: u64,
    /// Run duration (seconds)
    #[arg(long, default_value_t = 30)]
    duration: u64,
    /// Print stats every N messages (0 disables)
    #[arg(long, default_value_t = 100)]
    print_every: u64,
    /// Client ID prefix announced to the server
    #[arg(long, default_value = "cli")]
    id_prefix: String,
}

#[derive(Debug, Default)]
struct ClientStats {
    count: u64,
    last_seq: u64,
    drops_inferred: u64,
    lag_ms: Vec<f64>,
    /// First frame's (publish ts, local receive instant): the baseline every
    /// later frame's lag is measured against.
    baseline: Option<(u64, Instant)>,
}

impl ClientStats {
    fn observe(&mut self, frame: &PublishedFrame, received: Instant) {
        match self.baseline {
            None => self.baseline = Some((frame.ts, received)),
            Some((ts0, recv0)) => {
                let wire_ms = (received - recv0).as_secs_f64() * 1000.0;
                let publish_ms = frame.ts.saturating_sub(ts0) as f64 / 1_000_000.0;
                self.lag_ms.push(wire_ms - publish_ms);
            }
        }
        if self.last_seq > 0 && frame.seq > self.last_seq + 1 {
            self.drops_inferred += frame.seq - self.last_seq - 1;
        }
        self.last_seq = frame.seq;
        self.count += 1;
    }

    fn rate(&self) -> f64 {
        match self.baseline {
            Some((_, recv0)) => {
                let elapsed = recv0.elapsed().as_secs_f64();
                if elapsed > 0.0 {
                    self.count as f64 / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }

    fn lag_percentiles(&self) -> (f64, f64) {
        let mut lags = self.lag_ms.clone();
        let p50 = percentile(&mut lags, 0.50).unwrap_or(0.0);
        let p95 = percentile(&mut lags, 0.95).unwrap_or(0.0);
        (p50, p95)
    }
}

pub async fn run(args: ClientArgs) -> ExitCode {
    println!(
        "Starting {} client(s) for {}s against {}",
        args.concurrency, args.duration, args.url
    );
    if args.slow_ms > 0 {
        println!("Slow mode: {}ms delay per message", args.slow_ms);
    }
    if args.jitter_ms > 0 {
        println!("Jitter: +/-{}ms", args.jitter_ms);
    }

    let args = Arc::new(args);
    let started = Instant::now();
    let deadline = started + Duration::from_secs(args.duration);

    let mut workers = Vec::new();
    for index in 0..args.concurrency {
        workers.push(tokio::spawn(worker(args.clone(), index, deadline)));
    }

    let mut results = Vec::new();
    for (index, worker) in workers.into_iter().enumerate() {
        match worker.await {
            Ok(stats) => results.push(stats),
            Err(e) => {
                eprintln!("worker {index} failed: {e}");
                results.push(ClientStats::default());
            }
        }
    }

    print_summary(&args, &results, started.elapsed());
    ExitCode::SUCCESS
}

async fn worker(args: Arc<ClientArgs>, index: u32, deadline: Instant) -> ClientStats {
    let name = format!("{}-{}", args.id_prefix, index);
    let mut stats = ClientStats::default();
    let mut backoff = Duration::from_secs(1);

    while Instant::now() < deadline {
        match run_connection(&args, &name, deadline, &mut stats).await {
            Ok(()) => break, // duration elapsed
            Err(e) => println!("[{name}] connection error: {e}"),
        }
        if Instant::now() + backoff >= deadline {
            break;
        }
        println!("[{name}] reconnecting in {}s...", backoff.as_secs());
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(Duration::from_secs(30));
    }

    stats
}

async fn run_connection(
    args: &ClientArgs,
    name: &str,
    deadline: Instant,
    stats: &mut ClientStats,
) -> Result<(), tungstenite::Error> {
    let (mut ws, _) = connect_async(args.url.as_str()).await?;
    println!("[{name}] connected to {}", args.url);

    // Introduce ourselves so the server mints a recognizable client id.
    ws.send(WsMessage::text(
        json!({ "id_prefix": &args.id_prefix }).to_string(),
    ))
    .await?;

    loop {
        let frame = tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                let _ = ws.close(None).await;
                return Ok(());
            }
            frame = ws.next() => frame,
        };
        let Some(frame) = frame else {
            return Err(tungstenite::Error::ConnectionClosed);
        };
        match frame? {
            WsMessage::Text(text) => {
                let received = Instant::now();
                match PublishedFrame::parse(text.as_str()) {
                    Ok(published) => {
                        stats.observe(&published, received);
                        if args.slow_ms > 0 {
                            tokio::time::sleep(jittered(args.slow_ms, args.jitter_ms)).await;
                        }
                        ws.send(WsMessage::text(
                            json!({ "ack_seq": published.seq }).to_string(),
                        ))
                        .await?;
                        if args.print_every > 0 && stats.count % args.print_every == 0 {
                            print_progress(name, stats);
                        }
                    }
                    Err(_) => println!("[{name}] invalid frame"),
                }
            }
            WsMessage::Close(_) => return Err(tungstenite::Error::ConnectionClosed),
            _ => {}
        }
    }
}

fn jittered(slow_ms: u64, jitter_ms: u64) -> Duration {
    let jitter = if jitter_ms > 0 {
        (rand::rng().random::<f64>() - 0.5) * 2.0 * jitter_ms as f64
    } else {
        0.0
    };
    Duration::from_secs_f64((slow_ms as f64 + jitter).max(0.0) / 1000.0)
}

fn print_progress(name: &str, stats: &ClientStats) {
    let (p50, p95) = stats.lag_percentiles();
    println!(
        "[{name}] count {:>7} | rate {:>7.1}/s | lag p50/p95 {:>6.1}/{:>6.1}ms | drops {}",
        stats.count,
        stats.rate(),
        p50,
        p95,
        stats.drops_inferred
    );
}

fn print_summary(args: &ClientArgs, results: &[ClientStats], runtime: Duration) {
    let total_messages: u64 = results.iter().map(|s| s.count).sum();
    let total_drops: u64 = results.iter().map(|s| s.drops_inferred).sum();
    let runtime_s = runtime.as_secs_f64();

    println!();
    println!("{}", "=".repeat(78));
    println!("FINAL SUMMARY");
    println!("{}", "=".repeat(78));
    println!("Runtime: {runtime_s:.1}s");
    println!("Messages: {total_messages}");
    println!("Inferred drops: {total_drops}");
    if runtime_s > 0.0 {
        println!("Overall rate: {:.1} msg/s", total_messages as f64 / runtime_s);
    }
    println!();
    println!(
        "{:<15} {:>10} {:>8} {:>10} {:>10} {:>8}",
        "Client", "Messages", "Rate/s", "LagP50", "LagP95", "Drops"
    );
    println!("{}", "-".repeat(78));
    for (index, stats) in results.iter().enumerate() {
        let name = format!("{}-{}", args.id_prefix, index);
        let rate = if runtime_s > 0.0 {
            stats.count as f64 / runtime_s
        } else {
            0.0
        };
        let (p50, p95) = stats.lag_percentiles();
        println!(
            "{name:<15} {:>10} {rate:>8.1} {p50:>9.1}ms {p95:>9.1}ms {:>8}",
            stats.count, stats.drops_inferred
        );
    }
}
