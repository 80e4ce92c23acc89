//! WebSocket acceptance and per-session tasks.
//!
//! One task per accepted connection runs the handshake, the id-prefix
//! negotiation, and then the receiver loop inline; the sender (queue mode
//! only) and the keepalive pinger are spawned alongside it. When the
//! receiver loop ends (peer close, read error, policy drain, or server
//! shutdown) the same task performs the teardown: close the socket, join
//! the siblings, remove the session from the registry, mark it Closed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::SplitStream;
use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use fancast_config::Mode;
use fancast_engine::{Clock, Connection, DrainReason, Session, SessionLimits};

use crate::frame::ClientFrame;
use crate::server::ServerCtx;

/// How long to wait for the optional first frame naming the client's id
/// prefix before admitting the session with the default.
const PREFIX_WINDOW: Duration = Duration::from_millis(200);
const DEFAULT_PREFIX: &str = "cli";
const PREFIX_MAX_LEN: usize = 32;
/// Consecutive malformed frames tolerated before the session is drained.
const MALFORMED_LIMIT: u32 = 16;
/// Grace for the closing handshake and sibling-task joins during teardown.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Accept connections until the shutdown watch flips. Each connection gets
/// its own task; accept errors are logged and retried, never fatal.
pub async fn serve(
    listener: TcpListener,
    ctx: Arc<ServerCtx>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        let shutdown_clone = shutdown.clone();
        tokio::select! {
            changed = shutdown.changed() => match changed {
                Ok(()) => continue,
                Err(_) => break,
            },
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "connection accepted");
                    let ctx = ctx.clone();
                    tokio::spawn(handle_connection(stream, ctx, shutdown_clone));
                }
                Err(e) => {
                    warn!("accept failed: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
        }
    }
    debug!("accept loop stopped");
}

async fn handle_connection(
    stream: TcpStream,
    ctx: Arc<ServerCtx>,
    mut shutdown: watch::Receiver<bool>,
) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("websocket handshake failed: {e}");
            return;
        }
    };
    let (sink, mut reader) = ws.split();

    let prefix = negotiate_prefix(&mut reader).await;
    if *shutdown.borrow() {
        return;
    }

    let cfg = &ctx.settings;
    let id = ctx.registry.allocate_id(&prefix);
    let conn = Connection::new(sink, ctx.clock.now_ns());
    let queue_capacity = match cfg.delivery.mode {
        Mode::Queue => Some(cfg.delivery.maxsize as usize),
        Mode::Naive => None,
    };
    let session = Arc::new(Session::new(
        id.clone(),
        conn,
        queue_capacity,
        SessionLimits::from(&cfg.delivery),
    ));
    ctx.registry.insert(session.clone());
    info!(client = %id, clients = ctx.registry.len(), "client connected");

    let sender = session
        .queue()
        .is_some()
        .then(|| tokio::spawn(run_sender(session.clone())));
    let keepalive = tokio::spawn(run_keepalive(
        session.clone(),
        ctx.clock.clone(),
        cfg.server.ping_interval(),
        cfg.server.ping_timeout(),
    ));

    run_receiver(&mut reader, &session, &ctx.clock, &mut shutdown).await;

    // Draining -> Closed: release the connection, collect the sibling tasks,
    // leave the registry.
    if session.is_open() {
        let reason = if *shutdown.borrow() {
            DrainReason::Shutdown
        } else {
            DrainReason::PeerClosed
        };
        session.begin_drain(reason);
    }
    let _ = tokio::time::timeout(CLOSE_GRACE, session.conn().close()).await;
    if let Some(handle) = sender {
        finish(handle).await;
    }
    finish(keepalive).await;
    ctx.registry.remove(&id);
    session.mark_closed();
    let reason = session
        .drain_reason()
        .map(|r| r.to_string())
        .unwrap_or_default();
    info!(
        client = %id,
        %reason,
        clients = ctx.registry.len(),
        "client disconnected"
    );
}

/// Read the optional introduction frame. Anything else that arrives inside
/// the window is not a negotiation and is dropped; at this point nothing
/// has been sent, so there is nothing meaningful to ACK.
async fn negotiate_prefix(reader: &mut SplitStream<WebSocketStream<TcpStream>>) -> String {
    if let Ok(Some(Ok(frame))) = tokio::time::timeout(PREFIX_WINDOW, reader.next()).await {
        if let Ok(text) = frame.to_text() {
            if let Ok(parsed) = ClientFrame::parse(text) {
                if let Some(mut prefix) = parsed.id_prefix {
                    prefix.truncate(PREFIX_MAX_LEN);
                    if !prefix.is_empty() {
                        return prefix;
                    }
                }
            }
        }
    }
    DEFAULT_PREFIX.to_string()
}

/// Queue mode: pull the head of the session queue and transmit it, in
/// publish order, until the session drains or the queue handle disappears.
async fn run_sender(session: Arc<Session>) {
    let mut signal = session.drain_signal();
    loop {
        let out = tokio::select! {
            _ = signal.wait_for(|stop| *stop) => break,
            out = session.next_message() => match out {
                Some(out) => out,
                None => break,
            },
        };
        let started = Instant::now();
        match session.conn().send_text(out.text.clone()).await {
            Ok(()) => session.record_send(out.seq(), out.msg.ts, started.elapsed()),
            Err(e) => {
                debug!(client = %session.id(), "send failed: {e}");
                session.begin_drain(DrainReason::TransportError);
                break;
            }
        }
    }
}

/// Ping on a fixed cadence and drain the session when the peer stops
/// answering. The receiver refreshes the liveness stamp on every pong.
async fn run_keepalive(
    session: Arc<Session>,
    clock: Arc<Clock>,
    interval: Duration,
    timeout_after: Duration,
) {
    let mut signal = session.drain_signal();
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = signal.wait_for(|stop| *stop) => break,
            _ = ticker.tick() => {}
        }
        let idle = Duration::from_nanos(
            clock
                .now_ns()
                .saturating_sub(session.conn().last_pong_ns()),
        );
        if idle > interval + timeout_after {
            session.begin_drain(DrainReason::PingTimeout);
            break;
        }
        if let Err(e) = session.conn().ping().await {
            debug!(client = %session.id(), "ping failed: {e}");
            session.begin_drain(DrainReason::TransportError);
            break;
        }
    }
}

async fn run_receiver(
    reader: &mut SplitStream<WebSocketStream<TcpStream>>,
    session: &Arc<Session>,
    clock: &Arc<Clock>,
    shutdown: &mut watch::Receiver<bool>,
) {
    let mut signal = session.drain_signal();
    let mut malformed_run: u32 = 0;
    loop {
        let frame = tokio::select! {
            _ = signal.wait_for(|stop| *stop) => break,
            _ = shutdown.wait_for(|stop| *stop) => break,
            frame = reader.next() => frame,
        };
        let frame = match frame {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                debug!(client = %session.id(), "read failed: {e}");
                session.begin_drain(DrainReason::TransportError);
                break;
            }
            None => {
                session.begin_drain(DrainReason::PeerClosed);
                break;
            }
        };
        match frame {
            WsMessage::Text(text) => match ClientFrame::parse(text.as_str()) {
                Ok(parsed) => {
                    malformed_run = 0;
                    if let Some(seq) = parsed.ack_seq {
                        if !session.record_ack(seq, clock.now_ns()) {
                            debug!(client = %session.id(), seq, "ack for untracked seq");
                        }
                    }
                }
                Err(e) => {
                    debug!(client = %session.id(), "malformed frame: {e}");
                    malformed_run += 1;
                    if malformed_run >= MALFORMED_LIMIT {
                        session.begin_drain(DrainReason::MalformedFrames);
                        break;
                    }
                }
            },
            WsMessage::Pong(_) => session.conn().note_pong(clock.now_ns()),
            WsMessage::Close(_) => {
                session.begin_drain(DrainReason::PeerClosed);
                break;
            }
            // Pings are answered by the protocol layer; binary frames mean
            // nothing in this protocol.
            _ => {}
        }
    }
}

async fn finish(mut handle: JoinHandle<()>) {
    if tokio::time::timeout(CLOSE_GRACE, &mut handle).await.is_err() {
        handle.abort();
    }
}
