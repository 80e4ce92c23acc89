//! Exclusive ownership of one WebSocket write half.
//!
//! The read half stays with the transport's receiver task; everything that
//! writes (the session sender, the naive dispatcher, the keepalive pinger,
//! and the closing teardown) goes through the async mutex here, so frames
//! never interleave.

use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::WebSocketStream;
use tungstenite::protocol::Message as WsMessage;
use tungstenite::{Bytes, Utf8Bytes};

pub type WsSink = SplitSink<WebSocketStream<TcpStream>, WsMessage>;

#[derive(Debug)]
pub struct Connection {
    writer: Mutex<WsSink>,
    /// Monotonic ns of the most recent pong (or connect). Read by the
    /// keepalive task, written by the receiver.
    last_pong_ns: AtomicU64,
}

impl Connection {
    pub fn new(writer: WsSink, now_ns: u64) -> Self {
        Self {
            writer: Mutex::new(writer),
            last_pong_ns: AtomicU64::new(now_ns),
        }
    }

    pub async fn send_text(&self, text: Utf8Bytes) -> Result<(), tungstenite::Error> {
        self.writer.lock().await.send(WsMessage::Text(text)).await
    }

    pub async fn ping(&self) -> Result<(), tungstenite::Error> {
        self.writer
            .lock()
            .await
            .send(WsMessage::Ping(Bytes::new()))
            .await
    }

    /// Best-effort close; errors are irrelevant at this point.
    pub async fn close(&self) {
        let _ = self.writer.lock().await.close().await;
    }

    pub fn note_pong(&self, now_ns: u64) {
        self.last_pong_ns.store(now_ns, Ordering::Relaxed);
    }

    pub fn last_pong_ns(&self) -> u64 {
        self.last_pong_ns.load(Ordering::Relaxed)
    }
}
