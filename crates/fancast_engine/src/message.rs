//! The published record.
//!
//! A `Message` is immutable once produced: a monotonically increasing `seq`
//! (starting at 1), the monotonic publish timestamp in nanoseconds, and an
//! opaque payload. On the wire it is a JSON text frame with the payload
//! base64-encoded; subscribers echo `seq` back in their ACK frames.
//!
//! Fan-out shares one encoding per publish: `Outbound` pairs the `Arc`'d
//! message with its `Utf8Bytes` wire text, so per-session clones are cheap
//! reference bumps rather than re-serializations.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Serialize, Serializer};
use tungstenite::Utf8Bytes;

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub seq: u64,
    /// Monotonic nanoseconds at production time. Comparable only within this
    /// process.
    pub ts: u64,
    #[serde(serialize_with = "as_base64")]
    pub payload: Vec<u8>,
}

fn as_base64<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
}

/// A message plus its wire encoding, shared across every recipient session.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub msg: Arc<Message>,
    pub text: Utf8Bytes,
}

impl Outbound {
    pub fn encode(msg: Arc<Message>) -> Result<Outbound, serde_json::Error> {
        let text = serde_json::to_string(&*msg)?;
        Ok(Outbound {
            msg,
            text: text.into(),
        })
    }

    pub fn seq(&self) -> u64 {
        self.msg.seq
    }
}
