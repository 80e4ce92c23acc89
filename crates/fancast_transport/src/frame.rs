//! Wire frames exchanged with subscribers.
//!
//! Everything on the wire is a flat JSON text frame. Server to client:
//! `{"seq":…,"ts":…,"payload":"<base64>"}` (encoded by the engine, mirrored
//! here as `PublishedFrame` for the simulator and tests). Client to server:
//! `{"ack_seq":…}` for latency ACKs, and optionally `{"id_prefix":"…"}` as
//! the very first frame to pick the client-id prefix. Unknown fields are
//! ignored on both sides.

use serde::Deserialize;

/// Anything a subscriber may say to the server. One flat struct instead of a
/// tagged enum: every inbound frame is matched against both optional fields,
/// and a frame carrying neither is simply ignored.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ClientFrame {
    #[serde(default)]
    pub ack_seq: Option<u64>,
    #[serde(default)]
    pub id_prefix: Option<String>,
}

impl ClientFrame {
    pub fn parse(text: &str) -> Result<ClientFrame, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// A published record as the subscriber sees it.
#[derive(Debug, Clone, Deserialize)]
pub struct PublishedFrame {
    pub seq: u64,
    pub ts: u64,
    pub payload: String,
}

impl PublishedFrame {
    pub fn parse(text: &str) -> Result<PublishedFrame, serde_json::Error> {
        serde_json::from_str(text)
    }
}
