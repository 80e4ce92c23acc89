use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use fancast_engine::{Message, Outbound};

use crate::frame::{ClientFrame, PublishedFrame};

#[test]
fn client_frame_parses_an_ack() {
    let frame = ClientFrame::parse(r#"{"ack_seq":42}"#).unwrap();
    assert_eq!(frame.ack_seq, Some(42));
    assert_eq!(frame.id_prefix, None);
}

#[test]
fn client_frame_parses_an_introduction() {
    let frame = ClientFrame::parse(r#"{"id_prefix":"fast"}"#).unwrap();
    assert_eq!(frame.id_prefix.as_deref(), Some("fast"));
    assert_eq!(frame.ack_seq, None);
}

#[test]
fn client_frame_ignores_unknown_fields() {
    let frame = ClientFrame::parse(r#"{"ack_seq":3,"shard":"a","v":2}"#).unwrap();
    assert_eq!(frame.ack_seq, Some(3));
}

#[test]
fn client_frame_rejects_malformed_input() {
    assert!(ClientFrame::parse("definitely not json").is_err());
    assert!(ClientFrame::parse(r#"{"ack_seq":"not a number"}"#).is_err());
}

#[test]
fn published_frame_mirrors_the_engine_encoding() {
    let out = Outbound::encode(Arc::new(Message {
        seq: 9,
        ts: 123_456,
        payload: vec![1, 2, 3],
    }))
    .unwrap();

    let frame = PublishedFrame::parse(out.text.as_str()).unwrap();
    assert_eq!(frame.seq, 9);
    assert_eq!(frame.ts, 123_456);
    assert_eq!(STANDARD.decode(frame.payload).unwrap(), vec![1, 2, 3]);
}
