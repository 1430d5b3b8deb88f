//! Wire envelope codec
//!
//! Wire format: one JSON text message per frame,
//! `{"type": "...", "event": "...", "payload": <any>, "seq": <i64>}`.
//! `payload` stays undecoded here; the event decoders in [`crate::events`]
//! turn it into typed structs.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Transport keepalive request
pub const KIND_PING: &str = "ping";
/// Transport keepalive response
pub const KIND_PONG: &str = "pong";
/// Topic subscription request, topic name in `event`
pub const KIND_SUBSCRIBE: &str = "subscribe";
/// Topic unsubscription request, topic name in `event`
pub const KIND_UNSUBSCRIBE: &str = "unsubscribe";
/// Application event frame
pub const KIND_EVENT: &str = "event";

/// How the reader should treat a decoded frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClass {
    /// ping/pong, consumed by the connection and never surfaced
    Keepalive,
    /// subscribe/unsubscribe
    Control,
    /// Everything else, routed to the dispatcher by `event`
    Application,
}

/// The minimal wire unit exchanged with the hub
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub event: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub seq: i64,
}

fn is_zero(seq: &i64) -> bool {
    *seq == 0
}

impl Envelope {
    /// Application-level ping sent by the heartbeat loop
    pub fn ping(seq: i64) -> Self {
        Self {
            kind: KIND_PING.to_string(),
            event: KIND_PING.to_string(),
            payload: Value::Null,
            seq,
        }
    }

    pub fn subscribe(topic: impl Into<String>) -> Self {
        Self::control(KIND_SUBSCRIBE, topic.into())
    }

    pub fn unsubscribe(topic: impl Into<String>) -> Self {
        Self::control(KIND_UNSUBSCRIBE, topic.into())
    }

    fn control(kind: &str, topic: String) -> Self {
        Self {
            kind: kind.to_string(),
            event: topic,
            payload: Value::Null,
            seq: 0,
        }
    }

    /// Application event with a structured payload
    pub fn event(event: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: KIND_EVENT.to_string(),
            event: event.into(),
            payload,
            seq: 0,
        }
    }

    /// Classify the frame.
    ///
    /// Keepalives are recognized by either field since hubs are inconsistent
    /// about which one they set on a pong.
    pub fn class(&self) -> FrameClass {
        let is_keepalive = |s: &str| s == KIND_PING || s == KIND_PONG;
        if is_keepalive(&self.kind) || is_keepalive(&self.event) {
            FrameClass::Keepalive
        } else if self.kind == KIND_SUBSCRIBE || self.kind == KIND_UNSUBSCRIBE {
            FrameClass::Control
        } else {
            FrameClass::Application
        }
    }

    pub fn is_keepalive(&self) -> bool {
        self.class() == FrameClass::Keepalive
    }
}

/// Encode an envelope as a JSON text frame
pub fn encode(envelope: &Envelope) -> Result<String> {
    serde_json::to_string(envelope).map_err(Error::Encode)
}

/// Decode a JSON text or binary frame into an envelope
pub fn decode(bytes: &[u8]) -> Result<Envelope> {
    serde_json::from_slice(bytes).map_err(Error::Decode)
}

/// Per-client sequence token source.
///
/// Values are wall-clock nanoseconds, bumped past the previous value when the
/// clock stalls or steps backwards, so tokens from one client never repeat.
#[derive(Debug, Default)]
pub struct SeqGenerator {
    last: AtomicI64,
}

impl SeqGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> i64 {
        let now = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let step = |last: i64| now.max(last.saturating_add(1));
        let prev = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| Some(step(last)))
            .unwrap_or_else(|last| last);
        step(prev)
    }
}
