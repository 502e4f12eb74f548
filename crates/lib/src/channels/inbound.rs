//! Inbound events parsed from platform webhooks, delivered to the message pipeline.

use crate::channels::ChannelKind;
use serde_json::Value;

/// What kind of user action produced the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// A regular message (text, quick reply, button reply, captioned media).
    Message,
    /// A Messenger/Instagram postback; carries the postback payload.
    Postback { payload: String },
}

/// A normalized inbound event from a channel.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub channel: ChannelKind,
    pub sender_id: String,
    pub text: String,
    /// Platform message id (WhatsApp `wamid.*`, Messenger `mid`). Empty when the platform sent none.
    pub platform_message_id: String,
    /// Unix seconds as reported by the platform; 0 when missing.
    pub timestamp: i64,
    pub kind: EventKind,
    /// The raw platform object this event was parsed from.
    pub raw_metadata: Value,
}

impl InboundEvent {
    pub fn message(channel: ChannelKind, sender_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            channel,
            sender_id: sender_id.into(),
            text: text.into(),
            platform_message_id: String::new(),
            timestamp: 0,
            kind: EventKind::Message,
            raw_metadata: Value::Null,
        }
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.platform_message_id = id.into();
        self
    }

    pub fn with_timestamp(mut self, ts: i64) -> Self {
        self.timestamp = ts;
        self
    }

    pub fn with_raw(mut self, raw: Value) -> Self {
        self.raw_metadata = raw;
        self
    }

    /// Postback events from "Get Started" buttons.
    pub fn is_get_started(&self) -> bool {
        matches!(&self.kind, EventKind::Postback { payload } if payload.eq_ignore_ascii_case(GET_STARTED_PAYLOAD))
    }

    /// Sender and text must both be non-empty before the pipeline runs.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.sender_id.trim().is_empty() {
            return Err("missing sender id");
        }
        if self.text.trim().is_empty() && !self.is_get_started() {
            return Err("missing message text");
        }
        Ok(())
    }
}

/// Postback payload configured on the Messenger "Get Started" button.
pub const GET_STARTED_PAYLOAD: &str = "GET_STARTED";

/// An entry that looked like a message but could not become an event.
#[derive(Debug, Clone)]
pub struct RejectedEvent {
    pub reason: String,
    pub raw: Value,
}

/// Result of unwrapping one webhook payload.
#[derive(Debug, Clone, Default)]
pub struct ParsedBatch {
    pub events: Vec<InboundEvent>,
    pub rejected: Vec<RejectedEvent>,
    /// Entries deliberately ignored (status callbacks, echoes, read receipts).
    pub skipped: usize,
}

impl ParsedBatch {
    /// Push the event when it validates; otherwise record it as rejected.
    pub fn push(&mut self, event: InboundEvent) {
        match event.validate() {
            Ok(()) => self.events.push(event),
            Err(reason) => self.rejected.push(RejectedEvent {
                reason: reason.to_string(),
                raw: event.raw_metadata,
            }),
        }
    }

    pub fn reject(&mut self, reason: impl Into<String>, raw: Value) {
        self.rejected.push(RejectedEvent {
            reason: reason.into(),
            raw,
        });
    }
}
