//! Messaging channels (WhatsApp, Messenger, Instagram).
//!
//! Each platform implements `Channel`: settings and availability, webhook trust (handshake and
//! HMAC), payload parsing, and outbound sends through the Graph API. The registry maps a
//! `ChannelKind` to one shared instance and dispatches webhook deliveries to it.

mod format;
mod graph;
mod inbound;
mod instagram;
mod messenger;
mod registry;
mod signature;
mod types;
mod whatsapp;

pub use format::{expand_emoji_shortcodes, format_outbound_text, strip_html, truncate_chars};
pub use graph::{graph_error_message, GraphAuth, GraphClient, GRAPH_API_BASE};
pub use inbound::{EventKind, InboundEvent, ParsedBatch, RejectedEvent, GET_STARTED_PAYLOAD};
pub use instagram::InstagramChannel;
pub use messenger::MessengerChannel;
pub use registry::{build_channel, ChannelRegistry};
pub use signature::{sign_body, verify_signature, SignatureAlgorithm};
pub use types::{
    ChannelError, ChannelKind, ChannelSettings, ChannelState, ChannelStatus, ConnectionTest,
    HandshakeOutcome, HandshakeQuery, QuickReply, ReplyFormat, SendOptions, SendResult,
    TemplateSpec, WebhookOutcome, ERR_CHANNEL_NOT_AVAILABLE, ERR_CHANNEL_NOT_FOUND,
    ERR_INVALID_PAYLOAD, ERR_INVALID_SIGNATURE, ERR_SIGNATURE_REQUIRED, ERR_VERIFICATION_FAILED,
};
pub use whatsapp::WhatsAppChannel;

use crate::pipeline::MessagePipeline;
use async_trait::async_trait;
use serde_json::Value;

/// One messaging platform.
///
/// Instances are immutable once registered; a settings update builds a new instance and the
/// registry swaps it in.
#[async_trait]
pub trait Channel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    fn state(&self) -> ChannelState;

    /// Enabled and every mandatory credential present.
    fn is_available(&self) -> bool {
        self.state() == ChannelState::Available
    }

    /// Store settings. Returns false (and logs a warning) when a mandatory credential is missing
    /// or the settings belong to another channel; the instance stays, disabled.
    fn initialize(&mut self, settings: ChannelSettings) -> bool;

    /// Names of mandatory settings that are empty.
    fn missing_credentials(&self) -> Vec<&'static str>;

    fn verify_token(&self) -> &str;

    fn welcome_message(&self) -> &str;

    fn app_secret(&self) -> &str;

    fn signature_algorithm(&self) -> SignatureAlgorithm;

    /// HMAC of `raw_body` under the app secret, compared in constant time.
    fn verify_webhook(&self, signature: &str, raw_body: &[u8]) -> bool {
        verify_signature(
            self.signature_algorithm(),
            self.app_secret(),
            signature,
            raw_body,
        )
    }

    /// GET subscription handshake: echo the challenge when mode is `subscribe` and the token matches.
    fn verify_subscription(&self, query: &HandshakeQuery) -> HandshakeOutcome {
        if !self.is_available() {
            log::warn!("{}: handshake on unavailable channel", self.kind());
            return HandshakeOutcome::Rejected(ERR_CHANNEL_NOT_AVAILABLE);
        }
        let mode = query.mode.as_deref().unwrap_or_default();
        let token = query.verify_token.as_deref().unwrap_or_default();
        let expected = self.verify_token();
        if mode == "subscribe" && !expected.is_empty() && token == expected {
            log::info!("{}: webhook subscription verified", self.kind());
            HandshakeOutcome::Challenge(query.challenge.clone().unwrap_or_default())
        } else {
            log::warn!("{}: webhook verification failed (mode {:?})", self.kind(), mode);
            HandshakeOutcome::Rejected(ERR_VERIFICATION_FAILED)
        }
    }

    /// Unwrap a webhook payload into validated events, rejects, and skipped entries. No side effects.
    fn parse_webhook(&self, payload: &Value) -> ParsedBatch;

    /// Format and send a reply. Never fails; errors come back in the result.
    async fn send_message(&self, recipient_id: &str, text: &str, options: &SendOptions)
        -> SendResult;

    /// Lightweight read-only API call for admin tooling.
    async fn test_connection(&self) -> ConnectionTest;

    /// Run each event of a POST delivery through the pipeline.
    async fn process_webhook(&self, payload: &Value, pipeline: &MessagePipeline)
        -> WebhookOutcome;
}

/// Names whose value is blank.
pub(crate) fn missing_fields(fields: &[(&'static str, &str)]) -> Vec<&'static str> {
    fields
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| *name)
        .collect()
}

/// Derive the state after `initialize` and warn about missing credentials.
pub(crate) fn settle_state(kind: ChannelKind, enabled: bool, missing: &[&'static str]) -> ChannelState {
    if !missing.is_empty() {
        log::warn!(
            "{}: missing credentials ({}); channel disabled",
            kind,
            missing.join(", ")
        );
        return ChannelState::Disabled;
    }
    if !enabled {
        log::info!("{}: disabled in config", kind);
        return ChannelState::Disabled;
    }
    ChannelState::Available
}

/// Read a string or number field as text (Graph ids and timestamps come in both shapes).
pub(crate) fn value_as_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Platform timestamp in seconds; Messenger sends milliseconds.
pub(crate) fn value_as_timestamp(value: Option<&Value>) -> i64 {
    let raw = match value {
        Some(Value::Number(n)) => n.as_i64().unwrap_or_default(),
        Some(Value::String(s)) => s.trim().parse().unwrap_or_default(),
        _ => 0,
    };
    if raw > 100_000_000_000 {
        raw / 1000
    } else {
        raw
    }
}
