//! Facebook Messenger channel (Messenger Platform Send API, `X-Hub-Signature` sha1).
//!
//! The `entry[].messaging[]` envelope and the Send API body are shared with Instagram Direct.

use crate::channels::format::{format_outbound_text, truncate_chars};
use crate::channels::graph::{GraphAuth, GraphClient};
use crate::channels::inbound::{EventKind, InboundEvent, ParsedBatch};
use crate::channels::signature::SignatureAlgorithm;
use crate::channels::types::{
    ChannelError, ChannelKind, ChannelSettings, ChannelState, ConnectionTest, ReplyFormat,
    SendOptions, SendResult, WebhookOutcome,
};
use crate::channels::{missing_fields, settle_state, value_as_string, value_as_timestamp, Channel};
use crate::config::MessengerConfig;
use crate::pipeline::MessagePipeline;
use async_trait::async_trait;
use serde_json::{json, Value};

const MAX_TEXT_CHARS: usize = 2000;
pub(crate) const MAX_QUICK_REPLIES: usize = 13;
const MAX_TEMPLATE_BUTTONS: usize = 3;
const MAX_TITLE_CHARS: usize = 20;

/// Unwrap `entry[].messaging[]` into events for `channel`.
///
/// Echoes of our own sends, delivery and read receipts, and reactions are skipped. Postbacks carry
/// their payload and use the button title as text.
pub(crate) fn parse_messaging_payload(channel: ChannelKind, payload: &Value) -> ParsedBatch {
    let mut batch = ParsedBatch::default();
    let entries = payload
        .get("entry")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for entry in entries {
        let messaging = entry
            .get("messaging")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for item in messaging {
            let sender = value_as_string(item.pointer("/sender/id"));
            let timestamp = value_as_timestamp(item.get("timestamp"));
            if let Some(message) = item.get("message") {
                if message.get("is_echo").and_then(Value::as_bool).unwrap_or(false) {
                    batch.skipped += 1;
                    continue;
                }
                let text = message
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                batch.push(
                    InboundEvent::message(channel, sender, text)
                        .with_message_id(value_as_string(message.get("mid")))
                        .with_timestamp(timestamp)
                        .with_raw(item.clone()),
                );
            } else if let Some(postback) = item.get("postback") {
                let payload = postback
                    .get("payload")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let title = postback
                    .get("title")
                    .and_then(Value::as_str)
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or(&payload)
                    .to_string();
                let mut event = InboundEvent::message(channel, sender, title)
                    .with_message_id(value_as_string(postback.get("mid")))
                    .with_timestamp(timestamp)
                    .with_raw(item.clone());
                event.kind = EventKind::Postback { payload };
                batch.push(event);
            } else {
                // delivery, read, reaction, optin
                batch.skipped += 1;
            }
        }
    }
    batch
}

/// Send API body for a reply. `button_templates` is false on Instagram, where templates fall back to text.
pub(crate) fn send_api_body(
    recipient_id: &str,
    text: &str,
    options: &SendOptions,
    button_templates: bool,
) -> Result<Value, ChannelError> {
    if text.is_empty() {
        return Err(ChannelError::EmptyMessage);
    }
    let message = match &options.format {
        ReplyFormat::QuickReplies { replies } if !replies.is_empty() => {
            let quick_replies: Vec<Value> = replies
                .iter()
                .take(MAX_QUICK_REPLIES)
                .map(|r| {
                    json!({
                        "content_type": "text",
                        "title": truncate_chars(&r.title, MAX_TITLE_CHARS),
                        "payload": r.payload(),
                    })
                })
                .collect();
            json!({ "text": text, "quick_replies": quick_replies })
        }
        ReplyFormat::Template(spec) if button_templates && !spec.parameters.is_empty() => {
            let buttons: Vec<Value> = spec
                .parameters
                .iter()
                .take(MAX_TEMPLATE_BUTTONS)
                .map(|p| {
                    json!({
                        "type": "postback",
                        "title": truncate_chars(p, MAX_TITLE_CHARS),
                        "payload": p,
                    })
                })
                .collect();
            json!({
                "attachment": {
                    "type": "template",
                    "payload": { "template_type": "button", "text": text, "buttons": buttons }
                }
            })
        }
        _ => json!({ "text": text }),
    };
    Ok(json!({
        "recipient": { "id": recipient_id },
        "messaging_type": "RESPONSE",
        "message": message,
    }))
}

/// POST `/me/messages` and return the platform message id.
pub(crate) async fn post_send_api(
    graph: &GraphClient,
    access_token: &str,
    body: &Value,
) -> Result<Option<String>, ChannelError> {
    let res = graph
        .post_json("me/messages", GraphAuth::Query(access_token), body)
        .await?;
    Ok(res
        .get("message_id")
        .and_then(Value::as_str)
        .map(str::to_string))
}

pub struct MessengerChannel {
    settings: MessengerConfig,
    state: ChannelState,
    graph: GraphClient,
}

impl Default for MessengerChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MessengerChannel {
    pub fn new() -> Self {
        Self {
            settings: MessengerConfig::default(),
            state: ChannelState::Unconfigured,
            graph: GraphClient::new(None),
        }
    }

    pub fn from_config(config: &MessengerConfig) -> Self {
        let mut channel = Self::new();
        channel.initialize(ChannelSettings::Messenger(config.clone()));
        channel
    }

    async fn try_send(
        &self,
        recipient_id: &str,
        text: &str,
        options: &SendOptions,
    ) -> Result<Option<String>, ChannelError> {
        if !self.is_available() {
            return Err(ChannelError::Unavailable);
        }
        let recipient = recipient_id.trim();
        if recipient.is_empty() {
            return Err(ChannelError::InvalidRecipient);
        }
        let text = format_outbound_text(text, MAX_TEXT_CHARS);
        let body = send_api_body(recipient, &text, options, true)?;
        post_send_api(&self.graph, &self.settings.page_access_token, &body).await
    }
}

#[async_trait]
impl Channel for MessengerChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Messenger
    }

    fn state(&self) -> ChannelState {
        self.state
    }

    fn initialize(&mut self, settings: ChannelSettings) -> bool {
        let settings = match settings {
            ChannelSettings::Messenger(settings) => settings,
            other => {
                log::warn!("messenger: ignoring settings for {}", other.kind());
                return false;
            }
        };
        self.graph = GraphClient::new(settings.api_base.as_deref());
        self.settings = settings;
        let missing = self.missing_credentials();
        self.state = settle_state(ChannelKind::Messenger, self.settings.enabled, &missing);
        missing.is_empty()
    }

    fn missing_credentials(&self) -> Vec<&'static str> {
        missing_fields(&[
            ("pageAccessToken", &self.settings.page_access_token),
            ("verifyToken", &self.settings.verify_token),
            ("appSecret", &self.settings.app_secret),
        ])
    }

    fn verify_token(&self) -> &str {
        &self.settings.verify_token
    }

    fn welcome_message(&self) -> &str {
        &self.settings.welcome_message
    }

    fn app_secret(&self) -> &str {
        &self.settings.app_secret
    }

    fn signature_algorithm(&self) -> SignatureAlgorithm {
        SignatureAlgorithm::Sha1
    }

    fn parse_webhook(&self, payload: &Value) -> ParsedBatch {
        parse_messaging_payload(ChannelKind::Messenger, payload)
    }

    async fn send_message(&self, recipient_id: &str, text: &str, options: &SendOptions) -> SendResult {
        let result = self.try_send(recipient_id, text, options).await;
        match &result {
            Ok(id) => log::info!("messenger: sent message {}", id.as_deref().unwrap_or("-")),
            Err(e) => log::warn!("messenger: send to {} failed: {}", recipient_id, e),
        }
        result.into()
    }

    async fn test_connection(&self) -> ConnectionTest {
        if !self.is_available() {
            return ConnectionTest::failed(ChannelError::Unavailable.to_string());
        }
        match self
            .graph
            .get_json("me", GraphAuth::Query(&self.settings.page_access_token), "id,name")
            .await
        {
            Ok(body) => ConnectionTest::ok(json!({
                "pageId": body.get("id"),
                "pageName": body.get("name"),
            })),
            Err(e) => ConnectionTest::failed(e.to_string()),
        }
    }

    async fn process_webhook(&self, payload: &Value, pipeline: &MessagePipeline) -> WebhookOutcome {
        pipeline.dispatch_batch(self, payload).await
    }
}
