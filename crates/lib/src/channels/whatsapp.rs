//! WhatsApp Cloud API channel.
//!
//! Inbound: `entry[].changes[].value.messages[]`, signed with `X-Hub-Signature-256`.
//! Outbound: `POST /{phone_number_id}/messages` with a bearer token.

use crate::channels::format::{format_outbound_text, truncate_chars};
use crate::channels::graph::{GraphAuth, GraphClient};
use crate::channels::inbound::{InboundEvent, ParsedBatch};
use crate::channels::signature::SignatureAlgorithm;
use crate::channels::types::{
    ChannelError, ChannelKind, ChannelSettings, ChannelState, ConnectionTest, ReplyFormat,
    SendOptions, SendResult, WebhookOutcome,
};
use crate::channels::{missing_fields, settle_state, value_as_string, value_as_timestamp, Channel};
use crate::config::WhatsAppConfig;
use crate::pipeline::MessagePipeline;
use async_trait::async_trait;
use serde_json::{json, Value};

const MAX_TEXT_CHARS: usize = 4096;
const MAX_BUTTONS: usize = 3;
const MAX_BUTTON_TITLE_CHARS: usize = 20;

pub struct WhatsAppChannel {
    settings: WhatsAppConfig,
    state: ChannelState,
    graph: GraphClient,
}

impl Default for WhatsAppChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl WhatsAppChannel {
    pub fn new() -> Self {
        Self {
            settings: WhatsAppConfig::default(),
            state: ChannelState::Unconfigured,
            graph: GraphClient::new(None),
        }
    }

    /// Build and initialize from config in one step.
    pub fn from_config(config: &WhatsAppConfig) -> Self {
        let mut channel = Self::new();
        channel.initialize(ChannelSettings::WhatsApp(config.clone()));
        channel
    }

    fn message_body(&self, to: &str, text: &str, options: &SendOptions) -> Result<Value, ChannelError> {
        let mut body = json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
        });
        match &options.format {
            ReplyFormat::Template(spec) => {
                let mut template = json!({
                    "name": spec.name,
                    "language": { "code": spec.language },
                });
                if !spec.parameters.is_empty() {
                    let parameters: Vec<Value> = spec
                        .parameters
                        .iter()
                        .map(|p| json!({ "type": "text", "text": p }))
                        .collect();
                    template["components"] = json!([{ "type": "body", "parameters": parameters }]);
                }
                body["type"] = json!("template");
                body["template"] = template;
            }
            ReplyFormat::QuickReplies { replies } if !replies.is_empty() => {
                if text.is_empty() {
                    return Err(ChannelError::EmptyMessage);
                }
                let buttons: Vec<Value> = replies
                    .iter()
                    .take(MAX_BUTTONS)
                    .map(|r| {
                        json!({
                            "type": "reply",
                            "reply": {
                                "id": r.payload(),
                                "title": truncate_chars(&r.title, MAX_BUTTON_TITLE_CHARS),
                            }
                        })
                    })
                    .collect();
                body["type"] = json!("interactive");
                body["interactive"] = json!({
                    "type": "button",
                    "body": { "text": text },
                    "action": { "buttons": buttons },
                });
            }
            _ => {
                if text.is_empty() {
                    return Err(ChannelError::EmptyMessage);
                }
                body["type"] = json!("text");
                body["text"] = json!({ "preview_url": options.preview_url, "body": text });
            }
        }
        Ok(body)
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
        let to = recipient_id.trim();
        if to.is_empty() {
            return Err(ChannelError::InvalidRecipient);
        }
        let text = format_outbound_text(text, MAX_TEXT_CHARS);
        let body = self.message_body(to, &text, options)?;
        let path = format!("{}/messages", self.settings.phone_number_id);
        let res = self
            .graph
            .post_json(&path, GraphAuth::Bearer(&self.settings.access_token), &body)
            .await?;
        Ok(res
            .pointer("/messages/0/id")
            .and_then(Value::as_str)
            .map(str::to_string))
    }
}

/// Extract user-visible text from one WhatsApp message object.
fn message_text(message: &Value) -> Option<String> {
    let kind = message.get("type").and_then(Value::as_str).unwrap_or("text");
    let text = match kind {
        "text" => message.pointer("/text/body"),
        "button" => message.pointer("/button/text"),
        "interactive" => message
            .pointer("/interactive/button_reply/title")
            .or_else(|| message.pointer("/interactive/list_reply/title")),
        "image" | "video" | "document" => message.get(kind).and_then(|m| m.get("caption")),
        _ => None,
    };
    text.and_then(Value::as_str).map(str::to_string)
}

fn parse_value(value: &Value, batch: &mut ParsedBatch) {
    if let Some(statuses) = value.get("statuses").and_then(Value::as_array) {
        batch.skipped += statuses.len();
    }
    let Some(messages) = value.get("messages").and_then(Value::as_array) else {
        return;
    };
    let contacts = value
        .get("contacts")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for message in messages {
        let from = value_as_string(message.get("from"));
        let Some(text) = message_text(message) else {
            let kind = message.get("type").and_then(Value::as_str).unwrap_or("unknown");
            batch.reject(format!("unsupported message type: {}", kind), message.clone());
            continue;
        };
        let mut raw = message.clone();
        let profile_name = contacts
            .iter()
            .find(|c| value_as_string(c.get("wa_id")) == from)
            .and_then(|c| c.pointer("/profile/name"))
            .and_then(Value::as_str);
        if let (Some(name), Some(obj)) = (profile_name, raw.as_object_mut()) {
            obj.insert("profile_name".to_string(), json!(name));
        }
        batch.push(
            InboundEvent::message(ChannelKind::WhatsApp, from, text)
                .with_message_id(value_as_string(message.get("id")))
                .with_timestamp(value_as_timestamp(message.get("timestamp")))
                .with_raw(raw),
        );
    }
}

#[async_trait]
impl Channel for WhatsAppChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::WhatsApp
    }

    fn state(&self) -> ChannelState {
        self.state
    }

    fn initialize(&mut self, settings: ChannelSettings) -> bool {
        let settings = match settings {
            ChannelSettings::WhatsApp(settings) => settings,
            other => {
                log::warn!("whatsapp: ignoring settings for {}", other.kind());
                return false;
            }
        };
        self.graph = GraphClient::new(settings.api_base.as_deref());
        self.settings = settings;
        let missing = self.missing_credentials();
        self.state = settle_state(ChannelKind::WhatsApp, self.settings.enabled, &missing);
        missing.is_empty()
    }

    fn missing_credentials(&self) -> Vec<&'static str> {
        missing_fields(&[
            ("accessToken", &self.settings.access_token),
            ("phoneNumberId", &self.settings.phone_number_id),
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
        SignatureAlgorithm::Sha256
    }

    fn parse_webhook(&self, payload: &Value) -> ParsedBatch {
        let mut batch = ParsedBatch::default();
        let entries = payload
            .get("entry")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for entry in entries {
            let changes = entry
                .get("changes")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            for change in changes {
                let field = change.get("field").and_then(Value::as_str).unwrap_or("messages");
                match change.get("value") {
                    Some(value) if field == "messages" => parse_value(value, &mut batch),
                    _ => batch.skipped += 1,
                }
            }
        }
        batch
    }

    async fn send_message(&self, recipient_id: &str, text: &str, options: &SendOptions) -> SendResult {
        let result = self.try_send(recipient_id, text, options).await;
        match &result {
            Ok(id) => log::info!("whatsapp: sent message {}", id.as_deref().unwrap_or("-")),
            Err(e) => log::warn!("whatsapp: send to {} failed: {}", recipient_id, e),
        }
        result.into()
    }

    async fn test_connection(&self) -> ConnectionTest {
        if !self.is_available() {
            return ConnectionTest::failed(ChannelError::Unavailable.to_string());
        }
        let res = self
            .graph
            .get_json(
                &self.settings.phone_number_id,
                GraphAuth::Bearer(&self.settings.access_token),
                "display_phone_number,verified_name",
            )
            .await;
        match res {
            Ok(body) => ConnectionTest::ok(json!({
                "phoneNumberId": self.settings.phone_number_id,
                "displayPhoneNumber": body.get("display_phone_number"),
                "verifiedName": body.get("verified_name"),
            })),
            Err(e) => ConnectionTest::failed(e.to_string()),
        }
    }

    async fn process_webhook(&self, payload: &Value, pipeline: &MessagePipeline) -> WebhookOutcome {
        pipeline.dispatch_batch(self, payload).await
    }
}
