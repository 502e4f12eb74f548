//! Channel tags, lifecycle states, and the result shapes every channel operation returns.

use crate::config::{InstagramConfig, MessengerConfig, WhatsAppConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const ERR_CHANNEL_NOT_FOUND: &str = "channel not found";
pub const ERR_CHANNEL_NOT_AVAILABLE: &str = "channel not available";
pub const ERR_INVALID_SIGNATURE: &str = "invalid signature";
pub const ERR_SIGNATURE_REQUIRED: &str = "signature required";
pub const ERR_INVALID_PAYLOAD: &str = "invalid payload";
pub const ERR_VERIFICATION_FAILED: &str = "verification failed";

/// Closed set of platforms the gateway talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    WhatsApp,
    Messenger,
    Instagram,
    /// First-party web widget. Replies are returned in the HTTP response, so it has no webhook channel.
    Web,
}

impl ChannelKind {
    /// Channels served by the webhook endpoints.
    pub const WEBHOOK: [ChannelKind; 3] = [
        ChannelKind::WhatsApp,
        ChannelKind::Messenger,
        ChannelKind::Instagram,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::WhatsApp => "whatsapp",
            ChannelKind::Messenger => "messenger",
            ChannelKind::Instagram => "instagram",
            ChannelKind::Web => "web",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ChannelKind::WhatsApp => "WhatsApp",
            ChannelKind::Messenger => "Facebook Messenger",
            ChannelKind::Instagram => "Instagram Direct",
            ChannelKind::Web => "Web Chat",
        }
    }

    /// Headers that may carry the webhook HMAC for this platform, lowercase, in lookup order.
    /// WhatsApp signs with sha256 under either name.
    pub fn signature_headers(self) -> &'static [&'static str] {
        match self {
            ChannelKind::WhatsApp => &["x-hub-signature-256", "x-hub-signature"],
            ChannelKind::Messenger | ChannelKind::Instagram => &["x-hub-signature"],
            ChannelKind::Web => &[],
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "whatsapp" => Ok(ChannelKind::WhatsApp),
            "messenger" | "facebook" => Ok(ChannelKind::Messenger),
            "instagram" => Ok(ChannelKind::Instagram),
            "web" => Ok(ChannelKind::Web),
            other => Err(format!("unknown channel: {}", other)),
        }
    }
}

/// Lifecycle of a channel instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    /// `initialize` has not run yet.
    Unconfigured,
    /// Initialized, but either `enabled` is false or a mandatory credential is missing.
    Disabled,
    /// Enabled with every mandatory credential present.
    Available,
}

/// Settings for one channel, used by `Channel::initialize` and the settings-update path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "lowercase")]
pub enum ChannelSettings {
    WhatsApp(WhatsAppConfig),
    Messenger(MessengerConfig),
    Instagram(InstagramConfig),
}

impl ChannelSettings {
    pub fn kind(&self) -> ChannelKind {
        match self {
            ChannelSettings::WhatsApp(_) => ChannelKind::WhatsApp,
            ChannelSettings::Messenger(_) => ChannelKind::Messenger,
            ChannelSettings::Instagram(_) => ChannelKind::Instagram,
        }
    }
}

/// One quick-reply button.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickReply {
    pub title: String,
    /// Payload returned by the platform when tapped. Defaults to the title.
    #[serde(default)]
    pub payload: Option<String>,
}

impl QuickReply {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            payload: None,
        }
    }

    pub fn payload(&self) -> &str {
        self.payload.as_deref().unwrap_or(&self.title)
    }
}

/// A pre-approved template (WhatsApp) or a button template (Messenger/Instagram).
/// For Messenger the parameters become postback buttons under the text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSpec {
    pub name: String,
    #[serde(default = "default_template_language")]
    pub language: String,
    #[serde(default)]
    pub parameters: Vec<String>,
}

fn default_template_language() -> String {
    "en_US".to_string()
}

/// How an outbound reply is presented.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ReplyFormat {
    #[default]
    Text,
    Template(TemplateSpec),
    QuickReplies { replies: Vec<QuickReply> },
}

/// Options for `send_message`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOptions {
    #[serde(default)]
    pub format: ReplyFormat,
    /// WhatsApp only: let the client render a link preview.
    #[serde(default)]
    pub preview_url: bool,
}

impl SendOptions {
    pub fn quick_replies(replies: Vec<QuickReply>) -> Self {
        Self {
            format: ReplyFormat::QuickReplies { replies },
            preview_url: false,
        }
    }

    pub fn template(spec: TemplateSpec) -> Self {
        Self {
            format: ReplyFormat::Template(spec),
            preview_url: false,
        }
    }
}

/// Result of an outbound send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendResult {
    pub fn sent(message_id: Option<String>) -> Self {
        Self {
            success: true,
            message_id,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(error.into()),
        }
    }
}

/// Aggregate result of one webhook POST delivery.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub processed: usize,
    pub errors: usize,
    pub duplicates: usize,
}

impl WebhookOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn accepted(processed: usize, errors: usize, duplicates: usize) -> Self {
        Self {
            success: true,
            error: None,
            processed,
            errors,
            duplicates,
        }
    }
}

/// Query of the GET verification handshake. Accepts both `hub.mode` and `hub_mode` spellings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HandshakeQuery {
    #[serde(default, rename = "hub.mode", alias = "hub_mode")]
    pub mode: Option<String>,
    #[serde(default, rename = "hub.verify_token", alias = "hub_verify_token")]
    pub verify_token: Option<String>,
    #[serde(default, rename = "hub.challenge", alias = "hub_challenge")]
    pub challenge: Option<String>,
}

/// Result of the GET verification handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Echo this challenge verbatim.
    Challenge(String),
    NotFound,
    Rejected(&'static str),
}

/// Result of `test_connection`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTest {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectionTest {
    pub fn ok(details: serde_json::Value) -> Self {
        Self {
            success: true,
            details: Some(details),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            details: None,
            error: Some(error.into()),
        }
    }
}

/// Status row for admin listings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatus {
    pub id: &'static str,
    pub name: &'static str,
    pub state: ChannelState,
    pub missing: Vec<&'static str>,
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("{}", ERR_CHANNEL_NOT_AVAILABLE)]
    Unavailable,
    #[error("invalid recipient")]
    InvalidRecipient,
    #[error("nothing to send")]
    EmptyMessage,
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl From<Result<Option<String>, ChannelError>> for SendResult {
    fn from(result: Result<Option<String>, ChannelError>) -> Self {
        match result {
            Ok(id) => SendResult::sent(id),
            Err(e) => SendResult::failed(e.to_string()),
        }
    }
}
