//! Instagram Direct channel: Messenger webhook shape and Send API with its own credentials.

use crate::channels::format::format_outbound_text;
use crate::channels::graph::{GraphAuth, GraphClient};
use crate::channels::inbound::ParsedBatch;
use crate::channels::messenger::{parse_messaging_payload, post_send_api, send_api_body};
use crate::channels::signature::SignatureAlgorithm;
use crate::channels::types::{
    ChannelError, ChannelKind, ChannelSettings, ChannelState, ConnectionTest, SendOptions,
    SendResult, WebhookOutcome,
};
use crate::channels::{missing_fields, settle_state, Channel};
use crate::config::InstagramConfig;
use crate::pipeline::MessagePipeline;
use async_trait::async_trait;
use serde_json::{json, Value};

const MAX_TEXT_CHARS: usize = 1000;

pub struct InstagramChannel {
    settings: InstagramConfig,
    state: ChannelState,
    graph: GraphClient,
}

impl Default for InstagramChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl InstagramChannel {
    pub fn new() -> Self {
        Self {
            settings: InstagramConfig::default(),
            state: ChannelState::Unconfigured,
            graph: GraphClient::new(None),
        }
    }

    pub fn from_config(config: &InstagramConfig) -> Self {
        let mut channel = Self::new();
        channel.initialize(ChannelSettings::Instagram(config.clone()));
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
        let body = send_api_body(recipient, &text, options, false)?;
        post_send_api(&self.graph, &self.settings.access_token, &body).await
    }
}

#[async_trait]
impl Channel for InstagramChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Instagram
    }

    fn state(&self) -> ChannelState {
        self.state
    }

    fn initialize(&mut self, settings: ChannelSettings) -> bool {
        let settings = match settings {
            ChannelSettings::Instagram(settings) => settings,
            other => {
                log::warn!("instagram: ignoring settings for {}", other.kind());
                return false;
            }
        };
        self.graph = GraphClient::new(settings.api_base.as_deref());
        self.settings = settings;
        let missing = self.missing_credentials();
        self.state = settle_state(ChannelKind::Instagram, self.settings.enabled, &missing);
        missing.is_empty()
    }

    fn missing_credentials(&self) -> Vec<&'static str> {
        missing_fields(&[
            ("accessToken", &self.settings.access_token),
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
        parse_messaging_payload(ChannelKind::Instagram, payload)
    }

    async fn send_message(&self, recipient_id: &str, text: &str, options: &SendOptions) -> SendResult {
        let result = self.try_send(recipient_id, text, options).await;
        match &result {
            Ok(id) => log::info!("instagram: sent message {}", id.as_deref().unwrap_or("-")),
            Err(e) => log::warn!("instagram: send to {} failed: {}", recipient_id, e),
        }
        result.into()
    }

    async fn test_connection(&self) -> ConnectionTest {
        if !self.is_available() {
            return ConnectionTest::failed(ChannelError::Unavailable.to_string());
        }
        let account = match self.settings.account_id.trim() {
            "" => "me",
            id => id,
        };
        match self
            .graph
            .get_json(account, GraphAuth::Query(&self.settings.access_token), "id,username")
            .await
        {
            Ok(body) => ConnectionTest::ok(json!({
                "accountId": body.get("id"),
                "username": body.get("username"),
            })),
            Err(e) => ConnectionTest::failed(e.to_string()),
        }
    }

    async fn process_webhook(&self, payload: &Value, pipeline: &MessagePipeline) -> WebhookOutcome {
        pipeline.dispatch_batch(self, payload).await
    }
}
