//! Channel registry: one shared instance per channel kind, webhook dispatch, outbound sends.
//!
//! Constructed once at startup and shared through the gateway state. Handlers clone the `Arc` of
//! a channel for the duration of a request; a settings update swaps in a freshly initialized
//! instance without touching requests already in flight.

use crate::channels::instagram::InstagramChannel;
use crate::channels::messenger::MessengerChannel;
use crate::channels::types::{
    ChannelKind, ChannelSettings, ChannelStatus, ConnectionTest, HandshakeOutcome, HandshakeQuery,
    SendOptions, SendResult, WebhookOutcome, ERR_CHANNEL_NOT_FOUND, ERR_INVALID_PAYLOAD,
    ERR_INVALID_SIGNATURE, ERR_SIGNATURE_REQUIRED,
};
use crate::channels::whatsapp::WhatsAppChannel;
use crate::channels::Channel;
use crate::config::Config;
use crate::pipeline::MessagePipeline;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Build and initialize the implementation matching the settings variant.
pub fn build_channel(settings: ChannelSettings) -> Arc<dyn Channel> {
    match settings {
        ChannelSettings::WhatsApp(config) => Arc::new(WhatsAppChannel::from_config(&config)),
        ChannelSettings::Messenger(config) => Arc::new(MessengerChannel::from_config(&config)),
        ChannelSettings::Instagram(config) => Arc::new(InstagramChannel::from_config(&config)),
    }
}

pub struct ChannelRegistry {
    channels: RwLock<HashMap<ChannelKind, Arc<dyn Channel>>>,
    pipeline: Arc<MessagePipeline>,
    require_signature: bool,
}

impl ChannelRegistry {
    pub fn new(pipeline: Arc<MessagePipeline>) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            pipeline,
            require_signature: false,
        }
    }

    /// Reject POST deliveries that carry no signature header.
    pub fn with_require_signature(mut self, require: bool) -> Self {
        self.require_signature = require;
        self
    }

    /// Registry holding every webhook channel, initialized from config.
    pub fn from_config(config: &Config, pipeline: Arc<MessagePipeline>) -> Self {
        let channels = &config.channels;
        let map: HashMap<ChannelKind, Arc<dyn Channel>> = [
            ChannelSettings::WhatsApp(channels.whatsapp.clone()),
            ChannelSettings::Messenger(channels.messenger.clone()),
            ChannelSettings::Instagram(channels.instagram.clone()),
        ]
        .into_iter()
        .map(|settings| (settings.kind(), build_channel(settings)))
        .collect();
        Self {
            channels: RwLock::new(map),
            pipeline,
            require_signature: config.gateway.require_signature,
        }
    }

    pub fn pipeline(&self) -> &Arc<MessagePipeline> {
        &self.pipeline
    }

    /// Insert or replace the instance for its kind.
    pub async fn register(&self, channel: Arc<dyn Channel>) {
        let kind = channel.kind();
        self.channels.write().await.insert(kind, channel);
        log::debug!("registry: registered {}", kind);
    }

    /// Lookup by id (`whatsapp`, `messenger`, `instagram`; `facebook` is accepted for Messenger).
    pub async fn get_channel(&self, id: &str) -> Option<Arc<dyn Channel>> {
        let kind: ChannelKind = id.parse().ok()?;
        self.channels.read().await.get(&kind).cloned()
    }

    /// id → display name, available channels only.
    pub async fn get_available_channels(&self) -> BTreeMap<String, String> {
        self.channels
            .read()
            .await
            .values()
            .filter(|c| c.is_available())
            .map(|c| (c.kind().as_str().to_string(), c.kind().display_name().to_string()))
            .collect()
    }

    /// Status of every registered channel, ordered by kind.
    pub async fn statuses(&self) -> Vec<ChannelStatus> {
        let mut list: Vec<ChannelStatus> = self
            .channels
            .read()
            .await
            .values()
            .map(|c| ChannelStatus {
                id: c.kind().as_str(),
                name: c.kind().display_name(),
                state: c.state(),
                missing: c.missing_credentials(),
            })
            .collect();
        list.sort_by_key(|s| s.id.parse::<ChannelKind>().ok());
        list
    }

    pub async fn send_message(
        &self,
        channel_id: &str,
        recipient_id: &str,
        text: &str,
        options: &SendOptions,
    ) -> SendResult {
        match self.get_channel(channel_id).await {
            Some(channel) => channel.send_message(recipient_id, text, options).await,
            None => SendResult::failed(ERR_CHANNEL_NOT_FOUND),
        }
    }

    /// Verify and dispatch one POST delivery.
    ///
    /// The signature is checked against the raw bytes before the body is parsed; a bad signature
    /// never reaches the channel.
    pub async fn process_webhook(
        &self,
        channel_id: &str,
        raw_body: &[u8],
        signature: &str,
    ) -> WebhookOutcome {
        let Some(channel) = self.get_channel(channel_id).await else {
            log::warn!("registry: webhook for unknown channel {:?}", channel_id);
            return WebhookOutcome::failed(ERR_CHANNEL_NOT_FOUND);
        };
        let kind = channel.kind();
        let signature = signature.trim();
        if !signature.is_empty() && !raw_body.is_empty() {
            if !channel.verify_webhook(signature, raw_body) {
                log::warn!("registry: {} webhook signature mismatch", kind);
                return WebhookOutcome::failed(ERR_INVALID_SIGNATURE);
            }
        } else if self.require_signature {
            log::warn!("registry: {} webhook without signature rejected", kind);
            return WebhookOutcome::failed(ERR_SIGNATURE_REQUIRED);
        } else {
            log::debug!("registry: {} webhook accepted unsigned", kind);
        }
        let payload: serde_json::Value = match serde_json::from_slice(raw_body) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("registry: {} webhook body is not JSON: {}", kind, e);
                return WebhookOutcome::failed(ERR_INVALID_PAYLOAD);
            }
        };
        channel.process_webhook(&payload, &self.pipeline).await
    }

    /// GET subscription handshake.
    pub async fn verify_handshake(&self, channel_id: &str, query: &HandshakeQuery) -> HandshakeOutcome {
        match self.get_channel(channel_id).await {
            Some(channel) => channel.verify_subscription(query),
            None => HandshakeOutcome::NotFound,
        }
    }

    pub async fn test_connection(&self, channel_id: &str) -> ConnectionTest {
        match self.get_channel(channel_id).await {
            Some(channel) => channel.test_connection().await,
            None => ConnectionTest::failed(ERR_CHANNEL_NOT_FOUND),
        }
    }

    /// Rebuild the channel from new settings and swap it in. Returns whether it initialized cleanly.
    pub async fn update_settings(&self, settings: ChannelSettings) -> bool {
        let kind = settings.kind();
        let channel = build_channel(settings);
        let ok = channel.missing_credentials().is_empty();
        self.register(channel).await;
        log::info!("registry: {} settings updated", kind);
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::signature::{sign_body, SignatureAlgorithm};
    use crate::config::WhatsAppConfig;
    use crate::session::{resolve_session_id, ConversationStore, MemoryConversationStore};
    use crate::testing::{RecordingChannel, StubRouter};
    use serde_json::json;

    fn registry() -> (ChannelRegistry, Arc<MemoryConversationStore>) {
        let store = Arc::new(MemoryConversationStore::new());
        let pipeline = Arc::new(MessagePipeline::new(
            store.clone(),
            Arc::new(StubRouter::answering("Hi! How can I help?")),
        ));
        (ChannelRegistry::new(pipeline), store)
    }

    fn whatsapp_config() -> WhatsAppConfig {
        WhatsAppConfig {
            enabled: true,
            access_token: "token".into(),
            phone_number_id: "1098".into(),
            verify_token: "verify-me".into(),
            app_secret: "secret".into(),
            welcome_message: String::new(),
            api_base: Some("http://127.0.0.1:9".into()),
        }
    }

    #[tokio::test]
    async fn unknown_channel_is_not_found() {
        let (registry, store) = registry();
        let outcome = registry.process_webhook("unknown_channel", b"{}", "").await;
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("channel not found"));
        assert!(store.is_empty().await);
        let sent = registry
            .send_message("unknown_channel", "x", "hi", &SendOptions::default())
            .await;
        assert_eq!(sent.error.as_deref(), Some("channel not found"));
    }

    #[tokio::test]
    async fn bad_signature_fails_closed_before_parsing() {
        let (registry, _store) = registry();
        let channel = Arc::new(RecordingChannel::available(ChannelKind::WhatsApp).with_secret("secret"));
        registry.register(channel.clone()).await;
        let body = br#"{"entry":[]}"#;
        let forged = sign_body(SignatureAlgorithm::Sha256, "other", body).expect("sign");
        let outcome = registry.process_webhook("whatsapp", body, &forged).await;
        assert_eq!(outcome.error.as_deref(), Some("invalid signature"));
        assert_eq!(channel.parse_calls(), 0);
    }

    #[tokio::test]
    async fn valid_signature_dispatches() {
        let (registry, _store) = registry();
        let channel = Arc::new(RecordingChannel::available(ChannelKind::WhatsApp).with_secret("secret"));
        registry.register(channel.clone()).await;
        let body = br#"{"entry":[]}"#;
        let sig = sign_body(SignatureAlgorithm::Sha256, "secret", body).expect("sign");
        let outcome = registry.process_webhook("whatsapp", body, &sig).await;
        assert!(outcome.success);
        assert_eq!(channel.parse_calls(), 1);
    }

    #[tokio::test]
    async fn unsigned_delivery_depends_on_policy() {
        let store = Arc::new(MemoryConversationStore::new());
        let pipeline = Arc::new(MessagePipeline::new(store, Arc::new(StubRouter::answering("ok"))));
        let strict = ChannelRegistry::new(pipeline.clone()).with_require_signature(true);
        strict
            .register(Arc::new(RecordingChannel::available(ChannelKind::Messenger)))
            .await;
        let outcome = strict.process_webhook("messenger", b"{}", "").await;
        assert_eq!(outcome.error.as_deref(), Some("signature required"));

        let lenient = ChannelRegistry::new(pipeline);
        lenient
            .register(Arc::new(RecordingChannel::available(ChannelKind::Messenger)))
            .await;
        assert!(lenient.process_webhook("messenger", b"{}", "").await.success);
        let outcome = lenient.process_webhook("messenger", b"not json", "").await;
        assert_eq!(outcome.error.as_deref(), Some("invalid payload"));
    }

    #[tokio::test]
    async fn available_channels_lists_only_available() {
        let (registry, _store) = registry();
        registry
            .register(Arc::new(RecordingChannel::available(ChannelKind::WhatsApp)))
            .await;
        registry
            .register(Arc::new(RecordingChannel::disabled(ChannelKind::Instagram)))
            .await;
        let available = registry.get_available_channels().await;
        assert_eq!(available.len(), 1);
        assert_eq!(available.get("whatsapp").map(String::as_str), Some("WhatsApp"));
        let statuses = registry.statuses().await;
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].id, "whatsapp");
    }

    #[tokio::test]
    async fn from_config_disables_channels_without_credentials() {
        let store = Arc::new(MemoryConversationStore::new());
        let pipeline = Arc::new(MessagePipeline::new(store, Arc::new(StubRouter::answering("ok"))));
        let mut config = Config::default();
        config.channels.whatsapp = whatsapp_config();
        let registry = ChannelRegistry::from_config(&config, pipeline);
        let available = registry.get_available_channels().await;
        assert_eq!(available.keys().collect::<Vec<_>>(), vec!["whatsapp"]);
        assert!(registry.get_channel("facebook").await.is_some());
    }

    #[tokio::test]
    async fn handshake_echoes_challenge_for_matching_token() {
        let store = Arc::new(MemoryConversationStore::new());
        let pipeline = Arc::new(MessagePipeline::new(store, Arc::new(StubRouter::answering("ok"))));
        let mut config = Config::default();
        config.channels.whatsapp = whatsapp_config();
        let registry = ChannelRegistry::from_config(&config, pipeline);
        let query = HandshakeQuery {
            mode: Some("subscribe".into()),
            verify_token: Some("verify-me".into()),
            challenge: Some("1158201444".into()),
        };
        assert_eq!(
            registry.verify_handshake("whatsapp", &query).await,
            HandshakeOutcome::Challenge("1158201444".into())
        );
        let wrong = HandshakeQuery {
            verify_token: Some("nope".into()),
            ..query.clone()
        };
        assert!(matches!(
            registry.verify_handshake("whatsapp", &wrong).await,
            HandshakeOutcome::Rejected(_)
        ));
        assert_eq!(
            registry.verify_handshake("telegram", &query).await,
            HandshakeOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn update_settings_swaps_instance() {
        let (registry, _store) = registry();
        let mut cfg = whatsapp_config();
        cfg.enabled = false;
        assert!(registry.update_settings(ChannelSettings::WhatsApp(cfg.clone())).await);
        assert!(registry.get_available_channels().await.is_empty());
        cfg.enabled = true;
        assert!(registry.update_settings(ChannelSettings::WhatsApp(cfg)).await);
        assert!(registry.get_available_channels().await.contains_key("whatsapp"));
    }

    #[tokio::test]
    async fn end_to_end_message_records_turns() {
        let (registry, store) = registry();
        let channel = Arc::new(RecordingChannel::available(ChannelKind::WhatsApp).parsing_whatsapp());
        registry.register(channel.clone()).await;
        let body = serde_json::to_vec(&json!({
            "entry": [{ "changes": [{ "field": "messages", "value": { "messages": [
                { "from": "15551234567", "id": "wamid.1", "type": "text", "text": { "body": "Hello" } }
            ] } }] }]
        }))
        .expect("body");
        let outcome = registry.process_webhook("whatsapp", &body, "").await;
        assert_eq!((outcome.processed, outcome.errors), (1, 0));
        let id = resolve_session_id(ChannelKind::WhatsApp, "15551234567");
        assert_eq!(store.history(&id, None).await.expect("history").len(), 2);
        assert_eq!(channel.sent().await.len(), 1);
    }
}
