//! Shared message pipeline: resolve session, record the user turn, ask the router, record the
//! answer, reply through the owning channel.
//!
//! Every step failure is logged with channel and sender context and turned into `false`; a batch
//! of webhook events is processed in delivery order and never fails as a whole.

use crate::channels::{
    Channel, ChannelKind, InboundEvent, SendOptions, WebhookOutcome, ERR_CHANNEL_NOT_AVAILABLE,
};
use crate::dedup::DedupCache;
use crate::router::{AiRouter, RouterError};
use crate::session::{
    resolve_session_id, ConversationError, ConversationMessage, ConversationStore, SessionId,
    SessionMetadata,
};
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

const DEFAULT_HISTORY_LIMIT: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Conversation(#[from] ConversationError),
    #[error(transparent)]
    Router(#[from] RouterError),
    #[error("send failed: {0}")]
    Send(String),
}

/// One answered turn.
#[derive(Debug, Clone)]
pub struct Turn {
    pub session_id: SessionId,
    pub answer: String,
    pub source: String,
}

pub struct MessagePipeline {
    conversations: Arc<dyn ConversationStore>,
    router: Arc<dyn AiRouter>,
    dedup: Option<DedupCache>,
    history_limit: usize,
}

impl MessagePipeline {
    pub fn new(conversations: Arc<dyn ConversationStore>, router: Arc<dyn AiRouter>) -> Self {
        Self {
            conversations,
            router,
            dedup: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    pub fn with_dedup(mut self, dedup: Option<DedupCache>) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn conversations(&self) -> &Arc<dyn ConversationStore> {
        &self.conversations
    }

    /// Steps 2 to 5: session, user turn, router, assistant turn, metadata. Shared with web chat.
    pub async fn converse(
        &self,
        channel: ChannelKind,
        sender_id: &str,
        text: &str,
        extra: BTreeMap<String, String>,
    ) -> Result<Turn, PipelineError> {
        let session_id = resolve_session_id(channel, sender_id);
        let turn = ConversationMessage::user(text, sender_id);
        self.conversations
            .add_message(&session_id, turn.clone())
            .await?;
        let mut history = self
            .conversations
            .history(&session_id, Some(self.history_limit.saturating_add(1)))
            .await?;
        // The router gets `text` separately. Another delivery may have appended after us,
        // so drop our own turn wherever it sits.
        history.retain(|m| m != &turn);
        let excess = history.len().saturating_sub(self.history_limit);
        history.drain(..excess);
        let reply = self.router.process_query(text, &history).await?;
        log::debug!(
            "pipeline: {} answer for {} from {}",
            channel,
            session_id,
            reply.source
        );
        self.conversations
            .add_message(&session_id, ConversationMessage::assistant(reply.answer.clone()))
            .await?;
        self.touch(&session_id, channel, sender_id, extra).await?;
        Ok(Turn {
            session_id,
            answer: reply.answer,
            source: reply.source,
        })
    }

    async fn touch(
        &self,
        session_id: &str,
        channel: ChannelKind,
        sender_id: &str,
        extra: BTreeMap<String, String>,
    ) -> Result<(), ConversationError> {
        self.conversations
            .update_metadata(
                session_id,
                SessionMetadata {
                    channel: Some(channel),
                    sender_id: Some(sender_id.to_string()),
                    last_activity: Some(Utc::now()),
                    extra,
                },
            )
            .await
    }

    /// Full pipeline for one inbound event; true when the reply was delivered.
    pub async fn handle_incoming_message(&self, channel: &dyn Channel, event: &InboundEvent) -> bool {
        let kind = channel.kind();
        if !channel.is_available() {
            log::warn!("pipeline: {} not available; dropping message from {}", kind, event.sender_id);
            return false;
        }
        let result = if event.is_get_started() {
            self.greet(channel, event).await
        } else {
            self.answer(channel, event).await
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                log::warn!("pipeline: {} message from {} failed: {}", kind, event.sender_id, e);
                false
            }
        }
    }

    async fn answer(&self, channel: &dyn Channel, event: &InboundEvent) -> Result<(), PipelineError> {
        let turn = self
            .converse(channel.kind(), &event.sender_id, &event.text, event_extra(event))
            .await?;
        let sent = channel
            .send_message(&event.sender_id, &turn.answer, &SendOptions::default())
            .await;
        if !sent.success {
            return Err(PipelineError::Send(sent.error.unwrap_or_default()));
        }
        Ok(())
    }

    /// "Get Started" postback: reply with the welcome message without asking the router.
    async fn greet(&self, channel: &dyn Channel, event: &InboundEvent) -> Result<(), PipelineError> {
        let welcome = channel.welcome_message().trim();
        if welcome.is_empty() {
            log::debug!("pipeline: {} has no welcome message; ignoring get started", channel.kind());
            return Ok(());
        }
        let session_id = resolve_session_id(channel.kind(), &event.sender_id);
        self.conversations
            .add_message(&session_id, ConversationMessage::assistant(welcome))
            .await?;
        self.touch(&session_id, channel.kind(), &event.sender_id, event_extra(event))
            .await?;
        let sent = channel
            .send_message(&event.sender_id, welcome, &SendOptions::default())
            .await;
        if !sent.success {
            return Err(PipelineError::Send(sent.error.unwrap_or_default()));
        }
        Ok(())
    }

    /// Parse a delivery and run each event through the pipeline, in order.
    pub async fn dispatch_batch(&self, channel: &dyn Channel, payload: &Value) -> WebhookOutcome {
        let kind = channel.kind();
        if !channel.is_available() {
            log::warn!("pipeline: {} webhook on unavailable channel", kind);
            return WebhookOutcome::failed(ERR_CHANNEL_NOT_AVAILABLE);
        }
        let batch = channel.parse_webhook(payload);
        let mut errors = batch.rejected.len();
        for rejected in &batch.rejected {
            log::warn!("pipeline: {} dropped event: {}", kind, rejected.reason);
        }
        if batch.skipped > 0 {
            log::debug!("pipeline: {} skipped {} non-message entries", kind, batch.skipped);
        }
        let mut processed = 0;
        let mut duplicates = 0;
        for event in &batch.events {
            if let Some(dedup) = &self.dedup {
                if !dedup.first_delivery(kind, &event.platform_message_id).await {
                    log::debug!("pipeline: {} duplicate delivery {}", kind, event.platform_message_id);
                    duplicates += 1;
                    continue;
                }
            }
            if self.handle_incoming_message(channel, event).await {
                processed += 1;
            } else {
                errors += 1;
                if let Some(dedup) = &self.dedup {
                    dedup.forget(kind, &event.platform_message_id).await;
                }
            }
        }
        log::info!(
            "pipeline: {} webhook processed={} errors={} duplicates={}",
            kind,
            processed,
            errors,
            duplicates
        );
        WebhookOutcome::accepted(processed, errors, duplicates)
    }
}

/// Metadata extras carried from the raw platform object.
fn event_extra(event: &InboundEvent) -> BTreeMap<String, String> {
    let mut extra = BTreeMap::new();
    if let Some(name) = event.raw_metadata.get("profile_name").and_then(Value::as_str) {
        extra.insert("profileName".to_string(), name.to_string());
    }
    extra
}
