//! Test doubles: a scripted router and a channel that records sends.

use crate::channels::{
    Channel, ChannelKind, ChannelSettings, ChannelState, ConnectionTest, ParsedBatch,
    SendOptions, SendResult, SignatureAlgorithm, WebhookOutcome, WhatsAppChannel,
};
use crate::pipeline::MessagePipeline;
use crate::router::{AiRouter, RouterError, RouterReply};
use crate::session::ConversationMessage;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

pub struct StubRouter {
    answer: Option<String>,
    queries: Mutex<Vec<String>>,
    histories: Mutex<Vec<Vec<String>>>,
}

impl StubRouter {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: Some(answer.to_string()),
            queries: Mutex::new(Vec::new()),
            histories: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            answer: None,
            queries: Mutex::new(Vec::new()),
            histories: Mutex::new(Vec::new()),
        }
    }

    pub async fn queries(&self) -> Vec<String> {
        self.queries.lock().await.clone()
    }

    pub async fn history_lengths(&self) -> Vec<usize> {
        self.histories.lock().await.iter().map(Vec::len).collect()
    }

    /// Message contents of the history passed on each call.
    pub async fn histories(&self) -> Vec<Vec<String>> {
        self.histories.lock().await.clone()
    }
}

#[async_trait]
impl AiRouter for StubRouter {
    async fn process_query(
        &self,
        query: &str,
        history: &[ConversationMessage],
    ) -> Result<RouterReply, RouterError> {
        self.queries.lock().await.push(query.to_string());
        self.histories
            .lock()
            .await
            .push(history.iter().map(|m| m.content.clone()).collect());
        match &self.answer {
            Some(answer) => Ok(RouterReply {
                answer: answer.clone(),
                source: "stub".to_string(),
            }),
            None => Err(RouterError::Api("stub failure".to_string())),
        }
    }
}

/// Channel that returns a canned batch (or real WhatsApp parsing) and records every send.
pub struct RecordingChannel {
    kind: ChannelKind,
    state: ChannelState,
    secret: String,
    welcome: String,
    batch: Option<ParsedBatch>,
    whatsapp_parser: Option<WhatsAppChannel>,
    fail_sends: bool,
    parse_calls: AtomicUsize,
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingChannel {
    fn with_state(kind: ChannelKind, state: ChannelState) -> Self {
        Self {
            kind,
            state,
            secret: String::new(),
            welcome: String::new(),
            batch: None,
            whatsapp_parser: None,
            fail_sends: false,
            parse_calls: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn available(kind: ChannelKind) -> Self {
        Self::with_state(kind, ChannelState::Available)
    }

    pub fn disabled(kind: ChannelKind) -> Self {
        Self::with_state(kind, ChannelState::Disabled)
    }

    pub fn with_secret(mut self, secret: &str) -> Self {
        self.secret = secret.to_string();
        self
    }

    pub fn with_welcome(mut self, welcome: &str) -> Self {
        self.welcome = welcome.to_string();
        self
    }

    pub fn with_batch(mut self, batch: ParsedBatch) -> Self {
        self.batch = Some(batch);
        self
    }

    pub fn parsing_whatsapp(mut self) -> Self {
        self.whatsapp_parser = Some(WhatsAppChannel::new());
        self
    }

    pub fn failing_sends(mut self) -> Self {
        self.fail_sends = true;
        self
    }

    pub fn parse_calls(&self) -> usize {
        self.parse_calls.load(Ordering::SeqCst)
    }

    pub async fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn state(&self) -> ChannelState {
        self.state
    }

    fn initialize(&mut self, _settings: ChannelSettings) -> bool {
        true
    }

    fn missing_credentials(&self) -> Vec<&'static str> {
        Vec::new()
    }

    fn verify_token(&self) -> &str {
        "verify-me"
    }

    fn welcome_message(&self) -> &str {
        &self.welcome
    }

    fn app_secret(&self) -> &str {
        &self.secret
    }

    fn signature_algorithm(&self) -> SignatureAlgorithm {
        match self.kind {
            ChannelKind::WhatsApp => SignatureAlgorithm::Sha256,
            _ => SignatureAlgorithm::Sha1,
        }
    }

    fn parse_webhook(&self, payload: &Value) -> ParsedBatch {
        self.parse_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(parser) = &self.whatsapp_parser {
            return parser.parse_webhook(payload);
        }
        self.batch.clone().unwrap_or_default()
    }

    async fn send_message(&self, recipient_id: &str, text: &str, _options: &SendOptions) -> SendResult {
        if self.fail_sends {
            return SendResult::failed("stub send failure");
        }
        let mut sent = self.sent.lock().await;
        sent.push((recipient_id.to_string(), text.to_string()));
        SendResult::sent(Some(format!("out.{}", sent.len())))
    }

    async fn test_connection(&self) -> ConnectionTest {
        ConnectionTest::ok(json!({ "stub": true }))
    }

    async fn process_webhook(&self, payload: &Value, pipeline: &MessagePipeline) -> WebhookOutcome {
        pipeline.dispatch_batch(self, payload).await
    }
}
