//! AI router collaborator: answers a user query given the conversation history.
//!
//! The gateway only consumes `process_query`; how the answer is produced (knowledge-base scoring,
//! provider choice, prompting) belongs to the backend.

mod http;
mod ollama;

pub use http::HttpRouter;
pub use ollama::OllamaRouter;

use crate::config::{RouterBackend, RouterConfig};
use crate::session::ConversationMessage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Answer plus where it came from (e.g. "knowledge_base", "ai"). `source` is informational only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterReply {
    pub answer: String,
    #[serde(default = "unknown_source")]
    pub source: String,
}

fn unknown_source() -> String {
    "unknown".to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("router request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("router api error: {0}")]
    Api(String),
    #[error("router returned an empty answer")]
    EmptyAnswer,
    #[error("router not configured: {0}")]
    NotConfigured(&'static str),
}

#[async_trait]
pub trait AiRouter: Send + Sync {
    /// `history` is ordered oldest first and does not include `query` itself.
    async fn process_query(
        &self,
        query: &str,
        history: &[ConversationMessage],
    ) -> Result<RouterReply, RouterError>;
}

/// Build the configured backend.
pub fn build_router(config: &RouterConfig) -> Result<Arc<dyn AiRouter>, RouterError> {
    match config.backend {
        RouterBackend::Http => {
            let endpoint = config
                .endpoint
                .as_deref()
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .ok_or(RouterError::NotConfigured("router.endpoint"))?;
            Ok(Arc::new(HttpRouter::new(endpoint, config.timeout_secs)))
        }
        RouterBackend::Ollama => Ok(Arc::new(OllamaRouter::from_config(config))),
    }
}

/// Reject blank answers so the pipeline never sends an empty reply.
pub(crate) fn non_empty(reply: RouterReply) -> Result<RouterReply, RouterError> {
    if reply.answer.trim().is_empty() {
        return Err(RouterError::EmptyAnswer);
    }
    Ok(reply)
}
