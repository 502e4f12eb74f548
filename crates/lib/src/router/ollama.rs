//! Router backend backed by a local Ollama (http://127.0.0.1:11434 by default).
//! Non-streaming `/api/chat`; the reply source is always "ai".

use super::{non_empty, AiRouter, RouterError, RouterReply};
use crate::config::RouterConfig;
use crate::session::ConversationMessage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_MODEL: &str = "llama3.2:latest";

#[derive(Clone)]
pub struct OllamaRouter {
    base_url: String,
    model: String,
    system_prompt: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ChatMessage>,
}

impl OllamaRouter {
    pub fn new(base_url: Option<String>, model: Option<String>, timeout_secs: u64) -> Self {
        let base_url = base_url
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let model = model
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .unwrap_or_default();
        Self {
            base_url,
            model,
            system_prompt: None,
            client,
        }
    }

    pub fn from_config(config: &RouterConfig) -> Self {
        let mut router = Self::new(
            config.endpoint.clone(),
            config.model.clone(),
            config.timeout_secs,
        );
        router.system_prompt = config
            .system_prompt
            .clone()
            .filter(|p| !p.trim().is_empty());
        router
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn messages(&self, query: &str, history: &[ConversationMessage]) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        if let Some(prompt) = &self.system_prompt {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: prompt.clone(),
            });
        }
        messages.extend(history.iter().map(|m| ChatMessage {
            role: m.role.as_str().to_string(),
            content: m.content.clone(),
        }));
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: query.to_string(),
        });
        messages
    }
}

#[async_trait]
impl AiRouter for OllamaRouter {
    /// POST /api/chat (non-streaming).
    async fn process_query(
        &self,
        query: &str,
        history: &[ConversationMessage],
    ) -> Result<RouterReply, RouterError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = ChatRequest {
            model: self.model.clone(),
            messages: self.messages(query, history),
            stream: false,
        };
        let res = self.client.post(&url).json(&body).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(RouterError::Api(format!("{} {}", status, body)));
        }
        let data: ChatResponse = res.json().await?;
        let answer = data.message.map(|m| m.content).unwrap_or_default();
        non_empty(RouterReply {
            answer,
            source: "ai".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[test]
    fn defaults_apply_for_blank_config() {
        let router = OllamaRouter::new(Some(" ".into()), None, 30);
        assert_eq!(router.base_url, DEFAULT_BASE_URL);
        assert_eq!(router.model(), DEFAULT_MODEL);
    }

    #[tokio::test]
    async fn chat_includes_system_prompt_history_and_query() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/api/chat").json_body(json!({
                "model": "qwen2.5:7b",
                "messages": [
                    { "role": "system", "content": "You are the Acme assistant." },
                    { "role": "user", "content": "Hi" },
                    { "role": "assistant", "content": "Hello!" },
                    { "role": "user", "content": "Opening hours?" }
                ],
                "stream": false
            }));
            then.status(200).json_body(json!({
                "model": "qwen2.5:7b",
                "message": { "role": "assistant", "content": "9 to 5." },
                "done": true
            }));
        });
        let config = RouterConfig {
            endpoint: Some(server.base_url()),
            model: Some("qwen2.5:7b".into()),
            system_prompt: Some("You are the Acme assistant.".into()),
            ..Default::default()
        };
        let router = OllamaRouter::from_config(&config);
        let history = vec![
            ConversationMessage::user("Hi", "155"),
            ConversationMessage::assistant("Hello!"),
        ];
        let reply = router.process_query("Opening hours?", &history).await.expect("reply");
        assert_eq!(reply.answer, "9 to 5.");
        assert_eq!(reply.source, "ai");
        mock.assert_calls(1);
    }

    #[tokio::test]
    async fn empty_content_is_an_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api/chat");
            then.status(200).json_body(json!({ "message": { "role": "assistant", "content": "" }, "done": true }));
        });
        let router = OllamaRouter::new(Some(server.base_url()), None, 5);
        let err = router.process_query("hi", &[]).await.expect_err("empty");
        assert!(matches!(err, RouterError::EmptyAnswer));
    }
}
