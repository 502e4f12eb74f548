//! Router backend that forwards queries to an external HTTP service.
//!
//! Request: `POST {endpoint}` with `{"query": ..., "history": [{"role", "content"}]}`.
//! Response: `{"answer": ..., "source": ...}`.

use super::{non_empty, AiRouter, RouterError, RouterReply};
use crate::session::ConversationMessage;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

#[derive(Clone)]
pub struct HttpRouter {
    endpoint: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
    history: Vec<HistoryTurn<'a>>,
}

#[derive(Serialize)]
struct HistoryTurn<'a> {
    role: &'static str,
    content: &'a str,
}

impl HttpRouter {
    pub fn new(endpoint: &str, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .unwrap_or_default();
        Self {
            endpoint: endpoint.to_string(),
            client,
        }
    }
}

#[async_trait]
impl AiRouter for HttpRouter {
    async fn process_query(
        &self,
        query: &str,
        history: &[ConversationMessage],
    ) -> Result<RouterReply, RouterError> {
        let body = QueryRequest {
            query,
            history: history
                .iter()
                .map(|m| HistoryTurn {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
        };
        let res = self.client.post(&self.endpoint).json(&body).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(RouterError::Api(format!("{} {}", status, body)));
        }
        let reply: RouterReply = res.json().await?;
        non_empty(reply)
    }
}
