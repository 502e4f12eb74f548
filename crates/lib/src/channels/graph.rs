//! Minimal Meta Graph API client shared by the WhatsApp, Messenger, and Instagram channels.

use crate::channels::types::ChannelError;
use serde_json::Value;
use std::time::Duration;

pub const GRAPH_API_BASE: &str = "https://graph.facebook.com/v18.0";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// How the access token is attached to a request.
#[derive(Debug, Clone, Copy)]
pub enum GraphAuth<'a> {
    /// `Authorization: Bearer <token>` (WhatsApp Cloud API).
    Bearer(&'a str),
    /// `?access_token=<token>` (Messenger Send API).
    Query(&'a str),
}

#[derive(Clone)]
pub struct GraphClient {
    base_url: String,
    client: reqwest::Client,
}

impl GraphClient {
    pub fn new(base_url: Option<&str>) -> Self {
        let base_url = base_url
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| GRAPH_API_BASE.to_string());
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { base_url, client }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// POST a JSON body; returns the decoded response on 2xx without an `error` object.
    pub async fn post_json(
        &self,
        path: &str,
        auth: GraphAuth<'_>,
        body: &Value,
    ) -> Result<Value, ChannelError> {
        let req = self.client.post(self.url(path)).json(body);
        let req = match auth {
            GraphAuth::Bearer(token) => req.bearer_auth(token),
            GraphAuth::Query(token) => req.query(&[("access_token", token)]),
        };
        let res = req.send().await?;
        decode_response(res).await
    }

    /// GET with optional `fields` selection.
    pub async fn get_json(
        &self,
        path: &str,
        auth: GraphAuth<'_>,
        fields: &str,
    ) -> Result<Value, ChannelError> {
        let mut req = self.client.get(self.url(path));
        if !fields.is_empty() {
            req = req.query(&[("fields", fields)]);
        }
        let req = match auth {
            GraphAuth::Bearer(token) => req.bearer_auth(token),
            GraphAuth::Query(token) => req.query(&[("access_token", token)]),
        };
        let res = req.send().await?;
        decode_response(res).await
    }
}

async fn decode_response(res: reqwest::Response) -> Result<Value, ChannelError> {
    let status = res.status();
    let text = res.text().await?;
    let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
    if let Some(message) = graph_error_message(&body) {
        return Err(ChannelError::Api {
            status: status.as_u16(),
            message,
        });
    }
    if !status.is_success() {
        let snippet: String = text.chars().take(200).collect();
        return Err(ChannelError::Api {
            status: status.as_u16(),
            message: if snippet.is_empty() {
                status.to_string()
            } else {
                snippet
            },
        });
    }
    if body.is_null() {
        return Err(ChannelError::Decode("response was not JSON".to_string()));
    }
    Ok(body)
}

/// Extract `error.message` (with code and subcode when present) from a Graph error body.
pub fn graph_error_message(body: &Value) -> Option<String> {
    let err = body.get("error")?;
    let message = err
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| err.as_str())
        .unwrap_or("unknown error");
    match err.get("code").and_then(Value::as_i64) {
        Some(code) => Some(format!("{} (code {})", message, code)),
        None => Some(message.to_string()),
    }
}
