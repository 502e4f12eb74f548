//! HTTP request and response bodies for the web chat and admin endpoints.

use crate::channels::{ChannelStatus, SendOptions};
use serde::{Deserialize, Serialize};

/// `POST /chat` body. Without `visitorId` a new visitor (and session) is started.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub visitor_id: Option<String>,
    pub message: String,
}

/// `POST /chat` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub session_id: String,
    pub visitor_id: String,
    pub reply: String,
    pub source: String,
}

/// `GET /chat/welcome` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WelcomeResponse {
    pub message: String,
}

/// `POST /channels/:id/send` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub recipient: String,
    pub text: String,
    #[serde(default)]
    pub options: SendOptions,
}

/// `GET /channels` reply.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelsResponse {
    pub channels: Vec<ChannelStatus>,
}

/// `PUT /channels/:id/settings` reply.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsResponse {
    pub success: bool,
    pub available: bool,
    pub persisted: bool,
}

/// Error body shared by every endpoint: `{"success": false, "error": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chat_request_visitor_is_optional() {
        let req: ChatRequest = serde_json::from_value(json!({ "message": "hi" })).expect("parse");
        assert!(req.visitor_id.is_none());
        let req: ChatRequest =
            serde_json::from_value(json!({ "visitorId": "v-1", "message": "hi" })).expect("parse");
        assert_eq!(req.visitor_id.as_deref(), Some("v-1"));
    }

    #[test]
    fn send_request_defaults_to_plain_text() {
        let req: SendRequest =
            serde_json::from_value(json!({ "recipient": "155", "text": "hello" })).expect("parse");
        assert_eq!(req.options, SendOptions::default());
    }

    #[test]
    fn error_body_shape() {
        let v = serde_json::to_value(ErrorBody::new("channel not found")).expect("json");
        assert_eq!(v, json!({ "success": false, "error": "channel not found" }));
    }
}
