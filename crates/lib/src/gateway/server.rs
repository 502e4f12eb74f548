//! Gateway HTTP server (single port): webhooks, web chat, admin API.

use crate::channels::{
    ChannelKind, ChannelRegistry, ChannelSettings, HandshakeOutcome, HandshakeQuery,
    ERR_CHANNEL_NOT_FOUND, ERR_INVALID_PAYLOAD,
};
use crate::config::{self, Config};
use crate::dedup::DedupCache;
use crate::gateway::protocol::{
    ChannelsResponse, ChatRequest, ChatResponse, ErrorBody, SendRequest, SettingsResponse,
    WelcomeResponse,
};
use crate::pipeline::MessagePipeline;
use crate::router::build_router;
use crate::session::{ConversationStore, MemoryConversationStore};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared state for the gateway handlers.
#[derive(Clone)]
pub struct GatewayState {
    /// Effective config (file plus env overrides). Mutated only by the settings endpoint.
    pub config: Arc<RwLock<Config>>,
    pub config_path: PathBuf,
    pub registry: Arc<ChannelRegistry>,
    /// When Some, admin routes are mounted and require `Authorization: Bearer <token>`.
    pub admin_token: Option<String>,
}

impl GatewayState {
    /// Wire conversation store, router, dedup cache, pipeline, and registry from config.
    pub async fn from_config(config: Config, config_path: PathBuf) -> Result<Self> {
        let conversations: Arc<dyn ConversationStore> =
            match config::resolve_sessions_path(&config, &config_path) {
                Some(path) => Arc::new(MemoryConversationStore::load(path).await),
                None => Arc::new(MemoryConversationStore::new()),
            };
        let router = build_router(&config.router).context("building ai router")?;
        let pipeline = MessagePipeline::new(conversations, router)
            .with_dedup(DedupCache::from_config(&config.dedup))
            .with_history_limit(config.router.history_limit);
        let registry = ChannelRegistry::from_config(&config, Arc::new(pipeline));
        let admin_token = config::resolve_admin_token(&config);
        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
            registry: Arc::new(registry),
            admin_token,
        })
    }
}

/// All routes. Admin routes exist only when an admin token is configured.
pub fn build_app(state: GatewayState) -> Router {
    let mut app = Router::new()
        .route("/", get(health_http))
        .route(
            "/webhook/:channel",
            get(webhook_handshake).post(webhook_delivery),
        )
        .route("/chat", post(web_chat))
        .route("/chat/welcome", get(web_chat_welcome));
    if state.admin_token.is_some() {
        app = app
            .route("/channels", get(list_channels))
            .route("/channels/:id/test", post(test_channel))
            .route("/channels/:id/send", post(send_channel_message))
            .route("/channels/:id/settings", put(update_channel_settings));
    } else {
        log::info!("gateway: admin api disabled (no admin token configured)");
    }
    app.with_state(state)
}

/// Blocks until shutdown (e.g. Ctrl+C).
/// `config_path` is where settings updates are persisted and relative session paths resolve.
pub async fn run_gateway(config: Config, config_path: PathBuf) -> Result<()> {
    let bind = config.gateway.bind.trim().to_string();
    let port = config.gateway.port;
    let state = GatewayState::from_config(config, config_path).await?;

    let available = state.registry.get_available_channels().await;
    if available.is_empty() {
        log::warn!("gateway: no channel is available; webhook deliveries will be rejected");
    } else {
        log::info!(
            "gateway: channels available: {}",
            available.keys().cloned().collect::<Vec<_>>().join(", ")
        );
    }

    let app = build_app(state);
    let bind_addr = format!("{}:{}", bind, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (status, Json(ErrorBody::new(error))).into_response()
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<Value> {
    let port = state.config.read().await.gateway.port;
    let channels: Vec<String> = state
        .registry
        .get_available_channels()
        .await
        .into_keys()
        .collect();
    Json(json!({
        "runtime": "running",
        "port": port,
        "channels": channels,
    }))
}

/// GET /webhook/:channel: subscription handshake; echoes `hub.challenge` as plain text.
async fn webhook_handshake(
    State(state): State<GatewayState>,
    Path(channel): Path<String>,
    Query(query): Query<HandshakeQuery>,
) -> Response {
    match state.registry.verify_handshake(&channel, &query).await {
        HandshakeOutcome::Challenge(challenge) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            challenge,
        )
            .into_response(),
        HandshakeOutcome::NotFound => error_response(StatusCode::NOT_FOUND, ERR_CHANNEL_NOT_FOUND),
        HandshakeOutcome::Rejected(reason) => error_response(StatusCode::BAD_REQUEST, reason),
    }
}

/// First non-empty signature header the platform may use.
fn signature_from_headers(kind: ChannelKind, headers: &HeaderMap) -> Option<&str> {
    kind.signature_headers()
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|v| v.to_str().ok())
        .map(str::trim)
        .find(|v| !v.is_empty())
}

/// POST /webhook/:channel: verify the signature over the raw body and dispatch.
async fn webhook_delivery(
    State(state): State<GatewayState>,
    Path(channel): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = channel
        .parse::<ChannelKind>()
        .ok()
        .and_then(|kind| signature_from_headers(kind, &headers))
        .unwrap_or("");
    let outcome = state
        .registry
        .process_webhook(&channel, &body, signature)
        .await;
    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(outcome)).into_response()
}

/// POST /chat: web widget turn; the reply is returned in the response.
async fn web_chat(State(state): State<GatewayState>, Json(req): Json<ChatRequest>) -> Response {
    if !state.config.read().await.channels.web.enabled {
        return error_response(StatusCode::NOT_FOUND, "web chat disabled");
    }
    let message = req.message.trim();
    if message.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "missing message text");
    }
    let visitor_id = req
        .visitor_id
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    match state
        .registry
        .pipeline()
        .converse(ChannelKind::Web, &visitor_id, message, BTreeMap::new())
        .await
    {
        Ok(turn) => Json(ChatResponse {
            session_id: turn.session_id,
            visitor_id,
            reply: turn.answer,
            source: turn.source,
        })
        .into_response(),
        Err(e) => {
            log::warn!("gateway: web chat for {} failed: {}", visitor_id, e);
            error_response(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

/// GET /chat/welcome
async fn web_chat_welcome(State(state): State<GatewayState>) -> Response {
    let config = state.config.read().await;
    if !config.channels.web.enabled {
        return error_response(StatusCode::NOT_FOUND, "web chat disabled");
    }
    Json(WelcomeResponse {
        message: config.channels.web.welcome_message.clone(),
    })
    .into_response()
}

/// Bearer check for admin routes.
fn check_admin(state: &GatewayState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(expected) = state.admin_token.as_deref() else {
        return Err(StatusCode::NOT_FOUND.into_response());
    };
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .unwrap_or("");
    if provided.is_empty() || !tokens_match(provided, expected) {
        log::warn!("gateway: admin request rejected (bad or missing token)");
        return Err(error_response(StatusCode::UNAUTHORIZED, "unauthorized"));
    }
    Ok(())
}

/// Constant-time token comparison (length is not secret).
fn tokens_match(provided: &str, expected: &str) -> bool {
    let (a, b) = (provided.as_bytes(), expected.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// GET /channels
async fn list_channels(State(state): State<GatewayState>, headers: HeaderMap) -> Response {
    if let Err(resp) = check_admin(&state, &headers) {
        return resp;
    }
    Json(ChannelsResponse {
        channels: state.registry.statuses().await,
    })
    .into_response()
}

/// POST /channels/:id/test
async fn test_channel(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = check_admin(&state, &headers) {
        return resp;
    }
    if state.registry.get_channel(&id).await.is_none() {
        return error_response(StatusCode::NOT_FOUND, ERR_CHANNEL_NOT_FOUND);
    }
    Json(state.registry.test_connection(&id).await).into_response()
}

/// POST /channels/:id/send
async fn send_channel_message(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<SendRequest>,
) -> Response {
    if let Err(resp) = check_admin(&state, &headers) {
        return resp;
    }
    if state.registry.get_channel(&id).await.is_none() {
        return error_response(StatusCode::NOT_FOUND, ERR_CHANNEL_NOT_FOUND);
    }
    let result = state
        .registry
        .send_message(&id, &req.recipient, &req.text, &req.options)
        .await;
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    (status, Json(result)).into_response()
}

/// Replace one channel section of `config` with `body`.
fn apply_channel_section(config: &mut Config, kind: ChannelKind, body: Value) -> serde_json::Result<()> {
    let channels = &mut config.channels;
    match kind {
        ChannelKind::WhatsApp => channels.whatsapp = serde_json::from_value(body)?,
        ChannelKind::Messenger => channels.messenger = serde_json::from_value(body)?,
        ChannelKind::Instagram => channels.instagram = serde_json::from_value(body)?,
        ChannelKind::Web => channels.web = serde_json::from_value(body)?,
    }
    Ok(())
}

fn channel_settings(config: &Config, kind: ChannelKind) -> Option<ChannelSettings> {
    let channels = &config.channels;
    match kind {
        ChannelKind::WhatsApp => Some(ChannelSettings::WhatsApp(channels.whatsapp.clone())),
        ChannelKind::Messenger => Some(ChannelSettings::Messenger(channels.messenger.clone())),
        ChannelKind::Instagram => Some(ChannelSettings::Instagram(channels.instagram.clone())),
        ChannelKind::Web => None,
    }
}

/// Write the section to the config file as submitted (env overrides are not persisted).
fn persist_channel_section(path: &std::path::Path, kind: ChannelKind, body: Value) -> Result<()> {
    let mut on_disk = config::read_config_file(path)?;
    apply_channel_section(&mut on_disk, kind, body).context("applying channel settings")?;
    config::save_config(path, &on_disk)
}

/// PUT /channels/:id/settings: rebuild the channel from new settings, swap it in, persist.
async fn update_channel_settings(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(resp) = check_admin(&state, &headers) {
        return resp;
    }
    let Ok(kind) = id.parse::<ChannelKind>() else {
        return error_response(StatusCode::NOT_FOUND, ERR_CHANNEL_NOT_FOUND);
    };
    // Held until the file is written so concurrent updates apply one at a time.
    let mut current = state.config.write().await;
    let mut effective = current.clone();
    if let Err(e) = apply_channel_section(&mut effective, kind, body.clone()) {
        return error_response(StatusCode::BAD_REQUEST, format!("{}: {}", ERR_INVALID_PAYLOAD, e));
    }
    config::apply_env_overrides(&mut effective);

    let available = match channel_settings(&effective, kind) {
        Some(settings) => {
            state.registry.update_settings(settings).await;
            state
                .registry
                .get_channel(kind.as_str())
                .await
                .is_some_and(|c| c.is_available())
        }
        None => effective.channels.web.enabled,
    };
    *current = effective;

    let persisted = match persist_channel_section(&state.config_path, kind, body) {
        Ok(()) => true,
        Err(e) => {
            log::warn!("gateway: persisting {} settings failed: {:#}", kind, e);
            false
        }
    };
    drop(current);
    Json(SettingsResponse {
        success: true,
        available,
        persisted,
    })
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_section_replaces_only_that_channel() {
        let mut config = Config::default();
        config.channels.messenger.page_id = "PAGE".to_string();
        apply_channel_section(
            &mut config,
            ChannelKind::WhatsApp,
            json!({ "enabled": true, "accessToken": "tok", "phoneNumberId": "1098" }),
        )
        .expect("apply");
        assert!(config.channels.whatsapp.enabled);
        assert_eq!(config.channels.whatsapp.phone_number_id, "1098");
        assert_eq!(config.channels.messenger.page_id, "PAGE");
        assert!(apply_channel_section(&mut config, ChannelKind::Messenger, json!({ "enabled": "yes" })).is_err());
    }

    #[test]
    fn whatsapp_signature_falls_back_to_legacy_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-hub-signature", "sha256=abc".parse().expect("header"));
        assert_eq!(
            signature_from_headers(ChannelKind::WhatsApp, &headers),
            Some("sha256=abc")
        );
        headers.insert("x-hub-signature-256", "sha256=def".parse().expect("header"));
        assert_eq!(
            signature_from_headers(ChannelKind::WhatsApp, &headers),
            Some("sha256=def")
        );
        assert_eq!(
            signature_from_headers(ChannelKind::Messenger, &headers),
            Some("sha256=abc")
        );
        assert_eq!(signature_from_headers(ChannelKind::Web, &headers), None);
    }

    #[test]
    fn admin_token_comparison() {
        assert!(tokens_match("s3cret", "s3cret"));
        assert!(!tokens_match("s3cres", "s3cret"));
        assert!(!tokens_match("s3cret-longer", "s3cret"));
        assert!(!tokens_match("", "s3cret"));
    }

    #[test]
    fn web_has_no_channel_settings() {
        assert!(channel_settings(&Config::default(), ChannelKind::Web).is_none());
        assert!(matches!(
            channel_settings(&Config::default(), ChannelKind::Instagram),
            Some(ChannelSettings::Instagram(_))
        ));
    }
}
