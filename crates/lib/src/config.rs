//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.parley/config.json`) and environment.
//! Channel credentials may be supplied by env vars so secrets stay out of the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Per-platform channel settings.
    #[serde(default)]
    pub channels: ChannelsConfig,

    /// AI router collaborator settings.
    #[serde(default)]
    pub router: RouterConfig,

    /// Redelivery deduplication.
    #[serde(default)]
    pub dedup: DedupConfig,

    /// Conversation storage.
    #[serde(default)]
    pub sessions: SessionsConfig,
}

/// Gateway bind, port, and admin settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for webhook and admin HTTP (default 8787).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1"). Webhooks usually need "0.0.0.0" behind a proxy.
    #[serde(default = "default_gateway_bind")]
    pub bind: String,

    /// Bearer token for the admin API. Admin routes are not mounted when unset.
    /// Overridden by PARLEY_ADMIN_TOKEN env.
    #[serde(default)]
    pub admin_token: Option<String>,

    /// When true, POST deliveries without a signature header are rejected.
    /// When false (default), unsigned deliveries are passed to the channel unverified.
    #[serde(default)]
    pub require_signature: bool,
}

fn default_gateway_port() -> u16 {
    8787
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
            admin_token: None,
            require_signature: false,
        }
    }
}

/// Per-channel config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsConfig {
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub messenger: MessengerConfig,
    #[serde(default)]
    pub instagram: InstagramConfig,
    #[serde(default)]
    pub web: WebChatConfig,
}

/// WhatsApp Cloud API channel config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatsAppConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Permanent or system-user access token. Overridden by WHATSAPP_ACCESS_TOKEN env.
    #[serde(default)]
    pub access_token: String,
    /// Phone number id messages are sent from (`POST /{id}/messages`).
    #[serde(default, alias = "businessAccountId")]
    pub phone_number_id: String,
    /// Token echoed back during the GET verification handshake.
    #[serde(default)]
    pub verify_token: String,
    /// App secret for `X-Hub-Signature-256`. Overridden by WHATSAPP_APP_SECRET env.
    #[serde(default)]
    pub app_secret: String,
    #[serde(default)]
    pub welcome_message: String,
    /// Graph API base URL (default https://graph.facebook.com/v18.0).
    #[serde(default)]
    pub api_base: Option<String>,
}

/// Facebook Messenger channel config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessengerConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Page access token. Overridden by MESSENGER_PAGE_ACCESS_TOKEN env.
    #[serde(default)]
    pub page_access_token: String,
    #[serde(default)]
    pub page_id: String,
    #[serde(default)]
    pub verify_token: String,
    /// App secret for `X-Hub-Signature`. Overridden by MESSENGER_APP_SECRET env.
    #[serde(default)]
    pub app_secret: String,
    #[serde(default)]
    pub welcome_message: String,
    #[serde(default)]
    pub api_base: Option<String>,
}

/// Instagram Direct channel config (Messenger platform, separate credentials).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstagramConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Access token of the page linked to the Instagram account. Overridden by INSTAGRAM_ACCESS_TOKEN env.
    #[serde(default)]
    pub access_token: String,
    /// Instagram professional account id.
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub verify_token: String,
    /// Overridden by INSTAGRAM_APP_SECRET env.
    #[serde(default)]
    pub app_secret: String,
    #[serde(default)]
    pub welcome_message: String,
    #[serde(default)]
    pub api_base: Option<String>,
}

/// First-party web chat widget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebChatConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub welcome_message: String,
}

impl Default for WebChatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            welcome_message: String::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Which AI router backend answers queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouterBackend {
    /// Local Ollama chat completion.
    #[default]
    Ollama,
    /// External HTTP endpoint accepting `{query, history}` and returning `{answer, source}`.
    Http,
}

/// AI router settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterConfig {
    #[serde(default)]
    pub backend: RouterBackend,
    /// Endpoint URL. For `http` it is required; for `ollama` it is the server base URL (default http://127.0.0.1:11434).
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Ollama model name, exactly as shown by `ollama list`.
    #[serde(default)]
    pub model: Option<String>,
    /// System prompt prepended for the ollama backend.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Maximum number of most recent turns passed as history (default 20).
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Request timeout in seconds (default 30).
    #[serde(default = "default_router_timeout")]
    pub timeout_secs: u64,
}

fn default_history_limit() -> usize {
    20
}

fn default_router_timeout() -> u64 {
    30
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            backend: RouterBackend::default(),
            endpoint: None,
            model: None,
            system_prompt: None,
            history_limit: default_history_limit(),
            timeout_secs: default_router_timeout(),
        }
    }
}

/// Redelivery dedup cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// How long a platform message id is remembered (default 300).
    #[serde(default = "default_dedup_ttl")]
    pub ttl_secs: u64,
    /// Upper bound on remembered ids across channels (default 10000).
    #[serde(default = "default_dedup_max_entries")]
    pub max_entries: usize,
}

fn default_dedup_ttl() -> u64 {
    300
}

fn default_dedup_max_entries() -> usize {
    10_000
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_dedup_ttl(),
            max_entries: default_dedup_max_entries(),
        }
    }
}

/// Conversation storage settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsConfig {
    /// When set, conversations are persisted to this JSON file. Relative paths resolve against the config file's parent.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Read a non-empty trimmed env var.
fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Apply env overrides for secrets. Env wins over the file when set.
pub fn apply_env_overrides(config: &mut Config) {
    let channels = &mut config.channels;
    if let Some(v) = env_nonempty("WHATSAPP_ACCESS_TOKEN") {
        channels.whatsapp.access_token = v;
    }
    if let Some(v) = env_nonempty("WHATSAPP_APP_SECRET") {
        channels.whatsapp.app_secret = v;
    }
    if let Some(v) = env_nonempty("MESSENGER_PAGE_ACCESS_TOKEN") {
        channels.messenger.page_access_token = v;
    }
    if let Some(v) = env_nonempty("MESSENGER_APP_SECRET") {
        channels.messenger.app_secret = v;
    }
    if let Some(v) = env_nonempty("INSTAGRAM_ACCESS_TOKEN") {
        channels.instagram.access_token = v;
    }
    if let Some(v) = env_nonempty("INSTAGRAM_APP_SECRET") {
        channels.instagram.app_secret = v;
    }
    if let Some(v) = env_nonempty("PARLEY_ADMIN_TOKEN") {
        config.gateway.admin_token = Some(v);
    }
}

/// Resolve the admin token: empty strings count as unset.
pub fn resolve_admin_token(config: &Config) -> Option<String> {
    config
        .gateway
        .admin_token
        .as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("PARLEY_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".parley").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Resolve the conversation persistence file, if configured.
pub fn resolve_sessions_path(config: &Config, config_path: &std::path::Path) -> Option<PathBuf> {
    let p = config.sessions.path.as_ref()?;
    if p.as_os_str().is_empty() {
        return None;
    }
    if p.is_absolute() {
        return Some(p.clone());
    }
    let parent = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
    Some(parent.join(p))
}

/// Parse the config file as written, without env overrides. Missing file => default config.
pub fn read_config_file(path: &std::path::Path) -> Result<Config> {
    if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        return Ok(Config::default());
    }
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    serde_json::from_str(&s).with_context(|| format!("parsing config from {}", path.display()))
}

/// Load config from the given path (or PARLEY_CONFIG_PATH / default). Missing file => default config.
/// Env overrides are applied after parsing. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let mut config = read_config_file(&path)?;
    apply_env_overrides(&mut config);
    Ok((config, path))
}

/// Persist config (settings-update path). Writes pretty JSON, creating the parent directory.
pub fn save_config(path: &std::path::Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(config).context("serializing config")?;
    std::fs::write(path, json).with_context(|| format!("writing config to {}", path.display()))
}
