//! Conversation sessions: id derivation and message history.
//!
//! A session id is a pure function of (channel, external sender), so repeated deliveries from the
//! same sender always land in the same conversation. Storage sits behind `ConversationStore`; the
//! in-memory store serializes appends per session under one write lock and can mirror itself to a
//! JSON file.

use crate::channels::ChannelKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Unique session identifier (opaque string).
pub type SessionId = String;

/// Derive the session id for a sender on a channel: `<channel>_<first 32 hex of sha256(channel:sender)>`.
pub fn resolve_session_id(channel: ChannelKind, sender_id: &str) -> SessionId {
    let mut hasher = Sha256::new();
    hasher.update(channel.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(sender_id.trim().as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}_{}", channel.as_str(), &digest[..32])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single turn in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn user(content: impl Into<String>, sender_id: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            sender_id: Some(sender_id.into()),
            created_at: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            sender_id: None,
            created_at: Utc::now(),
        }
    }
}

/// Metadata the gateway keeps on each conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<ChannelKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
    /// Free-form extras (e.g. platform profile name).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

/// A conversation: id, ordered history, metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: SessionId,
    pub messages: Vec<ConversationMessage>,
    #[serde(default)]
    pub metadata: SessionMetadata,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConversationError {
    #[error("conversation not found: {0}")]
    NotFound(String),
    #[error("conversation storage failed: {0}")]
    Storage(String),
}

/// Conversation persistence collaborator.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Append a turn, creating the conversation when it does not exist yet.
    async fn add_message(
        &self,
        id: &str,
        message: ConversationMessage,
    ) -> Result<(), ConversationError>;

    /// Ordered history; with `limit`, only the most recent `limit` turns.
    async fn history(
        &self,
        id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ConversationMessage>, ConversationError>;

    /// Merge metadata into an existing conversation.
    async fn update_metadata(
        &self,
        id: &str,
        metadata: SessionMetadata,
    ) -> Result<(), ConversationError>;

    async fn get(&self, id: &str) -> Option<Conversation>;
}

/// In-memory store, optionally mirrored to a JSON file after each mutation.
pub struct MemoryConversationStore {
    inner: Arc<RwLock<HashMap<SessionId, Conversation>>>,
    path: Option<PathBuf>,
}

impl Default for MemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            path: None,
        }
    }

    /// Load from `path`; if the file is missing or invalid, starts empty. Mutations are written back.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let conversations: Vec<Conversation> = match tokio::fs::read_to_string(&path).await {
            Ok(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
                log::warn!("sessions: ignoring unreadable {}: {}", path.display(), e);
                Vec::new()
            }),
            Err(_) => Vec::new(),
        };
        log::info!(
            "sessions: loaded {} conversation(s) from {}",
            conversations.len(),
            path.display()
        );
        let map = conversations.into_iter().map(|c| (c.id.clone(), c)).collect();
        Self {
            inner: Arc::new(RwLock::new(map)),
            path: Some(path),
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Write all conversations to the backing file. Caller holds the lock so writes stay ordered.
    async fn save(&self, map: &HashMap<SessionId, Conversation>) -> Result<(), ConversationError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut list: Vec<&Conversation> = map.values().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        let json = serde_json::to_string_pretty(&list)
            .map_err(|e| ConversationError::Storage(e.to_string()))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ConversationError::Storage(e.to_string()))?;
        }
        tokio::fs::write(path, json)
            .await
            .map_err(|e| ConversationError::Storage(e.to_string()))
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn add_message(
        &self,
        id: &str,
        message: ConversationMessage,
    ) -> Result<(), ConversationError> {
        let mut g = self.inner.write().await;
        let conversation = g.entry(id.to_string()).or_insert_with(|| Conversation {
            id: id.to_string(),
            messages: Vec::new(),
            metadata: SessionMetadata::default(),
            created_at: Utc::now(),
        });
        conversation.messages.push(message);
        self.save(&g).await
    }

    async fn history(
        &self,
        id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ConversationMessage>, ConversationError> {
        let g = self.inner.read().await;
        let conversation = g
            .get(id)
            .ok_or_else(|| ConversationError::NotFound(id.to_string()))?;
        let messages = &conversation.messages;
        let start = match limit {
            Some(n) => messages.len().saturating_sub(n),
            None => 0,
        };
        Ok(messages[start..].to_vec())
    }

    async fn update_metadata(
        &self,
        id: &str,
        metadata: SessionMetadata,
    ) -> Result<(), ConversationError> {
        let mut g = self.inner.write().await;
        let conversation = g
            .get_mut(id)
            .ok_or_else(|| ConversationError::NotFound(id.to_string()))?;
        let current = &mut conversation.metadata;
        if metadata.channel.is_some() {
            current.channel = metadata.channel;
        }
        if metadata.sender_id.is_some() {
            current.sender_id = metadata.sender_id;
        }
        if metadata.last_activity.is_some() {
            current.last_activity = metadata.last_activity;
        }
        current.extra.extend(metadata.extra);
        self.save(&g).await
    }

    async fn get(&self, id: &str) -> Option<Conversation> {
        self.inner.read().await.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_is_deterministic_per_sender() {
        let a = resolve_session_id(ChannelKind::WhatsApp, "15551234567");
        let b = resolve_session_id(ChannelKind::WhatsApp, "15551234567");
        let c = resolve_session_id(ChannelKind::WhatsApp, "15557654321");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("whatsapp_"));
        assert_eq!(a.len(), "whatsapp_".len() + 32);
    }

    #[test]
    fn session_id_differs_across_channels() {
        let wa = resolve_session_id(ChannelKind::WhatsApp, "12345");
        let ms = resolve_session_id(ChannelKind::Messenger, "12345");
        assert_ne!(wa, ms);
    }

    #[tokio::test]
    async fn add_message_creates_lazily_and_keeps_order() {
        let store = MemoryConversationStore::new();
        assert!(store.get("s1").await.is_none());
        store
            .add_message("s1", ConversationMessage::user("Hello", "155"))
            .await
            .expect("append user");
        store
            .add_message("s1", ConversationMessage::assistant("Hi!"))
            .await
            .expect("append assistant");
        let history = store.history("s1", None).await.expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].sender_id.as_deref(), Some("155"));
        assert_eq!(history[1].content, "Hi!");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn history_limit_returns_most_recent() {
        let store = MemoryConversationStore::new();
        for i in 0..5 {
            store
                .add_message("s", ConversationMessage::user(format!("m{}", i), "x"))
                .await
                .expect("append");
        }
        let last_two = store.history("s", Some(2)).await.expect("history");
        assert_eq!(
            last_two.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
            vec!["m3", "m4"]
        );
        assert!(matches!(
            store.history("missing", None).await,
            Err(ConversationError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn update_metadata_merges_fields() {
        let store = MemoryConversationStore::new();
        store
            .add_message("s", ConversationMessage::user("hi", "psid"))
            .await
            .expect("append");
        store
            .update_metadata(
                "s",
                SessionMetadata {
                    channel: Some(ChannelKind::Messenger),
                    sender_id: Some("psid".to_string()),
                    last_activity: Some(Utc::now()),
                    extra: BTreeMap::new(),
                },
            )
            .await
            .expect("metadata");
        let mut extra = BTreeMap::new();
        extra.insert("profileName".to_string(), "Ana".to_string());
        store
            .update_metadata("s", SessionMetadata { extra, ..Default::default() })
            .await
            .expect("metadata extra");
        let conv = store.get("s").await.expect("conversation");
        assert_eq!(conv.metadata.channel, Some(ChannelKind::Messenger));
        assert_eq!(conv.metadata.sender_id.as_deref(), Some("psid"));
        assert!(conv.metadata.last_activity.is_some());
        assert_eq!(conv.metadata.extra.get("profileName").map(String::as_str), Some("Ana"));
    }

    #[tokio::test]
    async fn persisted_store_reloads() {
        let dir = std::env::temp_dir().join(format!("parley-sessions-{}", uuid::Uuid::new_v4()));
        let path = dir.join("sessions.json");
        {
            let store = MemoryConversationStore::load(&path).await;
            store
                .add_message("whatsapp_x", ConversationMessage::user("Hello", "155"))
                .await
                .expect("append");
        }
        let reloaded = MemoryConversationStore::load(&path).await;
        let history = reloaded.history("whatsapp_x", None).await.expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "Hello");
        let _ = std::fs::remove_dir_all(dir);
    }
}
