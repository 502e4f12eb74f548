//! Short-lived memory of platform message ids, so webhook redeliveries are not answered twice.
//!
//! Keyed by (channel, platform message id). Entries expire after the TTL; when full, the oldest
//! entry is evicted first.

use crate::channels::ChannelKind;
use crate::config::DedupConfig;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

type Key = (ChannelKind, String);

#[derive(Default)]
struct Seen {
    at: HashMap<Key, Instant>,
    order: VecDeque<(Key, Instant)>,
}

impl Seen {
    fn purge_expired(&mut self, now: Instant, ttl: Duration) {
        while let Some((key, at)) = self.order.front() {
            if now.duration_since(*at) < ttl {
                break;
            }
            // Only drop the map entry if it was not refreshed after this queue slot.
            if self.at.get(key) == Some(at) {
                self.at.remove(key);
            }
            self.order.pop_front();
        }
    }

    fn evict_oldest(&mut self) {
        while let Some((key, at)) = self.order.pop_front() {
            if self.at.get(&key) == Some(&at) {
                self.at.remove(&key);
                return;
            }
        }
    }
}

pub struct DedupCache {
    ttl: Duration,
    max_entries: usize,
    seen: Mutex<Seen>,
}

impl DedupCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            seen: Mutex::new(Seen::default()),
        }
    }

    /// Build from config; None when deduplication is disabled.
    pub fn from_config(config: &DedupConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        Some(Self::new(
            Duration::from_secs(config.ttl_secs),
            config.max_entries,
        ))
    }

    /// Record the id and return true if it was not seen within the TTL. Empty ids are always new.
    pub async fn first_delivery(&self, channel: ChannelKind, message_id: &str) -> bool {
        let message_id = message_id.trim();
        if message_id.is_empty() {
            return true;
        }
        let now = Instant::now();
        let mut seen = self.seen.lock().await;
        seen.purge_expired(now, self.ttl);
        let key = (channel, message_id.to_string());
        if seen.at.contains_key(&key) {
            return false;
        }
        while seen.at.len() >= self.max_entries {
            seen.evict_oldest();
        }
        seen.at.insert(key.clone(), now);
        seen.order.push_back((key, now));
        true
    }

    /// Forget an id, so a later redelivery is processed again (used when processing failed).
    pub async fn forget(&self, channel: ChannelKind, message_id: &str) {
        let mut seen = self.seen.lock().await;
        seen.at.remove(&(channel, message_id.trim().to_string()));
    }

    pub async fn len(&self) -> usize {
        self.seen.lock().await.at.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_delivery_is_duplicate() {
        let cache = DedupCache::new(Duration::from_secs(60), 100);
        assert!(cache.first_delivery(ChannelKind::WhatsApp, "wamid.1").await);
        assert!(!cache.first_delivery(ChannelKind::WhatsApp, "wamid.1").await);
        // same id on another channel is independent
        assert!(cache.first_delivery(ChannelKind::Messenger, "wamid.1").await);
    }

    #[tokio::test]
    async fn empty_ids_are_never_deduplicated() {
        let cache = DedupCache::new(Duration::from_secs(60), 100);
        assert!(cache.first_delivery(ChannelKind::Instagram, "").await);
        assert!(cache.first_delivery(ChannelKind::Instagram, "  ").await);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn expired_entries_are_forgotten() {
        let cache = DedupCache::new(Duration::from_millis(20), 100);
        assert!(cache.first_delivery(ChannelKind::WhatsApp, "m").await);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.first_delivery(ChannelKind::WhatsApp, "m").await);
    }

    #[tokio::test]
    async fn capacity_evicts_oldest() {
        let cache = DedupCache::new(Duration::from_secs(60), 2);
        assert!(cache.first_delivery(ChannelKind::WhatsApp, "a").await);
        assert!(cache.first_delivery(ChannelKind::WhatsApp, "b").await);
        assert!(cache.first_delivery(ChannelKind::WhatsApp, "c").await);
        assert_eq!(cache.len().await, 2);
        // "a" was evicted, "c" is still remembered
        assert!(!cache.first_delivery(ChannelKind::WhatsApp, "c").await);
        assert!(cache.first_delivery(ChannelKind::WhatsApp, "a").await);
    }

    #[tokio::test]
    async fn forget_allows_reprocessing() {
        let cache = DedupCache::new(Duration::from_secs(60), 10);
        assert!(cache.first_delivery(ChannelKind::Messenger, "mid.1").await);
        cache.forget(ChannelKind::Messenger, "mid.1").await;
        assert!(cache.first_delivery(ChannelKind::Messenger, "mid.1").await);
    }

    #[test]
    fn disabled_config_builds_nothing() {
        let config = DedupConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(DedupCache::from_config(&config).is_none());
        assert!(DedupCache::from_config(&DedupConfig::default()).is_some());
    }
}
