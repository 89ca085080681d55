//! Fan-out across every relay a client is connected to, backed by one
//! shared [`MessagePool`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use nostr_core::{Event, Subscription};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{RelayError, Result};
use crate::message_pool::MessagePool;
use crate::relay::{Relay, RelayPolicy, RelayProxyConfig, RelayStatus};

/// How long `open_connections` waits after kicking off every connect
/// attempt before sweeping for relays that still haven't come up.
const CONNECTION_WARMUP: Duration = Duration::from_secs(2);
/// `Relay::new`'s default `error_threshold` for relays added through
/// [`RelayManager::add_relay`], unless overridden via
/// [`RelayManager::with_error_threshold`].
const DEFAULT_ERROR_THRESHOLD: u32 = 5;

pub struct RelayManager {
    relays: Arc<RwLock<HashMap<String, Relay>>>,
    message_pool: MessagePool,
    default_error_threshold: u32,
}

impl Default for RelayManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayManager {
    pub fn new() -> Self {
        RelayManager {
            relays: Arc::new(RwLock::new(HashMap::new())),
            message_pool: MessagePool::new(),
            default_error_threshold: DEFAULT_ERROR_THRESHOLD,
        }
    }

    /// Sets the `error_threshold` passed to every `Relay` this manager
    /// creates from here on; `0` means a relay retries forever instead of
    /// giving up after consecutive failures.
    pub fn with_error_threshold(mut self, error_threshold: u32) -> Self {
        self.default_error_threshold = error_threshold;
        self
    }

    pub fn message_pool(&self) -> &MessagePool {
        &self.message_pool
    }

    /// Registers a relay at `url`. If one is already registered there, it
    /// is closed and replaced rather than treated as an error — re-adding
    /// a URL is how a caller changes its policy or proxy config.
    pub async fn add_relay(&self, url: impl Into<String>, policy: RelayPolicy, proxy_config: RelayProxyConfig) {
        let url = url.into();
        let mut relays = self.relays.write().await;
        if let Some(old) = relays.remove(&url) {
            old.close().await;
        }
        let relay = Relay::new(url.clone(), policy, proxy_config, self.default_error_threshold, self.message_pool.clone());
        relays.insert(url, relay);
    }

    pub async fn remove_relay(&self, url: &str) -> Result<()> {
        let relay = self
            .relays
            .write()
            .await
            .remove(url)
            .ok_or_else(|| RelayError::UnknownRelay(url.to_string()))?;
        relay.close().await;
        Ok(())
    }

    /// Spawns a connect attempt on every relay, waits out the warmup
    /// window, then prunes any relay that still hasn't reached `Connected`.
    /// Errors if every relay had to be pruned (nothing is left connected).
    pub async fn open_connections(&self) -> Result<()> {
        for relay in self.relays.read().await.values() {
            relay.connect().await;
        }

        tokio::time::sleep(CONNECTION_WARMUP).await;

        let mut relays = self.relays.write().await;
        let mut not_connected = Vec::new();
        for (url, relay) in relays.iter() {
            if relay.status().await != RelayStatus::Connected {
                not_connected.push(url.clone());
            }
        }

        for url in &not_connected {
            if let Some(relay) = relays.remove(url) {
                warn!(url, "relay manager: pruning relay that did not connect within the warmup window");
                relay.close().await;
            }
        }

        if relays.is_empty() {
            return Err(RelayError::WarmupFailed);
        }
        Ok(())
    }

    pub async fn close_connections(&self) {
        for relay in self.relays.read().await.values() {
            relay.close().await;
        }
    }

    /// Opens connections, runs `body`, then closes them again regardless of
    /// how `body` returns — the idiomatic substitute for a scoped
    /// enter/exit guard around a set of live sockets.
    pub async fn with_connections<F, Fut, T>(&self, body: F) -> T
    where
        F: FnOnce(&Self) -> Fut,
        Fut: Future<Output = T>,
    {
        if let Err(e) = self.open_connections().await {
            warn!(error = %e, "relay manager: failed to establish any relay connection during warmup");
        }
        let result = body(self).await;
        self.close_connections().await;
        result
    }

    /// Registers `subscription` on the relay at `url` without sending a
    /// `REQ` frame.
    pub async fn add_subscription(&self, url: &str, subscription: Subscription) -> Result<()> {
        let relays = self.relays.read().await;
        let relay = relays.get(url).ok_or_else(|| RelayError::UnknownRelay(url.to_string()))?;
        relay.register_subscription(subscription).await;
        Ok(())
    }

    /// Registers `subscription` and sends `REQ` on every relay whose
    /// policy permits reading.
    pub async fn add_subscription_on_all_relays(&self, subscription: Subscription) {
        for relay in self.relays.read().await.values() {
            if !relay.policy().should_read {
                continue;
            }
            if let Err(e) = relay.add_subscription(subscription.clone()).await {
                debug!(url = relay.url(), error = %e, "failed to open subscription on relay");
            }
        }
    }

    pub async fn close_subscription_on(&self, url: &str, subscription_id: &str) -> Result<()> {
        let relays = self.relays.read().await;
        let relay = relays.get(url).ok_or_else(|| RelayError::UnknownRelay(url.to_string()))?;
        relay.close_subscription(subscription_id).await
    }

    /// Sends `CLOSE` for `subscription_id` on every relay whose policy
    /// permits reading.
    pub async fn close_subscription_on_all(&self, subscription_id: &str) {
        for relay in self.relays.read().await.values() {
            if !relay.policy().should_read {
                continue;
            }
            let _ = relay.close_subscription(subscription_id).await;
        }
    }

    /// Re-sends `REQ` for `subscription` on every relay whose policy
    /// permits reading.
    pub async fn update_subscription_on_all(&self, subscription: Subscription) {
        for relay in self.relays.read().await.values() {
            if !relay.policy().should_read {
                continue;
            }
            let _ = relay.update_subscription(subscription.clone()).await;
        }
    }

    /// Publishes `event` to every connected relay. The event must be signed
    /// and its signature must verify *before* any relay is contacted — a
    /// bad event fails fast rather than being partially published.
    pub async fn publish_event(&self, event: &Event) -> Result<()> {
        if event.signature.is_none() {
            return Err(RelayError::EventNotSigned);
        }
        if !event.verify() {
            return Err(RelayError::SignatureVerificationFailed);
        }
        for relay in self.relays.read().await.values() {
            if let Err(e) = relay.publish(event).await {
                debug!(url = relay.url(), error = %e, "failed to publish to relay");
            }
        }
        Ok(())
    }

    pub async fn connection_statuses(&self) -> HashMap<String, RelayStatus> {
        let mut statuses = HashMap::new();
        for (url, relay) in self.relays.read().await.iter() {
            statuses.insert(url.clone(), relay.status().await);
        }
        statuses
    }

    pub async fn relay_urls(&self) -> Vec<String> {
        self.relays.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr_core::{EventKind, FilterSet, SecretKey};

    #[tokio::test]
    async fn test_add_relay_replaces_existing_entry() {
        let manager = RelayManager::new();
        manager.add_relay("wss://relay.example", RelayPolicy::default(), RelayProxyConfig::default()).await;
        manager.add_relay("wss://relay.example", RelayPolicy::default(), RelayProxyConfig::default()).await;
        assert_eq!(manager.relay_urls().await, vec!["wss://relay.example".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_unknown_relay_is_an_error() {
        let manager = RelayManager::new();
        assert!(matches!(manager.remove_relay("wss://nope").await, Err(RelayError::UnknownRelay(_))));
    }

    #[tokio::test]
    async fn test_publish_event_requires_signature() {
        let manager = RelayManager::new();
        let event = Event::new(EventKind::Text, "hi");
        assert!(matches!(manager.publish_event(&event).await, Err(RelayError::EventNotSigned)));
    }

    #[tokio::test]
    async fn test_publish_event_rejects_forged_signature() {
        let manager = RelayManager::new();
        let mut event = Event::new(EventKind::Text, "hi");
        event.pubkey = SecretKey::generate().public_key().hex();
        event.signature = Some(hex::encode([0u8; 64]));
        assert!(matches!(manager.publish_event(&event).await, Err(RelayError::SignatureVerificationFailed)));
    }

    #[tokio::test]
    async fn test_connection_statuses_tracks_every_added_relay() {
        let manager = RelayManager::new();
        manager.add_relay("wss://relay.example", RelayPolicy::default(), RelayProxyConfig::default()).await;
        let statuses = manager.connection_statuses().await;
        assert_eq!(statuses.len(), 1);
        assert!(matches!(statuses["wss://relay.example"], RelayStatus::Idle));
    }

    #[tokio::test]
    async fn test_add_subscription_registers_without_sending() {
        let manager = RelayManager::new();
        manager.add_relay("wss://relay.example", RelayPolicy::default(), RelayProxyConfig::default()).await;
        manager.add_subscription("wss://relay.example", Subscription::new("s1", FilterSet::default())).await.unwrap();

        let relays = manager.relays.read().await;
        let relay = relays.get("wss://relay.example").unwrap();
        assert_eq!(relay.subscription_ids().await, vec!["s1".to_string()]);
    }

    #[tokio::test]
    async fn test_add_subscription_on_all_relays_skips_write_only_relays() {
        let manager = RelayManager::new();
        let write_only = RelayPolicy { should_read: false, should_write: true };
        manager.add_relay("wss://write-only.example", write_only, RelayProxyConfig::default()).await;
        manager.add_subscription_on_all_relays(Subscription::new("s1", FilterSet::default())).await;

        let relays = manager.relays.read().await;
        let relay = relays.get("wss://write-only.example").unwrap();
        assert!(relay.subscription_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_open_connections_errors_when_every_relay_fails_to_connect() {
        let manager = RelayManager::new();
        manager.add_relay("wss://relay.invalid", RelayPolicy::default(), RelayProxyConfig::default()).await;
        assert!(matches!(manager.open_connections().await, Err(RelayError::WarmupFailed)));
        assert!(manager.relay_urls().await.is_empty());
    }
}
