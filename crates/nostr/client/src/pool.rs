//! Relay pool for multi-relay fanout.

use crate::error::{ClientError, Result};
use crate::relay::{ConnectionState, PublishOutcome, RelayConfig, RelayConnection};
use crate::subscription::Subscription;
use crate::transport::RelayTransport;
use async_trait::async_trait;
use futures_util::future::join_all;
use nostr::{Event, Filter};
use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Relay pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of relays in the pool.
    pub max_relays: usize,
    /// Relay configuration template.
    pub relay_config: RelayConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_relays: 16,
            relay_config: RelayConfig::default(),
        }
    }
}

/// Multi-relay pool.
///
/// Relays referenced by `subscribe` or `publish_to` but not yet in the pool
/// are added and connected on demand.
pub struct RelayPool {
    relays: RwLock<HashMap<String, RelayConnection>>,
    subscription_owners: Mutex<HashMap<String, String>>,
    config: PoolConfig,
}

impl RelayPool {
    /// Create new relay pool.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            relays: RwLock::new(HashMap::new()),
            subscription_owners: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn max_relays(&self) -> usize {
        self.config.max_relays
    }

    /// Add relay URL to pool (not connected until `connect_all` or `connect_relay`).
    pub async fn add_relay(&self, url: &str) -> Result<()> {
        let mut relays = self.relays.write().await;
        if relays.contains_key(url) {
            return Ok(());
        }
        if relays.len() >= self.config.max_relays {
            return Err(ClientError::Internal(format!(
                "maximum relay limit ({}) reached",
                self.config.max_relays
            )));
        }
        let relay = RelayConnection::with_config(url, self.config.relay_config.clone())?;
        relays.insert(url.to_string(), relay);
        debug!("added relay {}", url);
        Ok(())
    }

    /// Disconnect and forget a relay.
    pub async fn remove_relay(&self, url: &str) -> Result<()> {
        let removed = self.relays.write().await.remove(url);
        self.subscription_owners
            .lock()
            .await
            .retain(|_, owner| owner != url);
        match removed {
            Some(relay) if relay.is_connected().await => relay.disconnect().await,
            _ => Ok(()),
        }
    }

    /// Connect a specific relay.
    pub async fn connect_relay(&self, url: &str) -> Result<()> {
        let relay = self
            .relay(url)
            .await
            .ok_or_else(|| ClientError::InvalidRequest(format!("unknown relay: {}", url)))?;
        relay.connect().await
    }

    /// Connect all relays concurrently.
    ///
    /// Returns one result per relay; fails only when no relay is connected
    /// afterwards.
    pub async fn connect_all(&self) -> Result<Vec<(String, Result<()>)>> {
        let relays = self.snapshot().await;
        let attempts = relays.iter().map(|(url, relay)| async move {
            let result = match relay.connect().await {
                Err(ClientError::AlreadyConnected) => Ok(()),
                other => other,
            };
            if let Err(error) = &result {
                warn!("relay connect failed: {}: {}", url, error);
            }
            (url.clone(), result)
        });
        let results = join_all(attempts).await;

        if !results.iter().any(|(_, result)| result.is_ok()) {
            return Err(ClientError::Connection(
                "failed to connect to any relay".to_string(),
            ));
        }
        info!(
            "connected to {}/{} relays",
            results.iter().filter(|(_, result)| result.is_ok()).count(),
            results.len()
        );
        Ok(results)
    }

    /// Disconnect all relays.
    pub async fn disconnect_all(&self) -> Result<()> {
        for (url, relay) in self.snapshot().await {
            if relay.state().await == ConnectionState::Disconnected {
                continue;
            }
            if let Err(error) = relay.disconnect().await {
                debug!("error while disconnecting {}: {}", url, error);
            }
        }
        self.subscription_owners.lock().await.clear();
        Ok(())
    }

    /// Connected relay URLs, sorted.
    pub async fn connected_relays(&self) -> Vec<String> {
        let mut connected = Vec::new();
        for (url, relay) in self.snapshot().await {
            if relay.is_connected().await {
                connected.push(url);
            }
        }
        connected
    }

    /// Get relay by URL.
    pub async fn relay(&self, url: &str) -> Option<RelayConnection> {
        self.relays.read().await.get(url).cloned()
    }

    /// Subscribe on one relay.
    pub async fn subscribe(&self, relay_url: &str, filters: Vec<Filter>) -> Result<Subscription> {
        let relay = self.ensure_connected(relay_url).await?;
        let subscription = relay.subscribe(filters).await?;
        self.subscription_owners
            .lock()
            .await
            .insert(subscription.id.clone(), relay_url.to_string());
        Ok(subscription)
    }

    /// Close a subscription on whichever relay owns it.
    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        let owner = self
            .subscription_owners
            .lock()
            .await
            .remove(subscription_id);
        let Some(relay_url) = owner else {
            return Ok(());
        };
        match self.relay(&relay_url).await {
            Some(relay) => relay.unsubscribe(subscription_id).await,
            None => Ok(()),
        }
    }

    /// Publish event to every connected relay.
    pub async fn publish(&self, event: &Event) -> Vec<PublishOutcome> {
        let targets = self.connected_relays().await;
        self.publish_to(event, &targets).await
    }

    /// Publish event to the given relays concurrently, connecting as needed.
    pub async fn publish_to(&self, event: &Event, relay_urls: &[String]) -> Vec<PublishOutcome> {
        let attempts = relay_urls.iter().map(|url| async move {
            let result = match self.ensure_connected(url).await {
                Ok(relay) => relay.publish(event).await,
                Err(error) => Err(error),
            };
            result.unwrap_or_else(|error| {
                PublishOutcome::rejected(url.as_str(), event.id.as_str(), error.to_string())
            })
        });
        join_all(attempts).await
    }

    async fn ensure_connected(&self, url: &str) -> Result<RelayConnection> {
        let unreachable = |reason: String| ClientError::RelayUnreachable {
            url: url.to_string(),
            reason,
        };
        if self.relay(url).await.is_none() {
            self.add_relay(url)
                .await
                .map_err(|error| unreachable(error.to_string()))?;
        }
        let relay = self
            .relay(url)
            .await
            .ok_or_else(|| unreachable("relay removed".to_string()))?;
        match relay.connect().await {
            Ok(()) | Err(ClientError::AlreadyConnected) => Ok(relay),
            Err(error) => Err(unreachable(error.to_string())),
        }
    }

    async fn snapshot(&self) -> Vec<(String, RelayConnection)> {
        let mut relays: Vec<(String, RelayConnection)> = self
            .relays
            .read()
            .await
            .iter()
            .map(|(url, relay)| (url.clone(), relay.clone()))
            .collect();
        relays.sort_by(|left, right| left.0.cmp(&right.0));
        relays
    }
}

#[async_trait]
impl RelayTransport for RelayPool {
    async fn relay_urls(&self) -> Vec<String> {
        self.connected_relays().await
    }

    async fn subscribe(&self, relay_url: &str, filters: Vec<Filter>) -> Result<Subscription> {
        RelayPool::subscribe(self, relay_url, filters).await
    }

    async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        RelayPool::unsubscribe(self, subscription_id).await
    }

    async fn publish(
        &self,
        event: &Event,
        relays: Option<&[String]>,
    ) -> Result<Vec<PublishOutcome>> {
        Ok(match relays {
            Some(relay_urls) => self.publish_to(event, relay_urls).await,
            None => RelayPool::publish(self, event).await,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_relay_respects_limit_and_deduplicates() -> Result<()> {
        let pool = RelayPool::new(PoolConfig {
            max_relays: 2,
            ..PoolConfig::default()
        });
        pool.add_relay("wss://a.example").await?;
        pool.add_relay("wss://a.example").await?;
        pool.add_relay("wss://b.example").await?;
        assert!(matches!(
            pool.add_relay("wss://c.example").await,
            Err(ClientError::Internal(message)) if message.contains("maximum relay limit")
        ));
        assert!(pool.add_relay("https://c.example").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn connect_relay_requires_known_url() {
        let pool = RelayPool::new(PoolConfig::default());
        assert!(matches!(
            pool.connect_relay("wss://unknown.example").await,
            Err(ClientError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn empty_pool_publishes_nothing() {
        let pool = RelayPool::new(PoolConfig::default());
        let event = Event {
            id: "id".to_string(),
            pubkey: "pubkey".to_string(),
            created_at: 1,
            kind: 1,
            tags: vec![],
            content: String::new(),
            sig: "sig".to_string(),
        };
        assert!(pool.publish(&event).await.is_empty());
        assert!(pool.connected_relays().await.is_empty());
    }

    #[tokio::test]
    async fn remove_and_unsubscribe_unknown_are_noops() -> Result<()> {
        let pool = RelayPool::new(PoolConfig::default());
        pool.add_relay("wss://a.example").await?;
        pool.remove_relay("wss://a.example").await?;
        assert!(pool.relay("wss://a.example").await.is_none());
        pool.unsubscribe("sub-missing").await?;
        Ok(())
    }
}
