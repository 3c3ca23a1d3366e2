//! Relay transport seam consumed by the fetch aggregator and the publisher.

use crate::error::Result;
use crate::relay::PublishOutcome;
use crate::subscription::Subscription;
use async_trait::async_trait;
use nostr::{Event, Filter};

#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Relays events are published to when no subset is given.
    async fn relay_urls(&self) -> Vec<String>;

    /// Open a subscription on one relay.
    async fn subscribe(&self, relay_url: &str, filters: Vec<Filter>) -> Result<Subscription>;

    /// Close a subscription opened by `subscribe`. Unknown ids are ignored.
    async fn unsubscribe(&self, subscription_id: &str) -> Result<()>;

    /// Broadcast an event, one outcome per targeted relay.
    ///
    /// `relays = None` targets `relay_urls()`. Per-relay failures are
    /// reported as rejected outcomes, not errors.
    async fn publish(&self, event: &Event, relays: Option<&[String]>)
    -> Result<Vec<PublishOutcome>>;
}
