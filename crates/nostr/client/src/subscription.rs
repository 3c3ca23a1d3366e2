//! Subscription handles for receiving filtered events.

use crate::error::{ClientError, Result};
use futures_util::Stream;
use nostr::Event;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Buffered items per subscription before the relay reader waits.
pub const SUBSCRIPTION_BUFFER: usize = 1000;

/// One item delivered on a subscription, in relay-send order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionItem {
    Event(Event),
    /// Stored events are exhausted; live events may follow.
    Eose,
    /// The relay or the connection ended the subscription.
    Closed(String),
}

/// Generate a fresh subscription id.
pub fn generate_subscription_id() -> String {
    format!("sub-{}", uuid::Uuid::new_v4().simple())
}

/// Sending half of a subscription, held by whoever produces items.
#[derive(Debug, Clone)]
pub struct SubscriptionSender {
    id: String,
    tx: mpsc::Sender<SubscriptionItem>,
}

impl SubscriptionSender {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Deliver an item, waiting while the consumer's buffer is full.
    pub async fn send(&self, item: SubscriptionItem) -> Result<()> {
        self.tx
            .send(item)
            .await
            .map_err(|_| ClientError::Subscription("event channel closed".to_string()))
    }

    /// Deliver an item without waiting.
    pub fn deliver(&self, item: SubscriptionItem) -> Result<()> {
        self.tx.try_send(item).map_err(|error| match error {
            mpsc::error::TrySendError::Full(_) => {
                ClientError::Subscription("event channel full - consumer too slow".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                ClientError::Subscription("event channel closed".to_string())
            }
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half of a subscription on one relay.
///
/// The stream ends once the producer drops its sender, which happens on
/// unsubscribe, on `CLOSED`, and on disconnect.
#[derive(Debug)]
pub struct Subscription {
    pub id: String,
    pub relay_url: String,
    rx: mpsc::Receiver<SubscriptionItem>,
}

impl Subscription {
    /// Create a linked sender/handle pair.
    pub fn channel(
        id: impl Into<String>,
        relay_url: impl Into<String>,
    ) -> (SubscriptionSender, Self) {
        let id = id.into();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let sender = SubscriptionSender { id: id.clone(), tx };
        let subscription = Self {
            id,
            relay_url: relay_url.into(),
            rx,
        };
        (sender, subscription)
    }

    /// Next item, or `None` once the subscription has ended.
    pub async fn next(&mut self) -> Option<SubscriptionItem> {
        self.rx.recv().await
    }

    /// Collect events until EOSE, `CLOSED` or the end of the stream.
    pub async fn collect_until_eose(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(item) = self.next().await {
            match item {
                SubscriptionItem::Event(event) => events.push(event),
                SubscriptionItem::Eose | SubscriptionItem::Closed(_) => break,
            }
        }
        events
    }
}

impl Stream for Subscription {
    type Item = SubscriptionItem;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn event(id: &str) -> Event {
        Event {
            id: id.to_string(),
            pubkey: "pubkey".to_string(),
            created_at: 1,
            kind: 1,
            tags: vec![],
            content: String::new(),
            sig: "sig".to_string(),
        }
    }

    #[tokio::test]
    async fn items_arrive_in_send_order_and_stream_ends_on_drop() -> Result<()> {
        let (sender, mut subscription) = Subscription::channel("sub", "wss://relay.test");
        sender.deliver(SubscriptionItem::Event(event("a")))?;
        sender.deliver(SubscriptionItem::Eose)?;
        sender.deliver(SubscriptionItem::Event(event("b")))?;
        drop(sender);

        assert_eq!(
            subscription.next().await,
            Some(SubscriptionItem::Event(event("a")))
        );
        let rest: Vec<SubscriptionItem> = (&mut subscription).collect().await;
        assert_eq!(
            rest,
            vec![SubscriptionItem::Eose, SubscriptionItem::Event(event("b"))]
        );
        Ok(())
    }

    #[tokio::test]
    async fn collect_until_eose_stops_at_closed() -> Result<()> {
        let (sender, mut subscription) = Subscription::channel("sub", "wss://relay.test");
        sender.deliver(SubscriptionItem::Event(event("a")))?;
        sender.deliver(SubscriptionItem::Closed("error: shutting down".to_string()))?;
        sender.deliver(SubscriptionItem::Event(event("late")))?;

        let events = subscription.collect_until_eose().await;
        assert_eq!(events, vec![event("a")]);
        Ok(())
    }

    #[test]
    fn deliver_to_dropped_handle_reports_closed_channel() {
        let (sender, subscription) = Subscription::channel("sub", "wss://relay.test");
        drop(subscription);
        assert!(sender.is_closed());
        let error = sender.deliver(SubscriptionItem::Eose).err();
        assert!(matches!(
            error,
            Some(ClientError::Subscription(message)) if message.contains("closed")
        ));
    }

    #[tokio::test]
    async fn send_waits_for_room_instead_of_dropping() -> Result<()> {
        let (sender, mut subscription) = Subscription::channel("sub", "wss://relay.test");
        for index in 0..SUBSCRIPTION_BUFFER {
            sender.deliver(SubscriptionItem::Event(event(&index.to_string())))?;
        }
        assert!(sender.deliver(SubscriptionItem::Eose).is_err());

        let producer = tokio::spawn(async move { sender.send(SubscriptionItem::Eose).await });
        let mut received = 0;
        while let Some(item) = subscription.next().await {
            if item == SubscriptionItem::Eose {
                break;
            }
            received += 1;
        }
        assert_eq!(received, SUBSCRIPTION_BUFFER);
        producer.await.unwrap()?;
        Ok(())
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(generate_subscription_id(), generate_subscription_id());
        assert!(generate_subscription_id().starts_with("sub-"));
    }
}
