//! Event construction and broadcast.

use crate::error::{ClientError, Result};
use crate::identity::IdentityProvider;
use crate::relay::{PUBLISH_TIMEOUT_REASON, PublishOutcome};
use crate::transport::RelayTransport;
use futures_util::future::join_all;
use nostr::{Event, EventTemplate, unix_now};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default time to wait for relay acknowledgements.
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

/// Build a template from `(name, value)` pairs, dropping empty values.
pub fn build<I, N, V>(
    kind: u16,
    tag_pairs: I,
    content: impl Into<String>,
    created_at: Option<u64>,
) -> EventTemplate
where
    I: IntoIterator<Item = (N, V)>,
    N: Into<String>,
    V: Into<String>,
{
    let builder = tag_pairs
        .into_iter()
        .fold(EventBuilder::new(kind), |builder, (name, value)| {
            builder.tag(name, value)
        })
        .content(content);
    match created_at {
        Some(created_at) => builder.created_at(created_at).build(),
        None => builder.build(),
    }
}

/// Fluent event template builder.
///
/// Tags whose value is empty are never emitted.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    kind: u16,
    tags: Vec<Vec<String>>,
    content: String,
    created_at: Option<u64>,
}

impl EventBuilder {
    pub fn new(kind: u16) -> Self {
        Self {
            kind,
            tags: Vec::new(),
            content: String::new(),
            created_at: None,
        }
    }

    pub fn tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.tags.push(vec![name.into(), value]);
        }
        self
    }

    pub fn optional_tag<V: Into<String>>(self, name: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(value) => self.tag(name, value),
            None => self,
        }
    }

    /// Same tag name for each value, e.g. repeated `t` topics.
    pub fn tags<I, V>(self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        values
            .into_iter()
            .fold(self, |builder, value| builder.tag(name, value))
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn created_at(mut self, created_at: u64) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn build(self) -> EventTemplate {
        EventTemplate {
            created_at: self.created_at.unwrap_or_else(unix_now),
            kind: self.kind,
            tags: self.tags,
            content: self.content,
        }
    }
}

/// Signed event and its per-relay outcomes.
#[derive(Debug, Clone)]
pub struct PublishResult {
    pub event: Event,
    pub outcomes: Vec<PublishOutcome>,
}

impl PublishResult {
    pub fn accepted_count(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.accepted).count()
    }

    pub fn any_accepted(&self) -> bool {
        self.outcomes.iter().any(|outcome| outcome.accepted)
    }
}

/// Signs templates through the identity provider and broadcasts them.
#[derive(Clone)]
pub struct Publisher {
    identity: Arc<IdentityProvider>,
    transport: Arc<dyn RelayTransport>,
    publish_timeout: Duration,
}

impl Publisher {
    pub fn new(identity: Arc<IdentityProvider>, transport: Arc<dyn RelayTransport>) -> Self {
        Self::with_timeout(identity, transport, DEFAULT_PUBLISH_TIMEOUT)
    }

    pub fn with_timeout(
        identity: Arc<IdentityProvider>,
        transport: Arc<dyn RelayTransport>,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            identity,
            transport,
            publish_timeout,
        }
    }

    /// Sign and broadcast to the transport's relays.
    pub async fn publish(&self, template: &EventTemplate) -> Result<PublishResult> {
        self.publish_inner(template, None).await
    }

    /// Sign and broadcast to a subset of relays.
    pub async fn publish_to(
        &self,
        template: &EventTemplate,
        relay_urls: &[String],
    ) -> Result<PublishResult> {
        self.publish_inner(template, Some(relay_urls)).await
    }

    async fn publish_inner(
        &self,
        template: &EventTemplate,
        relay_urls: Option<&[String]>,
    ) -> Result<PublishResult> {
        let event = self
            .identity
            .sign(template)
            .await
            .map_err(|error| ClientError::PublishAborted(Box::new(error)))?;

        let targets = match relay_urls {
            Some(relay_urls) => relay_urls.to_vec(),
            None => self.transport.relay_urls().await,
        };
        if targets.is_empty() {
            warn!("no relays to publish event {} to", event.id);
            return Ok(PublishResult {
                event,
                outcomes: Vec::new(),
            });
        }

        let outcomes = join_all(
            targets
                .iter()
                .map(|relay_url| self.publish_one(&event, relay_url)),
        )
        .await;

        let result = PublishResult { event, outcomes };
        info!(
            "published {} (kind {}): {}/{} relays accepted",
            result.event.id,
            result.event.kind,
            result.accepted_count(),
            result.outcomes.len()
        );
        Ok(result)
    }

    /// One relay's outcome, bounded by the publish timeout.
    ///
    /// Failures and timeouts become rejections for that relay only.
    async fn publish_one(&self, event: &Event, relay_url: &str) -> PublishOutcome {
        let target = [relay_url.to_string()];
        let publishing = self.transport.publish(event, Some(target.as_slice()));
        match tokio::time::timeout(self.publish_timeout, publishing).await {
            Ok(Ok(outcomes)) => outcomes.into_iter().next().unwrap_or_else(|| {
                PublishOutcome::rejected(relay_url, event.id.as_str(), "no outcome from relay")
            }),
            Ok(Err(error)) => {
                debug!("publish {} to {} failed: {}", event.id, relay_url, error);
                PublishOutcome::rejected(relay_url, event.id.as_str(), error.to_string())
            }
            Err(_) => {
                PublishOutcome::rejected(relay_url, event.id.as_str(), PUBLISH_TIMEOUT_REASON)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::{LocalSigner, Signer};
    use crate::subscription::Subscription;
    use async_trait::async_trait;
    use nostr::{Filter, UnsignedEvent, verify_event};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTransport {
        relays: Vec<String>,
        rejecting: Vec<String>,
        stalled: Vec<String>,
        publishes: AtomicUsize,
    }

    impl CountingTransport {
        fn new(relays: &[&str]) -> Self {
            Self {
                relays: relays.iter().map(|url| url.to_string()).collect(),
                rejecting: Vec::new(),
                stalled: Vec::new(),
                publishes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RelayTransport for CountingTransport {
        async fn relay_urls(&self) -> Vec<String> {
            self.relays.clone()
        }

        async fn subscribe(&self, relay_url: &str, _filters: Vec<Filter>) -> Result<Subscription> {
            Ok(Subscription::channel("unused", relay_url).1)
        }

        async fn unsubscribe(&self, _subscription_id: &str) -> Result<()> {
            Ok(())
        }

        async fn publish(
            &self,
            event: &Event,
            relays: Option<&[String]>,
        ) -> Result<Vec<PublishOutcome>> {
            self.publishes.fetch_add(1, Ordering::SeqCst);
            let targets = relays.map_or_else(|| self.relays.clone(), <[String]>::to_vec);
            if targets.iter().any(|url| self.stalled.contains(url)) {
                std::future::pending::<()>().await;
            }
            Ok(targets
                .into_iter()
                .map(|url| {
                    if self.rejecting.contains(&url) {
                        PublishOutcome::rejected(url, event.id.as_str(), "blocked: spam")
                    } else {
                        PublishOutcome::accepted(url, event.id.as_str())
                    }
                })
                .collect())
        }
    }

    struct DecliningSigner;

    #[async_trait]
    impl Signer for DecliningSigner {
        async fn get_public_key(&self) -> Result<String> {
            LocalSigner::generate().get_public_key().await
        }

        async fn sign_event(&self, _event: UnsignedEvent) -> Result<Event> {
            Err(ClientError::SignerRejected("user declined".to_string()))
        }
    }

    fn local_identity() -> Arc<IdentityProvider> {
        Arc::new(IdentityProvider::with_signer(Arc::new(
            LocalSigner::generate(),
        )))
    }

    #[test]
    fn build_drops_empty_values() {
        let template = build(30117, [("t", "rust"), ("license", "")], "", Some(5));
        assert_eq!(
            template.tags,
            vec![vec!["t".to_string(), "rust".to_string()]]
        );
        assert_eq!(template.created_at, 5);
        assert_eq!(template.kind, 30117);
    }

    #[test]
    fn builder_keeps_falsy_looking_strings() {
        let template = EventBuilder::new(1)
            .tag("count", "0")
            .tag("flag", "false")
            .optional_tag("missing", None::<String>)
            .optional_tag("r", Some("https://example.com"))
            .tags("t", ["nostr", "", "rust"])
            .content("body")
            .build();
        assert_eq!(
            template.tags,
            vec![
                vec!["count".to_string(), "0".to_string()],
                vec!["flag".to_string(), "false".to_string()],
                vec!["r".to_string(), "https://example.com".to_string()],
                vec!["t".to_string(), "nostr".to_string()],
                vec!["t".to_string(), "rust".to_string()],
            ]
        );
        assert_eq!(template.content, "body");
        assert!(template.created_at > 0);
    }

    #[tokio::test]
    async fn publish_signs_and_reports_partial_acceptance() -> Result<()> {
        let mut transport = CountingTransport::new(&["wss://a", "wss://b"]);
        transport.rejecting.push("wss://b".to_string());
        let publisher = Publisher::new(local_identity(), Arc::new(transport));

        let result = publisher
            .publish(&build(1, [("t", "rust")], "hello", None))
            .await?;
        assert!(verify_event(&result.event)?);
        assert_eq!(result.outcomes.len(), 2);
        assert_eq!(result.accepted_count(), 1);
        assert!(result.any_accepted());
        assert_eq!(result.outcomes[1].reason.as_deref(), Some("blocked: spam"));
        Ok(())
    }

    #[tokio::test]
    async fn zero_relays_is_not_an_error() -> Result<()> {
        let transport = Arc::new(CountingTransport::new(&[]));
        let publisher = Publisher::new(local_identity(), transport.clone());
        let result = publisher.publish(&build(1, [("t", "x")], "", None)).await?;
        assert!(result.outcomes.is_empty());
        assert!(!result.any_accepted());
        assert_eq!(transport.publishes.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn rejected_signature_aborts_without_relay_contact() {
        let transport = Arc::new(CountingTransport::new(&["wss://a"]));
        let identity = Arc::new(IdentityProvider::with_signer(Arc::new(DecliningSigner)));
        let publisher = Publisher::new(identity, transport.clone());

        let error = publisher.publish(&build(1, [("t", "x")], "", None)).await.err();
        assert!(matches!(
            &error,
            Some(ClientError::PublishAborted(inner)) if matches!(**inner, ClientError::SignerRejected(_))
        ));
        assert!(error.is_some_and(|error| error.is_signer_error()));
        assert_eq!(transport.publishes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_signer_aborts() {
        let transport = Arc::new(CountingTransport::new(&["wss://a"]));
        let publisher = Publisher::new(Arc::new(IdentityProvider::new()), transport.clone());
        assert!(matches!(
            publisher.publish(&build(1, [("t", "x")], "", None)).await,
            Err(ClientError::PublishAborted(inner)) if matches!(*inner, ClientError::SignerUnavailable)
        ));
        assert_eq!(transport.publishes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stalled_relay_does_not_hide_other_acceptances() -> Result<()> {
        let mut transport = CountingTransport::new(&["wss://a", "wss://b", "wss://c"]);
        transport.stalled.push("wss://b".to_string());
        transport.rejecting.push("wss://c".to_string());
        let transport = Arc::new(transport);
        let publisher = Publisher::with_timeout(
            local_identity(),
            transport.clone(),
            Duration::from_millis(50),
        );

        let result = publisher.publish(&build(1, [("t", "x")], "", None)).await?;
        let summary: Vec<(&str, bool, Option<&str>)> = result
            .outcomes
            .iter()
            .map(|outcome| {
                (
                    outcome.relay_url.as_str(),
                    outcome.accepted,
                    outcome.reason.as_deref(),
                )
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                ("wss://a", true, None),
                ("wss://b", false, Some(PUBLISH_TIMEOUT_REASON)),
                ("wss://c", false, Some("blocked: spam")),
            ]
        );
        assert_eq!(transport.publishes.load(Ordering::SeqCst), 3);
        Ok(())
    }
}
