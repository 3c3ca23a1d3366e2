//! High-level client used by the repository directory.

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::fetch::{FetchAggregator, FetchRequest};
use crate::identity::{IdentityProvider, ListenerId};
use crate::pool::RelayPool;
use crate::publisher::{PublishResult, Publisher};
use crate::session::SessionCache;
use crate::signer::{LocalSigner, Signer};
use crate::transport::RelayTransport;
use nostr::{
    CodeRepository, EventTemplate, Filter, KIND_CODE_REPOSITORY, identity_mnemonic_path,
    load_or_create_identity_at, sort_events, unix_now,
};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// Owns the relay pool, identity, fetcher, publisher and session.
pub struct NostrClient {
    config: ClientConfig,
    pool: Arc<RelayPool>,
    identity: Arc<IdentityProvider>,
    fetcher: FetchAggregator,
    publisher: Publisher,
    session: Arc<SessionCache>,
    following_identity: OnceCell<ListenerId>,
}

impl NostrClient {
    pub fn new(config: ClientConfig) -> Self {
        Self::assemble(config, Arc::new(IdentityProvider::new()))
    }

    pub fn with_signer(config: ClientConfig, signer: Arc<dyn Signer>) -> Self {
        Self::assemble(config, Arc::new(IdentityProvider::with_signer(signer)))
    }

    /// Headless client signing with the local mnemonic identity.
    ///
    /// The mnemonic file is created on first use; see
    /// `NOSTR_IDENTITY_MNEMONIC_PATH`.
    pub fn with_local_identity(config: ClientConfig) -> Result<Self> {
        let path =
            identity_mnemonic_path().map_err(|error| ClientError::Identity(error.to_string()))?;
        Self::with_identity_file(config, path)
    }

    pub fn with_identity_file(config: ClientConfig, path: impl AsRef<Path>) -> Result<Self> {
        let identity = load_or_create_identity_at(path)
            .map_err(|error| ClientError::Identity(format!("{error:#}")))?;
        info!("signing as local identity {}", identity.npub);
        Ok(Self::with_signer(
            config,
            Arc::new(LocalSigner::from_identity(&identity)),
        ))
    }

    fn assemble(config: ClientConfig, identity: Arc<IdentityProvider>) -> Self {
        let pool = Arc::new(RelayPool::new(config.pool.clone()));
        let transport: Arc<dyn RelayTransport> = pool.clone();
        let fetcher = FetchAggregator::with_timeout(Arc::clone(&transport), config.fetch_timeout);
        let publisher =
            Publisher::with_timeout(Arc::clone(&identity), transport, config.publish_timeout);
        let session = Arc::new(SessionCache::new(fetcher.clone()));
        Self {
            config,
            pool,
            identity,
            fetcher,
            publisher,
            session,
            following_identity: OnceCell::new(),
        }
    }

    pub fn pool(&self) -> &Arc<RelayPool> {
        &self.pool
    }

    pub fn identity(&self) -> &Arc<IdentityProvider> {
        &self.identity
    }

    pub fn fetcher(&self) -> &FetchAggregator {
        &self.fetcher
    }

    pub fn session(&self) -> &Arc<SessionCache> {
        &self.session
    }

    /// Add the configured relays and connect them.
    ///
    /// Succeeds when at least one relay connected.
    pub async fn connect(&self) -> Result<()> {
        for url in &self.config.relays {
            if let Err(error) = self.pool.add_relay(url).await {
                warn!("skipping relay {}: {}", url, error);
            }
        }
        self.following_identity
            .get_or_init(|| self.session.follow_identity(&self.identity))
            .await;
        let results = self.pool.connect_all().await?;
        info!(
            "client connected to {} relay(s)",
            results.iter().filter(|(_, result)| result.is_ok()).count()
        );
        Ok(())
    }

    /// Ask the signer for its key and start the session.
    pub async fn login(&self) -> Result<String> {
        let pubkey = self.identity.login().await?;
        self.session.set_pubkey(Some(pubkey.clone())).await;
        Ok(pubkey)
    }

    pub async fn logout(&self) {
        self.session.logout().await;
    }

    pub async fn publish(&self, template: &EventTemplate) -> Result<PublishResult> {
        self.publisher.publish(template).await
    }

    pub async fn publish_code_repository(
        &self,
        repository: &CodeRepository,
    ) -> Result<PublishResult> {
        if repository.name.trim().is_empty() {
            return Err(ClientError::InvalidRequest(
                "repository name is required".to_string(),
            ));
        }
        self.publish(&repository.to_event_template(unix_now())).await
    }

    /// Repositories published by `author`, newest first, one per identifier.
    pub async fn fetch_code_repositories(&self, author: &str) -> Result<Vec<CodeRepository>> {
        let relays = self.pool.connected_relays().await;
        let filter = Filter::new()
            .kinds([KIND_CODE_REPOSITORY])
            .authors([author]);
        let mut events = self
            .fetcher
            .fetch_all(FetchRequest::fan_out(relays, &filter))
            .await?
            .events;
        sort_events(&mut events);

        let mut repositories: Vec<CodeRepository> = Vec::new();
        for repository in events.iter().filter_map(CodeRepository::from_event) {
            if !repositories
                .iter()
                .any(|existing| existing.identifier == repository.identifier)
            {
                repositories.push(repository);
            }
        }
        Ok(repositories)
    }

    /// Disconnect relays and stop background work.
    pub async fn shutdown(&self) -> Result<()> {
        self.identity.shutdown();
        self.pool.disconnect_all().await
    }
}
