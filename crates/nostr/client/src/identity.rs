//! Identity provider: the current signer, its public key and readiness.

use crate::error::{ClientError, Result};
use crate::signer::Signer;
use nostr::{Event, EventTemplate, get_event_hash, verify_event};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Handle returned when registering a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

type AvailabilityListener = Arc<dyn Fn(bool) + Send + Sync>;

/// Probe used by `watch_for_signer` to look for a signer that may appear late.
pub type SignerProbe = Arc<dyn Fn() -> Option<Arc<dyn Signer>> + Send + Sync>;

/// Wraps the external signer.
///
/// Absence of a signer is a normal state; callers learn about it through
/// `is_available` and the availability listeners.
pub struct IdentityProvider {
    signer: RwLock<Option<Arc<dyn Signer>>>,
    pubkey: RwLock<Option<String>>,
    listeners: RwLock<Vec<(ListenerId, AvailabilityListener)>>,
    next_listener_id: AtomicU64,
    polling: AtomicBool,
    shutdown: CancellationToken,
}

impl Default for IdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityProvider {
    pub fn new() -> Self {
        Self {
            signer: RwLock::new(None),
            pubkey: RwLock::new(None),
            listeners: RwLock::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            polling: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_signer(signer: Arc<dyn Signer>) -> Self {
        Self {
            signer: RwLock::new(Some(signer)),
            ..Self::new()
        }
    }

    pub async fn is_available(&self) -> bool {
        self.signer.read().await.is_some()
    }

    /// Install or remove the signer. Listeners fire once per transition.
    pub async fn set_signer(&self, signer: Option<Arc<dyn Signer>>) {
        let (was_available, now_available) = {
            let mut current = self.signer.write().await;
            let was_available = current.is_some();
            *current = signer;
            (was_available, current.is_some())
        };
        *self.pubkey.write().await = None;

        if was_available != now_available {
            info!("signer availability changed: {}", now_available);
            let listeners: Vec<AvailabilityListener> = self
                .listeners
                .read()
                .await
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect();
            for listener in listeners {
                listener(now_available);
            }
        }
    }

    /// Cached public key, fetched from the signer on first use.
    pub async fn current_pubkey(&self) -> Option<String> {
        match self.public_key().await {
            Ok(pubkey) => Some(pubkey),
            Err(error) => {
                debug!("no current pubkey: {}", error);
                None
            }
        }
    }

    /// Ask the signer for its key; the user-facing entry point.
    pub async fn login(&self) -> Result<String> {
        match self.public_key().await {
            Ok(pubkey) => {
                info!("logged in as {}", pubkey);
                Ok(pubkey)
            }
            Err(ClientError::SignerUnavailable) => Err(ClientError::SignerUnavailable),
            Err(error) => {
                warn!("login failed: {}", error);
                Err(ClientError::SignerRejected("failed to login".to_string()))
            }
        }
    }

    /// Fill in the pubkey, have the signer sign, and check the result.
    pub async fn sign(&self, template: &EventTemplate) -> Result<Event> {
        let signer = self.signer().await?;
        let pubkey = self.public_key().await?;
        let unsigned = template.to_unsigned(&pubkey);
        let expected_id = get_event_hash(&unsigned)?;

        let event = signer
            .sign_event(unsigned.clone())
            .await
            .map_err(|error| match error {
                ClientError::SignerRejected(reason) => ClientError::SignerRejected(reason),
                other => ClientError::SignerRejected(other.to_string()),
            })?;

        if event.id != expected_id || event.unsigned() != unsigned {
            return Err(ClientError::SignerRejected(
                "signer returned a different event".to_string(),
            ));
        }
        if !matches!(verify_event(&event), Ok(true)) {
            return Err(ClientError::SignerRejected(
                "signer returned an invalid signature".to_string(),
            ));
        }
        Ok(event)
    }

    /// Register a readiness listener. It is not invoked on registration.
    pub async fn on_availability_changed(
        &self,
        listener: impl Fn(bool) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().await.push((id, Arc::new(listener)));
        id
    }

    pub async fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().await;
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Poll `probe` every `interval` until it yields a signer or shutdown.
    ///
    /// Returns `None` when a poll is already running.
    pub fn watch_for_signer(
        self: &Arc<Self>,
        probe: SignerProbe,
        interval: Duration,
    ) -> Option<JoinHandle<()>> {
        if self.polling.swap(true, Ordering::SeqCst) {
            debug!("signer poll already running");
            return None;
        }
        let provider = Arc::clone(self);
        Some(tokio::spawn(async move {
            loop {
                if let Some(signer) = probe() {
                    provider.set_signer(Some(signer)).await;
                    break;
                }
                tokio::select! {
                    () = provider.shutdown.cancelled() => break,
                    () = tokio::time::sleep(interval) => {}
                }
            }
            provider.polling.store(false, Ordering::SeqCst);
        }))
    }

    /// Stop background polling.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn signer(&self) -> Result<Arc<dyn Signer>> {
        self.signer
            .read()
            .await
            .clone()
            .ok_or(ClientError::SignerUnavailable)
    }

    async fn public_key(&self) -> Result<String> {
        if let Some(pubkey) = self.pubkey.read().await.clone() {
            return Ok(pubkey);
        }
        let signer = self.signer().await?;
        let pubkey = signer.get_public_key().await?;
        if pubkey.is_empty() {
            return Err(ClientError::SignerRejected(
                "signer returned an empty public key".to_string(),
            ));
        }
        *self.pubkey.write().await = Some(pubkey.clone());
        Ok(pubkey)
    }
}
