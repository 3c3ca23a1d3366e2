//! Session state: the logged-in pubkey and a memoized profile map.

use crate::error::Result;
use crate::fetch::{FetchAggregator, FetchRequest};
use crate::identity::{IdentityProvider, ListenerId};
use nostr::{Filter, KIND_METADATA, Profile};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, info, warn};

/// Login state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    LoggedOut,
    LoggedIn(String),
}

/// Mutation reported to session listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChange {
    /// The logged-in pubkey changed (`None` after logout).
    Pubkey(Option<String>),
    /// The cached profile of this pubkey changed.
    Profile(String),
}

/// Snapshot of the session.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub pubkey: Option<String>,
    pub profiles: HashMap<String, Profile>,
}

type SessionListener = Arc<dyn Fn(&SessionChange) + Send + Sync>;
type ProfileCell = Arc<OnceCell<Option<Profile>>>;

/// Owns the session and keeps it consistent across concurrent fetches.
///
/// A logout or account switch bumps the generation; profile fetches that
/// started under an older generation are discarded when they finish.
pub struct SessionCache {
    session: Mutex<Session>,
    generation: AtomicU64,
    /// Fetch in flight per pubkey, tagged with the generation it started in.
    in_flight: Mutex<HashMap<String, (u64, ProfileCell)>>,
    listeners: RwLock<Vec<(ListenerId, SessionListener)>>,
    next_listener_id: AtomicU64,
    fetcher: FetchAggregator,
}

impl SessionCache {
    pub fn new(fetcher: FetchAggregator) -> Self {
        Self {
            session: Mutex::new(Session::default()),
            generation: AtomicU64::new(0),
            in_flight: Mutex::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            fetcher,
        }
    }

    pub async fn pubkey(&self) -> Option<String> {
        self.session.lock().await.pubkey.clone()
    }

    pub async fn state(&self) -> SessionState {
        match self.pubkey().await {
            Some(pubkey) => SessionState::LoggedIn(pubkey),
            None => SessionState::LoggedOut,
        }
    }

    pub async fn snapshot(&self) -> Session {
        self.session.lock().await.clone()
    }

    /// Log in as `pubkey`, or log out with `None` (an empty key counts as
    /// `None`). Setting the current key again does nothing.
    pub async fn set_pubkey(self: &Arc<Self>, pubkey: Option<String>) {
        let pubkey = pubkey.filter(|pubkey| !pubkey.is_empty());
        let ended_previous = {
            let mut session = self.session.lock().await;
            if session.pubkey == pubkey {
                return;
            }
            let ended_previous = session.pubkey.is_some();
            if ended_previous {
                session.profiles.clear();
                self.generation.fetch_add(1, Ordering::SeqCst);
            }
            session.pubkey.clone_from(&pubkey);
            ended_previous
        };
        if ended_previous {
            self.in_flight.lock().await.clear();
        }

        match &pubkey {
            Some(pubkey) => info!("session logged in as {}", pubkey),
            None => info!("session logged out"),
        }
        self.notify(&SessionChange::Pubkey(pubkey.clone())).await;

        if let Some(pubkey) = pubkey {
            self.spawn_fetch(pubkey);
        }
    }

    pub async fn logout(self: &Arc<Self>) {
        self.set_pubkey(None).await;
    }

    /// Cached profile, or `None` while a background fetch is started.
    pub async fn profile(self: &Arc<Self>, pubkey: &str) -> Option<Profile> {
        if let Some(profile) = self.session.lock().await.profiles.get(pubkey) {
            return Some(profile.clone());
        }
        if !self.in_flight.lock().await.contains_key(pubkey) {
            self.spawn_fetch(pubkey.to_string());
        }
        None
    }

    /// Fetch the newest kind-0 profile of `pubkey` and cache it.
    ///
    /// Concurrent calls for the same pubkey share one fetch. Returns the
    /// cached profile afterwards, which is never older than before.
    pub async fn fetch_profile(&self, pubkey: &str) -> Result<Option<Profile>> {
        let (generation, cell) = {
            let mut in_flight = self.in_flight.lock().await;
            let generation = self.generation.load(Ordering::SeqCst);
            let entry = in_flight
                .entry(pubkey.to_string())
                .or_insert_with(|| (generation, Arc::new(OnceCell::new())));
            if entry.0 != generation {
                *entry = (generation, Arc::new(OnceCell::new()));
            }
            (generation, Arc::clone(&entry.1))
        };

        let result = cell
            .get_or_try_init(|| self.load_profile(pubkey, generation))
            .await
            .cloned();

        let mut in_flight = self.in_flight.lock().await;
        if in_flight
            .get(pubkey)
            .is_some_and(|(_, current)| Arc::ptr_eq(current, &cell))
        {
            in_flight.remove(pubkey);
        }
        result
    }

    /// Register a change listener. It is not invoked on registration.
    pub async fn subscribe(
        &self,
        listener: impl Fn(&SessionChange) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().await.push((id, Arc::new(listener)));
        id
    }

    pub async fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().await;
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Refresh the logged-in key whenever the signer becomes available.
    pub async fn follow_identity(self: &Arc<Self>, identity: &Arc<IdentityProvider>) -> ListenerId {
        let session = Arc::downgrade(self);
        let provider = Arc::downgrade(identity);
        identity
            .on_availability_changed(move |available| {
                if !available {
                    return;
                }
                let (session, provider) = (Weak::clone(&session), Weak::clone(&provider));
                let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                    warn!("signer became available outside a runtime; session not refreshed");
                    return;
                };
                runtime.spawn(async move {
                    let (Some(session), Some(provider)) = (session.upgrade(), provider.upgrade())
                    else {
                        return;
                    };
                    if session.pubkey().await.is_none() {
                        return;
                    }
                    if let Some(pubkey) = provider.current_pubkey().await {
                        session.set_pubkey(Some(pubkey)).await;
                    }
                });
            })
            .await
    }

    fn spawn_fetch(self: &Arc<Self>, pubkey: String) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(error) = session.fetch_profile(&pubkey).await {
                debug!("profile fetch for {} failed: {}", pubkey, error);
            }
        });
    }

    async fn load_profile(&self, pubkey: &str, generation: u64) -> Result<Option<Profile>> {
        let relays = self.fetcher.relay_urls().await;
        if relays.is_empty() {
            debug!("no relays to fetch profile {} from", pubkey);
            return Ok(self.session.lock().await.profiles.get(pubkey).cloned());
        }

        let filter = Filter::new().kinds([KIND_METADATA]).authors([pubkey]);
        let fetched = self
            .fetcher
            .fetch_all(FetchRequest::fan_out(relays, &filter))
            .await?;
        let latest = Profile::latest(&fetched.events);

        let (cached, changed) = {
            let mut session = self.session.lock().await;
            if self.generation.load(Ordering::SeqCst) != generation {
                debug!("discarding profile {} fetched before a session change", pubkey);
                return Ok(None);
            }
            match (latest, session.profiles.get(pubkey)) {
                (Some(latest), Some(existing)) if !latest.is_newer_than(existing) => {
                    (Some(existing.clone()), false)
                }
                (Some(latest), _) => {
                    session.profiles.insert(pubkey.to_string(), latest.clone());
                    (Some(latest), true)
                }
                (None, existing) => (existing.cloned(), false),
            }
        };

        if changed {
            self.notify(&SessionChange::Profile(pubkey.to_string()))
                .await;
        }
        Ok(cached)
    }

    async fn notify(&self, change: &SessionChange) {
        let listeners: Vec<SessionListener> = self
            .listeners
            .read()
            .await
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(change);
        }
    }
}
