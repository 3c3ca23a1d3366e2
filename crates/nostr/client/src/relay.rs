//! Single relay connection management.

use crate::error::{ClientError, Result};
use crate::message::{ClientMessage, RelayMessage, parse_relay_message};
use crate::subscription::{
    Subscription, SubscriptionItem, SubscriptionSender, generate_subscription_id,
};
use futures_util::future::BoxFuture;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{FutureExt, SinkExt, StreamExt};
use nostr::{Event, Filter};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// Reason reported on subscriptions cut off by a lost connection.
pub const DISCONNECTED_REASON: &str = "disconnected";
/// Reason reported when a relay does not answer `OK` in time.
pub const PUBLISH_TIMEOUT_REASON: &str = "publish timed out";

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Acknowledgement of one event by one relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub relay_url: String,
    pub event_id: String,
    pub accepted: bool,
    /// Relay message on `OK`, or the local failure reason.
    pub reason: Option<String>,
}

impl PublishOutcome {
    pub fn accepted(relay_url: impl Into<String>, event_id: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            event_id: event_id.into(),
            accepted: true,
            reason: None,
        }
    }

    pub fn rejected(
        relay_url: impl Into<String>,
        event_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            relay_url: relay_url.into(),
            event_id: event_id.into(),
            accepted: false,
            reason: Some(reason.into()),
        }
    }
}

/// Reconnection behaviour after an unexpected disconnect.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Re-issue active REQs after reconnecting instead of closing them.
    pub resume_subscriptions: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            resume_subscriptions: false,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given attempt (1-based), doubling up to `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.base_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Relay connection configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub connect_timeout: Duration,
    pub publish_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            publish_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

struct ActiveSubscription {
    filters: Vec<Filter>,
    sender: SubscriptionSender,
}

type PendingOk = oneshot::Sender<(bool, String)>;

struct RelayInner {
    url: String,
    config: RelayConfig,
    state: RwLock<ConnectionState>,
    writer: Mutex<Option<WsWriter>>,
    subscriptions: Mutex<HashMap<String, ActiveSubscription>>,
    pending_oks: Mutex<HashMap<String, PendingOk>>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
    connect_lock: Mutex<()>,
    manual_close: AtomicBool,
}

/// Relay connection.
#[derive(Clone)]
pub struct RelayConnection {
    inner: Arc<RelayInner>,
}

impl std::fmt::Debug for RelayConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConnection")
            .field("url", &self.inner.url)
            .finish_non_exhaustive()
    }
}

impl RelayConnection {
    /// Create a new relay connection with default config.
    pub fn new(url: &str) -> Result<Self> {
        Self::with_config(url, RelayConfig::default())
    }

    /// Create a new relay connection with custom config.
    pub fn with_config(url: &str, config: RelayConfig) -> Result<Self> {
        let parsed_url = Url::parse(url)?;
        if parsed_url.scheme() != "ws" && parsed_url.scheme() != "wss" {
            return Err(ClientError::InvalidUrl(format!(
                "URL must use ws:// or wss:// scheme, got: {}",
                parsed_url.scheme()
            )));
        }

        Ok(Self {
            inner: Arc::new(RelayInner {
                url: url.to_string(),
                config,
                state: RwLock::new(ConnectionState::Disconnected),
                writer: Mutex::new(None),
                subscriptions: Mutex::new(HashMap::new()),
                pending_oks: Mutex::new(HashMap::new()),
                recv_task: Mutex::new(None),
                connect_lock: Mutex::new(()),
                manual_close: AtomicBool::new(false),
            }),
        })
    }

    /// Relay URL as given at construction.
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Current connection state.
    pub async fn state(&self) -> ConnectionState {
        *self.inner.state.read().await
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }

    /// Connect to relay and start background receive loop.
    pub async fn connect(&self) -> Result<()> {
        let _connecting = self.inner.connect_lock.lock().await;
        {
            let mut state_guard = self.inner.state.write().await;
            if *state_guard == ConnectionState::Connected {
                return Err(ClientError::AlreadyConnected);
            }
            *state_guard = ConnectionState::Connecting;
        }
        self.inner.manual_close.store(false, Ordering::SeqCst);

        match RelayInner::open(&self.inner).await {
            Ok(()) => {
                info!("connected to relay {}", self.inner.url);
                Ok(())
            }
            Err(error) => {
                *self.inner.state.write().await = ConnectionState::Disconnected;
                Err(error)
            }
        }
    }

    /// Disconnect from relay and stop background tasks.
    ///
    /// Active subscriptions end with `Closed("disconnected")`; pending
    /// publishes fail.
    pub async fn disconnect(&self) -> Result<()> {
        self.inner.manual_close.store(true, Ordering::SeqCst);
        let close_result = match self.inner.writer.lock().await.take() {
            Some(mut writer) => writer
                .send(Message::Close(None))
                .await
                .map_err(|error| ClientError::WebSocket(error.to_string())),
            None => Ok(()),
        };

        if let Some(task) = self.inner.recv_task.lock().await.take() {
            task.abort();
        }

        *self.inner.state.write().await = ConnectionState::Disconnected;
        self.inner.fail_pending_oks().await;
        self.inner.close_subscriptions(DISCONNECTED_REASON).await;
        debug!("disconnected from relay {}", self.inner.url);
        close_result
    }

    /// Publish event and wait for the relay's `OK`.
    ///
    /// A missing `OK` within the publish timeout is reported as a rejected
    /// outcome rather than an error.
    pub async fn publish(&self, event: &Event) -> Result<PublishOutcome> {
        let (ok_tx, ok_rx) = oneshot::channel();
        self.inner
            .pending_oks
            .lock()
            .await
            .insert(event.id.clone(), ok_tx);

        if let Err(error) = self.send(&ClientMessage::Event(event.clone())).await {
            self.inner.pending_oks.lock().await.remove(&event.id);
            return Err(error);
        }

        let outcome = match timeout(self.inner.config.publish_timeout, ok_rx).await {
            Ok(Ok((true, message))) => PublishOutcome {
                reason: (!message.is_empty()).then_some(message),
                ..PublishOutcome::accepted(&self.inner.url, &event.id)
            },
            Ok(Ok((false, message))) => {
                PublishOutcome::rejected(&self.inner.url, &event.id, message)
            }
            Ok(Err(_)) => {
                PublishOutcome::rejected(&self.inner.url, &event.id, DISCONNECTED_REASON)
            }
            Err(_) => {
                self.inner.pending_oks.lock().await.remove(&event.id);
                PublishOutcome::rejected(&self.inner.url, &event.id, PUBLISH_TIMEOUT_REASON)
            }
        };
        debug!(
            "publish {} to {}: accepted={}",
            event.id, self.inner.url, outcome.accepted
        );
        Ok(outcome)
    }

    /// Register and send a subscription request.
    pub async fn subscribe(&self, filters: Vec<Filter>) -> Result<Subscription> {
        self.subscribe_with_id(generate_subscription_id(), filters)
            .await
    }

    /// Register and send a subscription request under a caller-chosen id.
    pub async fn subscribe_with_id(
        &self,
        subscription_id: impl Into<String>,
        filters: Vec<Filter>,
    ) -> Result<Subscription> {
        let subscription_id = subscription_id.into();
        let (sender, subscription) = Subscription::channel(&subscription_id, &self.inner.url);
        self.inner.subscriptions.lock().await.insert(
            subscription_id.clone(),
            ActiveSubscription {
                filters: filters.clone(),
                sender,
            },
        );

        let request = ClientMessage::Req {
            subscription_id: subscription_id.clone(),
            filters,
        };
        if let Err(error) = self.send(&request).await {
            self.inner
                .subscriptions
                .lock()
                .await
                .remove(&subscription_id);
            return Err(error);
        }
        debug!("subscribed {} on {}", subscription_id, self.inner.url);
        Ok(subscription)
    }

    /// Close subscription on relay and end its handle.
    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        let removed = self
            .inner
            .subscriptions
            .lock()
            .await
            .remove(subscription_id);
        if removed.is_none() || !self.is_connected().await {
            return Ok(());
        }
        self.send(&ClientMessage::Close(subscription_id.to_string()))
            .await
    }

    /// Ids of subscriptions still open on this connection.
    pub async fn active_subscriptions(&self) -> Vec<String> {
        self.inner
            .subscriptions
            .lock()
            .await
            .keys()
            .cloned()
            .collect()
    }

    async fn send(&self, message: &ClientMessage) -> Result<()> {
        if self.state().await != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }
        self.inner.send_text(message.to_json()?).await
    }
}

impl RelayInner {
    async fn open(inner: &Arc<Self>) -> Result<()> {
        let connecting = connect_async(inner.url.as_str());
        let connect_result = timeout(inner.config.connect_timeout, connecting)
            .await
            .map_err(|_| {
                ClientError::Timeout(format!(
                    "connection timeout after {:?}",
                    inner.config.connect_timeout
                ))
            })?
            .map_err(|error| ClientError::WebSocket(error.to_string()))?;

        let (stream, _response) = connect_result;
        let (writer, reader) = stream.split();
        *inner.writer.lock().await = Some(writer);
        *inner.state.write().await = ConnectionState::Connected;

        let task = tokio::spawn(run_reader(Arc::downgrade(inner), reader));
        *inner.recv_task.lock().await = Some(task);
        Ok(())
    }

    async fn send_text(&self, text: String) -> Result<()> {
        let mut writer_guard = self.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(ClientError::NotConnected)?;
        writer
            .send(Message::Text(text.into()))
            .await
            .map_err(|error| ClientError::WebSocket(error.to_string()))
    }

    async fn handle_message(&self, message: RelayMessage) {
        match message {
            RelayMessage::Event(subscription_id, event) => {
                self.deliver(&subscription_id, SubscriptionItem::Event(event))
                    .await;
            }
            RelayMessage::Eose(subscription_id) => {
                self.deliver(&subscription_id, SubscriptionItem::Eose).await;
            }
            RelayMessage::Closed(subscription_id, reason) => {
                let removed = self.subscriptions.lock().await.remove(&subscription_id);
                if let Some(active) = removed
                    && let Err(error) = active.sender.deliver(SubscriptionItem::Closed(reason))
                {
                    debug!("dropping CLOSED for {} on {}: {}", subscription_id, self.url, error);
                }
            }
            RelayMessage::Ok(event_id, accepted, message) => {
                let pending = self.pending_oks.lock().await.remove(&event_id);
                match pending {
                    Some(ok_tx) => {
                        let _ = ok_tx.send((accepted, message));
                    }
                    None => debug!("unexpected OK for {} from {}", event_id, self.url),
                }
            }
            RelayMessage::Notice(message) => {
                info!("notice from {}: {}", self.url, message);
            }
            RelayMessage::Auth(_) => {
                debug!("ignoring AUTH challenge from {}", self.url);
            }
        }
    }

    async fn deliver(&self, subscription_id: &str, item: SubscriptionItem) {
        let sender = self
            .subscriptions
            .lock()
            .await
            .get(subscription_id)
            .map(|active| active.sender.clone());
        let Some(sender) = sender else {
            debug!("message for unknown subscription {} on {}", subscription_id, self.url);
            return;
        };
        // Waits for a slow consumer; a dropped handle just fails the send.
        if let Err(error) = sender.send(item).await {
            debug!("subscription {} on {}: {}", subscription_id, self.url, error);
        }
    }

    async fn fail_pending_oks(&self) {
        // Dropping the senders wakes every waiting publish with a disconnect.
        self.pending_oks.lock().await.clear();
    }

    async fn close_subscriptions(&self, reason: &str) {
        let drained: Vec<ActiveSubscription> = self
            .subscriptions
            .lock()
            .await
            .drain()
            .map(|(_, active)| active)
            .collect();
        for active in drained {
            let _ = active
                .sender
                .deliver(SubscriptionItem::Closed(reason.to_string()));
        }
    }

    async fn handle_disconnect(inner: &Arc<Self>) {
        *inner.state.write().await = ConnectionState::Disconnected;
        inner.writer.lock().await.take();
        inner.fail_pending_oks().await;
        if inner.manual_close.load(Ordering::SeqCst) {
            return;
        }
        warn!("relay {} disconnected", inner.url);

        let policy = inner.config.reconnect.clone();
        if !policy.enabled || !policy.resume_subscriptions {
            inner.close_subscriptions(DISCONNECTED_REASON).await;
        }
        if !policy.enabled {
            return;
        }

        for attempt in 1..=policy.max_attempts {
            tokio::time::sleep(policy.backoff(attempt)).await;
            if inner.manual_close.load(Ordering::SeqCst) {
                return;
            }
            let _connecting = inner.connect_lock.lock().await;
            if *inner.state.read().await == ConnectionState::Connected {
                return;
            }
            *inner.state.write().await = ConnectionState::Connecting;
            match Self::open(inner).await {
                Ok(()) => {
                    info!("reconnected to {} after {} attempt(s)", inner.url, attempt);
                    inner.resume_subscriptions().await;
                    return;
                }
                Err(error) => {
                    *inner.state.write().await = ConnectionState::Disconnected;
                    debug!("reconnect attempt {} to {} failed: {}", attempt, inner.url, error);
                }
            }
        }

        warn!("giving up on relay {} after {} attempts", inner.url, policy.max_attempts);
        inner.close_subscriptions(DISCONNECTED_REASON).await;
    }

    async fn resume_subscriptions(&self) {
        let requests: Vec<ClientMessage> = self
            .subscriptions
            .lock()
            .await
            .iter()
            .map(|(subscription_id, active)| ClientMessage::Req {
                subscription_id: subscription_id.clone(),
                filters: active.filters.clone(),
            })
            .collect();
        for request in requests {
            let sent = match request.to_json() {
                Ok(text) => self.send_text(text).await,
                Err(error) => Err(error),
            };
            if let Err(error) = sent {
                warn!("failed to resume subscription on {}: {}", self.url, error);
            }
        }
    }
}

fn run_reader(inner: Weak<RelayInner>, mut reader: WsReader) -> BoxFuture<'static, ()> {
    async move {
        while let Some(frame) = reader.next().await {
            let Some(relay) = inner.upgrade() else {
                return;
            };
            match frame {
                Ok(Message::Text(text)) => match parse_relay_message(text.as_str()) {
                    Ok(Some(message)) => relay.handle_message(message).await,
                    Ok(None) => {}
                    Err(error) => {
                        warn!("protocol parse error on {}: {}", relay.url, error);
                    }
                },
                Ok(Message::Ping(payload)) => {
                    debug!("received ping from {} ({} bytes)", relay.url, payload.len());
                }
                Ok(Message::Pong(_) | Message::Binary(_) | Message::Frame(_)) => {}
                Ok(Message::Close(_)) => break,
                Err(error) => {
                    warn!("websocket read error on {}: {}", relay.url, error);
                    break;
                }
            }
        }

        if let Some(relay) = inner.upgrade() {
            RelayInner::handle_disconnect(&relay).await;
        }
    }
    .boxed()
}
