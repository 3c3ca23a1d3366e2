//! Aggregated fetches over (relay, filter) pairs.

use crate::error::{ClientError, Result};
use crate::subscription::SubscriptionItem;
use crate::transport::RelayTransport;
use futures_util::stream::{self, select_all};
use futures_util::{StreamExt, future};
use nostr::{Event, Filter, sort_events, verify_event};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default time to wait for every relay's EOSE.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// One filter to run on one relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub relay_url: String,
    pub filter: Filter,
}

impl FetchRequest {
    pub fn new(relay_url: impl Into<String>, filter: Filter) -> Self {
        Self {
            relay_url: relay_url.into(),
            filter,
        }
    }

    /// The same filter against every relay.
    pub fn fan_out<I, S>(relay_urls: I, filter: &Filter) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        relay_urls
            .into_iter()
            .map(|url| Self::new(url, filter.clone()))
            .collect()
    }
}

/// Deduplicated events in first-arrival order.
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    pub events: Vec<Event>,
    /// The deadline passed before every request finished.
    pub timed_out: bool,
    /// The caller's token fired before every request finished.
    pub cancelled: bool,
}

impl FetchResult {
    pub fn is_complete(&self) -> bool {
        !self.timed_out && !self.cancelled
    }
}

/// Runs many subscriptions at once and merges their stored events.
#[derive(Clone)]
pub struct FetchAggregator {
    transport: Arc<dyn RelayTransport>,
    default_timeout: Duration,
}

impl FetchAggregator {
    pub fn new(transport: Arc<dyn RelayTransport>) -> Self {
        Self::with_timeout(transport, DEFAULT_FETCH_TIMEOUT)
    }

    pub fn with_timeout(transport: Arc<dyn RelayTransport>, default_timeout: Duration) -> Self {
        Self {
            transport,
            default_timeout,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Relays the underlying transport currently reads from.
    pub async fn relay_urls(&self) -> Vec<String> {
        self.transport.relay_urls().await
    }

    /// Fetch with the default timeout and no cancellation.
    pub async fn fetch_all(&self, requests: Vec<FetchRequest>) -> Result<FetchResult> {
        self.fetch_all_with(requests, self.default_timeout, &CancellationToken::new())
            .await
    }

    /// Fetch until every request finished, `timeout` elapsed or `cancel` fired.
    ///
    /// A request finishes on EOSE, on `CLOSED` or when its stream ends.
    /// Only events that verify and match their request's filter are kept.
    /// The deadline and `cancel` also cover relays that are still connecting.
    /// Fails with `NoRequests` only when every subscribe failed.
    pub async fn fetch_all_with(
        &self,
        requests: Vec<FetchRequest>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<FetchResult> {
        if requests.is_empty() {
            return Err(ClientError::NoRequests("empty request list".to_string()));
        }

        let requests: Vec<FetchRequest> = requests
            .into_iter()
            .filter(|request| match request.filter.validate() {
                Ok(()) => true,
                Err(error) => {
                    warn!("skipping malformed filter for {}: {}", request.relay_url, error);
                    false
                }
            })
            .collect();
        if requests.is_empty() {
            return Err(ClientError::NoRequests("every filter is malformed".to_string()));
        }

        // Subscribing happens inside the merged stream, so a relay that is
        // still connecting counts as unfinished and stays under the deadline.
        let transport = &self.transport;
        let streams = requests.iter().enumerate().map(|(index, request)| {
            stream::once(transport.subscribe(&request.relay_url, vec![request.filter.clone()]))
                .flat_map(move |opened| match opened {
                    Ok(subscription) => {
                        let subscription_id = subscription.id.clone();
                        stream::once(future::ready(Progress::Opened(subscription_id)))
                            .chain(subscription.map(Progress::Item))
                            .chain(stream::once(future::ready(Progress::Ended)))
                            .boxed()
                    }
                    Err(error) => {
                        warn!("subscribe failed on {}: {}", request.relay_url, error);
                        stream::once(future::ready(Progress::Failed)).boxed()
                    }
                })
                .map(move |progress| (index, progress))
                .boxed()
        });

        let mut merged = select_all(streams);
        let mut finished = vec![false; requests.len()];
        let mut remaining = requests.len();
        let mut failed = 0;
        let mut subscription_ids = Vec::new();
        let mut seen = HashSet::new();
        let mut result = FetchResult::default();
        let deadline = tokio::time::sleep_until(Instant::now() + timeout);
        tokio::pin!(deadline);

        while remaining > 0 {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    result.cancelled = true;
                    break;
                }
                () = &mut deadline => {
                    result.timed_out = true;
                    break;
                }
                next = merged.next() => match next {
                    Some((_, Progress::Opened(subscription_id))) => {
                        subscription_ids.push(subscription_id);
                    }
                    Some((index, Progress::Item(SubscriptionItem::Event(event))))
                        if !seen.contains(&event.id) =>
                    {
                        if accept_event(&event, &requests[index].filter) {
                            seen.insert(event.id.clone());
                            result.events.push(event);
                        } else {
                            debug!(
                                "dropping invalid event {} from {}",
                                event.id, requests[index].relay_url
                            );
                        }
                    }
                    Some((_, Progress::Item(SubscriptionItem::Event(_)))) => {}
                    Some((
                        index,
                        Progress::Item(SubscriptionItem::Eose | SubscriptionItem::Closed(_))
                        | Progress::Ended,
                    )) => {
                        mark_finished(&mut finished, &mut remaining, index);
                    }
                    Some((index, Progress::Failed)) => {
                        failed += 1;
                        mark_finished(&mut finished, &mut remaining, index);
                    }
                    None => break,
                },
            }
        }
        // Dropping the stream abandons subscribes still in progress.
        drop(merged);

        for subscription_id in &subscription_ids {
            if let Err(error) = self.transport.unsubscribe(subscription_id).await {
                debug!("failed to release subscription {}: {}", subscription_id, error);
            }
        }
        if failed == requests.len() {
            return Err(ClientError::NoRequests("every subscribe failed".to_string()));
        }

        debug!(
            "fetch finished: {} events, timed_out={}, cancelled={}",
            result.events.len(),
            result.timed_out,
            result.cancelled
        );
        Ok(result)
    }

    /// Newest event across all requests, ties broken by id.
    pub async fn fetch_latest(&self, requests: Vec<FetchRequest>) -> Result<Option<Event>> {
        let mut events = self.fetch_all(requests).await?.events;
        sort_events(&mut events);
        Ok(events.into_iter().next())
    }
}

/// Per-request progress inside the merged stream.
enum Progress {
    Opened(String),
    Item(SubscriptionItem),
    Ended,
    Failed,
}

fn mark_finished(finished: &mut [bool], remaining: &mut usize, index: usize) {
    if !finished[index] {
        finished[index] = true;
        *remaining -= 1;
    }
}

fn accept_event(event: &Event, filter: &Filter) -> bool {
    matches!(verify_event(event), Ok(true)) && filter.matches(event)
}
