//! Nostr client core for the code-repository directory.
//!
//! This crate exposes:
//! - relay publish/subscribe over WebSocket and a multi-relay pool
//! - aggregated, deduplicated fetches across (relay, filter) pairs
//! - the signer boundary, event building and publishing
//! - a session cache of the logged-in pubkey and profiles

pub mod client;
pub mod config;
pub mod error;
pub mod fetch;
pub mod identity;
pub mod message;
pub mod pool;
pub mod publisher;
pub mod relay;
pub mod session;
pub mod signer;
pub mod subscription;
pub mod transport;

pub use client::NostrClient;
pub use config::{ClientConfig, ConfigError};
pub use error::{ClientError, Result};
pub use fetch::{FetchAggregator, FetchRequest, FetchResult};
pub use identity::{IdentityProvider, ListenerId, SignerProbe};
pub use message::{ClientMessage, RelayMessage, parse_relay_message};
pub use pool::{PoolConfig, RelayPool};
pub use publisher::{EventBuilder, PublishResult, Publisher, build};
pub use relay::{ConnectionState, PublishOutcome, ReconnectPolicy, RelayConfig, RelayConnection};
pub use session::{Session, SessionCache, SessionChange, SessionState};
pub use signer::{LocalSigner, Signer};
pub use subscription::{Subscription, SubscriptionItem, SubscriptionSender};
pub use tokio_util::sync::CancellationToken;
pub use transport::RelayTransport;
