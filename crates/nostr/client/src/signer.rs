//! Signer boundary.

use crate::error::{ClientError, Result};
use async_trait::async_trait;
use nostr::{Event, Keypair, NostrIdentity, UnsignedEvent, sign_unsigned};

/// An external key holder that can report its public key and sign events.
///
/// Implementations never expose secret material; the identity provider
/// re-checks every returned event before trusting it.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Hex x-only public key.
    async fn get_public_key(&self) -> Result<String>;

    /// Sign a fully populated unsigned event.
    async fn sign_event(&self, event: UnsignedEvent) -> Result<Event>;
}

/// In-process signer over a local keypair.
#[derive(Debug, Clone)]
pub struct LocalSigner {
    keypair: Keypair,
}

impl LocalSigner {
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }

    pub fn from_identity(identity: &NostrIdentity) -> Self {
        Self::new(identity.keypair.clone())
    }

    pub fn generate() -> Self {
        Self::new(Keypair::generate())
    }
}

#[async_trait]
impl Signer for LocalSigner {
    async fn get_public_key(&self) -> Result<String> {
        Ok(self.keypair.public_key_hex())
    }

    async fn sign_event(&self, event: UnsignedEvent) -> Result<Event> {
        sign_unsigned(event, &self.keypair.private_key)
            .map_err(|error| ClientError::SignerRejected(error.to_string()))
    }
}
