//! NIP-01 event structure, id digest, Schnorr signing and verification.
//!
//! The event id is the lowercase hex SHA-256 of the compact JSON array
//! `[0, pubkey, created_at, kind, tags, content]`; the signature is a BIP-340
//! Schnorr signature over the id bytes.

use bitcoin::key::Secp256k1;
use bitcoin::secp256k1::{Keypair, Message, SecretKey, XOnlyPublicKey, schnorr};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors produced while hashing, signing or verifying events.
#[derive(Debug, Error)]
pub enum Nip01Error {
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("verification error: {0}")]
    Verification(String),
}

/// A signed Nostr event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// 32-byte lowercase hex digest of the canonical serialization.
    pub id: String,
    /// 32-byte lowercase hex x-only public key of the author.
    pub pubkey: String,
    /// Unix timestamp in seconds.
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    /// 64-byte lowercase hex Schnorr signature over `id`.
    pub sig: String,
}

impl Event {
    /// The unsigned part of the event, used to recompute the id.
    pub fn unsigned(&self) -> UnsignedEvent {
        UnsignedEvent {
            pubkey: self.pubkey.clone(),
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags.clone(),
            content: self.content.clone(),
        }
    }

    /// First value of the first tag named `name`.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.len() > 1 && tag[0] == name)
            .map(|tag| tag[1].as_str())
    }
}

/// An event with an author but without id and signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedEvent {
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl UnsignedEvent {
    /// Attach an id and signature.
    pub fn into_signed(self, id: String, sig: String) -> Event {
        Event {
            id,
            pubkey: self.pubkey,
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            sig,
        }
    }
}

/// An event draft without an author. The pubkey comes from whoever signs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTemplate {
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl EventTemplate {
    /// Bind the template to an author.
    pub fn to_unsigned(&self, pubkey: impl Into<String>) -> UnsignedEvent {
        UnsignedEvent {
            pubkey: pubkey.into(),
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags.clone(),
            content: self.content.clone(),
        }
    }
}

/// Event kind classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindClassification {
    Regular,
    /// Latest event per pubkey+kind is kept.
    Replaceable,
    Ephemeral,
    /// Latest event per pubkey+kind+d-tag is kept.
    Addressable,
    Unknown,
}

pub const KIND_METADATA: u16 = 0;
pub const KIND_SHORT_TEXT_NOTE: u16 = 1;

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

fn is_lower_hex(value: &str, len: usize) -> bool {
    value.len() == len
        && value
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

/// Structural checks on an unsigned event.
pub fn validate_unsigned_event(event: &UnsignedEvent) -> bool {
    is_lower_hex(&event.pubkey, 64)
}

/// Structural checks on a signed event (hex lengths only, no cryptography).
pub fn validate_event(event: &Event) -> bool {
    is_lower_hex(&event.id, 64) && is_lower_hex(&event.pubkey, 64) && is_lower_hex(&event.sig, 128)
}

/// Canonical serialization used for the id digest.
pub fn serialize_event(event: &UnsignedEvent) -> Result<String, Nip01Error> {
    if !validate_unsigned_event(event) {
        return Err(Nip01Error::InvalidEvent(
            "pubkey must be 64 lowercase hex characters".to_string(),
        ));
    }

    serde_json::to_string(&(
        0,
        &event.pubkey,
        event.created_at,
        event.kind,
        &event.tags,
        &event.content,
    ))
    .map_err(|error| Nip01Error::Serialization(error.to_string()))
}

/// Compute the event id.
pub fn get_event_hash(event: &UnsignedEvent) -> Result<String, Nip01Error> {
    let serialized = serialize_event(event)?;
    Ok(hex::encode(Sha256::digest(serialized.as_bytes())))
}

/// Get the x-only public key hex for a secret key.
pub fn get_public_key_hex(secret_key: &[u8; 32]) -> Result<String, Nip01Error> {
    let secp = Secp256k1::signing_only();
    let sk = SecretKey::from_slice(secret_key)
        .map_err(|error| Nip01Error::Signing(error.to_string()))?;
    let (xonly, _parity) = sk.x_only_public_key(&secp);
    Ok(hex::encode(xonly.serialize()))
}

/// Sign an already-authored event with the matching secret key.
pub fn sign_unsigned(event: UnsignedEvent, secret_key: &[u8; 32]) -> Result<Event, Nip01Error> {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(secret_key)
        .map_err(|error| Nip01Error::Signing(error.to_string()))?;
    let keypair = Keypair::from_secret_key(&secp, &sk);
    let (xonly, _parity) = keypair.x_only_public_key();
    if hex::encode(xonly.serialize()) != event.pubkey {
        return Err(Nip01Error::Signing(
            "secret key does not match event pubkey".to_string(),
        ));
    }

    let id = get_event_hash(&event)?;
    let id_bytes = hex::decode(&id).map_err(|error| Nip01Error::Signing(error.to_string()))?;
    let message = Message::from_digest_slice(&id_bytes)
        .map_err(|error| Nip01Error::Signing(error.to_string()))?;
    let sig = secp.sign_schnorr_no_aux_rand(&message, &keypair);

    Ok(event.into_signed(id, hex::encode(sig.serialize())))
}

/// Sign a template, deriving the author from the secret key.
pub fn finalize_event(
    template: &EventTemplate,
    secret_key: &[u8; 32],
) -> Result<Event, Nip01Error> {
    let pubkey = get_public_key_hex(secret_key)?;
    sign_unsigned(template.to_unsigned(pubkey), secret_key)
}

/// Verify structure, id digest and signature.
///
/// Returns `Ok(false)` for any mismatch; errors are reserved for inputs that
/// pass the structural checks but cannot be decoded.
pub fn verify_event(event: &Event) -> Result<bool, Nip01Error> {
    if !validate_event(event) {
        return Ok(false);
    }

    if get_event_hash(&event.unsigned())? != event.id {
        return Ok(false);
    }

    let id_bytes =
        hex::decode(&event.id).map_err(|error| Nip01Error::Verification(error.to_string()))?;
    let message = Message::from_digest_slice(&id_bytes)
        .map_err(|error| Nip01Error::Verification(error.to_string()))?;
    let sig_bytes =
        hex::decode(&event.sig).map_err(|error| Nip01Error::Verification(error.to_string()))?;
    let Ok(sig) = schnorr::Signature::from_slice(&sig_bytes) else {
        return Ok(false);
    };
    let pubkey_bytes =
        hex::decode(&event.pubkey).map_err(|error| Nip01Error::Verification(error.to_string()))?;
    let Ok(pubkey) = XOnlyPublicKey::from_slice(&pubkey_bytes) else {
        return Ok(false);
    };

    let secp = Secp256k1::verification_only();
    Ok(secp.verify_schnorr(&sig, &message, &pubkey).is_ok())
}

/// Classify an event kind.
pub fn classify_kind(kind: u16) -> KindClassification {
    match kind {
        1 | 2 | 4..=44 | 1000..=9999 => KindClassification::Regular,
        0 | 3 | 10000..=19999 => KindClassification::Replaceable,
        20000..=29999 => KindClassification::Ephemeral,
        30000..=39999 => KindClassification::Addressable,
        _ => KindClassification::Unknown,
    }
}

pub fn is_replaceable_kind(kind: u16) -> bool {
    classify_kind(kind) == KindClassification::Replaceable
}

pub fn is_addressable_kind(kind: u16) -> bool {
    classify_kind(kind) == KindClassification::Addressable
}

/// Newest first; ties broken by lowest id.
pub fn sort_events(events: &mut [Event]) {
    events.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}
