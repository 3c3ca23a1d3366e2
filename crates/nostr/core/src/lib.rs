//! Nostr protocol primitives: events, filters, keys and the payloads the
//! repository directory publishes.

pub mod filter;
mod identity;
pub mod nip01;
mod nip06;
pub mod nip19;
pub mod profile;
pub mod repository;
pub mod tag_parsing;

pub use filter::{Filter, FilterError};
pub use identity::{
    ENV_IDENTITY_MNEMONIC_PATH, NostrIdentity, identity_mnemonic_path, load_identity_from_path,
    load_or_create_identity, load_or_create_identity_at,
};
pub use nip01::{
    Event, EventTemplate, KIND_METADATA, KindClassification, Nip01Error, UnsignedEvent,
    finalize_event, get_event_hash, get_public_key_hex, sign_unsigned, sort_events, unix_now,
    validate_event, verify_event,
};
pub use nip06::{Keypair, derive_keypair, derive_keypair_with_account};
pub use nip19::{Nip19Error, decode_npub, encode_npub, format_npub_short};
pub use profile::Profile;
pub use repository::{CodeRepository, KIND_CODE_REPOSITORY};
