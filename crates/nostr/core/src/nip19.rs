//! NIP-19 bech32 encoding of keys (`npub`, `nsec`).

use bech32::{Bech32, Hrp};
use thiserror::Error;

pub const NPUB_HRP: &str = "npub";
pub const NSEC_HRP: &str = "nsec";

#[derive(Debug, Error)]
pub enum Nip19Error {
    #[error("invalid hex key: {0}")]
    InvalidHex(String),

    #[error("bech32 error: {0}")]
    Bech32(String),

    #[error("expected {expected} prefix, got {actual}")]
    WrongPrefix { expected: String, actual: String },

    #[error("expected 32 bytes of key data, got {0}")]
    InvalidLength(usize),
}

pub(crate) fn encode_bech32(hrp: &str, data: &[u8; 32]) -> Result<String, Nip19Error> {
    let parsed_hrp = Hrp::parse(hrp).map_err(|error| Nip19Error::Bech32(error.to_string()))?;
    bech32::encode::<Bech32>(parsed_hrp, data)
        .map_err(|error| Nip19Error::Bech32(error.to_string()))
}

fn decode_bech32(expected_hrp: &str, encoded: &str) -> Result<[u8; 32], Nip19Error> {
    let (hrp, data) =
        bech32::decode(encoded.trim()).map_err(|error| Nip19Error::Bech32(error.to_string()))?;
    if hrp.as_str() != expected_hrp {
        return Err(Nip19Error::WrongPrefix {
            expected: expected_hrp.to_string(),
            actual: hrp.to_string(),
        });
    }
    <[u8; 32]>::try_from(data.as_slice()).map_err(|_| Nip19Error::InvalidLength(data.len()))
}

fn hex_key(hex_key: &str) -> Result<[u8; 32], Nip19Error> {
    let bytes = hex::decode(hex_key).map_err(|error| Nip19Error::InvalidHex(error.to_string()))?;
    <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| Nip19Error::InvalidLength(bytes.len()))
}

/// Encode a hex public key as `npub1…`.
pub fn encode_npub(pubkey_hex: &str) -> Result<String, Nip19Error> {
    encode_bech32(NPUB_HRP, &hex_key(pubkey_hex)?)
}

/// Decode `npub1…` into a hex public key.
pub fn decode_npub(npub: &str) -> Result<String, Nip19Error> {
    decode_bech32(NPUB_HRP, npub).map(hex::encode)
}

/// Decode `nsec1…` into raw secret key bytes.
pub fn decode_nsec(nsec: &str) -> Result<[u8; 32], Nip19Error> {
    decode_bech32(NSEC_HRP, nsec)
}

/// Shortened npub for compact display: `npub1abcd…wxyz`.
///
/// Falls back to the shortened hex if the key cannot be encoded.
pub fn format_npub_short(pubkey_hex: &str) -> String {
    let full = encode_npub(pubkey_hex).unwrap_or_else(|_| pubkey_hex.to_string());
    let chars: Vec<char> = full.chars().collect();
    if chars.len() <= 16 {
        return full;
    }
    let head: String = chars[..9].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}
