use anyhow::{Context, Result};
use bip39::Mnemonic;
use bitcoin::Network;
use bitcoin::bip32::{ChildNumber, DerivationPath, Xpriv};
use bitcoin::key::Secp256k1;
use bitcoin::secp256k1::SecretKey;

use crate::nip01::get_public_key_hex;
use crate::nip19::{NPUB_HRP, NSEC_HRP, decode_nsec, encode_bech32};

const NOSTR_COIN_TYPE: u32 = 1237;

/// Secret key and x-only public key of a local signing identity.
#[derive(Clone)]
pub struct Keypair {
    pub private_key: [u8; 32],
    pub public_key: [u8; 32],
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

impl Keypair {
    pub fn from_secret_key(private_key: [u8; 32]) -> Result<Self> {
        let public_key_hex = get_public_key_hex(&private_key).context("invalid secret key")?;
        let mut public_key = [0_u8; 32];
        hex::decode_to_slice(&public_key_hex, &mut public_key)
            .context("failed to decode public key")?;
        Ok(Self {
            private_key,
            public_key,
        })
    }

    pub fn from_nsec(nsec: &str) -> Result<Self> {
        Self::from_secret_key(decode_nsec(nsec)?)
    }

    /// Random key, retried until the bytes form a valid secp256k1 scalar.
    pub fn generate() -> Self {
        loop {
            let candidate: [u8; 32] = rand::random();
            if SecretKey::from_slice(&candidate).is_ok()
                && let Ok(keypair) = Self::from_secret_key(candidate)
            {
                return keypair;
            }
        }
    }

    pub fn npub(&self) -> Result<String> {
        Ok(encode_bech32(NPUB_HRP, &self.public_key)?)
    }

    pub fn nsec(&self) -> Result<String> {
        Ok(encode_bech32(NSEC_HRP, &self.private_key)?)
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key)
    }

    pub fn private_key_hex(&self) -> String {
        hex::encode(self.private_key)
    }
}

pub fn derive_keypair(mnemonic: &str) -> Result<Keypair> {
    derive_keypair_with_account(mnemonic, 0)
}

/// NIP-06 derivation: `m/44'/1237'/<account>'/0/0`.
pub fn derive_keypair_with_account(mnemonic: &str, account: u32) -> Result<Keypair> {
    let parsed_mnemonic = Mnemonic::parse(mnemonic.trim()).context("invalid mnemonic")?;
    let seed = parsed_mnemonic.to_seed("");

    let secp = Secp256k1::new();
    let master =
        Xpriv::new_master(Network::Bitcoin, &seed).context("failed to create master key")?;

    let path = DerivationPath::from(vec![
        ChildNumber::from_hardened_idx(44).context("failed to derive purpose")?,
        ChildNumber::from_hardened_idx(NOSTR_COIN_TYPE).context("failed to derive coin type")?,
        ChildNumber::from_hardened_idx(account).context("failed to derive account")?,
        ChildNumber::from_normal_idx(0).context("failed to derive change")?,
        ChildNumber::from_normal_idx(0).context("failed to derive index")?,
    ]);

    let derived = master
        .derive_priv(&secp, &path)
        .context("failed to derive nostr private key")?;

    Keypair::from_secret_key(derived.private_key.secret_bytes())
}
