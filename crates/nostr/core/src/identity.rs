//! Local mnemonic-backed identity, used when signing without an external
//! signer (headless tools, tests).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bip39::{Language, Mnemonic};

use crate::nip06::{Keypair, derive_keypair};

pub const ENV_IDENTITY_MNEMONIC_PATH: &str = "NOSTR_IDENTITY_MNEMONIC_PATH";

#[derive(Clone)]
pub struct NostrIdentity {
    pub identity_path: PathBuf,
    pub npub: String,
    pub public_key_hex: String,
    pub keypair: Keypair,
}

impl std::fmt::Debug for NostrIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NostrIdentity")
            .field("identity_path", &self.identity_path)
            .field("npub", &self.npub)
            .finish_non_exhaustive()
    }
}

pub fn load_or_create_identity() -> Result<NostrIdentity> {
    load_or_create_identity_at(identity_mnemonic_path()?)
}

pub fn load_or_create_identity_at(path: impl AsRef<Path>) -> Result<NostrIdentity> {
    let path = path.as_ref();
    if path.exists() {
        return load_identity_from_path(path);
    }
    let mnemonic = generate_mnemonic()?;
    write_mnemonic(path, &mnemonic)?;
    build_identity(&mnemonic, path.to_path_buf())
}

pub fn identity_mnemonic_path() -> Result<PathBuf> {
    if let Ok(override_path) = std::env::var(ENV_IDENTITY_MNEMONIC_PATH) {
        let trimmed = override_path.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }

    let home = std::env::var("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home)
        .join(".nostr-app-manager")
        .join("identity.mnemonic"))
}

pub fn load_identity_from_path(path: impl AsRef<Path>) -> Result<NostrIdentity> {
    let path = path.as_ref();
    let mnemonic = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read mnemonic file {}", path.display()))?;
    let mnemonic = mnemonic.trim();

    if mnemonic.is_empty() {
        return Err(anyhow::anyhow!(
            "identity mnemonic file is empty: {}",
            path.display()
        ));
    }

    build_identity(mnemonic, path.to_path_buf())
}

fn build_identity(mnemonic: &str, path: PathBuf) -> Result<NostrIdentity> {
    let keypair = derive_keypair(mnemonic)?;

    Ok(NostrIdentity {
        identity_path: path,
        npub: keypair.npub()?,
        public_key_hex: keypair.public_key_hex(),
        keypair,
    })
}

fn generate_mnemonic() -> Result<String> {
    let entropy: [u8; 16] = rand::random();
    let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy)
        .context("failed to generate mnemonic")?;
    Ok(mnemonic.to_string())
}

fn write_mnemonic(path: &Path, mnemonic: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    std::fs::write(path, format!("{mnemonic}\n"))
        .with_context(|| format!("failed to write mnemonic file {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}
