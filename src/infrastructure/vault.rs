//! Credential vault: symmetric authenticated encryption of API keys at rest.
//!
//! Ciphertexts are self-describing:
//! `v1.chacha20poly1305.{keyEpoch}.{nonceB64}.{tagB64}.{ctB64}`. The key
//! epoch tags which keyring entry produced a ciphertext, so keys can rotate
//! without re-encrypting everything at once. Anything that does not begin
//! with a recognized version tag is rejected before any key material is
//! touched. Plaintext never reaches a log line.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD_NO_PAD as B64;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{AeadCore, ChaCha20Poly1305, Key, Nonce};
use zeroize::Zeroizing;

use crate::domain::account::Credentials;
use crate::error::{Error, Result};

const VERSION: &str = "v1";
const ALGORITHM: &str = "chacha20poly1305";
const TAG_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// Encrypted credential bundle as stored on an exchange account.
#[derive(Debug, Clone)]
pub struct EncryptedCredentials {
    pub api_key: String,
    pub api_secret: String,
    pub passphrase: Option<String>,
}

/// Process-wide credential vault.
///
/// Holds a keyring of epoch-tagged 256-bit keys; one epoch is active for
/// encryption, all known epochs decrypt.
pub struct Vault {
    keys: HashMap<u32, ChaCha20Poly1305>,
    active_epoch: u32,
}

impl Vault {
    /// Build a vault from the master key material (32 bytes) at epoch 1.
    pub fn new(master_key: &[u8]) -> Result<Self> {
        Self::with_epoch(1, master_key)
    }

    /// Build a vault whose active epoch is `epoch`.
    pub fn with_epoch(epoch: u32, key_material: &[u8]) -> Result<Self> {
        let mut vault = Self {
            keys: HashMap::new(),
            active_epoch: epoch,
        };
        vault.add_key(epoch, key_material)?;
        Ok(vault)
    }

    /// Parse the environment form of the master key: 64 hex characters.
    pub fn from_hex(master_key_hex: &str) -> Result<Self> {
        let material = Zeroizing::new(
            hex::decode(master_key_hex.trim())
                .map_err(|_| Error::Vault("master key is not valid hex".into()))?,
        );
        Self::new(&material)
    }

    /// Register an additional (typically retired) key epoch for decryption.
    pub fn add_key(&mut self, epoch: u32, key_material: &[u8]) -> Result<()> {
        if key_material.len() != 32 {
            return Err(Error::Vault(format!(
                "key material must be 32 bytes, got {}",
                key_material.len()
            )));
        }
        let key = Key::from_slice(key_material);
        self.keys.insert(epoch, ChaCha20Poly1305::new(key));
        Ok(())
    }

    /// The epoch new ciphertexts are produced under.
    #[must_use]
    pub const fn active_epoch(&self) -> u32 {
        self.active_epoch
    }

    /// Encrypt a byte string under the active epoch.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let cipher = self
            .keys
            .get(&self.active_epoch)
            .ok_or_else(|| Error::Vault("active key epoch missing from keyring".into()))?;

        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let sealed = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| Error::Vault("encryption failed".into()))?;

        // AEAD output is ciphertext || tag; the format carries them apart.
        let (ct, tag) = sealed.split_at(sealed.len() - TAG_LEN);
        Ok(format!(
            "{VERSION}.{ALGORITHM}.{}.{}.{}.{}",
            self.active_epoch,
            B64.encode(nonce),
            B64.encode(tag),
            B64.encode(ct),
        ))
    }

    /// Decrypt a ciphertext produced by any known key epoch.
    pub fn decrypt(&self, token: &str) -> Result<Vec<u8>> {
        let mut parts = token.splitn(6, '.');
        let version = parts.next().unwrap_or_default();
        if version != VERSION {
            return Err(Error::Vault(format!(
                "unrecognized ciphertext version tag: {version:?}"
            )));
        }
        let algorithm = parts.next().unwrap_or_default();
        if algorithm != ALGORITHM {
            return Err(Error::Vault(format!(
                "unsupported cipher algorithm: {algorithm:?}"
            )));
        }

        let epoch: u32 = parts
            .next()
            .unwrap_or_default()
            .parse()
            .map_err(|_| Error::Vault("malformed key epoch".into()))?;
        let nonce = Self::segment(parts.next(), "nonce", NONCE_LEN)?;
        let tag = Self::segment(parts.next(), "tag", TAG_LEN)?;
        let ct = B64
            .decode(parts.next().unwrap_or_default())
            .map_err(|_| Error::Vault("malformed ciphertext segment".into()))?;

        let cipher = self
            .keys
            .get(&epoch)
            .ok_or_else(|| Error::Vault(format!("unknown key epoch {epoch}")))?;

        let mut sealed = ct;
        sealed.extend_from_slice(&tag);
        cipher
            .decrypt(Nonce::from_slice(&nonce), sealed.as_ref())
            .map_err(|_| Error::Vault("authentication failed".into()))
    }

    /// Encrypt an API credential bundle.
    pub fn encrypt_credentials(&self, creds: &Credentials) -> Result<EncryptedCredentials> {
        Ok(EncryptedCredentials {
            api_key: self.encrypt(creds.api_key.as_bytes())?,
            api_secret: self.encrypt(creds.api_secret.as_bytes())?,
            passphrase: creds
                .passphrase
                .as_ref()
                .map(|p| self.encrypt(p.as_bytes()))
                .transpose()?,
        })
    }

    /// Decrypt an API credential bundle.
    pub fn decrypt_credentials(&self, enc: &EncryptedCredentials) -> Result<Credentials> {
        Ok(Credentials {
            api_key: self.decrypt_string(&enc.api_key)?,
            api_secret: self.decrypt_string(&enc.api_secret)?,
            passphrase: enc
                .passphrase
                .as_ref()
                .map(|p| self.decrypt_string(p))
                .transpose()?,
        })
    }

    fn decrypt_string(&self, token: &str) -> Result<String> {
        let bytes = self.decrypt(token)?;
        String::from_utf8(bytes).map_err(|_| Error::Vault("plaintext is not UTF-8".into()))
    }

    fn segment(part: Option<&str>, name: &str, expected_len: usize) -> Result<Vec<u8>> {
        let decoded = B64
            .decode(part.unwrap_or_default())
            .map_err(|_| Error::Vault(format!("malformed {name} segment")))?;
        if decoded.len() != expected_len {
            return Err(Error::Vault(format!(
                "{name} must be {expected_len} bytes, got {}",
                decoded.len()
            )));
        }
        Ok(decoded)
    }
}
