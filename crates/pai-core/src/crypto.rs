//! Credential encryption at rest
//!
//! API keys stored in session files are sealed with AES-256-GCM. The key is
//! derived from the `PAI_ENCRYPTION_KEY` environment variable. The literal
//! value [`ENV_VAR_SENTINEL`] means "read the key from the provider's
//! environment variable" and is never encrypted.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use sha2::{Digest, Sha256};

use crate::error::{AgentError, Result};

/// Environment variable holding the encryption passphrase
pub const ENCRYPTION_KEY_ENV: &str = "PAI_ENCRYPTION_KEY";

/// Stored in place of a key when the provider's env var should be used
pub const ENV_VAR_SENTINEL: &str = "ENV_VAR";

/// Marker for encrypted values
pub const ENCRYPTED_PREFIX: &str = "ENC:";

const NONCE_LEN: usize = 12;

/// Symmetric cipher for stored credentials
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCipher").finish_non_exhaustive()
    }
}

impl CredentialCipher {
    /// Derive a cipher from a passphrase of any length
    pub fn from_passphrase(passphrase: &str) -> Result<Self> {
        if passphrase.is_empty() {
            return Err(AgentError::EncryptionConfig(format!(
                "{ENCRYPTION_KEY_ENV} is empty"
            )));
        }
        let digest = Sha256::digest(passphrase.as_bytes());
        let key = Key::<Aes256Gcm>::from_slice(&digest);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Build from `PAI_ENCRYPTION_KEY`
    pub fn from_env() -> Result<Self> {
        let passphrase = std::env::var(ENCRYPTION_KEY_ENV).map_err(|_| {
            AgentError::EncryptionConfig(format!("Encryption key not set in {ENCRYPTION_KEY_ENV}"))
        })?;
        Self::from_passphrase(&passphrase)
    }

    /// Seal a plaintext value as `ENC:<base64(nonce || ciphertext)>`
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| AgentError::Encryption(e.to_string()))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(format!("{ENCRYPTED_PREFIX}{}", BASE64.encode(combined)))
    }

    /// Open a value produced by [`encrypt`](Self::encrypt)
    pub fn decrypt(&self, sealed: &str) -> Result<String> {
        let encoded = sealed.strip_prefix(ENCRYPTED_PREFIX).ok_or_else(|| {
            AgentError::Encryption("value does not have the encrypted prefix".into())
        })?;
        let combined = BASE64
            .decode(encoded)
            .map_err(|e| AgentError::Encryption(format!("invalid base64: {e}")))?;
        if combined.len() < NONCE_LEN {
            return Err(AgentError::Encryption("ciphertext too short".into()));
        }

        let (nonce_bytes, encrypted) = combined.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), encrypted)
            .map_err(|_| AgentError::Encryption("decryption failed (wrong key?)".into()))?;

        String::from_utf8(plaintext)
            .map_err(|e| AgentError::Encryption(format!("invalid UTF-8: {e}")))
    }
}

/// Whether a stored credential is a real key, as opposed to the `ENV_VAR`
/// sentinel or an empty value
pub fn needs_cipher(stored: &str) -> bool {
    !stored.is_empty() && stored != ENV_VAR_SENTINEL
}

pub fn is_encrypted(value: &str) -> bool {
    value.starts_with(ENCRYPTED_PREFIX)
}
