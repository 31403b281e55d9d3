//! Long-lived signing key material.
//!
//! One [`SigningKey`] exists per process. Purpose-specific sub-keys (session
//! cookie signing, CSRF MACs) are derived from it with HMAC-SHA256 over a
//! label, so compromising one use never reveals another.

use hmac::{Hmac, Mac};
use rand::{TryRngCore, rngs::OsRng};
use secrecy::ExposeSecret;
use sha2::Sha256;
use thiserror::Error;
use tower_sessions::cookie::Key;

use crate::config::ServerConfig;

type HmacSha256 = Hmac<Sha256>;

/// Signing key length in bytes.
pub const KEY_LEN: usize = 32;

const PBKDF2_ROUNDS: u32 = 4096;
const PBKDF2_SALT: &[u8] = b"shopfront-session-salt";

const COOKIE_SIGN_LABEL: &[u8] = b"shopfront/cookie/sign";
const COOKIE_ENCRYPT_LABEL: &[u8] = b"shopfront/cookie/encrypt";
const CSRF_LABEL: &[u8] = b"shopfront/csrf";

/// Errors from key generation and sub-key derivation.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("OS random source failed: {0}")]
    Random(String),
    #[error("HMAC key setup failed")]
    Mac,
    #[error("Cookie key rejected: {0}")]
    Cookie(String),
}

/// 32-byte process-lifetime secret.
#[derive(Clone)]
pub struct SigningKey([u8; KEY_LEN]);

impl SigningKey {
    /// Stretch an operator-supplied secret with PBKDF2-HMAC-SHA256.
    ///
    /// Deterministic: the same secret always yields the same key.
    #[must_use]
    pub fn derive(secret: &str) -> Self {
        let mut key = [0u8; KEY_LEN];
        pbkdf2::pbkdf2_hmac::<Sha256>(secret.as_bytes(), PBKDF2_SALT, PBKDF2_ROUNDS, &mut key);
        Self(key)
    }

    /// Fresh random key from the OS random source.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::Random` if the OS random source fails.
    pub fn generate() -> Result<Self, KeyError> {
        let mut key = [0u8; KEY_LEN];
        OsRng
            .try_fill_bytes(&mut key)
            .map_err(|e| KeyError::Random(e.to_string()))?;
        Ok(Self(key))
    }

    /// Derive from the configured secret, or generate one when none is set.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::Random` if a key must be generated and the OS
    /// random source fails.
    pub fn from_config(config: &ServerConfig) -> Result<Self, KeyError> {
        if let Some(secret) = &config.secret {
            return Ok(Self::derive(secret.expose_secret()));
        }

        tracing::warn!("SHOPFRONT_SECRET not set; using a random key (sessions will not survive restarts)");
        Self::generate()
    }

    /// HMAC-SHA256 of `label` under this key.
    fn subkey(&self, label: &[u8]) -> Result<[u8; 32], KeyError> {
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.0) else {
            return Err(KeyError::Mac);
        };
        mac.update(label);
        Ok(mac.finalize().into_bytes().into())
    }

    /// 64-byte key for signing session cookies.
    ///
    /// # Errors
    ///
    /// Returns an error if the derived material is rejected by the cookie
    /// crate.
    pub fn cookie_key(&self) -> Result<Key, KeyError> {
        let mut material = [0u8; 64];
        let (signing, encryption) = material.split_at_mut(32);
        signing.copy_from_slice(&self.subkey(COOKIE_SIGN_LABEL)?);
        encryption.copy_from_slice(&self.subkey(COOKIE_ENCRYPT_LABEL)?);
        Key::try_from(material.as_slice()).map_err(|e| KeyError::Cookie(e.to_string()))
    }

    /// Key for CSRF token MACs.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::Mac` if HMAC setup fails.
    pub fn csrf_key(&self) -> Result<[u8; 32], KeyError> {
        self.subkey(CSRF_LABEL)
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SigningKey([REDACTED])")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_is_deterministic() {
        let a = SigningKey::derive("correct horse battery staple");
        let b = SigningKey::derive("correct horse battery staple");
        let c = SigningKey::derive("correct horse battery stapler");
        assert_eq!(a.0, b.0);
        assert_ne!(a.0, c.0);
    }

    #[test]
    fn test_generate_is_random() {
        let a = SigningKey::generate().unwrap();
        let b = SigningKey::generate().unwrap();
        assert_ne!(a.0, b.0);
    }

    #[test]
    fn test_subkeys_are_domain_separated() {
        let key = SigningKey::derive("secret material");
        let csrf = key.csrf_key().unwrap();
        let sign = key.subkey(COOKIE_SIGN_LABEL).unwrap();
        assert_ne!(csrf, sign);
        assert_ne!(csrf, key.0);
    }

    #[test]
    fn test_cookie_key_is_stable() {
        let key = SigningKey::derive("secret material");
        let a = key.cookie_key().unwrap();
        let b = key.cookie_key().unwrap();
        assert_eq!(a.master(), b.master());
        assert_eq!(a.master().len(), 64);
    }

    #[test]
    fn test_debug_redacted() {
        let key = SigningKey::derive("secret material");
        assert_eq!(format!("{key:?}"), "SigningKey([REDACTED])");
    }
}
