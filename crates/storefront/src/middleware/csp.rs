//! CSP nonce generation.
//!
//! Every request gets a fresh 128-bit nonce, base64-encoded, drawn from an
//! [`EntropySource`]. A failing source aborts the request with an internal
//! error; there is no fallback value.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use rand::{TryRngCore, rngs::OsRng};
use thiserror::Error;

use crate::error::AppError;
use crate::state::AppState;

/// Nonce size in bytes before encoding.
pub const NONCE_LEN: usize = 16;

/// The random source could not produce bytes.
#[derive(Debug, Error)]
#[error("nonce entropy unavailable: {0}")]
pub struct NonceError(pub String);

/// Cryptographically secure random byte source.
pub trait EntropySource: Send + Sync + 'static {
    /// Fill `dest` entirely.
    ///
    /// # Errors
    ///
    /// Returns `NonceError` if the source cannot produce bytes.
    fn fill(&self, dest: &mut [u8]) -> Result<(), NonceError>;
}

/// Operating system random source.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, dest: &mut [u8]) -> Result<(), NonceError> {
        OsRng
            .try_fill_bytes(dest)
            .map_err(|e| NonceError(e.to_string()))
    }
}

/// A CSP nonce value for inline scripts and styles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CspNonce(String);

impl CspNonce {
    /// Draw a new nonce from `source`.
    ///
    /// # Errors
    ///
    /// Propagates the source failure.
    pub fn generate(source: &dyn EntropySource) -> Result<Self, NonceError> {
        let mut bytes = [0u8; NONCE_LEN];
        source.fill(&mut bytes)?;
        Ok(Self(STANDARD.encode(bytes)))
    }

    /// Get the nonce value for use in templates.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.0
    }
}

/// Middleware that generates a CSP nonce and stores it in request extensions.
pub async fn nonce_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    match CspNonce::generate(state.entropy()) {
        Ok(nonce) => {
            request.extensions_mut().insert(nonce);
            next.run(request).await
        }
        Err(e) => AppError::internal(e).into_response(),
    }
}

/// Shared handle to an entropy source.
pub type SharedEntropy = Arc<dyn EntropySource>;

impl<S> FromRequestParts<S> for CspNonce
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .cloned()
            .ok_or_else(|| AppError::internal("CSP nonce missing; nonce stage not installed"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct Broken;

    impl EntropySource for Broken {
        fn fill(&self, _dest: &mut [u8]) -> Result<(), NonceError> {
            Err(NonceError("device unavailable".to_string()))
        }
    }

    #[test]
    fn test_nonce_is_16_bytes_base64() {
        let nonce = CspNonce::generate(&OsEntropy).unwrap();
        let decoded = STANDARD.decode(nonce.value()).unwrap();
        assert_eq!(decoded.len(), NONCE_LEN);
        assert_eq!(nonce.value().len(), 24);
    }

    #[test]
    fn test_nonces_are_unique() {
        let nonces: HashSet<String> = (0..1000)
            .map(|_| CspNonce::generate(&OsEntropy).unwrap().value().to_owned())
            .collect();
        assert_eq!(nonces.len(), 1000);
    }

    #[test]
    fn test_failing_source_propagates() {
        let err = CspNonce::generate(&Broken).unwrap_err();
        assert!(err.to_string().contains("device unavailable"));
    }
}
