//! Authenticated principal handling.
//!
//! A principal comes from one of two places. API clients send an HS256
//! bearer token in `Authorization`; browsers carry claims in the session
//! under [`PRINCIPAL_KEY`]. The [`require_principal`] stage guards protected
//! routes: without claims the request fails with `unauthorized`, with claims
//! the request context is replaced by a copy carrying them.

use std::collections::BTreeMap;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;

use super::context::RequestSecurityContext;
use crate::error::AppError;
use crate::state::AppState;

/// Session key holding the principal claims.
pub const PRINCIPAL_KEY: &str = "principal";

/// Claims describing an authenticated principal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalClaims(BTreeMap<String, String>);

impl PrincipalClaims {
    #[must_use]
    pub const fn new(claims: BTreeMap<String, String>) -> Self {
        Self(claims)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// The `sub` claim.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.get("sub")
    }
}

impl From<BTreeMap<String, serde_json::Value>> for PrincipalClaims {
    /// String claims are kept as is; numbers and other values use their
    /// JSON text.
    fn from(claims: BTreeMap<String, serde_json::Value>) -> Self {
        Self(
            claims
                .into_iter()
                .map(|(name, value)| {
                    let value = match value {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (name, value)
                })
                .collect(),
        )
    }
}

/// Verifies HS256 bearer tokens against a shared secret.
///
/// Tokens must carry an unexpired `exp` claim. Any other algorithm is
/// rejected, including `none`.
#[derive(Clone)]
pub struct BearerVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl BearerVerifier {
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Validate `token` and return its claims.
    ///
    /// # Errors
    ///
    /// Returns `unauthorized` if the signature, algorithm or expiry check
    /// fails.
    pub fn verify(&self, token: &str) -> Result<PrincipalClaims, AppError> {
        jsonwebtoken::decode::<BTreeMap<String, serde_json::Value>>(
            token,
            &self.key,
            &self.validation,
        )
        .map(|data| PrincipalClaims::from(data.claims))
        .map_err(|e| AppError::unauthorized("Invalid or expired token").with_cause(e))
    }
}

impl std::fmt::Debug for BearerVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerVerifier([REDACTED])")
    }
}

/// The token in an `Authorization: Bearer <token>` header, if present.
fn bearer_token(headers: &HeaderMap) -> Result<Option<&str>, AppError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let invalid = || AppError::unauthorized("Invalid Authorization header format");

    let value = value.to_str().map_err(|_| invalid())?;
    match value.split(' ').collect::<Vec<_>>().as_slice() {
        ["Bearer", token] if !token.is_empty() => Ok(Some(*token)),
        _ => Err(invalid()),
    }
}

/// Reject requests without a principal.
pub async fn require_principal(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    match authorize(&state, &mut request).await {
        Ok(()) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}

async fn authorize(state: &AppState, request: &mut Request) -> Result<(), AppError> {
    let context = request
        .extensions()
        .get::<RequestSecurityContext>()
        .cloned()
        .ok_or_else(|| AppError::internal("request security context missing"))?;

    let claims = match bearer_token(request.headers())? {
        Some(token) => state
            .bearer()
            .ok_or_else(|| AppError::unauthorized("Bearer tokens are not accepted"))?
            .verify(token)?,
        None => {
            let session = request
                .extensions()
                .get::<Session>()
                .cloned()
                .ok_or_else(|| AppError::internal("session layer missing before principal check"))?;
            session
                .get::<PrincipalClaims>(PRINCIPAL_KEY)
                .await?
                .ok_or_else(|| AppError::unauthorized("Authentication required"))?
        }
    };

    request.extensions_mut().insert(context.with_claims(claims));
    Ok(())
}

/// Store the principal in the session, rotating the session id.
///
/// # Errors
///
/// Returns an error if the session cannot be modified.
pub async fn set_principal(
    session: &Session,
    claims: &PrincipalClaims,
) -> Result<(), tower_sessions::session::Error> {
    session.cycle_id().await?;
    session.insert(PRINCIPAL_KEY, claims).await
}

/// Remove the principal from the session (logout).
///
/// # Errors
///
/// Returns an error if the session cannot be modified.
pub async fn clear_principal(session: &Session) -> Result<(), tower_sessions::session::Error> {
    session.remove::<PrincipalClaims>(PRINCIPAL_KEY).await?;
    Ok(())
}
