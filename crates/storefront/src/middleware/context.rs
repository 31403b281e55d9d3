//! Per-request security context.
//!
//! A [`RequestSecurityContext`] is attached once, right after the nonce
//! stage, and read by every later stage and handler through the extractor.
//! It is never mutated: stages that need a different view (authenticated
//! claims, a deadline-bound cancellation token) insert a modified copy.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use super::auth::PrincipalClaims;
use super::csp::CspNonce;
use crate::error::AppError;
use crate::state::AppState;

/// Immutable bag of per-request values.
#[derive(Clone, Debug)]
pub struct RequestSecurityContext {
    nonce: CspNonce,
    db: PgPool,
    claims: Option<Arc<PrincipalClaims>>,
    cancellation: CancellationToken,
}

impl RequestSecurityContext {
    #[must_use]
    pub fn new(nonce: CspNonce, db: PgPool, cancellation: CancellationToken) -> Self {
        Self {
            nonce,
            db,
            claims: None,
            cancellation,
        }
    }

    #[must_use]
    pub const fn nonce(&self) -> &CspNonce {
        &self.nonce
    }

    /// Database handle for this request.
    #[must_use]
    pub const fn db(&self) -> &PgPool {
        &self.db
    }

    /// Authenticated principal, set only on protected routes.
    #[must_use]
    pub fn claims(&self) -> Option<&PrincipalClaims> {
        self.claims.as_deref()
    }

    /// Cancelled on client disconnect or when the request deadline expires.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Copy carrying `claims`.
    #[must_use]
    pub fn with_claims(&self, claims: PrincipalClaims) -> Self {
        Self {
            claims: Some(Arc::new(claims)),
            ..self.clone()
        }
    }

    /// Copy bound to a different cancellation token.
    #[must_use]
    pub fn with_cancellation(&self, cancellation: CancellationToken) -> Self {
        Self {
            cancellation,
            ..self.clone()
        }
    }
}

/// Attach the context. Requires the nonce stage to have run.
///
/// The request token is cancelled if the request future is dropped before
/// completing (client disconnect).
pub async fn context_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(nonce) = request.extensions().get::<CspNonce>().cloned() else {
        return AppError::internal("request context attached before nonce stage").into_response();
    };

    let cancellation = CancellationToken::new();
    let context = RequestSecurityContext::new(nonce, state.pool().clone(), cancellation.clone());
    request.extensions_mut().insert(context);

    let on_disconnect = cancellation.drop_guard();
    let response = next.run(request).await;
    on_disconnect.disarm();
    response
}

impl<S> FromRequestParts<S> for RequestSecurityContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .cloned()
            .ok_or_else(|| AppError::internal("request security context missing"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::middleware::csp::OsEntropy;
    use std::collections::BTreeMap;

    fn lazy_pool() -> PgPool {
        sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/shopfront_test")
            .unwrap()
    }

    #[tokio::test]
    async fn test_with_claims_leaves_original_untouched() {
        let nonce = CspNonce::generate(&OsEntropy).unwrap();
        let ctx = RequestSecurityContext::new(nonce.clone(), lazy_pool(), CancellationToken::new());

        let claims = PrincipalClaims::new(BTreeMap::from([(
            "sub".to_string(),
            "customer-7".to_string(),
        )]));
        let authed = ctx.with_claims(claims);

        assert!(ctx.claims().is_none());
        assert_eq!(authed.claims().unwrap().subject(), Some("customer-7"));
        assert_eq!(authed.nonce(), &nonce);
    }

    #[tokio::test]
    async fn test_with_cancellation_swaps_token() {
        let parent = CancellationToken::new();
        let ctx = RequestSecurityContext::new(
            CspNonce::generate(&OsEntropy).unwrap(),
            lazy_pool(),
            parent.clone(),
        );
        let child = ctx.with_cancellation(parent.child_token());

        parent.cancel();
        assert!(child.cancellation().is_cancelled());
        assert!(ctx.cancellation().is_cancelled());
    }
}
