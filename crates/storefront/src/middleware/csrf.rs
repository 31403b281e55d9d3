//! CSRF protection bound to the session.
//!
//! Each session holds a random 32-byte secret. The expected token is
//! `HMAC-SHA256(csrf_key, secret)`; it is handed out masked with a fresh
//! one-time pad (`pad || pad ^ mac`, base64url) so the rendered value
//! changes on every response. State-changing requests must echo a token in
//! the `x-csrf-token` header or the `csrf_token` form field.
//!
//! The secret is only created when a handler asks for a [`CsrfToken`], so
//! health checks, 404s and API calls never write a session.

use axum::{
    body::Body,
    extract::{FromRequestParts, Request, State},
    http::{Method, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{
    Engine,
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use futures::StreamExt;
use hmac::{Hmac, Mac};
use rand::{TryRngCore, rngs::OsRng};
use sha2::Sha256;
use tower_sessions::Session;

use crate::error::AppError;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the token on scripted requests.
pub const CSRF_HEADER: &str = "x-csrf-token";
/// Form field carrying the token on HTML form posts.
pub const CSRF_FIELD: &str = "csrf_token";
/// Client-facing rejection message.
pub const CSRF_REJECTION: &str = "CSRF token is invalid or missing";
/// Largest form body buffered to look for the token.
pub const MAX_FORM_BYTES: usize = 1024 * 1024;

const SESSION_SECRET_KEY: &str = "csrf.secret";
const SECRET_LEN: usize = 32;
const MAC_LEN: usize = 32;

/// Masked token for the current response, for templates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CsrfToken(String);

impl CsrfToken {
    #[must_use]
    pub fn value(&self) -> &str {
        &self.0
    }
}

/// Whether `method` may skip validation.
#[must_use]
pub fn is_safe_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

fn random_bytes<const N: usize>() -> Result<[u8; N], AppError> {
    let mut bytes = [0u8; N];
    OsRng.try_fill_bytes(&mut bytes).map_err(AppError::internal)?;
    Ok(bytes)
}

fn keyed_mac(key: &[u8; 32], secret: &[u8]) -> Result<HmacSha256, AppError> {
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        return Err(AppError::internal("CSRF MAC key rejected"));
    };
    mac.update(secret);
    Ok(mac)
}

/// Issue a masked token for `secret`.
///
/// # Errors
///
/// Returns `internal` if the random source fails.
pub fn issue_token(key: &[u8; 32], secret: &[u8]) -> Result<CsrfToken, AppError> {
    let mac = keyed_mac(key, secret)?.finalize().into_bytes();
    let pad = random_bytes::<MAC_LEN>()?;

    let mut raw = Vec::with_capacity(MAC_LEN * 2);
    raw.extend_from_slice(&pad);
    raw.extend(pad.iter().zip(mac.iter()).map(|(p, m)| p ^ m));
    Ok(CsrfToken(URL_SAFE_NO_PAD.encode(raw)))
}

/// Constant-time check of a submitted token against `secret`.
#[must_use]
pub fn verify_token(key: &[u8; 32], secret: &[u8], submitted: &str) -> bool {
    let Ok(raw) = URL_SAFE_NO_PAD.decode(submitted.trim()) else {
        return false;
    };
    if raw.len() != MAC_LEN * 2 {
        return false;
    }

    let (pad, masked) = raw.split_at(MAC_LEN);
    let candidate: Vec<u8> = pad.iter().zip(masked).map(|(p, m)| p ^ m).collect();

    keyed_mac(key, secret).is_ok_and(|mac| mac.verify_slice(&candidate).is_ok())
}

/// The session's CSRF secret, if one was stored.
async fn stored_secret(session: &Session) -> Result<Option<Vec<u8>>, AppError> {
    let Some(encoded) = session.get::<String>(SESSION_SECRET_KEY).await? else {
        return Ok(None);
    };
    match STANDARD.decode(&encoded) {
        Ok(secret) if secret.len() == SECRET_LEN => Ok(Some(secret)),
        _ => {
            tracing::warn!("Discarding malformed CSRF secret in session");
            Ok(None)
        }
    }
}

/// Load the session's CSRF secret, creating it on first use.
async fn session_secret(session: &Session) -> Result<Vec<u8>, AppError> {
    if let Some(secret) = stored_secret(session).await? {
        return Ok(secret);
    }

    let secret = random_bytes::<SECRET_LEN>()?;
    session
        .insert(SESSION_SECRET_KEY, STANDARD.encode(secret))
        .await?;
    Ok(secret.to_vec())
}

/// Hands out tokens for one request's session.
#[derive(Clone)]
struct TokenIssuer {
    key: [u8; 32],
    session: Session,
}

impl TokenIssuer {
    async fn issue(&self) -> Result<CsrfToken, AppError> {
        let secret = session_secret(&self.session).await?;
        issue_token(&self.key, &secret)
    }
}

/// Pull the submitted token from the header or a urlencoded body.
///
/// The body is buffered and put back so the handler can still read it.
async fn submitted_token(request: Request) -> Result<(Request, Option<String>), AppError> {
    let from_header = request
        .headers()
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    if from_header.is_some() {
        return Ok((request, from_header));
    }

    let is_form = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
    if !is_form {
        return Ok((request, None));
    }

    let (parts, body) = request.into_parts();
    let mut buffered = Vec::new();
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| AppError::bad_request("Unreadable request body").with_cause(e))?;
        if buffered.len() + chunk.len() > MAX_FORM_BYTES {
            return Err(AppError::payload_too_large("Form body too large"));
        }
        buffered.extend_from_slice(&chunk);
    }

    let token = url::form_urlencoded::parse(&buffered)
        .find(|(name, _)| name == CSRF_FIELD)
        .map(|(_, value)| value.into_owned());

    Ok((Request::from_parts(parts, Body::from(buffered)), token))
}

async fn gate(state: &AppState, request: Request) -> Result<Request, AppError> {
    let session = request
        .extensions()
        .get::<Session>()
        .cloned()
        .ok_or_else(|| AppError::internal("CSRF stage ran before session stage"))?;
    let key = *state.csrf_key();

    let mut request = if is_safe_method(request.method()) {
        request
    } else {
        let Some(secret) = stored_secret(&session).await? else {
            return Err(AppError::forbidden(CSRF_REJECTION));
        };
        let (request, submitted) = submitted_token(request).await?;
        let valid = submitted.is_some_and(|token| verify_token(&key, &secret, &token));
        if !valid {
            return Err(AppError::forbidden(CSRF_REJECTION));
        }
        request
    };

    request
        .extensions_mut()
        .insert(TokenIssuer { key, session });
    Ok(request)
}

/// Middleware validating CSRF tokens on state-changing requests.
pub async fn csrf_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    match gate(&state, request).await {
        Ok(request) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}

impl<S> FromRequestParts<S> for CsrfToken
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let issuer = parts
            .extensions
            .get::<TokenIssuer>()
            .cloned()
            .ok_or_else(|| AppError::internal("CSRF stage not installed"))?;
        issuer.issue().await
    }
}
