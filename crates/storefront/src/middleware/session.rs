//! Session middleware configuration.
//!
//! Signed session cookies via tower-sessions. Production uses the
//! `PostgreSQL` store; tests plug in the in-memory store.

use tower_sessions::{
    Expiry, SessionManagerLayer, SessionStore,
    cookie::{SameSite, time::Duration},
    service::SignedCookie,
};

use crate::config::ServerConfig;
use crate::keys::{KeyError, SigningKey};

/// Session cookie name.
pub const SESSION_COOKIE_NAME: &str = "shopfront_session";

/// Session expiry time in seconds (7 days).
const SESSION_EXPIRY_SECONDS: i64 = 7 * 24 * 60 * 60;

/// How often expired session rows are deleted.
pub const SESSION_CLEANUP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

/// Session layer type produced by [`create_session_layer`].
pub type SignedSessionLayer<S> = SessionManagerLayer<S, SignedCookie>;

/// Create the session layer.
///
/// The cookie is `HttpOnly`, `SameSite=Lax`, scoped to `/`, signed with a
/// sub-key of the process signing key, and `Secure` in secure mode.
///
/// # Errors
///
/// Returns an error if the cookie key cannot be derived.
pub fn create_session_layer<S>(
    store: S,
    config: &ServerConfig,
    key: &SigningKey,
) -> Result<SignedSessionLayer<S>, KeyError>
where
    S: SessionStore + Clone,
{
    Ok(SessionManagerLayer::new(store)
        .with_name(SESSION_COOKIE_NAME)
        .with_expiry(Expiry::OnInactivity(Duration::seconds(SESSION_EXPIRY_SECONDS)))
        .with_secure(config.secure)
        .with_same_site(SameSite::Lax)
        .with_http_only(true)
        .with_path("/")
        .with_signed(key.cookie_key()?))
}
