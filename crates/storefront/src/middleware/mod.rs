//! Request pipeline stages.
//!
//! # Stage Order (outermost first)
//!
//! 1. Sentry layers and `TraceLayer`
//! 2. Request ID
//! 3. Error responder, panic catcher, body read timeout
//! 4. Trusted proxy filter
//! 5. CSP nonce
//! 6. Request security context
//! 7. Security headers (CSP, HSTS, etc.)
//! 8. Session layer (tower-sessions, signed cookie)
//! 9. CSRF gate
//! 10. Request timeout guard
//!
//! The order is assembled and checked in [`crate::pipeline`].

pub mod auth;
pub mod context;
pub mod csp;
pub mod csrf;
pub mod proxy;
pub mod request_id;
pub mod security_headers;
pub mod session;
pub mod timeout;

pub use auth::{
    BearerVerifier, PrincipalClaims, clear_principal, require_principal, set_principal,
};
pub use context::{RequestSecurityContext, context_middleware};
pub use csp::{CspNonce, EntropySource, NonceError, OsEntropy, nonce_middleware};
pub use csrf::{CsrfToken, csrf_middleware};
pub use proxy::{ClientAddr, Scheme, trusted_proxy_middleware};
pub use request_id::{RequestId, request_id_middleware};
pub use security_headers::{CspPolicy, security_headers_middleware};
pub use session::{
    SESSION_CLEANUP_INTERVAL, SESSION_COOKIE_NAME, SignedSessionLayer, create_session_layer,
};
pub use timeout::timeout_middleware;
