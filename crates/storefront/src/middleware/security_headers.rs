//! Security headers middleware for XSS, clickjacking, and isolation protection.
//!
//! The CSP is bound to the request nonce from the
//! [`RequestSecurityContext`]. HSTS is only sent when the process runs in
//! secure mode and the effective scheme is HTTPS.

use axum::{
    extract::{Request, State},
    http::{
        HeaderName, HeaderValue,
        header::{
            CACHE_CONTROL, CONTENT_SECURITY_POLICY, REFERRER_POLICY, STRICT_TRANSPORT_SECURITY,
            X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS,
        },
    },
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::context::RequestSecurityContext;
use super::proxy::ClientAddr;
use crate::error::AppError;
use crate::state::AppState;

const HSTS_VALUE: &str = "max-age=31536000; includeSubDomains";
const PERMISSIONS_POLICY: &str = "camera=(), microphone=(), geolocation=(), payment=()";

/// Content-Security-Policy template.
///
/// ```text
/// default-src 'self';
/// img-src 'self';
/// style-src 'self' [cdn] 'nonce-N';
/// script-src 'self' [cdn] 'nonce-N';
/// font-src 'self';
/// connect-src 'self';
/// object-src 'none';
/// form-action 'self';
/// frame-ancestors 'none';
/// base-uri 'self'
/// ```
#[derive(Clone, Debug, Default)]
pub struct CspPolicy {
    cdn_origin: Option<String>,
}

impl CspPolicy {
    /// Policy optionally allowing one CDN origin for scripts and styles.
    ///
    /// The origin must already be normalized (`scheme://host[:port]`).
    #[must_use]
    pub const fn new(cdn_origin: Option<String>) -> Self {
        Self { cdn_origin }
    }

    /// Render the header value for one nonce.
    #[must_use]
    pub fn render(&self, nonce: &str) -> String {
        let cdn = self
            .cdn_origin
            .as_deref()
            .map(|origin| format!(" {origin}"))
            .unwrap_or_default();

        format!(
            "default-src 'self'; \
             img-src 'self'; \
             style-src 'self'{cdn} 'nonce-{nonce}'; \
             script-src 'self'{cdn} 'nonce-{nonce}'; \
             font-src 'self'; \
             connect-src 'self'; \
             object-src 'none'; \
             form-action 'self'; \
             frame-ancestors 'none'; \
             base-uri 'self'"
        )
    }
}

/// Add security headers to all responses.
///
/// Headers applied:
/// - `Content-Security-Policy` - nonce-bound, see [`CspPolicy`]
/// - `X-Frame-Options: DENY` - Prevent clickjacking
/// - `X-Content-Type-Options: nosniff` - Prevent MIME sniffing
/// - `Referrer-Policy: strict-origin-when-cross-origin`
/// - `Permissions-Policy` - Deny camera, microphone, geolocation, payment
/// - `Cross-Origin-Opener-Policy: same-origin` - Process isolation
/// - `Cache-Control: no-store` - unless the handler set one
/// - `Strict-Transport-Security` - secure mode over HTTPS only
pub async fn security_headers_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(context) = request.extensions().get::<RequestSecurityContext>() else {
        return AppError::internal("security headers stage ran before request context")
            .into_response();
    };

    let csp = match HeaderValue::from_str(&state.csp().render(context.nonce().value())) {
        Ok(value) => value,
        Err(e) => return AppError::internal(e).into_response(),
    };

    let https = request
        .extensions()
        .get::<ClientAddr>()
        .is_some_and(|addr| addr.scheme().is_https());
    let send_hsts = state.config().secure && https;

    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(CONTENT_SECURITY_POLICY, csp);
    headers.insert(X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(
        REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        HeaderName::from_static("permissions-policy"),
        HeaderValue::from_static(PERMISSIONS_POLICY),
    );
    headers.insert(
        HeaderName::from_static("cross-origin-opener-policy"),
        HeaderValue::from_static("same-origin"),
    );

    // Pages carry CSRF tokens
    if !headers.contains_key(CACHE_CONTROL) {
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    }

    if send_hsts {
        headers.insert(STRICT_TRANSPORT_SECURITY, HeaderValue::from_static(HSTS_VALUE));
    }

    response
}
