//! Trusted-proxy filter.
//!
//! Runs before any other policy. The transport peer must be on the
//! configured allow-list; only then are `X-Forwarded-For` and
//! `X-Forwarded-Proto` honoured. The peer address itself is never replaced:
//! [`ClientAddr`] keeps it alongside the forwarded client IP.
//!
//! `X-Forwarded-For` is read from the right. Each trusted proxy appends the
//! address it received from, so hops on the allow-list are skipped and the
//! first untrusted entry is the client. Entries left of it are whatever the
//! client chose to send and are ignored. An unparseable entry ends the walk
//! and the peer is used instead.

use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{HeaderMap, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use shopfront_core::TrustAllowList;

use crate::error::AppError;
use crate::state::AppState;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Effective request scheme.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    #[must_use]
    pub const fn is_https(self) -> bool {
        matches!(self, Self::Https)
    }
}

/// Normalized addressing for one request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientAddr {
    peer: SocketAddr,
    client_ip: IpAddr,
    scheme: Scheme,
}

impl ClientAddr {
    /// Transport-level peer (the proxy).
    #[must_use]
    pub const fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Originating client as reported by the proxy, or the peer.
    #[must_use]
    pub const fn client_ip(&self) -> IpAddr {
        self.client_ip
    }

    #[must_use]
    pub const fn scheme(&self) -> Scheme {
        self.scheme
    }
}

/// Validate the peer and normalize forwarded headers.
///
/// `tls_in_process` marks connections that were terminated by this process.
///
/// # Errors
///
/// - `bad_request` if the peer address is missing or unusable
/// - `forbidden` if the peer is not on the allow-list
pub fn evaluate(
    allow: &TrustAllowList,
    peer: Option<SocketAddr>,
    headers: &HeaderMap,
    tls_in_process: bool,
) -> Result<ClientAddr, AppError> {
    let peer = peer
        .filter(|p| p.port() != 0 && !p.ip().is_unspecified())
        .ok_or_else(|| AppError::bad_request("Malformed peer address"))?;

    if !allow.contains(peer.ip()) {
        return Err(AppError::forbidden("Untrusted proxy"));
    }

    let client_ip = forwarded_client(allow, headers).unwrap_or_else(|| peer.ip());

    let forwarded_https = headers
        .get(X_FORWARDED_PROTO)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("https"));

    let scheme = if forwarded_https || tls_in_process {
        Scheme::Https
    } else {
        Scheme::Http
    };

    Ok(ClientAddr {
        peer,
        client_ip,
        scheme,
    })
}

/// Rightmost untrusted `X-Forwarded-For` entry, or the leftmost one when
/// every hop is trusted.
fn forwarded_client(allow: &TrustAllowList, headers: &HeaderMap) -> Option<IpAddr> {
    let entries = headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .rev()
        .flat_map(|v| v.to_str().unwrap_or_default().rsplit(','));

    let mut leftmost = None;
    for entry in entries {
        let ip = entry.trim().parse::<IpAddr>().ok()?.to_canonical();
        if !allow.contains(ip) {
            return Some(ip);
        }
        leftmost = Some(ip);
    }
    leftmost
}

/// Middleware enforcing the trusted-proxy allow-list.
pub async fn trusted_proxy_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    match evaluate(
        &state.config().trusted_proxies,
        peer,
        request.headers(),
        state.tls_in_process(),
    ) {
        Ok(addr) => {
            tracing::Span::current().record("client_ip", tracing::field::display(addr.client_ip));
            request.extensions_mut().insert(addr);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

impl<S> FromRequestParts<S> for ClientAddr
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .copied()
            .ok_or_else(|| AppError::internal("trusted proxy stage not installed"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use shopfront_core::ErrorCode;

    fn allow() -> TrustAllowList {
        "127.0.0.1,10.0.0.0/8".parse().unwrap()
    }

    fn peer(s: &str) -> Option<SocketAddr> {
        Some(s.parse().unwrap())
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn test_missing_peer_is_bad_request() {
        let err = evaluate(&allow(), None, &HeaderMap::new(), false).unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadRequest);
    }

    #[test]
    fn test_unspecified_peer_is_bad_request() {
        let err = evaluate(&allow(), peer("0.0.0.0:4000"), &HeaderMap::new(), false).unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadRequest);
    }

    #[test]
    fn test_untrusted_peer_is_forbidden() {
        let err = evaluate(&allow(), peer("203.0.113.9:5000"), &HeaderMap::new(), false)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);
    }

    #[test]
    fn test_forwarded_headers_honoured_for_trusted_peer() {
        let h = headers(&[
            (X_FORWARDED_FOR, "198.51.100.4, 10.1.1.1"),
            (X_FORWARDED_PROTO, "HTTPS"),
        ]);
        let addr = evaluate(&allow(), peer("10.2.3.4:4431"), &h, false).unwrap();
        assert_eq!(addr.client_ip(), "198.51.100.4".parse::<IpAddr>().unwrap());
        assert_eq!(addr.peer(), "10.2.3.4:4431".parse().unwrap());
        assert!(addr.scheme().is_https());
    }

    #[test]
    fn test_scheme_defaults_to_http() {
        let h = headers(&[(X_FORWARDED_PROTO, "http")]);
        let addr = evaluate(&allow(), peer("127.0.0.1:9000"), &h, false).unwrap();
        assert_eq!(addr.scheme(), Scheme::Http);

        let addr = evaluate(&allow(), peer("127.0.0.1:9000"), &HeaderMap::new(), false).unwrap();
        assert_eq!(addr.scheme(), Scheme::Http);
    }

    #[test]
    fn test_in_process_tls_is_https() {
        let addr = evaluate(&allow(), peer("127.0.0.1:9000"), &HeaderMap::new(), true).unwrap();
        assert!(addr.scheme().is_https());
    }

    #[test]
    fn test_spoofed_leftmost_entry_is_ignored() {
        let h = headers(&[(X_FORWARDED_FOR, "6.6.6.6, 198.51.100.4")]);
        let addr = evaluate(&allow(), peer("127.0.0.1:9000"), &h, false).unwrap();
        assert_eq!(addr.client_ip(), "198.51.100.4".parse::<IpAddr>().unwrap());

        let h = headers(&[(X_FORWARDED_FOR, "6.6.6.6, 198.51.100.4, 10.0.0.7, 10.9.9.9")]);
        let addr = evaluate(&allow(), peer("127.0.0.1:9000"), &h, false).unwrap();
        assert_eq!(addr.client_ip(), "198.51.100.4".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_repeated_header_read_in_order() {
        let mut h = HeaderMap::new();
        h.append(X_FORWARDED_FOR, HeaderValue::from_static("6.6.6.6"));
        h.append(X_FORWARDED_FOR, HeaderValue::from_static("198.51.100.4, 10.0.0.7"));
        let addr = evaluate(&allow(), peer("127.0.0.1:9000"), &h, false).unwrap();
        assert_eq!(addr.client_ip(), "198.51.100.4".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_all_trusted_hops_use_leftmost() {
        let h = headers(&[(X_FORWARDED_FOR, "10.0.0.5, 10.0.0.6")]);
        let addr = evaluate(&allow(), peer("127.0.0.1:9000"), &h, false).unwrap();
        assert_eq!(addr.client_ip(), "10.0.0.5".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_trailing_garbage_falls_back_to_peer() {
        let h = headers(&[(X_FORWARDED_FOR, "198.51.100.4, junk")]);
        let addr = evaluate(&allow(), peer("127.0.0.1:9000"), &h, false).unwrap();
        assert_eq!(addr.client_ip(), "127.0.0.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_mapped_ipv4_is_canonical() {
        let h = headers(&[(X_FORWARDED_FOR, "::ffff:198.51.100.4")]);
        let addr = evaluate(&allow(), peer("127.0.0.1:9000"), &h, false).unwrap();
        assert_eq!(addr.client_ip(), "198.51.100.4".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_garbage_forwarded_for_falls_back_to_peer() {
        let h = headers(&[(X_FORWARDED_FOR, "not-an-ip")]);
        let addr = evaluate(&allow(), peer("127.0.0.1:9000"), &h, false).unwrap();
        assert_eq!(addr.client_ip(), "127.0.0.1".parse::<IpAddr>().unwrap());
    }
}
