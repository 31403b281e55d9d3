//! Integration tests for Shopfront.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p shopfront-integration-tests
//! ```
//!
//! No database is needed. The pool points at a closed port and connects
//! lazily, so everything except the readiness check runs without it.
//! Sessions use the in-memory store and the catalog is
//! [`sample_catalog`].
//!
//! # Test Categories
//!
//! - `pipeline` - Stage ordering, headers and error bodies through the full app
//! - `csrf` - Form round-trips with session cookies
//! - `catalog` - Catalog and product pages, JSON variants
//! - `auth` - Bearer tokens and token sign-in
//! - `logging` - Events emitted per rejected or failed request
//! - `lifecycle` - Real listeners, draining and shutdown outcomes

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    extract::ConnectInfo,
    http::{HeaderMap, Method, Request, header, request::Builder},
    response::Response,
};
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use shopfront::{
    AppState, PipelineBuilder, ServerConfig, SigningKey, build_app,
    db::{MemoryProductRepository, Product, SharedProducts},
    middleware::{EntropySource, NonceError, OsEntropy, csp::SharedEntropy},
};
use shopfront_core::ProductId;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceExt;
use tower_sessions::MemoryStore;

/// Database URL nothing listens on.
pub const UNREACHABLE_DATABASE: &str = "postgres://shopfront@127.0.0.1:1/shopfront_test";

/// Default peer address of test requests (inside the default allow-list).
pub const TRUSTED_PEER: &str = "127.0.0.1:40000";

/// Configuration from the given variables on top of test defaults.
///
/// File logging is disabled and the database is unreachable.
#[must_use]
pub fn config_with(vars: &[(&str, &str)]) -> ServerConfig {
    let mut env: HashMap<String, String> = HashMap::from([
        ("SHOPFRONT_LOG_DIR".to_string(), String::new()),
        (
            "SHOPFRONT_DATABASE_URL".to_string(),
            UNREACHABLE_DATABASE.to_string(),
        ),
    ]);
    for (name, value) in vars {
        env.insert((*name).to_string(), (*value).to_string());
    }

    ServerConfig::from_lookup(|name| env.get(name).cloned()).expect("test configuration is valid")
}

/// A pool that fails fast on first use.
#[must_use]
pub fn lazy_pool() -> PgPool {
    PgPoolOptions::new()
        .acquire_timeout(Duration::from_millis(500))
        .connect_lazy(UNREACHABLE_DATABASE)
        .expect("database URL parses")
}

/// Secret shared with the test token issuer.
pub const BEARER_SECRET: &str = "Qm7Xt2Lp9Vc4Rz8Nw1Kd6Hs3Fb5Gy0Ja";

/// Three products, listed as Argan Oil, Clay Mask, Rose Water.
#[must_use]
pub fn sample_catalog() -> SharedProducts {
    let created_at = Utc
        .with_ymd_and_hms(2025, 3, 1, 9, 0, 0)
        .single()
        .expect("timestamp is valid");
    let product = |id: i64, name: &str, article: &str, cents: i64| Product {
        id: ProductId::new(id),
        name: name.to_string(),
        article: article.to_string(),
        price: Decimal::new(cents, 2),
        image_alt: None,
        created_at,
    };

    Arc::new(MemoryProductRepository::new(vec![
        product(3, "Rose Water", "RW-100", 1250),
        product(1, "Argan Oil", "AO-030", 2990),
        product(2, "Clay Mask", "CM-075", 1800),
    ]))
}

/// The complete application with a fixed signing key and the sample
/// catalog.
#[must_use]
pub fn app_with(config: ServerConfig, entropy: SharedEntropy) -> Router {
    app_with_products(config, entropy, sample_catalog())
}

/// The complete application over the given catalog.
#[must_use]
pub fn app_with_products(
    config: ServerConfig,
    entropy: SharedEntropy,
    products: SharedProducts,
) -> Router {
    let key = SigningKey::derive("integration-test-signing-secret");
    let state = AppState::with_entropy(config, lazy_pool(), key, entropy)
        .expect("keys derive")
        .with_products(products);
    let pipeline = PipelineBuilder::canonical()
        .build()
        .expect("canonical pipeline is valid");

    build_app(state, MemoryStore::default(), &pipeline).expect("session layer builds")
}

/// Drives the full app in memory, one request at a time.
#[derive(Clone)]
pub struct TestApp {
    router: Router,
}

impl TestApp {
    /// Default configuration, OS entropy.
    #[must_use]
    pub fn new() -> Self {
        Self::with(config_with(&[]), Arc::new(OsEntropy))
    }

    #[must_use]
    pub fn with(config: ServerConfig, entropy: SharedEntropy) -> Self {
        Self {
            router: app_with(config, entropy),
        }
    }

    #[must_use]
    pub fn with_products(config: ServerConfig, products: SharedProducts) -> Self {
        Self {
            router: app_with_products(config, Arc::new(OsEntropy), products),
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    pub async fn get(&self, path: &str) -> Response {
        self.send(request(Method::GET, path).body(Body::empty()).expect("request builds"))
            .await
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

/// Request builder carrying a trusted peer address.
#[must_use]
pub fn request(method: Method, path: &str) -> Builder {
    request_from(TRUSTED_PEER, method, path)
}

/// Request builder with an explicit peer address.
#[must_use]
pub fn request_from(peer: &str, method: Method, path: &str) -> Builder {
    let peer: SocketAddr = peer.parse().expect("peer address parses");
    Request::builder()
        .method(method)
        .uri(path)
        .extension(ConnectInfo(peer))
}

/// Collect a response body as UTF-8.
pub async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body collects");
    String::from_utf8(bytes.to_vec()).expect("body is UTF-8")
}

/// Collect a problem+json body.
pub async fn problem(response: Response) -> serde_json::Value {
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/problem+json"
    );
    serde_json::from_str(&body_string(response).await).expect("problem body is JSON")
}

/// The nonce in a `Content-Security-Policy` header, if any.
#[must_use]
pub fn csp_nonce(headers: &HeaderMap) -> Option<String> {
    let csp = headers.get("content-security-policy")?.to_str().ok()?;
    let start = csp.find("'nonce-")? + "'nonce-".len();
    let len = csp.get(start..)?.find('\'')?;
    csp.get(start..start + len).map(str::to_owned)
}

/// `name=value` of the first `Set-Cookie` header, for replaying.
#[must_use]
pub fn session_cookie(headers: &HeaderMap) -> Option<String> {
    let set_cookie = headers.get(header::SET_COOKIE)?.to_str().ok()?;
    set_cookie.split(';').next().map(str::to_owned)
}

/// The hidden `csrf_token` field value in a rendered form.
#[must_use]
pub fn form_csrf_token(html: &str) -> Option<String> {
    let marker = r#"name="csrf_token" value=""#;
    let start = html.find(marker)? + marker.len();
    let len = html.get(start..)?.find('"')?;
    html.get(start..start + len).map(str::to_owned)
}

/// Entropy source that counts how often it is drawn from.
#[derive(Debug, Default)]
pub struct CountingEntropy {
    draws: AtomicUsize,
}

impl CountingEntropy {
    #[must_use]
    pub fn draws(&self) -> usize {
        self.draws.load(Ordering::SeqCst)
    }
}

impl EntropySource for CountingEntropy {
    fn fill(&self, dest: &mut [u8]) -> Result<(), NonceError> {
        self.draws.fetch_add(1, Ordering::SeqCst);
        OsEntropy.fill(dest)
    }
}

/// Entropy source that always fails.
#[derive(Debug, Default)]
pub struct FailingEntropy;

impl EntropySource for FailingEntropy {
    fn fill(&self, _dest: &mut [u8]) -> Result<(), NonceError> {
        Err(NonceError("entropy device unavailable".to_string()))
    }
}
