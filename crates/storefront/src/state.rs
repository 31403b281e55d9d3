//! Application state shared across pipeline stages and handlers.

use std::sync::Arc;

use secrecy::ExposeSecret;
use sqlx::PgPool;

use crate::config::ServerConfig;
use crate::db::{PgProductRepository, ProductRepository, SharedProducts};
use crate::keys::{KeyError, SigningKey};
use crate::middleware::auth::BearerVerifier;
use crate::middleware::csp::{EntropySource, OsEntropy, SharedEntropy};
use crate::middleware::security_headers::CspPolicy;

/// Application state shared across all requests.
///
/// This struct is cheaply cloneable via `Arc`. Everything in it is
/// read-only after startup.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
    products: SharedProducts,
}

struct AppStateInner {
    config: ServerConfig,
    pool: PgPool,
    key: SigningKey,
    csrf_key: [u8; 32],
    csp: CspPolicy,
    entropy: SharedEntropy,
    bearer: Option<BearerVerifier>,
}

impl AppState {
    /// Create application state drawing nonces from the OS and products
    /// from `PostgreSQL`.
    ///
    /// # Errors
    ///
    /// Returns an error if the CSRF sub-key cannot be derived.
    pub fn new(config: ServerConfig, pool: PgPool, key: SigningKey) -> Result<Self, KeyError> {
        Self::with_entropy(config, pool, key, Arc::new(OsEntropy))
    }

    /// Create application state with a specific nonce entropy source.
    ///
    /// # Errors
    ///
    /// Returns an error if the CSRF sub-key cannot be derived.
    pub fn with_entropy(
        config: ServerConfig,
        pool: PgPool,
        key: SigningKey,
        entropy: SharedEntropy,
    ) -> Result<Self, KeyError> {
        let csrf_key = key.csrf_key()?;
        let csp = CspPolicy::new(config.cdn_origin.clone());
        let bearer = config
            .bearer_secret
            .as_ref()
            .map(|secret| BearerVerifier::new(secret.expose_secret().as_bytes()));
        let products = Arc::new(PgProductRepository::new(pool.clone()));

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                pool,
                key,
                csrf_key,
                csp,
                entropy,
                bearer,
            }),
            products,
        })
    }

    /// Replace the product catalog.
    #[must_use]
    pub fn with_products(mut self, products: SharedProducts) -> Self {
        self.products = products;
        self
    }

    /// Get a reference to the server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Get a reference to the database connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.inner.pool
    }

    #[must_use]
    pub fn signing_key(&self) -> &SigningKey {
        &self.inner.key
    }

    #[must_use]
    pub fn csrf_key(&self) -> &[u8; 32] {
        &self.inner.csrf_key
    }

    #[must_use]
    pub fn csp(&self) -> &CspPolicy {
        &self.inner.csp
    }

    #[must_use]
    pub fn entropy(&self) -> &dyn EntropySource {
        self.inner.entropy.as_ref()
    }

    #[must_use]
    pub fn products(&self) -> &dyn ProductRepository {
        self.products.as_ref()
    }

    /// Bearer token verifier, if bearer auth is configured.
    #[must_use]
    pub fn bearer(&self) -> Option<&BearerVerifier> {
        self.inner.bearer.as_ref()
    }

    /// Whether this process terminates TLS itself.
    #[must_use]
    pub fn tls_in_process(&self) -> bool {
        !self.inner.config.tls_offloaded && self.inner.config.tls.is_some()
    }
}
