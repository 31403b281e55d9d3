//! Product catalog repository.
//!
//! Handlers only see [`ProductRepository`]. Production reads the `products`
//! table; tests and local demos use [`MemoryProductRepository`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use shopfront_core::ProductId;
use sqlx::PgPool;

/// A catalog product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Product {
    #[sqlx(try_from = "i64")]
    pub id: ProductId,
    pub name: String,
    /// Stock-keeping article number
    pub article: String,
    pub price: Decimal,
    pub image_alt: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Read access to the catalog.
#[async_trait]
pub trait ProductRepository: Send + Sync {
    /// All products, ordered by name.
    async fn list(&self) -> Result<Vec<Product>, sqlx::Error>;

    /// One product, or `None` if the id is unknown.
    async fn get(&self, id: ProductId) -> Result<Option<Product>, sqlx::Error>;
}

/// Shared handle stored in the application state.
pub type SharedProducts = Arc<dyn ProductRepository>;

/// Catalog backed by the `products` table.
#[derive(Debug, Clone)]
pub struct PgProductRepository {
    pool: PgPool,
}

impl PgProductRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductRepository for PgProductRepository {
    async fn list(&self) -> Result<Vec<Product>, sqlx::Error> {
        sqlx::query_as::<_, Product>(
            r"
            SELECT id, name, article, price, image_alt, created_at
            FROM products
            ORDER BY name ASC, id ASC
            ",
        )
        .fetch_all(&self.pool)
        .await
    }

    async fn get(&self, id: ProductId) -> Result<Option<Product>, sqlx::Error> {
        sqlx::query_as::<_, Product>(
            r"
            SELECT id, name, article, price, image_alt, created_at
            FROM products
            WHERE id = $1
            ",
        )
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await
    }
}

/// Fixed in-memory catalog.
#[derive(Debug, Clone, Default)]
pub struct MemoryProductRepository {
    products: Vec<Product>,
}

impl MemoryProductRepository {
    #[must_use]
    pub fn new(mut products: Vec<Product>) -> Self {
        products.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Self { products }
    }
}

#[async_trait]
impl ProductRepository for MemoryProductRepository {
    async fn list(&self) -> Result<Vec<Product>, sqlx::Error> {
        Ok(self.products.clone())
    }

    async fn get(&self, id: ProductId) -> Result<Option<Product>, sqlx::Error> {
        Ok(self.products.iter().find(|p| p.id == id).cloned())
    }
}
