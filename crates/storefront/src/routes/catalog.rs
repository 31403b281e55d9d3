//! Catalog and product pages, plus their JSON variants.
//!
//! Product ids come from the path and must be positive integers; anything
//! else is a `bad_request`, an unknown id is `not_found`.

use askama::Template;
use axum::{
    Json,
    extract::{Path, State},
    http::header,
    response::{Html, IntoResponse, Response},
};
use shopfront_core::ProductId;
use tracing::instrument;

use crate::db::Product;
use crate::error::{AppError, Result};
use crate::middleware::RequestSecurityContext;
use crate::state::AppState;

/// Catalog listing template.
#[derive(Template)]
#[template(path = "catalog.html")]
pub struct CatalogTemplate {
    pub nonce: String,
    pub products: Vec<Product>,
}

/// Product detail template.
#[derive(Template)]
#[template(path = "product.html")]
pub struct ProductTemplate {
    pub nonce: String,
    pub product: Product,
}

fn parse_id(raw: &str) -> Result<ProductId> {
    raw.parse::<ProductId>()
        .map_err(|e| AppError::bad_request("Invalid product id").with_cause(e))
}

async fn load(state: &AppState, raw: &str) -> Result<Product> {
    let id = parse_id(raw)?;
    state
        .products()
        .get(id)
        .await?
        .ok_or_else(|| AppError::not_found("Product not found"))
}

/// GET /catalog
#[instrument(skip_all)]
pub async fn catalog(
    State(state): State<AppState>,
    ctx: RequestSecurityContext,
) -> Result<Html<String>> {
    let template = CatalogTemplate {
        nonce: ctx.nonce().value().to_owned(),
        products: state.products().list().await?,
    };
    Ok(Html(template.render()?))
}

/// GET /catalog/json
pub async fn catalog_json(State(state): State<AppState>) -> Result<Json<Vec<Product>>> {
    Ok(Json(state.products().list().await?))
}

/// GET /product/{id}
#[instrument(skip_all, fields(product_id = %id))]
pub async fn product(
    State(state): State<AppState>,
    ctx: RequestSecurityContext,
    Path(id): Path<String>,
) -> Result<Html<String>> {
    let template = ProductTemplate {
        nonce: ctx.nonce().value().to_owned(),
        product: load(&state, &id).await?,
    };
    Ok(Html(template.render()?))
}

/// GET /product/{id}/json
pub async fn product_json(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response> {
    let product = load(&state, &id).await?;
    Ok(([(header::CACHE_CONTROL, "no-store")], Json(product)).into_response())
}
