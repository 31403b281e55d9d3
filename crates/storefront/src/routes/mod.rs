//! HTTP route handlers for the shop front.
//!
//! # Route Structure
//!
//! ```text
//! GET  /                    - Home page
//! GET  /about               - About page
//! GET  /catalog             - Product listing
//! GET  /catalog/json        - Product listing as JSON
//! GET  /product/{id}        - Product page
//! GET  /product/{id}/json   - Product as JSON (not cached)
//! GET  /form                - Contact form
//! POST /form                - Contact form submission (CSRF-protected)
//! GET  /sign-in             - Token sign-in form (when bearer tokens are enabled)
//! POST /sign-in             - Store verified token claims in the session
//! POST /sign-out            - Forget the session principal
//! GET  /account             - Account page (requires principal)
//! GET  /health              - Liveness
//! GET  /health/ready        - Readiness (database round-trip)
//! ```
//!
//! Everything else is a `not_found` problem.

pub mod about;
pub mod account;
pub mod catalog;
pub mod contact;
pub mod health;
pub mod home;

use axum::{
    Router,
    http::Uri,
    middleware,
    routing::{get, post},
};

use crate::error::AppError;
use crate::middleware::require_principal;
use crate::state::AppState;

/// Build the application routes (without pipeline stages).
pub fn routes(state: &AppState) -> Router<AppState> {
    let account = Router::new()
        .route("/account", get(account::show))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_principal,
        ));

    Router::new()
        .route("/", get(home::home))
        .route("/about", get(about::about))
        .route("/catalog", get(catalog::catalog))
        .route("/catalog/json", get(catalog::catalog_json))
        .route("/product/{id}", get(catalog::product))
        .route("/product/{id}/json", get(catalog::product_json))
        .route("/form", get(contact::show).post(contact::submit))
        .route(
            "/sign-in",
            get(account::sign_in_form).post(account::sign_in),
        )
        .route("/sign-out", post(account::sign_out))
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        .merge(account)
        .fallback(not_found)
}

async fn not_found(uri: Uri) -> AppError {
    AppError::not_found(format!("No page at {}", uri.path()))
}
