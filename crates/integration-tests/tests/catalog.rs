//! Integration tests for the catalog, product and about pages.

use std::sync::Arc;

use axum::http::{StatusCode, header};
use shopfront::db::MemoryProductRepository;
use shopfront_integration_tests::{TestApp, body_string, config_with, csp_nonce, problem};

#[tokio::test]
async fn test_catalog_lists_products_with_nonce() {
    let response = TestApp::new().get("/catalog").await;

    assert_eq!(response.status(), StatusCode::OK);
    let nonce = csp_nonce(response.headers()).unwrap();
    // Nothing on the catalog needs a CSRF token
    assert!(response.headers().get(header::SET_COOKIE).is_none());

    let body = body_string(response).await;
    assert!(body.contains(&format!(r#"<script nonce="{nonce}">"#)));
    let argan = body.find("Argan Oil").unwrap();
    let clay = body.find("Clay Mask").unwrap();
    let rose = body.find("Rose Water").unwrap();
    assert!(argan < clay && clay < rose);
    assert!(body.contains(r#"href="/product/1""#));
    assert!(body.contains("29.90"));
}

#[tokio::test]
async fn test_empty_catalog() {
    let app = TestApp::with_products(
        config_with(&[]),
        Arc::new(MemoryProductRepository::new(Vec::new())),
    );
    let response = app.get("/catalog").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_string(response).await.contains("No products yet."));
}

#[tokio::test]
async fn test_catalog_json() {
    let response = TestApp::new().get("/catalog/json").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    assert!(csp_nonce(response.headers()).is_some());

    let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    let products = json.as_array().unwrap();
    assert_eq!(products.len(), 3);
    assert_eq!(products[0]["id"], 1);
    assert_eq!(products[0]["name"], "Argan Oil");
    assert_eq!(products[0]["price"], "29.90");
}

#[tokio::test]
async fn test_product_page() {
    let response = TestApp::new().get("/product/2").await;

    assert_eq!(response.status(), StatusCode::OK);
    let nonce = csp_nonce(response.headers()).unwrap();
    let body = body_string(response).await;
    assert!(body.contains("Clay Mask"));
    assert!(body.contains("CM-075"));
    assert!(body.contains(&format!(r#"<style nonce="{nonce}">"#)));
}

#[tokio::test]
async fn test_unknown_product_is_not_found() {
    let response = TestApp::new().get("/product/99").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = problem(response).await;
    assert_eq!(json["code"], "not_found");
    assert_eq!(json["detail"], "Product not found");
    assert_eq!(json["instance"], "/product/99");
}

#[tokio::test]
async fn test_malformed_product_id_is_bad_request() {
    let app = TestApp::new();
    for path in ["/product/abc", "/product/0", "/product/-4"] {
        let response = app.get(path).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{path}");
        assert_eq!(problem(response).await["detail"], "Invalid product id");
    }
}

#[tokio::test]
async fn test_product_json_is_not_cached() {
    let response = TestApp::new().get("/product/3/json").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");

    let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(json["name"], "Rose Water");
    assert_eq!(json["article"], "RW-100");
    assert_eq!(json["price"], "12.50");
    assert!(json["image_alt"].is_null());
}

#[tokio::test]
async fn test_about_page_carries_nonce() {
    let response = TestApp::new().get("/about").await;

    assert_eq!(response.status(), StatusCode::OK);
    let nonce = csp_nonce(response.headers()).unwrap();
    let body = body_string(response).await;
    assert!(body.contains("About us"));
    assert!(body.contains(&format!(r#"<script nonce="{nonce}">"#)));
}
