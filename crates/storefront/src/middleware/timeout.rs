//! Per-request deadline.
//!
//! The handler races a timer. If the timer wins before the response head
//! exists, the handler future is dropped, the request token is cancelled and
//! a `timeout` error is returned. Once the head exists the guard never
//! writes again: a streaming body keeps flowing and only the cancellation
//! token fires at the deadline, so the producer can stop on its own.
//!
//! The deadline token is a child of the request token, so client disconnect
//! cancels it too.

use std::pin::Pin;
use std::time::Duration;

use axum::{
    body::{Body, Bytes, HttpBody as _},
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures::{Stream, StreamExt};
use tokio::time::{Instant, Sleep, sleep_until};
use tokio_util::sync::CancellationToken;

use super::context::RequestSecurityContext;
use crate::error::AppError;
use crate::state::AppState;

/// Middleware applying the configured request deadline.
pub async fn timeout_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    run_with_deadline(state.config().timeouts.request, request, next).await
}

/// Run the rest of the pipeline under `deadline`. Zero disables the guard.
pub async fn run_with_deadline(deadline: Duration, mut request: Request, next: Next) -> Response {
    if deadline.is_zero() {
        return next.run(request).await;
    }

    let expires_at = Instant::now() + deadline;
    let context = request.extensions().get::<RequestSecurityContext>().cloned();
    let token = context
        .as_ref()
        .map_or_else(CancellationToken::new, |ctx| ctx.cancellation().child_token());
    if let Some(ctx) = context {
        request
            .extensions_mut()
            .insert(ctx.with_cancellation(token.clone()));
    }

    let response = tokio::select! {
        response = next.run(request) => response,
        () = sleep_until(expires_at) => {
            token.cancel();
            tracing::warn!(
                timeout_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
                "Request deadline exceeded before response"
            );
            return AppError::timeout().into_response();
        }
    };

    // Fully buffered: nothing left to guard
    if response.body().size_hint().exact().is_some() {
        return response;
    }

    let (parts, body) = response.into_parts();
    Response::from_parts(parts, Body::from_stream(watch_body(body, expires_at, token)))
}

struct Watched {
    stream: axum::body::BodyDataStream,
    expiry: Pin<Box<Sleep>>,
    token: CancellationToken,
    expired: bool,
}

/// Pass body frames through unchanged; cancel `token` at the deadline.
fn watch_body(
    body: Body,
    expires_at: Instant,
    token: CancellationToken,
) -> impl Stream<Item = Result<Bytes, axum::Error>> + Send + 'static {
    let watched = Watched {
        stream: body.into_data_stream(),
        expiry: Box::pin(sleep_until(expires_at)),
        token,
        expired: false,
    };

    futures::stream::unfold(watched, |mut w| async move {
        if !w.expired {
            tokio::select! {
                biased;
                item = w.stream.next() => return item.map(|item| (item, w)),
                () = &mut w.expiry => {
                    w.expired = true;
                    w.token.cancel();
                    tracing::warn!("Request deadline exceeded mid-response; cancelling producer");
                }
            }
        }
        let item = w.stream.next().await;
        item.map(|item| (item, w))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::{PendingError, error_responder};
    use crate::middleware::csp::{CspNonce, OsEntropy};
    use axum::{
        Router,
        http::{StatusCode, header},
        middleware,
        routing::get,
    };
    use shopfront_core::ErrorCode;
    use tower::ServiceExt;

    const DEADLINE: Duration = Duration::from_millis(50);

    async fn guard(request: Request, next: Next) -> Response {
        run_with_deadline(DEADLINE, request, next).await
    }

    async fn no_guard(request: Request, next: Next) -> Response {
        run_with_deadline(Duration::ZERO, request, next).await
    }

    async fn with_context(mut request: Request, next: Next) -> Response {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/shopfront_test")
            .unwrap();
        let ctx = RequestSecurityContext::new(
            CspNonce::generate(&OsEntropy).unwrap(),
            pool,
            CancellationToken::new(),
        );
        request.extensions_mut().insert(ctx);
        next.run(request).await
    }

    async fn slow() -> &'static str {
        tokio::time::sleep(Duration::from_millis(300)).await;
        "too late"
    }

    async fn fast() -> &'static str {
        "quick"
    }

    /// Writes one chunk, then waits for cancellation and reports it.
    async fn streaming(ctx: RequestSecurityContext) -> Body {
        let token = ctx.cancellation().clone();
        let chunks = futures::stream::iter([Ok::<_, std::io::Error>(Bytes::from_static(b"first;"))])
            .chain(futures::stream::once(async move {
                let cancelled = tokio::time::timeout(Duration::from_secs(2), token.cancelled())
                    .await
                    .is_ok();
                Ok(Bytes::from(if cancelled { "cancelled" } else { "not-cancelled" }))
            }));
        Body::from_stream(chunks)
    }

    fn get_req(path: &str) -> Request {
        Request::get(path).body(Body::empty()).unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_slow_handler_times_out() {
        let app = Router::new()
            .route("/", get(slow))
            .layer(middleware::from_fn(guard));

        let response = app.oneshot(get_req("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let pending = response.extensions().get::<PendingError>().unwrap();
        assert_eq!(pending.0.code(), ErrorCode::Timeout);
    }

    #[tokio::test]
    async fn test_timeout_produces_single_problem_body() {
        let app = Router::new()
            .route("/", get(slow))
            .layer(middleware::from_fn(guard))
            .layer(middleware::from_fn(error_responder));

        let response = app.oneshot(get_req("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/problem+json"
        );

        let body = body_string(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["code"], "timeout");
        assert!(!body.contains("too late"));
    }

    #[tokio::test]
    async fn test_fast_handler_passes() {
        let app = Router::new()
            .route("/", get(fast))
            .layer(middleware::from_fn(guard));

        let response = app.oneshot(get_req("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "quick");
    }

    #[tokio::test]
    async fn test_zero_deadline_disables_guard() {
        let app = Router::new()
            .route("/", get(slow))
            .layer(middleware::from_fn(no_guard));

        let response = app.oneshot(get_req("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "too late");
    }

    #[tokio::test]
    async fn test_started_stream_is_not_rewritten() {
        let app = Router::new()
            .route("/", get(streaming))
            .layer(middleware::from_fn(guard))
            .layer(middleware::from_fn(with_context));

        let response = app.oneshot(get_req("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.extensions().get::<PendingError>().is_none());

        // Only the handler's own bytes, and the producer saw the cancellation
        assert_eq!(body_string(response).await, "first;cancelled");
    }
}
