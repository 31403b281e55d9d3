//! Unified error handling with Sentry integration.
//!
//! Every stage and handler reports failures as an [`AppError`]. Turning an
//! `AppError` into a response only records it in the response extensions;
//! the [`error_responder`] stage near the top of the pipeline is the single
//! place that logs it, captures it to Sentry and writes the
//! `application/problem+json` body.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::Request,
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use shopfront_core::{ErrorCode, ProblemDetail};
use thiserror::Error;

use crate::middleware::RequestId;

/// Field errors beyond this count collapse into a single `form` entry.
pub const MAX_FIELD_ERRORS: usize = 10;

type Cause = Box<dyn std::error::Error + Send + Sync>;

/// Application-level error.
///
/// `message` is client-safe. `cause` is logged but never serialized.
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct AppError {
    code: ErrorCode,
    message: String,
    #[source]
    cause: Option<Cause>,
    fields: BTreeMap<String, String>,
}

impl AppError {
    /// Error with an explicit code and client-safe message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PayloadTooLarge, message)
    }

    pub fn timeout() -> Self {
        Self::new(ErrorCode::Timeout, "Request timed out")
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unavailable, message)
    }

    /// Opaque server failure. The client only ever sees a generic message.
    pub fn internal(cause: impl Into<Cause>) -> Self {
        Self::new(ErrorCode::Internal, "Internal server error").with_cause(cause)
    }

    /// Validation failure with per-field messages.
    pub fn validation(fields: BTreeMap<String, String>) -> Self {
        Self::bad_request("Validation failed").with_fields(fields)
    }

    /// Attach the underlying cause.
    #[must_use]
    pub fn with_cause(mut self, cause: impl Into<Cause>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Attach per-field messages, capped at [`MAX_FIELD_ERRORS`].
    #[must_use]
    pub fn with_fields(mut self, fields: BTreeMap<String, String>) -> Self {
        self.fields = if fields.len() > MAX_FIELD_ERRORS {
            BTreeMap::from([("form".to_string(), "Too many validation errors".to_string())])
        } else {
            fields
        };
        self
    }

    /// Classification inferred from a bare error status produced outside
    /// the application (routing, body limits, extractor rejections).
    #[must_use]
    pub fn from_status(status: StatusCode) -> Self {
        let code = match status.as_u16() {
            401 => ErrorCode::Unauthorized,
            403 => ErrorCode::Forbidden,
            404 => ErrorCode::NotFound,
            405 => ErrorCode::MethodNotAllowed,
            413 => ErrorCode::PayloadTooLarge,
            408 | 504 => ErrorCode::Timeout,
            503 => ErrorCode::Unavailable,
            s if s >= 500 => ErrorCode::Internal,
            _ => ErrorCode::BadRequest,
        };
        let message = status.canonical_reason().unwrap_or(code.title());
        Self::new(code, message)
    }

    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        self.code
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub const fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.code.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Client-safe wire representation.
    #[must_use]
    pub fn to_problem(&self, instance: &str) -> ProblemDetail {
        ProblemDetail::new(self.code, self.message.clone(), instance).with_fields(self.fields.clone())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::internal(err)
    }
}

impl From<askama::Error> for AppError {
    fn from(err: askama::Error) -> Self {
        Self::internal(err)
    }
}

impl From<tower_sessions::session::Error> for AppError {
    fn from(err: tower_sessions::session::Error) -> Self {
        Self::internal(err)
    }
}

/// An error awaiting the [`error_responder`], carried in response extensions.
#[derive(Debug, Clone)]
pub struct PendingError(pub Arc<AppError>);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut response = self.status().into_response();
        response.extensions_mut().insert(PendingError(Arc::new(self)));
        response
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Pipeline stage that turns failures into problem details.
///
/// Consumes the [`PendingError`] left by an inner stage, or classifies a
/// bare error status produced by the framework, logs it once with the
/// correlation id and writes the body. Headers set by inner stages
/// (security headers, session cookie) are preserved.
pub async fn error_responder(request: Request, next: Next) -> Response {
    let path = request.uri().path().to_owned();
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .cloned()
        .unwrap_or_else(RequestId::generate);

    let mut response = next.run(request).await;

    let error = match response.extensions_mut().remove::<PendingError>() {
        Some(PendingError(error)) => error,
        None if is_bare_error(&response) => Arc::new(AppError::from_status(response.status())),
        None => return response,
    };

    report(&error, &request_id, &path);
    write_problem(response, &error, &path)
}

/// Error status without a problem body: framework rejections.
fn is_bare_error(response: &Response) -> bool {
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) {
        return false;
    }
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .is_none_or(|ct| ct.as_bytes() != ProblemDetail::CONTENT_TYPE.as_bytes())
}

/// Log the full record and capture server errors to Sentry.
fn report(error: &AppError, request_id: &RequestId, path: &str) {
    let cause = error.cause.as_ref().map(ToString::to_string);
    let fields = (!error.fields.is_empty()).then(|| format!("{:?}", error.fields));

    if error.code.is_server_error() {
        let event_id = sentry::capture_error(error);
        tracing::error!(
            request_id = %request_id,
            path = %path,
            code = %error.code,
            status = error.code.status(),
            detail = %error.message,
            fields = fields.as_deref(),
            error = cause.as_deref(),
            sentry_event_id = %event_id,
            "Request failed"
        );
    } else {
        tracing::warn!(
            request_id = %request_id,
            path = %path,
            code = %error.code,
            status = error.code.status(),
            detail = %error.message,
            fields = fields.as_deref(),
            error = cause.as_deref(),
            "Request rejected"
        );
    }
}

fn write_problem(response: Response, error: &AppError, path: &str) -> Response {
    let (mut parts, _) = response.into_parts();
    let problem = error.to_problem(path);

    let body = match serde_json::to_vec(&problem) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize problem detail");
            br#"{"type":"/errors/internal","title":"Internal Server Error","status":500,"detail":"Internal server error","instance":"","code":"internal"}"#
                .to_vec()
        }
    };

    parts.status = error.status();
    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(ProblemDetail::CONTENT_TYPE),
    );
    Response::from_parts(parts, Body::from(body))
}

/// Last-resort handler for `CatchPanicLayer`.
///
/// The panic surfaces as an `internal` error through the responder.
pub fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = payload
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| payload.downcast_ref::<&str>().map(|s| (*s).to_string()))
        .unwrap_or_else(|| "unknown panic".to_string());

    AppError::internal(format!("handler panicked: {detail}")).into_response()
}
