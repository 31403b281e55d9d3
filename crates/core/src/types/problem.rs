//! RFC 7807 problem details and the error code taxonomy.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Symbolic error classification carried on the wire as `code`.
///
/// Every code maps to exactly one HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed client input or peer address.
    BadRequest,
    /// Missing or invalid credentials on a protected route.
    Unauthorized,
    /// CSRF failure or untrusted proxy.
    Forbidden,
    /// No such route or resource.
    NotFound,
    /// Route exists but not for this method.
    MethodNotAllowed,
    /// Request body exceeded the configured limit.
    PayloadTooLarge,
    /// Request deadline elapsed before a response was produced.
    Timeout,
    /// A dependency (database) is not reachable.
    Unavailable,
    /// Any unclassified failure.
    Internal,
}

impl ErrorCode {
    /// Wire representation of the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::MethodNotAllowed => "method_not_allowed",
            Self::PayloadTooLarge => "payload_too_large",
            Self::Timeout => "timeout",
            Self::Unavailable => "unavailable",
            Self::Internal => "internal",
        }
    }

    /// HTTP status code for this classification.
    #[must_use]
    pub const fn status(self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::MethodNotAllowed => 405,
            Self::PayloadTooLarge => 413,
            Self::Timeout | Self::Unavailable => 503,
            Self::Internal => 500,
        }
    }

    /// Canonical reason phrase, used as the problem `title`.
    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::BadRequest => "Bad Request",
            Self::Unauthorized => "Unauthorized",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "Not Found",
            Self::MethodNotAllowed => "Method Not Allowed",
            Self::PayloadTooLarge => "Payload Too Large",
            Self::Timeout | Self::Unavailable => "Service Unavailable",
            Self::Internal => "Internal Server Error",
        }
    }

    /// Whether this code represents a server-side failure.
    #[must_use]
    pub const fn is_server_error(self) -> bool {
        self.status() >= 500
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client-safe error body (`application/problem+json`).
///
/// Derived from an application error; never carries the internal cause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemDetail {
    /// Relative URI identifying the problem type (`/errors/<code>`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Canonical status reason phrase.
    pub title: String,
    /// HTTP status code.
    pub status: u16,
    /// Client-safe message.
    pub detail: String,
    /// Path of the request that failed.
    pub instance: String,
    /// Symbolic error code.
    pub code: ErrorCode,
    /// Per-field validation messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, String>>,
}

impl ProblemDetail {
    /// Media type for serialized problem details.
    pub const CONTENT_TYPE: &'static str = "application/problem+json";

    /// Build a problem description for `code` at `instance`.
    #[must_use]
    pub fn new(code: ErrorCode, detail: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            kind: format!("/errors/{}", code.as_str()),
            title: code.title().to_owned(),
            status: code.status(),
            detail: detail.into(),
            instance: instance.into(),
            code,
            fields: None,
        }
    }

    /// Attach field errors. An empty map is omitted from the wire.
    #[must_use]
    pub fn with_fields(mut self, fields: BTreeMap<String, String>) -> Self {
        self.fields = (!fields.is_empty()).then_some(fields);
        self
    }
}
