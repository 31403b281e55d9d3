//! Request pipeline assembly.
//!
//! Stages are described by [`Stage`] values and validated by
//! [`PipelineBuilder::build`] before any layer is constructed: every
//! mandatory stage must be present exactly once and in canonical order.
//! [`build_app`] turns a validated [`Pipeline`] into the router.

use std::fmt;
use std::time::Duration;

use axum::{
    Router,
    http::{Request, Response},
    middleware::{from_fn, from_fn_with_state},
};
use thiserror::Error;
use tower_http::{
    catch_panic::CatchPanicLayer,
    timeout::RequestBodyTimeoutLayer,
    trace::{DefaultOnResponse, OnResponse, TraceLayer},
};
use tower_sessions::SessionStore;
use tracing::Span;

use crate::error::{error_responder, handle_panic};
use crate::keys::KeyError;
use crate::middleware::{
    SignedSessionLayer, context_middleware, create_session_layer, csrf_middleware,
    nonce_middleware, request_id_middleware, security_headers_middleware, timeout_middleware,
    trusted_proxy_middleware,
};
use crate::routes;
use crate::state::AppState;

/// One pipeline stage, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    RequestId,
    TrustedProxy,
    Nonce,
    Context,
    SecurityHeaders,
    Session,
    Csrf,
    Timeout,
}

impl Stage {
    /// Every stage, outermost first.
    pub const CANONICAL: [Self; 8] = [
        Self::RequestId,
        Self::TrustedProxy,
        Self::Nonce,
        Self::Context,
        Self::SecurityHeaders,
        Self::Session,
        Self::Csrf,
        Self::Timeout,
    ];

    const fn rank(self) -> usize {
        self as usize
    }

    /// Only the timeout guard may be left out.
    #[must_use]
    pub const fn is_mandatory(self) -> bool {
        !matches!(self, Self::Timeout)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RequestId => "request-id",
            Self::TrustedProxy => "trusted-proxy",
            Self::Nonce => "nonce",
            Self::Context => "context",
            Self::SecurityHeaders => "security-headers",
            Self::Session => "session",
            Self::Csrf => "csrf",
            Self::Timeout => "timeout",
        };
        f.write_str(name)
    }
}

/// Invalid stage list.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("pipeline is missing mandatory stage {0}")]
    Missing(Stage),
    #[error("stage {0} appears more than once")]
    Duplicate(Stage),
    #[error("stage {stage} must run before {before}")]
    OutOfOrder { stage: Stage, before: Stage },
}

/// Collects stage descriptors, outermost first.
#[derive(Debug, Clone, Default)]
pub struct PipelineBuilder {
    stages: Vec<Stage>,
}

impl PipelineBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All stages in canonical order.
    #[must_use]
    pub fn canonical() -> Self {
        Self {
            stages: Stage::CANONICAL.to_vec(),
        }
    }

    #[must_use]
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Validate the stage list.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError` if a mandatory stage is missing, a stage is
    /// repeated, or two stages are out of canonical order.
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        for (i, stage) in self.stages.iter().enumerate() {
            if self.stages.iter().take(i).any(|s| s == stage) {
                return Err(PipelineError::Duplicate(*stage));
            }
        }

        if let Some(missing) = Stage::CANONICAL
            .into_iter()
            .find(|s| s.is_mandatory() && !self.stages.contains(s))
        {
            return Err(PipelineError::Missing(missing));
        }

        for pair in self.stages.windows(2) {
            match *pair {
                [before, stage] if before.rank() > stage.rank() => {
                    return Err(PipelineError::OutOfOrder { stage, before });
                }
                _ => {}
            }
        }

        Ok(Pipeline {
            stages: self.stages,
        })
    }
}

/// A validated stage list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Wrap `router` in the stages, innermost first.
    ///
    /// The error responder, panic catcher and body read timeout sit just
    /// outside the trusted-proxy filter so every later failure reaches the
    /// responder.
    fn apply<S>(&self, mut router: Router, state: &AppState, session: SignedSessionLayer<S>) -> Router
    where
        S: SessionStore + Clone,
    {
        let mut session = Some(session);

        for stage in self.stages.iter().rev() {
            router = match stage {
                Stage::Timeout => {
                    router.layer(from_fn_with_state(state.clone(), timeout_middleware))
                }
                Stage::Csrf => router.layer(from_fn_with_state(state.clone(), csrf_middleware)),
                Stage::Session => match session.take() {
                    Some(layer) => router.layer(layer),
                    None => router,
                },
                Stage::SecurityHeaders => router.layer(from_fn_with_state(
                    state.clone(),
                    security_headers_middleware,
                )),
                Stage::Context => {
                    router.layer(from_fn_with_state(state.clone(), context_middleware))
                }
                Stage::Nonce => router.layer(from_fn_with_state(state.clone(), nonce_middleware)),
                Stage::TrustedProxy => {
                    let router = router.layer(from_fn_with_state(
                        state.clone(),
                        trusted_proxy_middleware,
                    ));
                    let router = with_read_timeout(router, state.config().timeouts.read);
                    router
                        .layer(CatchPanicLayer::custom(handle_panic))
                        .layer(from_fn(error_responder))
                }
                Stage::RequestId => router.layer(from_fn(request_id_middleware)),
            };
        }

        router
    }
}

fn with_read_timeout(router: Router, read: Duration) -> Router {
    if read.is_zero() {
        router
    } else {
        router.layer(RequestBodyTimeoutLayer::new(read))
    }
}

/// Build the complete application: routes, pipeline stages, tracing and
/// Sentry layers.
///
/// # Errors
///
/// Returns an error if the session cookie key cannot be derived.
pub fn build_app<S>(state: AppState, store: S, pipeline: &Pipeline) -> Result<Router, KeyError>
where
    S: SessionStore + Clone,
{
    let session = create_session_layer(store, state.config(), state.signing_key())?;
    let router = routes::routes(&state).with_state(state.clone());

    Ok(pipeline
        .apply(router, &state, session)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = tracing::field::Empty,
                        client_ip = tracing::field::Empty,
                        status = tracing::field::Empty,
                        latency_ms = tracing::field::Empty,
                    )
                })
                .on_response(
                    |response: &Response<_>, latency: Duration, span: &Span| {
                        span.record("status", response.status().as_u16());
                        span.record(
                            "latency_ms",
                            u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                        );
                        DefaultOnResponse::default().on_response(response, latency, span);
                    },
                )
                // 5xx is reported once, by the error responder
                .on_failure(()),
        )
        // Sentry layers (outermost for full request coverage)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction()))
}
