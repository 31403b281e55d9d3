//! Health check endpoints.

use crate::db;
use crate::error::{AppError, Result};
use crate::middleware::RequestSecurityContext;

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
pub async fn health() -> &'static str {
    "ok"
}

/// Readiness health check endpoint.
///
/// Verifies database connectivity through the request's database handle.
/// Fails with `unavailable` (503) if the database is not reachable.
pub async fn readiness(ctx: RequestSecurityContext) -> Result<&'static str> {
    db::ping(ctx.db())
        .await
        .map_err(|e| AppError::unavailable("Database unavailable").with_cause(e))?;
    Ok("ready")
}
