//! Account pages.
//!
//! `/account` requires a principal. Browsers establish one by posting an
//! access token from the identity service to `/sign-in`; the verified
//! claims are then kept in the session until `/sign-out`.

use askama::Template;
use axum::{
    Form,
    extract::State,
    response::{Html, Redirect},
};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::instrument;

use crate::error::{AppError, Result};
use crate::middleware::{
    CsrfToken, RequestSecurityContext, clear_principal, set_principal,
};
use crate::state::AppState;

#[derive(Template)]
#[template(path = "account.html")]
pub struct AccountTemplate {
    pub nonce: String,
    pub csrf_token: String,
    pub subject: String,
}

#[derive(Template)]
#[template(path = "sign_in.html")]
pub struct SignInTemplate {
    pub nonce: String,
    pub csrf_token: String,
}

#[derive(Debug, Deserialize)]
pub struct SignInForm {
    #[serde(default)]
    pub token: String,
}

/// Display the account page.
pub async fn show(ctx: RequestSecurityContext, csrf: CsrfToken) -> Result<Html<String>> {
    let claims = ctx
        .claims()
        .ok_or_else(|| AppError::internal("account route reached without principal"))?;

    let template = AccountTemplate {
        nonce: ctx.nonce().value().to_owned(),
        csrf_token: csrf.value().to_owned(),
        subject: claims.subject().unwrap_or("customer").to_owned(),
    };
    Ok(Html(template.render()?))
}

/// GET /sign-in
pub async fn sign_in_form(
    State(state): State<AppState>,
    ctx: RequestSecurityContext,
    csrf: CsrfToken,
) -> Result<Html<String>> {
    if state.bearer().is_none() {
        return Err(AppError::not_found("Token sign-in is not enabled"));
    }

    let template = SignInTemplate {
        nonce: ctx.nonce().value().to_owned(),
        csrf_token: csrf.value().to_owned(),
    };
    Ok(Html(template.render()?))
}

/// POST /sign-in
#[instrument(skip_all)]
pub async fn sign_in(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<SignInForm>,
) -> Result<Redirect> {
    let verifier = state
        .bearer()
        .ok_or_else(|| AppError::not_found("Token sign-in is not enabled"))?;
    let claims = verifier.verify(form.token.trim())?;

    set_principal(&session, &claims).await?;
    tracing::info!(subject = claims.subject(), "Principal signed in");
    Ok(Redirect::to("/account"))
}

/// POST /sign-out
pub async fn sign_out(session: Session) -> Result<Redirect> {
    clear_principal(&session).await?;
    Ok(Redirect::to("/"))
}
