//! Home page route handler.

use askama::Template;
use axum::response::Html;

use crate::error::Result;
use crate::middleware::{CsrfToken, RequestSecurityContext};

/// Home page template.
#[derive(Template)]
#[template(path = "home.html")]
pub struct HomeTemplate {
    pub nonce: String,
    pub csrf_token: String,
}

/// Display the home page with the quick contact form.
pub async fn home(ctx: RequestSecurityContext, csrf: CsrfToken) -> Result<Html<String>> {
    let template = HomeTemplate {
        nonce: ctx.nonce().value().to_owned(),
        csrf_token: csrf.value().to_owned(),
    };
    Ok(Html(template.render()?))
}
