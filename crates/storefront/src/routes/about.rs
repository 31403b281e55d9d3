//! About page route handler.

use askama::Template;
use axum::response::Html;

use crate::error::Result;
use crate::middleware::RequestSecurityContext;

#[derive(Template)]
#[template(path = "about.html")]
pub struct AboutTemplate {
    pub nonce: String,
}

pub async fn about(ctx: RequestSecurityContext) -> Result<Html<String>> {
    let template = AboutTemplate {
        nonce: ctx.nonce().value().to_owned(),
    };
    Ok(Html(template.render()?))
}
