//! Contact form route handlers.
//!
//! The CSRF stage has already validated the token by the time `submit`
//! runs; this module only checks presence and length of the fields.

use std::collections::BTreeMap;

use askama::Template;
use axum::{
    Form,
    extract::Query,
    response::{Html, IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use tracing::instrument;

use crate::error::{AppError, Result};
use crate::middleware::{CsrfToken, RequestSecurityContext};

const MAX_NAME: usize = 100;
const MAX_EMAIL: usize = 254;
const MAX_MESSAGE: usize = 2000;

/// Contact form template.
#[derive(Template)]
#[template(path = "form.html")]
pub struct FormTemplate {
    pub nonce: String,
    pub csrf_token: String,
    pub submitted: bool,
}

#[derive(Debug, Deserialize)]
pub struct FormQuery {
    #[serde(default)]
    pub ok: Option<String>,
}

/// Contact form submission.
#[derive(Debug, Deserialize)]
pub struct ContactForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub message: String,
}

impl ContactForm {
    /// Presence and length checks, one message per failing field.
    fn validate(&self) -> BTreeMap<String, String> {
        let mut errors = BTreeMap::new();

        let name = self.name.trim();
        if name.is_empty() {
            errors.insert("name".to_string(), "Name is required".to_string());
        } else if name.chars().count() > MAX_NAME {
            errors.insert(
                "name".to_string(),
                format!("Name must be at most {MAX_NAME} characters"),
            );
        }

        let email = self.email.trim();
        if email.is_empty() {
            errors.insert("email".to_string(), "Email is required".to_string());
        } else if email.len() > MAX_EMAIL || !is_valid_email(email) {
            errors.insert(
                "email".to_string(),
                "Please enter a valid email address".to_string(),
            );
        }

        let message = self.message.trim();
        if message.is_empty() {
            errors.insert("message".to_string(), "Message is required".to_string());
        } else if message.chars().count() > MAX_MESSAGE {
            errors.insert(
                "message".to_string(),
                format!("Message must be at most {MAX_MESSAGE} characters"),
            );
        }

        errors
    }
}

/// Display the contact form.
pub async fn show(
    ctx: RequestSecurityContext,
    csrf: CsrfToken,
    Query(query): Query<FormQuery>,
) -> Result<Html<String>> {
    let template = FormTemplate {
        nonce: ctx.nonce().value().to_owned(),
        csrf_token: csrf.value().to_owned(),
        submitted: query.ok.is_some(),
    };
    Ok(Html(template.render()?))
}

/// Handle a contact form submission.
///
/// POST /form
#[instrument(skip_all)]
pub async fn submit(Form(form): Form<ContactForm>) -> Result<Response> {
    let errors = form.validate();
    if !errors.is_empty() {
        return Err(AppError::validation(errors));
    }

    tracing::info!(
        message_len = form.message.trim().len(),
        "Contact form submitted"
    );
    Ok(Redirect::to("/form?ok=1").into_response())
}

/// Basic email validation.
fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty() && !domain.is_empty() && domain.contains('.') && !domain.contains('@')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(name: &str, email: &str, message: &str) -> ContactForm {
        ContactForm {
            name: name.to_string(),
            email: email.to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_valid_form() {
        assert!(form("Ada", "ada@example.com", "Hello").validate().is_empty());
    }

    #[test]
    fn test_missing_fields() {
        let errors = form("  ", "", "").validate();
        assert_eq!(errors.len(), 3);
        assert_eq!(errors["name"], "Name is required");
    }

    #[test]
    fn test_bad_email() {
        let errors = form("Ada", "ada.example.com", "Hi").validate();
        assert!(errors.contains_key("email"));
        assert!(!is_valid_email("a@b@c.com"));
        assert!(!is_valid_email("@example.com"));
        assert!(is_valid_email("a@b.co"));
    }

    #[test]
    fn test_long_message() {
        let errors = form("Ada", "ada@example.com", &"x".repeat(MAX_MESSAGE + 1)).validate();
        assert!(errors.contains_key("message"));
    }
}
