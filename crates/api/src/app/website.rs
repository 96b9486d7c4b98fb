//! Public website: landing page and contact form.
//!
//! Submissions are stored as [`ContactMessage`] records; the browser is
//! always redirected, to `/thank-you` or to `/contact-error`.

use std::sync::Arc;

use axum::{
    extract::{Extension, Form, Path},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use watergile_core::DomainError;
use watergile_infra::read_model::RecordStore;

use crate::app::errors;

watergile_core::domain_id!(
    /// Contact message identifier.
    ContactMessageId
);

pub const DEFAULT_SUBJECT: &str = "Contact depuis le site web";

pub type ContactMessages = Arc<dyn RecordStore<ContactMessageId, ContactMessage>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactState {
    #[default]
    New,
    InProgress,
    Done,
}

/// Form fields as posted; missing fields are reported by validation rather
/// than rejected by the extractor.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContactForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactMessage {
    pub id: ContactMessageId,
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
    pub received_at: DateTime<Utc>,
    pub state: ContactState,
}

impl ContactMessage {
    pub fn new(
        id: ContactMessageId,
        form: ContactForm,
        received_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let name = form.name.trim().to_string();
        if name.is_empty() {
            return Err(DomainError::validation("name is required"));
        }
        let email = form.email.trim().to_string();
        if !is_valid_email(&email) {
            return Err(DomainError::validation(format!("'{email}' is not a valid email address")));
        }
        let message = form.message.trim().to_string();
        if message.is_empty() {
            return Err(DomainError::validation("message is required"));
        }
        let subject = form
            .subject
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SUBJECT.to_string());

        Ok(Self {
            id,
            name,
            email,
            subject,
            message,
            received_at,
            state: ContactState::New,
        })
    }

    /// States only move forward: new, in progress, done.
    pub fn set_state(&mut self, state: ContactState) -> Result<(), DomainError> {
        let rank = |s: ContactState| match s {
            ContactState::New => 0,
            ContactState::InProgress => 1,
            ContactState::Done => 2,
        };
        if rank(state) < rank(self.state) {
            return Err(DomainError::invariant(format!(
                "contact message cannot go back from {:?} to {:?}",
                self.state, state
            )));
        }
        self.state = state;
        Ok(())
    }
}

/// One `@`, a non-empty local part, a dotted domain, no whitespace.
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}

pub fn router() -> Router {
    Router::new()
        .route("/", get(home))
        .route("/contact", get(contact_page))
        .route("/submit/contact", post(submit_contact))
        .route("/thank-you", get(thank_you))
        .route("/contact-error", get(contact_error))
}

/// Back-office listing and triage of received messages.
pub fn messages_router() -> Router {
    Router::new()
        .route("/", get(list_messages))
        .route("/:id/state", post(set_message_state))
}

fn page(title: &str, body: &str) -> Html<String> {
    Html(format!(
        "<!DOCTYPE html>\n<html lang=\"fr\">\n<head><meta charset=\"utf-8\"><title>{title}</title></head>\n<body>\n{body}\n</body>\n</html>\n"
    ))
}

pub async fn home() -> Html<String> {
    page(
        "Watergile",
        "<h1>Watergile</h1>\n<p>Livraison de fontaines et de bonbonnes d'eau.</p>\n<p><a href=\"/contact\">Nous contacter</a></p>",
    )
}

pub async fn contact_page() -> Html<String> {
    page(
        "Contact",
        "<h1>Contact</h1>\n\
         <form method=\"post\" action=\"/submit/contact\">\n\
         <label>Nom <input name=\"name\" required></label>\n\
         <label>Email <input name=\"email\" type=\"email\" required></label>\n\
         <label>Sujet <input name=\"subject\"></label>\n\
         <label>Message <textarea name=\"message\" required></textarea></label>\n\
         <button type=\"submit\">Envoyer</button>\n\
         </form>",
    )
}

pub async fn submit_contact(
    Extension(messages): Extension<ContactMessages>,
    Form(form): Form<ContactForm>,
) -> Redirect {
    let message = match ContactMessage::new(ContactMessageId::generate(), form, Utc::now()) {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "contact form rejected");
            return Redirect::to("/contact-error");
        }
    };
    let id = message.id;
    match messages.upsert(id, message) {
        Ok(()) => {
            info!(message_id = %id, "contact message received");
            Redirect::to("/thank-you")
        }
        Err(e) => {
            warn!(error = %e, "failed to store contact message");
            Redirect::to("/contact-error")
        }
    }
}

pub async fn thank_you() -> Html<String> {
    page(
        "Merci",
        "<h1>Merci !</h1>\n<p>Votre message a bien été envoyé. Nous vous répondrons rapidement.</p>",
    )
}

pub async fn contact_error() -> Html<String> {
    page(
        "Erreur",
        "<h1>Erreur</h1>\n<p>Votre message n'a pas pu être envoyé. Vérifiez les champs et réessayez.</p>\n<p><a href=\"/contact\">Retour au formulaire</a></p>",
    )
}

#[derive(Debug, Deserialize)]
pub struct ContactStateRequest {
    pub state: ContactState,
}

pub async fn list_messages(Extension(messages): Extension<ContactMessages>) -> axum::response::Response {
    match messages.list() {
        Ok(mut items) => {
            items.sort_by(|a, b| b.received_at.cmp(&a.received_at));
            (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
        }
        Err(e) => errors::service_error_to_response(e.into()),
    }
}

pub async fn set_message_state(
    Extension(messages): Extension<ContactMessages>,
    Path(id): Path<String>,
    Json(body): Json<ContactStateRequest>,
) -> axum::response::Response {
    let id: ContactMessageId = match errors::parse_id(&id, "contact message") {
        Ok(v) => v,
        Err(r) => return r,
    };
    let mut message = match messages.get(&id) {
        Ok(Some(m)) => m,
        Ok(None) => return errors::json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        Err(e) => return errors::service_error_to_response(e.into()),
    };
    if let Err(e) = message.set_state(body.state) {
        return errors::service_error_to_response(e.into());
    }
    match messages.upsert(id, message.clone()) {
        Ok(()) => (StatusCode::OK, Json(message)).into_response(),
        Err(e) => errors::service_error_to_response(e.into()),
    }
}
