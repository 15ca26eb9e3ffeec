//! HTTP intake for the inbound-parse and event webhooks.

use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use super::InboundService;
use crate::error::{Error, ParseError};
use crate::message::InboundForm;

#[derive(Clone)]
pub struct AppState {
    service: Arc<InboundService>,
    token: Arc<SecretString>,
}

impl AppState {
    pub fn new(service: Arc<InboundService>, token: SecretString) -> Self {
        Self {
            service,
            token: Arc::new(token),
        }
    }

    fn token_matches(&self, given: Option<&str>) -> bool {
        let expected = self.token.expose_secret().as_bytes();
        let given = given.unwrap_or_default().as_bytes();
        bool::from(given.ct_eq(expected))
    }
}

#[derive(Deserialize)]
pub struct TokenQuery {
    token: Option<String>,
}

/// `/event` is only mounted when events are handled.
pub fn router(state: AppState, handle_events: bool, max_body_bytes: usize) -> Router {
    let mut app = Router::new()
        .route("/health", get(health))
        .route("/inbound", post(inbound));
    if handle_events {
        app = app.route("/event", post(event));
    }
    app.with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn inbound(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    multipart: Multipart,
) -> StatusCode {
    if !state.token_matches(query.token.as_deref()) {
        warn!("Inbound request with wrong token");
        return StatusCode::BAD_REQUEST;
    }
    let form = match read_form(multipart).await {
        Ok(form) => form,
        Err(e) => {
            state
                .service
                .reporter()
                .report("reading inbound form", &Error::from(e))
                .await;
            return StatusCode::BAD_REQUEST;
        }
    };
    match state.service.receive_email(&form).await {
        Ok(receipt) => {
            debug!(item = %receipt.item, outcome = ?receipt.outcome, "Inbound mail done");
            StatusCode::OK
        }
        Err(e) => {
            state.service.reporter().report("dumping inbound mail", &e).await;
            StatusCode::BAD_REQUEST
        }
    }
}

async fn event(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    body: Bytes,
) -> StatusCode {
    if !state.token_matches(query.token.as_deref()) {
        warn!("Event request with wrong token");
        return StatusCode::BAD_REQUEST;
    }
    match state.service.receive_event(&body).await {
        Ok(receipt) => {
            debug!(item = %receipt.item, outcome = ?receipt.outcome, "Event batch done");
            StatusCode::OK
        }
        Err(e) => {
            state.service.reporter().report("dumping event", &e).await;
            StatusCode::BAD_REQUEST
        }
    }
}

/// Collect the text fields of the webhook's multipart form. File parts
/// are ignored; the raw MIME message in `email` carries the attachments.
async fn read_form(mut multipart: Multipart) -> Result<InboundForm, ParseError> {
    let invalid = |e: axum::extract::multipart::MultipartError| ParseError::InvalidField {
        field: "form",
        reason: e.to_string(),
    };
    let mut form = InboundForm::new();
    while let Some(field) = multipart.next_field().await.map_err(invalid)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if field.file_name().is_some() {
            debug!(name, "Skipping file part");
            continue;
        }
        let value = field.text().await.map_err(invalid)?;
        form.insert(name, value);
    }
    Ok(form)
}
