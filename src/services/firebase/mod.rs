//! REST clients for the hosted realtime database and document store.

pub mod firestore;
pub mod realtime;

use reqwest::{RequestBuilder, StatusCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FirebaseError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("API error (status {status}): {body}")]
    Api { status: StatusCode, body: String },
    #[error("document changed concurrently")]
    Conflict,
    #[error("malformed document: {0}")]
    Malformed(String),
}

/// Credentials appended to every request.
#[derive(Debug, Clone, Default)]
pub struct FirebaseAuth {
    /// Web API key, sent as `key=` to the document store.
    pub api_key: Option<String>,
    /// Database secret or ID token: `auth=` for the realtime database,
    /// bearer token for the document store.
    pub auth_token: Option<String>,
}

/// Turn a non-success reply into [`FirebaseError::Api`].
async fn check(response: reqwest::Response) -> Result<reqwest::Response, FirebaseError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::CONFLICT
        || (status == StatusCode::BAD_REQUEST && body.contains("FAILED_PRECONDITION"))
    {
        return Err(FirebaseError::Conflict);
    }
    Err(FirebaseError::Api { status, body })
}

fn with_bearer(builder: RequestBuilder, auth: &FirebaseAuth) -> RequestBuilder {
    match &auth.auth_token {
        Some(token) => builder.bearer_auth(token),
        None => builder,
    }
}
