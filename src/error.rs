use axum::{http::StatusCode, Json};
use serde_json::{json, Value};
use thiserror::Error;

use crate::services::{apps_script::AppsScriptError, assistant::AssistantError, store::StoreError};

#[derive(Debug, Error)]
pub enum PortalError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    /// The auth script refused the request; its message is shown to the user.
    #[error("{0}")]
    Rejected(String),
    #[error("{0}")]
    Upstream(String),
    #[error("{0}")]
    Unavailable(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type PortalResult<T> = Result<T, PortalError>;

impl PortalError {
    pub fn status(&self) -> StatusCode {
        match self {
            PortalError::Validation(_) => StatusCode::BAD_REQUEST,
            PortalError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            PortalError::Forbidden(_) => StatusCode::FORBIDDEN,
            PortalError::NotFound(_) => StatusCode::NOT_FOUND,
            PortalError::Rejected(_) => StatusCode::BAD_REQUEST,
            PortalError::Upstream(_) => StatusCode::BAD_GATEWAY,
            PortalError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            PortalError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PortalError> for (StatusCode, Json<Value>) {
    fn from(e: PortalError) -> Self {
        if let PortalError::Other(ref inner) = e {
            tracing::error!("request failed: {inner:#}");
        }
        (e.status(), Json(json!({ "error": e.to_string() })))
    }
}

impl From<AppsScriptError> for PortalError {
    fn from(e: AppsScriptError) -> Self {
        match e {
            AppsScriptError::Backend(msg) => PortalError::Rejected(msg),
            other => {
                tracing::warn!("auth script call failed: {other}");
                PortalError::Upstream(other.to_string())
            }
        }
    }
}

impl From<StoreError> for PortalError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => PortalError::NotFound(format!("Não encontrado: {what}")),
            StoreError::Firebase(inner) => {
                tracing::warn!("firebase call failed: {inner}");
                PortalError::Upstream("Falha ao acessar o banco de dados do portal.".into())
            }
        }
    }
}

impl From<AssistantError> for PortalError {
    fn from(e: AssistantError) -> Self {
        match e {
            AssistantError::NotConfigured => PortalError::Unavailable(e.to_string()),
            AssistantError::EmptyPrompt(msg) => PortalError::Validation(msg.into()),
            other => {
                tracing::warn!("assistant call failed: {other}");
                PortalError::Upstream(other.to_string())
            }
        }
    }
}
