use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};

use crate::{
    error::PortalError,
    middleware::admin::AdminUser,
    models::{
        auth::AuthenticatedUser,
        user::{normalize_email, UpdateAccessRequest, UpdateRoleRequest},
    },
    AppState,
};

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

/// Admins may not lock themselves out.
fn forbid_self(admin: &AuthenticatedUser, email: &str) -> Result<(), (StatusCode, Json<Value>)> {
    if normalize_email(email) == normalize_email(&admin.email) {
        return Err(PortalError::Forbidden(
            "Você não pode alterar o seu próprio acesso.".into(),
        )
        .into());
    }
    Ok(())
}

/// All users with role, access flag and photo (admin only).
pub async fn list_users(State(state): State<AppState>, AdminUser(_): AdminUser) -> ApiResult {
    let users = state.profiles.list_users().await?;
    Ok(Json(json!(users)))
}

pub async fn update_access(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(email): Path<String>,
    Json(body): Json<UpdateAccessRequest>,
) -> ApiResult {
    forbid_self(&admin, &email)?;
    let status = state.auth.set_access(&email, body.is_active).await?;
    tracing::info!(
        "{} set isActive={} for {}",
        admin.email,
        body.is_active,
        normalize_email(&email)
    );
    Ok(Json(json!({
        "email": normalize_email(&email),
        "isActive": body.is_active,
        "access": status,
    })))
}

pub async fn update_role(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(email): Path<String>,
    Json(body): Json<UpdateRoleRequest>,
) -> ApiResult {
    forbid_self(&admin, &email)?;
    let status = state.auth.set_role(&email, body.role).await?;
    tracing::info!("{} set role={} for {}", admin.email, body.role, normalize_email(&email));
    Ok(Json(json!({
        "email": normalize_email(&email),
        "role": body.role,
        "access": status,
    })))
}

/// Access status of the caller, with the message to show when denied.
pub async fn my_access(State(state): State<AppState>, user: AuthenticatedUser) -> ApiResult {
    let status = state.profiles.access_status(&user.email).await?;
    Ok(Json(json!({
        "hasAccess": status.has_access,
        "reason": status.reason,
        "message": status.message(),
    })))
}
