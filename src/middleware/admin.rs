use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    Json,
};
use serde_json::Value;

use crate::{error::PortalError, models::auth::AuthenticatedUser, models::user::UserRole, AppState};

/// A signed-in user whose *stored* role is admin and whose access is
/// active. The role claim in the token is not trusted, so a demoted or
/// suspended admin loses access immediately.
pub struct AdminUser(pub AuthenticatedUser);

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = (StatusCode, Json<Value>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthenticatedUser::from_request_parts(parts, state).await?;

        let status = state.profiles.access_status(&user.email).await?;
        let role = state.profiles.role_of(&user.email).await?;
        if status.has_access && role == Some(UserRole::Admin) {
            return Ok(AdminUser(user));
        }
        tracing::warn!("{} tried an admin-only route", user.email);
        Err(PortalError::Forbidden("Acesso restrito a administradores.".into()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[tokio::test]
    async fn stored_admin_is_let_through() {
        let state = testing::state();
        testing::seed_user(&state, "boss@icone.com", UserRole::Admin).await;
        let mut parts = testing::bearer_parts(&state, "boss@icone.com", UserRole::Admin);

        let AdminUser(admin) = AdminUser::from_request_parts(&mut parts, &state).await.unwrap();
        assert_eq!(admin.email, "boss@icone.com");
    }

    #[tokio::test]
    async fn admin_claim_without_stored_role_is_forbidden() {
        let state = testing::state();
        testing::seed_user(&state, "ana@icone.com", UserRole::User).await;
        let mut parts = testing::bearer_parts(&state, "ana@icone.com", UserRole::Admin);

        let Err((status, body)) = AdminUser::from_request_parts(&mut parts, &state).await else {
            panic!("non-admin passed the admin check");
        };
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Acesso restrito a administradores.");
    }

    #[tokio::test]
    async fn suspended_admin_is_forbidden() {
        let state = testing::state();
        testing::seed_user(&state, "old@icone.com", UserRole::Admin).await;
        state.profiles.update_access("old@icone.com", false).await.unwrap();
        let mut parts = testing::bearer_parts(&state, "old@icone.com", UserRole::Admin);

        let Err((status, _)) = AdminUser::from_request_parts(&mut parts, &state).await else {
            panic!("suspended admin passed the admin check");
        };
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn missing_header_is_unauthorized() {
        let state = testing::state();
        let (mut parts, _) = axum::http::Request::new(()).into_parts();

        let Err((status, _)) = AdminUser::from_request_parts(&mut parts, &state).await else {
            panic!("anonymous request passed the admin check");
        };
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
