use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};

use crate::{
    error::PortalError,
    middleware::rate_limit::{self, check_rate_limit},
    models::{
        auth::AuthenticatedUser,
        user::{
            ConfirmResetRequest, ForgotPasswordRequest, SignInRequest, SignUpRequest,
            UpdateProfileRequest,
        },
    },
    services::avatar,
    AppState,
};

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn require(fields: &[&str], msg: &str) -> Result<(), (StatusCode, Json<Value>)> {
    if fields.iter().any(|f| f.trim().is_empty()) {
        return Err(PortalError::Validation(msg.into()).into());
    }
    Ok(())
}

pub async fn sign_up(
    State(state): State<AppState>,
    Json(body): Json<SignUpRequest>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    require(
        &[&body.name, &body.email, &body.password, &body.birthday],
        "Nome, email, senha e data de nascimento são obrigatórios.",
    )?;
    check_rate_limit(state.limiter.as_ref(), rate_limit::SIGN_UP, &body.email).await?;

    let session = state
        .auth
        .sign_up(body.name.trim(), body.email.trim(), &body.password, &body.birthday)
        .await?;
    Ok((StatusCode::CREATED, Json(json!(session))))
}

pub async fn sign_in(
    State(state): State<AppState>,
    Json(body): Json<SignInRequest>,
) -> ApiResult {
    require(&[&body.email, &body.password], "Informe email e senha.")?;
    check_rate_limit(state.limiter.as_ref(), rate_limit::SIGN_IN, &body.email).await?;

    let session = state.auth.sign_in(body.email.trim(), &body.password).await?;
    Ok(Json(json!(session)))
}

pub async fn forgot_password(
    State(state): State<AppState>,
    Json(body): Json<ForgotPasswordRequest>,
) -> ApiResult {
    check_rate_limit(state.limiter.as_ref(), rate_limit::PASSWORD_RESET, &body.email).await?;

    let message = state.auth.request_password_reset(&body.email).await?;
    Ok(Json(json!({ "message": message })))
}

pub async fn reset_password(
    State(state): State<AppState>,
    Json(body): Json<ConfirmResetRequest>,
) -> ApiResult {
    check_rate_limit(state.limiter.as_ref(), rate_limit::PASSWORD_RESET, &body.email).await?;

    let message = state
        .auth
        .confirm_password_reset(&body.email, &body.code, &body.new_password)
        .await?;
    Ok(Json(json!({ "message": message })))
}

/// Current user as stored; fails (and ends the session) when access is gone.
pub async fn session(State(state): State<AppState>, user: AuthenticatedUser) -> ApiResult {
    let current = state.auth.hydrate(&user).await?;
    Ok(Json(json!({ "user": current })))
}

pub async fn logout(State(state): State<AppState>, user: AuthenticatedUser) -> ApiResult {
    state.auth.logout(&user).await?;
    Ok(Json(json!({ "message": "Sessão encerrada." })))
}

pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<UpdateProfileRequest>,
) -> ApiResult {
    let session = state.auth.update_profile(&user, &body).await?;
    Ok(Json(json!(session)))
}

/// Multipart avatar upload; the first file part is used.
pub async fn upload_photo(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    mut multipart: Multipart,
) -> ApiResult {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PortalError::Validation(format!("Upload inválido: {e}")))?
    {
        if field.file_name().is_none() && field.name() != Some("photo") {
            continue;
        }
        let is_image = field
            .content_type()
            .and_then(|ct| ct.parse::<mime::Mime>().ok())
            .is_some_and(|m| m.type_() == mime::IMAGE);
        if !is_image {
            return Err(PortalError::Validation(
                "Por favor, selecione um arquivo de imagem.".into(),
            )
            .into());
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| PortalError::Validation(format!("Upload inválido: {e}")))?;
        upload = Some(bytes);
        break;
    }

    let Some(bytes) = upload else {
        return Err(PortalError::Validation("Nenhuma imagem enviada.".into()).into());
    };
    let data_url = avatar::prepare_avatar(bytes).await?;
    let session = state.auth.update_photo(&user, &data_url).await?;
    Ok(Json(json!(session)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::user::UserRole, testing};
    use axum::{
        body::Body,
        extract::FromRequest,
        http::{header, Request},
    };

    const BOUNDARY: &str = "portal-test-boundary";

    async fn multipart(content_type: &str, payload: &str) -> Multipart {
        let body = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"photo\"; filename=\"upload\"\r\n\
             Content-Type: {content_type}\r\n\r\n\
             {payload}\r\n\
             --{BOUNDARY}--\r\n"
        );
        let request = Request::builder()
            .method("POST")
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap();
        Multipart::from_request(request, &()).await.unwrap()
    }

    #[tokio::test]
    async fn upload_of_a_non_image_is_rejected() {
        let state = testing::state();
        let (status, body) = upload_photo(
            State(state),
            testing::caller("ana@icone.com", UserRole::User),
            multipart("text/plain", "not a picture").await,
        )
        .await
        .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Por favor, selecione um arquivo de imagem.");
    }

    #[tokio::test]
    async fn image_type_with_undecodable_bytes_is_rejected() {
        let state = testing::state();
        let (status, _) = upload_photo(
            State(state.clone()),
            testing::caller("ana@icone.com", UserRole::User),
            multipart("image/png", "garbage").await,
        )
        .await
        .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(state.profiles.photo_of("ana@icone.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sign_in_requires_both_fields() {
        let state = testing::state();
        let (status, _) = sign_in(
            State(state),
            Json(SignInRequest { email: "ana@icone.com".into(), password: " ".into() }),
        )
        .await
        .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
