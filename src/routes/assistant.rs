use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::{
    error::PortalError,
    middleware::rate_limit::{self, check_rate_limit},
    models::{
        assistant::{AskRequest, AskResponse, SearchRequest},
        auth::AuthenticatedUser,
    },
    AppState,
};

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

pub async fn ask(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<AskRequest>,
) -> ApiResult {
    check_rate_limit(state.limiter.as_ref(), rate_limit::ASSISTANT, &user.email).await?;

    let text = state.assistant.ask(&body.prompt).await.map_err(PortalError::from)?;
    Ok(Json(json!(AskResponse { text })))
}

pub async fn search(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<SearchRequest>,
) -> ApiResult {
    check_rate_limit(state.limiter.as_ref(), rate_limit::ASSISTANT, &user.email).await?;

    let result = state.assistant.search(&body.query).await.map_err(PortalError::from)?;
    Ok(Json(json!(result)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::user::UserRole, testing};

    #[tokio::test]
    async fn unconfigured_assistant_answers_503() {
        let state = testing::state();
        let (status, body) = ask(
            State(state),
            testing::caller("ana@icone.com", UserRole::User),
            Json(AskRequest { prompt: "Qual o horário do RH?".into() }),
        )
        .await
        .unwrap_err();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "O assistente não está configurado neste servidor.");
    }

    #[tokio::test]
    async fn blank_search_is_a_bad_request() {
        let state = testing::state();
        let (status, _) = search(
            State(state),
            testing::caller("ana@icone.com", UserRole::User),
            Json(SearchRequest { query: "   ".into() }),
        )
        .await
        .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn assistant_calls_are_rate_limited_per_user() {
        let state = testing::state();
        for _ in 0..rate_limit::ASSISTANT.max_attempts {
            let _ = ask(
                State(state.clone()),
                testing::caller("ana@icone.com", UserRole::User),
                Json(AskRequest { prompt: "oi".into() }),
            )
            .await;
        }
        let (status, _) = ask(
            State(state),
            testing::caller("ana@icone.com", UserRole::User),
            Json(AskRequest { prompt: "oi".into() }),
        )
        .await
        .unwrap_err();
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }
}
