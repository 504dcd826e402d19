use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::{Datelike, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{error::PortalError, models::auth::AuthenticatedUser, AppState};

#[derive(Debug, Deserialize)]
pub struct BirthdayQuery {
    pub month: Option<u32>,
}

/// Birthday roster for `?month=` (1-12), defaulting to the current month.
pub async fn list_birthdays(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Query(query): Query<BirthdayQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let month = query.month.unwrap_or_else(|| Utc::now().month());
    if !(1..=12).contains(&month) {
        return Err(PortalError::Validation("Mês inválido.".into()).into());
    }
    let entries = state.profiles.birthdays_in_month(month).await?;
    Ok(Json(json!({ "month": month, "birthdays": entries })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::user::UserRole, testing};

    #[tokio::test]
    async fn month_out_of_range_is_rejected() {
        let state = testing::state();
        for month in [0, 13] {
            let (status, body) = list_birthdays(
                State(state.clone()),
                testing::caller("ana@icone.com", UserRole::User),
                Query(BirthdayQuery { month: Some(month) }),
            )
            .await
            .unwrap_err();
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["error"], "Mês inválido.");
        }
    }

    #[tokio::test]
    async fn roster_lists_the_requested_month() {
        let state = testing::state();
        let user = crate::models::user::PortalUser {
            email: "ana@icone.com".into(),
            display_name: "ANA".into(),
            birthday: Some("1990-07-14".into()),
            ..Default::default()
        };
        state.profiles.ensure_profile(user).await.unwrap();

        let Json(body) = list_birthdays(
            State(state),
            testing::caller("ana@icone.com", UserRole::User),
            Query(BirthdayQuery { month: Some(7) }),
        )
        .await
        .unwrap();
        assert_eq!(body["month"], 7);
        assert_eq!(body["birthdays"][0]["day"], 14);
    }
}
