use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};

use crate::{
    error::PortalResult,
    middleware::admin::AdminUser,
    models::{
        announcement::{AnnouncementListItem, CreateAnnouncementRequest},
        auth::AuthenticatedUser,
    },
    services::announcements::Participant,
    AppState,
};

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

/// The caller as they appear in view lists and author lines.
async fn participant(state: &AppState, user: &AuthenticatedUser) -> PortalResult<Participant> {
    let name = if user.name.trim().is_empty() {
        user.email.clone()
    } else {
        user.name.clone()
    };
    Ok(Participant {
        id: user.email.clone(),
        name,
        photo_url: state.profiles.photo_of(&user.email).await?,
    })
}

/// Visible announcements, newest first, with their countdown labels.
pub async fn list_announcements(State(state): State<AppState>) -> ApiResult {
    let now = Utc::now();
    let items: Vec<AnnouncementListItem> = state
        .announcements
        .list_visible(now)
        .await?
        .into_iter()
        .map(|a| AnnouncementListItem::new(a, now))
        .collect();
    Ok(Json(json!(items)))
}

pub async fn create_announcement(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Json(body): Json<CreateAnnouncementRequest>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let author = participant(&state, &admin).await?;
    let now = Utc::now();
    let announcement = state
        .announcements
        .create(&body.title, &body.content, &author, now)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!(AnnouncementListItem::new(announcement, now))),
    ))
}

/// Mark every visible announcement as seen by the caller.
pub async fn mark_all_viewed(State(state): State<AppState>, user: AuthenticatedUser) -> ApiResult {
    let viewer = participant(&state, &user).await?;
    let recorded = state.announcements.mark_all_viewed(&viewer, Utc::now()).await?;
    Ok(Json(json!({ "recorded": recorded })))
}

pub async fn record_view(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<String>,
) -> ApiResult {
    let viewer = participant(&state, &user).await?;
    let recorded = state.announcements.record_view(&id, &viewer, Utc::now()).await?;
    Ok(Json(json!({ "recorded": recorded })))
}

pub async fn list_views(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(id): Path<String>,
) -> ApiResult {
    let views = state.announcements.views(&id, Utc::now()).await?;
    Ok(Json(json!(views)))
}
