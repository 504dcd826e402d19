use std::time::Duration;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::Response,
    Json,
};
use chrono::Utc;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::{
    models::{
        announcement::AnnouncementListItem,
        auth::AuthenticatedUser,
        user::{normalize_email, AccessStatus},
    },
    AppState,
};

/// Expiry is time-based, so the list is re-sent even without changes.
const REFRESH_EVERY: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
pub struct WsQueryParams {
    pub token: String,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsQueryParams>,
) -> Result<Response, (StatusCode, Json<Value>)> {
    let user = state.auth.authenticate(&params.token).await?;
    Ok(ws.on_upgrade(move |socket| async move {
        info!("WebSocket connected: user={}", user.email);
        handle_socket(socket, state, user).await;
    }))
}

async fn announcements_message(state: &AppState) -> Option<Message> {
    let now = Utc::now();
    match state.announcements.list_visible(now).await {
        Ok(list) => {
            let items: Vec<AnnouncementListItem> = list
                .into_iter()
                .map(|a| AnnouncementListItem::new(a, now))
                .collect();
            let msg = json!({ "type": "announcements", "payload": items });
            Some(Message::Text(msg.to_string().into()))
        }
        Err(e) => {
            warn!("WebSocket announcement refresh failed: {}", e);
            None
        }
    }
}

fn access_message(status: AccessStatus) -> Message {
    let msg = json!({
        "type": "access",
        "payload": status,
        "message": status.message(),
    });
    Message::Text(msg.to_string().into())
}

async fn close_for(sender: &mut SplitSink<WebSocket, Message>, status: AccessStatus) {
    let _ = sender.send(access_message(status)).await;
    let _ = sender
        .send(Message::Close(Some(CloseFrame {
            code: 4003,
            reason: status.message().unwrap_or("access revoked").into(),
        })))
        .await;
}

async fn handle_socket(socket: WebSocket, state: AppState, user: AuthenticatedUser) {
    let (mut sender, mut receiver) = socket.split();

    let status = match state.profiles.access_status(&user.email).await {
        Ok(status) => status,
        Err(e) => {
            warn!("WebSocket access check for {} failed: {}", user.email, e);
            return;
        }
    };
    if !status.has_access {
        close_for(&mut sender, status).await;
        return;
    }

    // Subscribe before the first snapshot so no change slips between them.
    let mut announcements_rx = state.hub.subscribe_announcements();
    let mut access_rx = state.hub.subscribe_access();
    let _watch = state.hub.watch(&user.email, status);

    if sender.send(access_message(status)).await.is_err() {
        return;
    }
    if let Some(msg) = announcements_message(&state).await {
        if sender.send(msg).await.is_err() {
            return;
        }
    }

    let email = normalize_email(&user.email);
    let push_state = state.clone();
    let mut push_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(REFRESH_EVERY);
        ticker.tick().await;
        loop {
            let outgoing = tokio::select! {
                changed = announcements_rx.recv() => match changed {
                    Ok(()) | Err(RecvError::Lagged(_)) => announcements_message(&push_state).await,
                    Err(RecvError::Closed) => break,
                },
                change = access_rx.recv() => match change {
                    Ok(change) if change.email == email => {
                        if !change.status.has_access {
                            info!("Closing WebSocket of {}: {:?}", email, change.status.reason);
                            close_for(&mut sender, change.status).await;
                            break;
                        }
                        Some(access_message(change.status))
                    }
                    Ok(_) => None,
                    // Missed events may include ours; ask the store.
                    Err(RecvError::Lagged(_)) => match push_state.profiles.access_status(&email).await {
                        Ok(status) if !status.has_access => {
                            close_for(&mut sender, status).await;
                            break;
                        }
                        _ => None,
                    },
                    Err(RecvError::Closed) => break,
                },
                _ = ticker.tick() => announcements_message(&push_state).await,
            };
            if let Some(msg) = outgoing {
                if sender.send(msg).await.is_err() {
                    break;
                }
            }
        }
    });

    let client_email = user.email.clone();
    let mut client_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => debug!("WS message from {}: {}", client_email, text),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut push_task) => client_task.abort(),
        _ = (&mut client_task) => push_task.abort(),
    }

    info!("WebSocket disconnected: user={}", user.email);
}
