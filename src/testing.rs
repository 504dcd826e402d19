//! Shared fixtures for handler and extractor tests: an `AppState` wired to
//! in-memory stores, and signed tokens for it.

use std::sync::Arc;

use axum::http::{header, request::Parts, Request};

use crate::{
    config::{Config, StoreBackend},
    models::{
        auth::AuthenticatedUser,
        user::{PortalUser, UserRole},
    },
    services::{
        announcements::AnnouncementService,
        apps_script::AppsScriptClient,
        assistant::AssistantService,
        catalog::CatalogService,
        live::LiveHub,
        memory::{
            InMemoryAnnouncementStore, InMemoryAttemptCounter, InMemoryPhotoStore,
            InMemoryProfileStore, InMemorySessionEpochs,
        },
        profiles::ProfileService,
        session::{generate_access_token, AuthService},
    },
    AppState,
};

pub const SECRET: &str = "test-secret";

fn config() -> Config {
    Config {
        redis_url: "redis://127.0.0.1:6379".into(),
        jwt_secret: SECRET.into(),
        jwt_expiry_seconds: 3600,
        host: "127.0.0.1".into(),
        port: 0,
        app_base_url: "http://localhost".into(),
        // Nothing listens there; tests never reach the script.
        apps_script_url: "http://127.0.0.1:9/exec".into(),
        store_backend: StoreBackend::Memory,
        firebase_database_url: String::new(),
        firebase_project_id: String::new(),
        firebase_api_key: None,
        firebase_auth_token: None,
        gemini_api_key: None,
        gemini_model: "gemini-2.5-flash".into(),
        access_poll_seconds: 30,
        departments_file: None,
    }
}

pub fn state() -> AppState {
    let config = config();
    let profiles = ProfileService::new(
        Arc::new(InMemoryProfileStore::new()),
        Arc::new(InMemoryPhotoStore::new()),
    );
    let hub = LiveHub::new();
    let auth = AuthService::new(
        AppsScriptClient::new(reqwest::Client::new(), config.apps_script_url.clone()),
        profiles.clone(),
        Arc::new(InMemorySessionEpochs::new()),
        hub.clone(),
        SECRET,
        config.jwt_expiry_seconds,
    );

    AppState {
        limiter: Arc::new(InMemoryAttemptCounter::new()),
        config: Arc::new(config),
        announcements: AnnouncementService::new(
            Arc::new(InMemoryAnnouncementStore::new()),
            hub.clone(),
        ),
        profiles,
        auth,
        assistant: AssistantService::default(),
        hub,
        departments: Arc::new(CatalogService::builtin().unwrap()),
    }
}

/// Create the user's record with `role`, active.
pub async fn seed_user(state: &AppState, email: &str, role: UserRole) {
    let user = PortalUser {
        email: email.into(),
        display_name: "Teste".into(),
        ..Default::default()
    };
    state.profiles.ensure_profile(user).await.unwrap();
    state.profiles.update_role(email, role).await.unwrap();
}

pub fn caller(email: &str, role: UserRole) -> AuthenticatedUser {
    AuthenticatedUser {
        email: email.into(),
        name: "Teste".into(),
        role,
        epoch: 0,
    }
}

/// Request parts carrying a valid bearer token whose role claim is `role`.
pub fn bearer_parts(state: &AppState, email: &str, role: UserRole) -> Parts {
    let user = PortalUser {
        email: email.into(),
        display_name: "Teste".into(),
        role: Some(role),
        ..Default::default()
    };
    let token = generate_access_token(&user, 0, &state.config.jwt_secret, 3600).unwrap();
    let (parts, _) = Request::builder()
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(())
        .unwrap()
        .into_parts();
    parts
}
