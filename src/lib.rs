// Library exports for binary tools and tests
pub mod config;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use config::Config;
use middleware::rate_limit::AttemptCounter;
use models::catalog::Department;
use services::{
    announcements::AnnouncementService, assistant::AssistantService, live::LiveHub,
    profiles::ProfileService, session::AuthService,
};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<dyn AttemptCounter>,
    pub config: Arc<Config>,
    pub profiles: ProfileService,
    pub announcements: AnnouncementService,
    pub auth: AuthService,
    pub assistant: AssistantService,
    pub hub: LiveHub,
    pub departments: Arc<Vec<Department>>,
}
