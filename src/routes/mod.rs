pub mod announcements;
pub mod assistant;
pub mod auth;
pub mod birthdays;
pub mod departments;
pub mod health;
pub mod metrics;
pub mod users;
pub mod websocket;
