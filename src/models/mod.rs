pub mod announcement;
pub mod assistant;
pub mod auth;
pub mod catalog;
pub mod user;
