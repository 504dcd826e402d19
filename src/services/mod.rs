pub mod announcements;
pub mod apps_script;
pub mod assistant;
pub mod avatar;
pub mod catalog;
pub mod firebase;
pub mod live;
pub mod memory;
pub mod metrics;
pub mod profiles;
pub mod session;
pub mod store;
