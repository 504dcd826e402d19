use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::AppState;

/// Departments and the external tools each one links to.
pub async fn list_departments(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.departments.as_slice()))
}
